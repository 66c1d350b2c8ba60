//! Lattice Events
//!
//! This crate provides composable, type-polymorphic event pipelines. It
//! implements:
//!
//! - Event sources (synchronous and asynchronous multicast events)
//! - Observer chains (filter, map, type narrowing, error catching,
//!   self-disposal, lifecycle binding, debouncing, concurrency limiting)
//! - Reusable primitives (disposables, debouncer, transaction gate,
//!   keyed action buffer, derived property index)
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `event`: `Event` and `AsyncEvent`, the roots of every pipeline
//! - `chain`: observer chain stages built on top of an event
//! - `disposable`, `cancel`, `lifecycle`: teardown and "no more events" signals
//! - `dispatch`: the dispatcher capability async stages schedule work on
//! - `debounce`, `transaction`, `buffer`, `property`: standalone primitives
//!
//! # Example
//!
//! ```rust
//! use lattice_events::{Dispose, Event};
//!
//! let clicks = Event::<(u32, u32)>::new();
//!
//! let chain = clicks
//!     .observe()
//!     .filter(|(x, _)| *x < 100)
//!     .map(|(x, y)| x + y)
//!     .for_each(|sum| {
//!         println!("sum: {sum}");
//!         Ok(())
//!     });
//!
//! clicks.raise(&(10, 20)).unwrap(); // prints "sum: 30"
//! clicks.raise(&(500, 1)).unwrap(); // filtered out
//!
//! chain.dispose();
//! assert!(clicks.is_empty());
//! ```

pub mod buffer;
pub mod cancel;
pub mod chain;
pub mod debounce;
pub mod dispatch;
pub mod disposable;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod property;
pub mod transaction;

pub use buffer::ActionBuffer;
pub use cancel::{CancellationRegistration, CancellationSource, CancellationToken};
pub use chain::{
    AsyncDisposeListener, AsyncObserver, BufferLimit, DisposeListener, LimitOptions, Narrow,
    Observer,
};
pub use debounce::Debouncer;
pub use dispatch::{Dispatcher, ErrorHandler, TokioDispatcher, Work};
pub use disposable::{Disposable, Dispose};
pub use error::{EventError, EventResult};
pub use event::{AsyncEvent, AsyncHandler, Event, Handler, HandlerId};
pub use lifecycle::{Lifecycle, Lifetime};
pub use property::PropertyIndex;
pub use transaction::{Transaction, TransactionHandle};
