//! Observer chains.
//!
//! A chain starts at an event's `observe()` and grows one stage per
//! operator call. Each stage owns a private event that its downstream
//! stages subscribe to, so a chain can branch: two operators called on the
//! same node build two independent continuations.
//!
//! # Disposal
//!
//! Disposing any node detaches that node and every node between it and
//! the source, ending with the subscription on the source itself. Nodes
//! further downstream are left subscribed to events that will never be
//! raised again. Dropping a handle disposes nothing.
//!
//! # Synchronous and asynchronous chains
//!
//! [`Observer`] runs over [`Event`](crate::Event); [`AsyncObserver`] over
//! [`AsyncEvent`](crate::AsyncEvent). `to_async` bridges the first to the
//! second through a dispatcher. Only async chains can `limit`.

mod async_observer;
mod limit;
mod link;
mod narrow;
mod observer;

pub use async_observer::{AsyncDisposeListener, AsyncObserver};
pub use limit::{BufferLimit, LimitOptions};
pub use narrow::Narrow;
pub use observer::{DisposeListener, Observer};
