//! Type narrowing for `of_type` stages.
//!
//! Instead of runtime reflection, a payload type states which narrower
//! types it can be viewed as by implementing [`Narrow`]. Enums are the
//! natural fit: each variant's inner type gets an implementation.
//!
//! ```
//! use lattice_events::Narrow;
//!
//! #[derive(Clone)]
//! enum Input {
//!     Key(char),
//!     Click { x: i32, y: i32 },
//! }
//!
//! impl Narrow<char> for Input {
//!     fn narrow(&self) -> Option<char> {
//!         match self {
//!             Input::Key(key) => Some(*key),
//!             _ => None,
//!         }
//!     }
//! }
//!
//! assert_eq!(Input::Key('a').narrow(), Some('a'));
//! assert_eq!(Narrow::<char>::narrow(&Input::Click { x: 1, y: 2 }), None);
//! ```

use std::any::Any;
use std::sync::Arc;

/// A payload that can sometimes be viewed as a `B`.
pub trait Narrow<B> {
    /// Return the narrowed value, or `None` when the payload is not a `B`.
    fn narrow(&self) -> Option<B>;
}

/// Dynamically typed payloads narrow by downcasting.
impl<B> Narrow<B> for Arc<dyn Any + Send + Sync>
where
    B: Any + Clone,
{
    fn narrow(&self) -> Option<B> {
        (**self).downcast_ref::<B>().cloned()
    }
}

/// `Option` payloads narrow to their contents.
impl<B: Clone> Narrow<B> for Option<B> {
    fn narrow(&self) -> Option<B> {
        self.clone()
    }
}
