//! Structured events emitted by the dispatcher.
//!
//! Each event writes one tracing record and updates the matching `metrics` series, so
//! callers get the same picture whether they install a subscriber, a recorder, or both.

mod dispatch;

pub use dispatch::*;

pub trait InternalEvent: Sized {
    fn emit(self);
}
