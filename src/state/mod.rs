//! Reactive state: value cells, derived values, and the keyed store.
//!
//! Three primitives share one notification discipline (snapshot under the
//! lock, notify `(new, old)` outside it, in subscription order):
//!
//! - [`Observable`] holds one value.
//! - [`Computed`] derives a value from declared dependencies.
//! - [`Store`] holds named slices, each driven by a pure reducer, with a
//!   middleware chain in front of dispatch.

pub mod computed;
pub mod observable;
pub mod store;

pub use computed::Computed;
pub use observable::{Observable, Subscription};
pub use store::{Action, Middleware, Reducer, Store, logger, persist};
