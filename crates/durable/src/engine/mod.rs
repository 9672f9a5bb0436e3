//! The engine: C3 (traversal), C4 (state), C4.4 (reference resolution), and
//! C5 (failure strategy) composed together. [`state`] is the module other
//! crate modules and callers reach for — `traversal`/`reference`/`failure`
//! are its internal collaborators, exposed as `pub` for testing and for
//! [`crate::system_task`], which needs [`reference::ReferenceContext`].

pub mod failure;
pub mod reference;
pub mod state;
pub mod traversal;

pub use state::{apply, cancel_transaction, start_transaction, Effect, TaskStatusUpdate, TimerKind};
