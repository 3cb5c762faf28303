//! Run-scoped cooperative cancellation.
//!
//! One [`CancellationToken`] is created per run and threaded through every
//! suspension point: lease waits, backoff sleeps and collaborator calls.

mod token;

pub use token::{CancelCallback, CancellationToken};
