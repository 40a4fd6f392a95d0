//! Run identity, idempotent admission and lifecycle records.

mod idempotency;
mod runs;

pub use idempotency::{Admission, IdempotencyIndex};
pub use runs::RunRegistry;
