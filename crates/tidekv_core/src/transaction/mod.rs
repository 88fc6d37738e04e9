//! Transaction management.
//!
//! tidekv runs any number of read-only transactions next to at most one
//! read-write transaction:
//! - **Isolation**: readers work on an immutable snapshot taken at begin
//! - **Atomicity**: a commit is one log record and one pointer swap
//! - **Durability**: commits are appended to the persistence log first

mod manager;
mod state;

pub(crate) use manager::apply_op;
pub use manager::{CommittedState, TransactionManager};
pub use state::{Transaction, TransactionState};
