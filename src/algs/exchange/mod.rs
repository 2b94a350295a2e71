//! Point-to-point exchange stages built on
//! [`Communicator`](crate::algs::communicator::Communicator).
//!
//! Setup runs `size_exchange` then `index_exchange` once per plan; Update runs
//! `bulk_exchange` on every call.

pub mod bulk_exchange;
pub mod index_exchange;
pub mod size_exchange;

pub use bulk_exchange::{BulkExchange, staged_exchange};
pub use index_exchange::exchange_indices;
pub use size_exchange::{Announcement, exchange_sizes};
