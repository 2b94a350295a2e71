//! Transport layer: communicator backends, wire records and exchange stages.

pub mod communicator;
pub mod exchange;
pub mod wire;

pub use exchange::{BulkExchange, exchange_indices, exchange_sizes};
