//! Adapters behind the domain ports.

pub mod change_feed;
pub mod in_memory;
pub mod lipwa;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
