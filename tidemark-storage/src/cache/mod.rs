//! Store adapters for the query-store and durable-store seams.

pub mod lmdb_backend;
pub mod memory;

pub use lmdb_backend::{LmdbDurableStore, LmdbStoreError};
pub use memory::{InMemoryDurableStore, InMemoryQueryStore, QueryEntry};
