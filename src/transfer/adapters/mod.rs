//! Storage Adapters
//!
//! Implementations of the [`Store`](crate::transfer::store::Store) seam.
//! `postgres` is the production engine; `memory` runs the same row-locking
//! contract in-process for tests and local runs.

pub mod memory;
pub mod postgres;

// Re-export adapters for convenient access
pub use memory::{FailPoint, MemoryStore, MemoryTx};
pub use postgres::{PostgresStore, PostgresTx};
