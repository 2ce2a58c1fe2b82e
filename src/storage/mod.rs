//! Counter storage for tagrace.
//!
//! The [`CounterStore`] trait is the contract the router writes through. Two
//! backends are provided: an in-memory map and a durable, log-structured
//! store under [`persistent`].

pub mod memory;
pub mod persistent;
mod traits;

pub use memory::InMemoryCounterStore;
pub use persistent::{open_store, PersistentConfig, PersistentCounterStore};
pub use traits::{CounterStore, CounterStoreExt, StorageError};
