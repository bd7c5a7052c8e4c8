//! EventStore abstraction: the engine's interface to a calendar service.

mod error;
mod memory;
mod store;

pub use error::{StoreError, StoreErrorCode, StoreResult};
pub use memory::{InMemoryStore, OpCounts};
pub use store::{BoxFuture, EventStore};
