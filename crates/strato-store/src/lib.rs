//! strato-store — the storage contracts the core consumes.
//!
//! The Redis and SQL drivers live outside this workspace; they implement
//! the same traits. The in-memory store here is the default driver and
//! the test double.

pub mod error;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryMetricStore, MemoryStore};
pub use store::{AppStore, MetricStore};
