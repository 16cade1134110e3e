// ABOUTME: Persistence layer for fleetroute, receiving vehicle snapshots and serving them back sorted.
// ABOUTME: Provides the Sink trait, a SQLite sink, an in-memory sink, and connection-string parsing.

pub mod connect;
pub mod memory;
pub mod sink;
pub mod sqlite;

pub use connect::{DEFAULT_STORE_URL, StoreUrl, open_sink};
pub use memory::MemorySink;
pub use sink::{Field, Filter, Sink, SnapshotStream, StoreError};
pub use sqlite::SqliteSink;
