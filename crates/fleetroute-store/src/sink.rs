// ABOUTME: Defines the Sink trait that every snapshot store must implement.
// ABOUTME: Also defines the queryable fields, filters, the sorted snapshot stream, and StoreError.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use fleetroute_core::VehicleSnapshot;
use futures::stream::BoxStream;
use thiserror::Error;

/// Errors that can occur while talking to a snapshot store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("unsupported store url: {0}")]
    UnsupportedUrl(String),

    #[error("invalid stored row: {0}")]
    InvalidRow(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Snapshot fields the store can index, filter, and sort by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Identity,
    CapturedAt,
}

impl Field {
    /// Column name in the SQLite `raw` table.
    pub fn column(self) -> &'static str {
        match self {
            Field::Identity => "identity",
            Field::CapturedAt => "captured_at",
        }
    }

    /// The field's value on a snapshot, as returned by `distinct_values`.
    pub fn value_of(self, snapshot: &VehicleSnapshot) -> String {
        match self {
            Field::Identity => snapshot.identity.clone(),
            Field::CapturedAt => snapshot.captured_at.to_rfc3339(),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Which snapshots a sorted query returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    All,
    Identity(String),
}

impl Filter {
    pub fn matches(&self, snapshot: &VehicleSnapshot) -> bool {
        match self {
            Filter::All => true,
            Filter::Identity(identity) => snapshot.identity == *identity,
        }
    }
}

/// Lazily produced query results, ascending by the requested sort field.
pub type SnapshotStream = BoxStream<'static, Result<VehicleSnapshot, StoreError>>;

/// A durable home for vehicle snapshots. Records are insert-only: once
/// stored they are never updated.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Store one snapshot.
    async fn insert(&self, snapshot: &VehicleSnapshot) -> Result<(), StoreError>;

    /// Create a non-unique index over the given fields. Idempotent.
    async fn ensure_index(&self, fields: &[Field]) -> Result<(), StoreError>;

    /// Every distinct value of `field`, each exactly once.
    async fn distinct_values(&self, field: Field) -> Result<BTreeSet<String>, StoreError>;

    /// Snapshots matching `filter`, ascending by `sort`. Ties keep insertion
    /// order. Results are streamed, so large result sets are never buffered whole.
    async fn find_sorted(&self, filter: Filter, sort: Field) -> Result<SnapshotStream, StoreError>;

    /// Total number of stored snapshots.
    async fn count(&self) -> Result<u64, StoreError>;

    /// Short description of the backing store for logging.
    fn describe(&self) -> String;
}
