// ABOUTME: In-memory snapshot sink used for tests and throwaway runs (memory:// URLs).
// ABOUTME: Keeps snapshots in insertion order and sorts a copy per query.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use fleetroute_core::VehicleSnapshot;
use futures::StreamExt;

use crate::sink::{Field, Filter, Sink, SnapshotStream, StoreError};

#[derive(Debug, Default)]
struct Inner {
    snapshots: Vec<VehicleSnapshot>,
    indexes: BTreeSet<Vec<Field>>,
}

/// A sink holding every snapshot in a Vec.
#[derive(Debug, Default)]
pub struct MemorySink {
    inner: Mutex<Inner>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory sink lock poisoned".to_string()))
    }

    /// Copy of every stored snapshot in insertion order.
    pub fn snapshots(&self) -> Vec<VehicleSnapshot> {
        self.lock().map(|inner| inner.snapshots.clone()).unwrap_or_default()
    }

    /// Field lists passed to `ensure_index` so far.
    pub fn indexes(&self) -> Vec<Vec<Field>> {
        self.lock()
            .map(|inner| inner.indexes.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Sink for MemorySink {
    async fn insert(&self, snapshot: &VehicleSnapshot) -> Result<(), StoreError> {
        self.lock()?.snapshots.push(snapshot.clone());
        Ok(())
    }

    async fn ensure_index(&self, fields: &[Field]) -> Result<(), StoreError> {
        if !fields.is_empty() {
            self.lock()?.indexes.insert(fields.to_vec());
        }
        Ok(())
    }

    async fn distinct_values(&self, field: Field) -> Result<BTreeSet<String>, StoreError> {
        Ok(self
            .lock()?
            .snapshots
            .iter()
            .map(|s| field.value_of(s))
            .collect())
    }

    async fn find_sorted(&self, filter: Filter, sort: Field) -> Result<SnapshotStream, StoreError> {
        let mut matched: Vec<VehicleSnapshot> = self
            .lock()?
            .snapshots
            .iter()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();

        // Stable sort keeps insertion order for equal keys.
        match sort {
            Field::Identity => matched.sort_by(|a, b| a.identity.cmp(&b.identity)),
            Field::CapturedAt => matched.sort_by_key(|s| s.captured_at),
        }

        Ok(futures::stream::iter(matched.into_iter().map(Ok)).boxed())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.snapshots.len() as u64)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
