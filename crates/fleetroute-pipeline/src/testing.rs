// ABOUTME: Test utilities for fleetroute-pipeline: raw snapshot file fixtures and a sink that rejects inserts.
// ABOUTME: Used by unit tests here and by the workspace end-to-end tests.

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleetroute_core::VehicleSnapshot;
use fleetroute_store::{Field, Filter, MemorySink, Sink, SnapshotStream, StoreError};

/// One vehicle entry as it appears in a raw snapshot file.
#[derive(Debug, Clone)]
pub struct RawVehicleFixture {
    pub name: String,
    pub fuel: String,
    pub cleanliness: String,
    pub plate: String,
    pub address: String,
    pub latitude: String,
    pub longitude: String,
}

impl RawVehicleFixture {
    /// A clean, full vehicle parked at Leopoldstraße in Munich.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fuel: "80".to_string(),
            cleanliness: "CLEAN".to_string(),
            plate: format!("M-DN {}", name),
            address: "Leopoldstr. 1, 80802 München".to_string(),
            latitude: "48.1549".to_string(),
            longitude: "11.5843".to_string(),
        }
    }

    pub fn fuel(mut self, fuel: &str) -> Self {
        self.fuel = fuel.to_string();
        self
    }

    pub fn cleanliness(mut self, cleanliness: &str) -> Self {
        self.cleanliness = cleanliness.to_string();
        self
    }

    pub fn at(mut self, address: &str, latitude: &str, longitude: &str) -> Self {
        self.address = address.to_string();
        self.latitude = latitude.to_string();
        self.longitude = longitude.to_string();
        self
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "carName": self.name,
            "fuelState": self.fuel,
            "innerCleanliness": self.cleanliness,
            "licensePlate": self.plate,
            "position": {
                "address": self.address,
                "latitude": self.latitude,
                "longitude": self.longitude
            }
        })
    }
}

/// Wrap vehicle entries in the `rec.vehicles.vehicles` envelope.
pub fn envelope_json(vehicles: &[RawVehicleFixture]) -> String {
    let list: Vec<serde_json::Value> = vehicles.iter().map(RawVehicleFixture::to_json).collect();
    serde_json::json!({ "rec": { "vehicles": { "vehicles": list } } }).to_string()
}

/// Write `<dir>/<secs>.json` holding the given vehicles. Returns the path.
pub fn write_snapshot_file(dir: &Path, secs: i64, vehicles: &[RawVehicleFixture]) -> PathBuf {
    write_raw_file(dir, &format!("{}.json", secs), &envelope_json(vehicles))
}

/// Write arbitrary content to `<dir>/<name>`, creating `dir` if needed.
pub fn write_raw_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    fs::create_dir_all(dir).expect("create raw folder");
    let path = dir.join(name);
    fs::write(&path, content).expect("write raw file");
    path
}

/// A sink that stores into a [`MemorySink`] but rejects inserts for the
/// listed identities.
pub struct RejectingSink {
    pub inner: MemorySink,
    rejected: HashSet<String>,
}

impl RejectingSink {
    pub fn new<I, S>(rejected: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: MemorySink::new(),
            rejected: rejected.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl Sink for RejectingSink {
    async fn insert(&self, snapshot: &VehicleSnapshot) -> Result<(), StoreError> {
        if self.rejected.contains(&snapshot.identity) {
            return Err(StoreError::Unavailable(format!(
                "insert of {} rejected",
                snapshot.identity
            )));
        }
        self.inner.insert(snapshot).await
    }

    async fn ensure_index(&self, fields: &[Field]) -> Result<(), StoreError> {
        self.inner.ensure_index(fields).await
    }

    async fn distinct_values(&self, field: Field) -> Result<BTreeSet<String>, StoreError> {
        self.inner.distinct_values(field).await
    }

    async fn find_sorted(&self, filter: Filter, sort: Field) -> Result<SnapshotStream, StoreError> {
        self.inner.find_sorted(filter, sort).await
    }

    async fn count(&self) -> Result<u64, StoreError> {
        self.inner.count().await
    }

    fn describe(&self) -> String {
        "rejecting memory".to_string()
    }
}
