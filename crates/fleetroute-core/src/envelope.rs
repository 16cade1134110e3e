// ABOUTME: Decoder for the raw snapshot envelope {"rec":{"vehicles":{"vehicles":[...]}}}.
// ABOUTME: Converts quoted numeric fields to numbers; any failure rejects the whole file.

use std::fmt::Display;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, de};
use thiserror::Error;

use crate::model::{Position, VehicleSnapshot};

/// Errors that can occur while decoding one snapshot file.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    rec: RawRec,
}

#[derive(Debug, Deserialize)]
struct RawRec {
    vehicles: RawVehicleList,
}

#[derive(Debug, Deserialize)]
struct RawVehicleList {
    vehicles: Vec<RawVehicle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVehicle {
    car_name: String,
    #[serde(deserialize_with = "from_numeric_string")]
    fuel_state: i64,
    inner_cleanliness: String,
    license_plate: String,
    position: RawPosition,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    address: String,
    #[serde(deserialize_with = "latitude")]
    latitude: f64,
    #[serde(deserialize_with = "longitude")]
    longitude: f64,
}

impl From<RawVehicle> for VehicleSnapshot {
    fn from(raw: RawVehicle) -> Self {
        VehicleSnapshot {
            identity: raw.car_name,
            captured_at: DateTime::<Utc>::default(),
            fuel_level: raw.fuel_state,
            cleanliness: raw.inner_cleanliness,
            license_plate: raw.license_plate,
            position: Position {
                address: raw.position.address,
                latitude: raw.position.latitude,
                longitude: raw.position.longitude,
            },
        }
    }
}

/// The feed sends numbers as JSON strings ("42", "48.15"). Bare numbers are
/// accepted too.
fn from_numeric_string<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr + Deserialize<'de>,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrNumber<T> {
        String(String),
        Number(T),
    }

    match StringOrNumber::<T>::deserialize(deserializer)? {
        StringOrNumber::String(s) => s
            .trim()
            .parse::<T>()
            .map_err(|e| de::Error::custom(format!("invalid numeric string {:?}: {}", s, e))),
        StringOrNumber::Number(n) => Ok(n),
    }
}

fn latitude<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    finite_coordinate(deserializer, "latitude")
}

fn longitude<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    finite_coordinate(deserializer, "longitude")
}

/// Coordinates must be finite. Float parsing accepts "NaN" and "inf", and
/// turns "1e400" into infinity.
fn finite_coordinate<'de, D>(deserializer: D, field: &str) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value: f64 = from_numeric_string(deserializer)?;
    if !value.is_finite() {
        return Err(de::Error::custom(format!(
            "{} must be a finite number, got {}",
            field, value
        )));
    }
    Ok(value)
}

/// Decode one envelope from a reader. Records are returned in array order
/// with `captured_at` left at the Unix epoch for the caller to stamp.
pub fn decode_envelope<R: Read>(reader: R) -> Result<Vec<VehicleSnapshot>, DecodeError> {
    let envelope: RawEnvelope = serde_json::from_reader(BufReader::new(reader))?;
    Ok(into_snapshots(envelope))
}

/// Decode one envelope held in memory.
pub fn decode_envelope_slice(bytes: &[u8]) -> Result<Vec<VehicleSnapshot>, DecodeError> {
    let envelope: RawEnvelope = serde_json::from_slice(bytes)?;
    Ok(into_snapshots(envelope))
}

/// Open and decode a snapshot file. The handle is released when this
/// returns, whether decoding succeeded or not.
pub fn decode_file(path: &Path) -> Result<Vec<VehicleSnapshot>, DecodeError> {
    let file = File::open(path)?;
    decode_envelope(file)
}

fn into_snapshots(envelope: RawEnvelope) -> Vec<VehicleSnapshot> {
    envelope
        .rec
        .vehicles
        .vehicles
        .into_iter()
        .map(VehicleSnapshot::from)
        .collect()
}
