// ABOUTME: Run configuration for ingestion and route reconstruction, built once and passed in.
// ABOUTME: Tuning knobs come from FLEETROUTE_* environment variables with validated defaults.

use std::path::PathBuf;
use std::str::FromStr;

use fleetroute_core::TransitionRules;
use thiserror::Error;

/// Default number of snapshots buffered between the file walker and the sink writer.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default number of vehicles whose routes are scanned at the same time.
pub const DEFAULT_SCAN_CONCURRENCY: usize = 4;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Settings for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub raw_folder: PathBuf,
    pub dry_run: bool,
    pub skip_indexes: bool,
    pub queue_capacity: usize,
}

impl IngestConfig {
    pub fn new(raw_folder: impl Into<PathBuf>) -> Self {
        Self {
            raw_folder: raw_folder.into(),
            dry_run: false,
            skip_indexes: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Load tuning from the environment.
    ///
    /// Environment variables:
    /// - FLEETROUTE_QUEUE_CAPACITY: snapshot queue size (default: 1024)
    pub fn from_env(raw_folder: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        Self::from_lookup(raw_folder, |name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(raw_folder: impl Into<PathBuf>, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let queue_capacity = positive(
            &lookup,
            "FLEETROUTE_QUEUE_CAPACITY",
            DEFAULT_QUEUE_CAPACITY,
        )?;

        Ok(Self {
            queue_capacity,
            ..Self::new(raw_folder)
        })
    }
}

/// Settings for route reconstruction.
#[derive(Debug, Clone)]
pub struct RouteConfig {
    pub rules: TransitionRules,
    pub scan_concurrency: usize,
}

impl Default for RouteConfig {
    fn default() -> Self {
        Self {
            rules: TransitionRules::default(),
            scan_concurrency: DEFAULT_SCAN_CONCURRENCY,
        }
    }
}

impl RouteConfig {
    /// Load tuning from the environment.
    ///
    /// Environment variables:
    /// - FLEETROUTE_SCAN_CONCURRENCY: vehicles scanned at once (default: 4)
    /// - FLEETROUTE_MIN_MOVE_METERS: distance that counts as a move (default: 25)
    /// - FLEETROUTE_REFUEL_THRESHOLD: fuel increase that counts as a refuel (default: 10)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = TransitionRules::default();

        let scan_concurrency = positive(
            &lookup,
            "FLEETROUTE_SCAN_CONCURRENCY",
            DEFAULT_SCAN_CONCURRENCY,
        )?;

        let min_move_meters: f64 = parsed(
            &lookup,
            "FLEETROUTE_MIN_MOVE_METERS",
            defaults.min_move_meters,
            "a non-negative number",
        )?;
        if !(min_move_meters.is_finite() && min_move_meters >= 0.0) {
            return Err(ConfigError::Invalid {
                name: "FLEETROUTE_MIN_MOVE_METERS",
                value: min_move_meters.to_string(),
                expected: "a non-negative number",
            });
        }

        let refuel_threshold = positive(
            &lookup,
            "FLEETROUTE_REFUEL_THRESHOLD",
            defaults.refuel_threshold,
        )?;

        Ok(Self {
            rules: TransitionRules {
                min_move_meters,
                refuel_threshold,
                ..defaults
            },
            scan_concurrency,
        })
    }
}

fn parsed<F, T>(lookup: &F, name: &'static str, default: T, expected: &'static str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        Some(value) => match value.trim().parse() {
            Ok(parsed) => Ok(parsed),
            Err(_) => Err(ConfigError::Invalid {
                name,
                value,
                expected,
            }),
        },
        None => Ok(default),
    }
}

/// An integer strictly greater than zero, parsed in its target type.
fn positive<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + PartialOrd + Default + ToString,
{
    let value: T = parsed(lookup, name, default, "a positive integer")?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            expected: "a positive integer",
        });
    }
    Ok(value)
}
