// ABOUTME: Reconstructs each vehicle's route from its stored snapshots in capture-time order.
// ABOUTME: One forward pass per vehicle compares every snapshot with the one before it; vehicles scan concurrently.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleetroute_core::{Transition, VehicleSnapshot};
use fleetroute_store::{Field, Filter, Sink, StoreError};
use futures::{Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RouteConfig;

/// Errors that abort route reconstruction.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("snapshots of {identity} out of order: {current} came after {previous}")]
    OutOfOrder {
        identity: String,
        previous: DateTime<Utc>,
        current: DateTime<Utc>,
    },
}

/// One snapshot on a route. `transition` compares it with the previous
/// step and is `None` for the first step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteStep {
    pub snapshot: VehicleSnapshot,
    pub transition: Option<Transition>,
}

/// A vehicle's snapshots in capture-time order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub identity: String,
    pub steps: Vec<RouteStep>,
}

/// Per-vehicle totals for logging.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSummary {
    pub identity: String,
    pub steps: usize,
    pub material_changes: usize,
    pub moves: usize,
    pub total_distance_meters: f64,
    pub refuels: usize,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl Route {
    /// The snapshot the scan ended on.
    pub fn last(&self) -> Option<&VehicleSnapshot> {
        self.steps.last().map(|step| &step.snapshot)
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.steps.iter().filter_map(|step| step.transition.as_ref())
    }

    pub fn summary(&self) -> RouteSummary {
        let moved: Vec<&Transition> = self.transitions().filter(|t| t.moved).collect();
        RouteSummary {
            identity: self.identity.clone(),
            steps: self.steps.len(),
            material_changes: self.transitions().filter(|t| t.is_material()).count(),
            moves: moved.len(),
            total_distance_meters: moved.iter().map(|t| t.distance_meters).sum(),
            refuels: self.transitions().filter(|t| t.refueled).count(),
            first_seen: self.steps.first().map(|s| s.snapshot.captured_at),
            last_seen: self.last().map(|s| s.captured_at),
        }
    }
}

/// Walks every vehicle's stored snapshots and derives its route.
pub struct RouteReconstructor {
    config: RouteConfig,
    sink: Arc<dyn Sink>,
}

impl RouteReconstructor {
    pub fn new(config: RouteConfig, sink: Arc<dyn Sink>) -> Self {
        Self { config, sink }
    }

    /// Every vehicle identity present in the store.
    pub async fn identities(&self) -> Result<BTreeSet<String>, RouteError> {
        Ok(self.sink.distinct_values(Field::Identity).await?)
    }

    /// Reconstruct one vehicle's route with a single forward scan over its
    /// snapshots, sorted ascending by capture time by the store.
    pub async fn reconstruct(&self, identity: &str) -> Result<Route, RouteError> {
        tracing::info!("extracting routes of {}...", identity);

        let mut stream = self
            .sink
            .find_sorted(Filter::Identity(identity.to_string()), Field::CapturedAt)
            .await?;

        let mut steps: Vec<RouteStep> = Vec::new();
        while let Some(current) = stream.try_next().await? {
            let transition = match steps.last() {
                Some(previous) => {
                    let previous = &previous.snapshot;
                    if current.captured_at < previous.captured_at {
                        return Err(RouteError::OutOfOrder {
                            identity: identity.to_string(),
                            previous: previous.captured_at,
                            current: current.captured_at,
                        });
                    }
                    Some(self.config.rules.compare(previous, &current))
                }
                None => None,
            };

            if let Some(t) = &transition
                && t.is_material()
            {
                tracing::debug!(
                    "{} at {}: moved {:.0} m, fuel {:+}, cleanliness {}",
                    identity,
                    current.captured_at,
                    if t.moved { t.distance_meters } else { 0.0 },
                    t.fuel_delta,
                    t.cleanliness_change
                        .as_ref()
                        .map_or_else(|| "unchanged".to_string(), |c| format!("{} -> {}", c.from, c.to))
                );
            }

            steps.push(RouteStep {
                snapshot: current,
                transition,
            });
        }

        Ok(Route {
            identity: identity.to_string(),
            steps,
        })
    }

    /// Stream the route of every vehicle in the store, ordered by identity.
    /// Up to `scan_concurrency` vehicles are scanned at once and only those
    /// routes are held in memory; each is yielded as soon as it and every
    /// identity before it are done.
    pub async fn stream_routes(
        &self,
    ) -> Result<impl Stream<Item = Result<Route, RouteError>> + '_, RouteError> {
        let identities = self.identities().await?;
        tracing::info!("reconstructing routes of {} vehicles", identities.len());

        Ok(futures::stream::iter(identities)
            .map(move |identity| async move { self.reconstruct(&identity).await })
            .buffered(self.config.scan_concurrency.max(1)))
    }

    /// Collect every route. Holds all of them in memory, so prefer
    /// [`RouteReconstructor::stream_routes`] for whole stores.
    pub async fn reconstruct_all(&self) -> Result<Vec<Route>, RouteError> {
        self.stream_routes().await?.try_collect().await
    }
}
