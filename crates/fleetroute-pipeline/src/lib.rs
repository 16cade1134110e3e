// ABOUTME: Ingestion and route reconstruction for fleetroute.
// ABOUTME: Streams raw snapshot files into a sink and derives per-vehicle routes from the stored snapshots.

pub mod config;
pub mod ingest;
pub mod route_log;
pub mod routes;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{ConfigError, IngestConfig, RouteConfig};
pub use ingest::{IngestError, IngestPipeline, IngestReport, WalkSummary, create_indexes};
pub use route_log::{RouteLog, RouteLogError};
pub use routes::{Route, RouteError, RouteReconstructor, RouteStep, RouteSummary};
