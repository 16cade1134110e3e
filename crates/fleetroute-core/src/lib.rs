// ABOUTME: Core library for fleetroute, containing the vehicle snapshot model and its on-disk contract.
// ABOUTME: Discovers raw snapshot files, decodes their nested envelope, and compares consecutive snapshots.

pub mod envelope;
pub mod model;
pub mod resolver;
pub mod transition;

pub use envelope::{DecodeError, decode_envelope, decode_envelope_slice, decode_file};
pub use model::{Position, VehicleSnapshot};
pub use resolver::{ResolveError, SnapshotFile, SnapshotFiles, SnapshotResolver, capture_time_from_path};
pub use transition::{CleanlinessChange, Transition, TransitionRules};
