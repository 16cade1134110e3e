// ABOUTME: Streaming ingestion of raw snapshot files into a sink.
// ABOUTME: A blocking walker decodes files into a bounded channel while an async consumer inserts records.

use std::future::Future;
use std::sync::Arc;

use fleetroute_core::{SnapshotResolver, VehicleSnapshot, decode_file};
use fleetroute_store::{Field, Sink};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::Instrument;
use ulid::Ulid;

use crate::config::IngestConfig;

/// Errors that abort an ingestion run. Per-file and per-record problems are
/// logged and counted instead.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("snapshot producer failed: {0}")]
    Producer(#[from] tokio::task::JoinError),
}

/// What the file walker did. Returned through the producer's join handle
/// once every file has been visited or the queue was closed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkSummary {
    pub files_decoded: u64,
    pub files_skipped: u64,
    pub records_decoded: u64,
    pub stopped_early: bool,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub run_id: Ulid,
    pub files_decoded: u64,
    pub files_skipped: u64,
    pub records_decoded: u64,
    pub records_inserted: u64,
    pub records_failed: u64,
    pub dry_run: bool,
    pub cancelled: bool,
    pub indexed: bool,
}

impl IngestReport {
    /// Files the walker looked at, decoded or not.
    pub fn files_visited(&self) -> u64 {
        self.files_decoded + self.files_skipped
    }
}

/// Drives the resolver and decoder over a raw folder and feeds every
/// decoded snapshot to the sink.
pub struct IngestPipeline {
    config: IngestConfig,
    sink: Option<Arc<dyn Sink>>,
}

impl IngestPipeline {
    /// Without a sink the pipeline always runs dry.
    pub fn new(config: IngestConfig, sink: Option<Arc<dyn Sink>>) -> Self {
        Self { config, sink }
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run || self.sink.is_none()
    }

    /// Ingest the whole raw folder.
    pub async fn run(&self) -> Result<IngestReport, IngestError> {
        self.run_until(std::future::pending()).await
    }

    /// Ingest until done or until `shutdown` resolves. On shutdown the
    /// in-flight insert completes, the queue is closed, the walker stops at
    /// its next send, and indexes are not created.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<IngestReport, IngestError>
    where
        F: Future<Output = ()>,
    {
        let run_id = Ulid::new();
        let span = tracing::info_span!("ingest", %run_id);
        self.drive(run_id, shutdown).instrument(span).await
    }

    async fn drive<F>(&self, run_id: Ulid, shutdown: F) -> Result<IngestReport, IngestError>
    where
        F: Future<Output = ()>,
    {
        let dry_run = self.is_dry_run();
        let sink = if dry_run { None } else { self.sink.clone() };
        tracing::info!(
            "ingesting {} into {}",
            self.config.raw_folder.display(),
            sink.as_ref().map_or_else(|| "nothing (dry run)".to_string(), |s| s.describe())
        );

        let (tx, mut rx) = mpsc::channel::<VehicleSnapshot>(self.config.queue_capacity.max(1));
        let resolver = SnapshotResolver::new(&self.config.raw_folder);
        let producer_span = tracing::Span::current();
        let producer = tokio::task::spawn_blocking(move || {
            let _entered = producer_span.enter();
            produce(resolver, tx)
        });

        let mut records_inserted = 0u64;
        let mut records_failed = 0u64;
        let mut cancelled = false;

        tokio::pin!(shutdown);
        loop {
            let snapshot = tokio::select! {
                biased;
                _ = &mut shutdown => {
                    tracing::warn!("shutdown requested, stopping ingestion");
                    cancelled = true;
                    break;
                }
                next = rx.recv() => match next {
                    Some(snapshot) => snapshot,
                    None => break,
                },
            };

            let Some(sink) = &sink else {
                continue;
            };
            match sink.insert(&snapshot).await {
                Ok(()) => records_inserted += 1,
                Err(e) => {
                    records_failed += 1;
                    tracing::error!(
                        "inserting of {} ({}) failed: {}",
                        snapshot.identity,
                        snapshot.captured_at,
                        e
                    );
                }
            }
        }

        // Closing the queue makes the walker's next send fail.
        drop(rx);
        let walk = producer.await?;

        let mut indexed = false;
        if let Some(sink) = &sink
            && !cancelled
            && !self.config.skip_indexes
        {
            indexed = create_indexes(sink.as_ref()).await;
        }

        let report = IngestReport {
            run_id,
            files_decoded: walk.files_decoded,
            files_skipped: walk.files_skipped,
            records_decoded: walk.records_decoded,
            records_inserted,
            records_failed,
            dry_run,
            cancelled,
            indexed,
        };

        tracing::info!(
            "ingestion finished: {} files decoded, {} skipped, {} records decoded, {} inserted, {} failed",
            report.files_decoded,
            report.files_skipped,
            report.records_decoded,
            report.records_inserted,
            report.records_failed
        );

        Ok(report)
    }
}

/// Best-effort index creation on capture time and identity. Returns
/// false when any index could not be created.
pub async fn create_indexes(sink: &dyn Sink) -> bool {
    tracing::info!("creating indexes...");
    let mut all_created = true;
    for field in [Field::CapturedAt, Field::Identity] {
        if let Err(e) = sink.ensure_index(&[field]).await {
            tracing::warn!("creating index on {} failed: {}", field, e);
            all_created = false;
        }
    }
    all_created
}

/// Walk the raw folder on a blocking thread, sending each decoded snapshot
/// stamped with its file's capture time. Each record is moved into the
/// queue as its own value.
fn produce(resolver: SnapshotResolver, tx: mpsc::Sender<VehicleSnapshot>) -> WalkSummary {
    let mut summary = WalkSummary::default();

    for entry in resolver.walk() {
        let file = match entry {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("skipping: {}", e);
                summary.files_skipped += 1;
                continue;
            }
        };

        tracing::debug!("decoding {}...", file.path.display());
        let snapshots = match decode_file(&file.path) {
            Ok(snapshots) => snapshots,
            Err(e) => {
                tracing::warn!("invalid content in {}: {}", file.path.display(), e);
                summary.files_skipped += 1;
                continue;
            }
        };

        tracing::info!("adding {:4} entries of {}", snapshots.len(), file.captured_at);
        summary.files_decoded += 1;
        summary.records_decoded += snapshots.len() as u64;

        for snapshot in snapshots {
            if tx.blocking_send(snapshot.stamped(file.captured_at)).is_err() {
                tracing::info!("snapshot queue closed, stopping walk at {}", file.path.display());
                summary.stopped_early = true;
                return summary;
            }
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RawVehicleFixture, RejectingSink, write_raw_file, write_snapshot_file};
    use chrono::DateTime;
    use fleetroute_store::MemorySink;
    use tempfile::TempDir;

    fn vehicles(names: &[&str]) -> Vec<RawVehicleFixture> {
        names.iter().map(|n| RawVehicleFixture::new(n)).collect()
    }

    fn memory_pipeline(config: IngestConfig) -> (IngestPipeline, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let pipeline = IngestPipeline::new(config, Some(sink.clone() as Arc<dyn Sink>));
        (pipeline, sink)
    }

    #[tokio::test]
    async fn ingests_every_record_stamped_with_its_file_time() {
        let dir = TempDir::new().unwrap();
        write_snapshot_file(dir.path(), 100, &vehicles(&["Mini42", "Mini43"]));
        write_snapshot_file(&dir.path().join("later"), 200, &vehicles(&["Mini42"]));

        let (pipeline, sink) = memory_pipeline(IngestConfig::new(dir.path()));
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.files_decoded, 2);
        assert_eq!(report.files_skipped, 0);
        assert_eq!(report.records_decoded, 3);
        assert_eq!(report.records_inserted, 3);
        assert_eq!(report.records_failed, 0);
        assert!(report.indexed);
        assert!(!report.dry_run);

        let stored = sink.snapshots();
        assert_eq!(stored.len(), 3);
        let at_100: Vec<&str> = stored
            .iter()
            .filter(|s| s.captured_at == DateTime::from_timestamp(100, 0).unwrap())
            .map(|s| s.identity.as_str())
            .collect();
        assert_eq!(at_100, vec!["Mini42", "Mini43"]);
        assert!(
            stored
                .iter()
                .any(|s| s.identity == "Mini42" && s.captured_at.timestamp() == 200)
        );
    }

    #[tokio::test]
    async fn within_file_order_is_preserved() {
        let dir = TempDir::new().unwrap();
        let names = ["e", "b", "d", "a", "c"];
        write_snapshot_file(dir.path(), 100, &vehicles(&names));

        let (pipeline, sink) = memory_pipeline(IngestConfig::new(dir.path()));
        pipeline.run().await.unwrap();

        let stored: Vec<String> = sink.snapshots().into_iter().map(|s| s.identity).collect();
        assert_eq!(stored, names);
    }

    #[tokio::test]
    async fn bad_files_are_skipped_and_the_walk_continues() {
        let dir = TempDir::new().unwrap();
        write_snapshot_file(dir.path(), 100, &vehicles(&["Mini42"]));
        write_raw_file(dir.path(), "notes.json", &crate::testing::envelope_json(&vehicles(&["Ghost"])));
        write_raw_file(dir.path(), "150.json", r#"{"vehicles":{"vehicles":[]}}"#);
        let bad_lat = RawVehicleFixture::new("Mini43").at("Nowhere", "abc", "11.5");
        write_snapshot_file(dir.path(), 175, &[bad_lat]);
        write_snapshot_file(dir.path(), 200, &vehicles(&["Mini42"]));

        let (pipeline, sink) = memory_pipeline(IngestConfig::new(dir.path()));
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.files_decoded, 2);
        assert_eq!(report.files_skipped, 3);
        assert_eq!(report.files_visited(), 5);
        assert_eq!(report.records_inserted, 2);
        assert!(sink.snapshots().iter().all(|s| s.identity == "Mini42"));
    }

    #[tokio::test]
    async fn non_finite_coordinate_skips_the_whole_file() {
        let dir = TempDir::new().unwrap();
        let nan = RawVehicleFixture::new("Mini43").at("Nowhere", "NaN", "11.5");
        write_snapshot_file(dir.path(), 100, &[RawVehicleFixture::new("Mini42"), nan]);
        write_snapshot_file(dir.path(), 200, &vehicles(&["Mini42"]));

        let sqlite: Arc<dyn Sink> = Arc::new(fleetroute_store::SqliteSink::open_in_memory().unwrap());
        let pipeline = IngestPipeline::new(IngestConfig::new(dir.path()), Some(Arc::clone(&sqlite)));
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.files_decoded, 1);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.records_inserted, 1);
        assert_eq!(report.records_failed, 0);
        assert_eq!(sqlite.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dry_run_visits_everything_but_stores_nothing() {
        let dir = TempDir::new().unwrap();
        write_snapshot_file(dir.path(), 100, &vehicles(&["Mini42", "Mini43"]));
        write_snapshot_file(dir.path(), 200, &vehicles(&["Mini42"]));
        write_raw_file(dir.path(), "broken.json", "{");

        let mut config = IngestConfig::new(dir.path());
        config.dry_run = true;
        let (pipeline, sink) = memory_pipeline(config);
        let report = pipeline.run().await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.files_decoded, 2);
        assert_eq!(report.files_skipped, 1);
        assert_eq!(report.records_decoded, 3);
        assert_eq!(report.records_inserted, 0);
        assert!(!report.indexed);
        assert!(sink.snapshots().is_empty());
        assert!(sink.indexes().is_empty());
    }

    #[tokio::test]
    async fn pipeline_without_sink_is_dry() {
        let dir = TempDir::new().unwrap();
        write_snapshot_file(dir.path(), 100, &vehicles(&["Mini42"]));

        let pipeline = IngestPipeline::new(IngestConfig::new(dir.path()), None);
        assert!(pipeline.is_dry_run());

        let report = pipeline.run().await.unwrap();
        assert!(report.dry_run);
        assert_eq!(report.records_decoded, 1);
        assert_eq!(report.records_inserted, 0);
    }

    #[tokio::test]
    async fn rejected_inserts_are_counted_not_fatal() {
        let dir = TempDir::new().unwrap();
        write_snapshot_file(dir.path(), 100, &vehicles(&["Mini42", "Broken", "Mini43"]));
        write_snapshot_file(dir.path(), 200, &vehicles(&["Broken", "Mini42"]));

        let sink = Arc::new(RejectingSink::new(["Broken"]));
        let pipeline = IngestPipeline::new(IngestConfig::new(dir.path()), Some(sink.clone() as Arc<dyn Sink>));
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.records_decoded, 5);
        assert_eq!(report.records_inserted, 3);
        assert_eq!(report.records_failed, 2);
        assert!(report.indexed);
        assert_eq!(sink.inner.snapshots().len(), 3);
    }

    #[tokio::test]
    async fn single_slot_queue_drains_many_files() {
        let dir = TempDir::new().unwrap();
        let names: Vec<String> = (0..20).map(|i| format!("car{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        for secs in 0..30 {
            write_snapshot_file(dir.path(), 1_400_000_000 + secs, &vehicles(&refs));
        }

        let mut config = IngestConfig::new(dir.path());
        config.queue_capacity = 1;
        let (pipeline, sink) = memory_pipeline(config);
        let report = pipeline.run().await.unwrap();

        assert_eq!(report.records_inserted, 600);
        assert_eq!(sink.snapshots().len(), 600);
    }

    #[tokio::test]
    async fn skip_indexes_leaves_store_unindexed() {
        let dir = TempDir::new().unwrap();
        write_snapshot_file(dir.path(), 100, &vehicles(&["Mini42"]));

        let mut config = IngestConfig::new(dir.path());
        config.skip_indexes = true;
        let (pipeline, sink) = memory_pipeline(config);
        let report = pipeline.run().await.unwrap();

        assert!(!report.indexed);
        assert_eq!(report.records_inserted, 1);
        assert!(sink.indexes().is_empty());
    }

    #[tokio::test]
    async fn indexes_cover_capture_time_and_identity() {
        let dir = TempDir::new().unwrap();
        write_snapshot_file(dir.path(), 100, &vehicles(&["Mini42"]));

        let (pipeline, sink) = memory_pipeline(IngestConfig::new(dir.path()));
        pipeline.run().await.unwrap();

        assert_eq!(
            sink.indexes(),
            vec![vec![Field::Identity], vec![Field::CapturedAt]]
        );
    }

    #[tokio::test]
    async fn shutdown_stops_ingestion_without_indexing() {
        let dir = TempDir::new().unwrap();
        for secs in 0..50 {
            write_snapshot_file(dir.path(), secs, &vehicles(&["a", "b", "c", "d"]));
        }

        let mut config = IngestConfig::new(dir.path());
        config.queue_capacity = 1;
        let (pipeline, sink) = memory_pipeline(config);
        let report = pipeline.run_until(std::future::ready(())).await.unwrap();

        assert!(report.cancelled);
        assert!(!report.indexed);
        assert!(report.records_inserted < 200);
        assert!(sink.indexes().is_empty());
    }
}
