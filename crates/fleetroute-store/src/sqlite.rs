// ABOUTME: SQLite-backed snapshot sink storing one row per vehicle snapshot in the `raw` table.
// ABOUTME: Sorted queries are streamed page by page so the connection lock is never held while a consumer waits.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleetroute_core::{Position, VehicleSnapshot};
use futures::StreamExt;
use rusqlite::types::Value;
use rusqlite::{Connection, params, params_from_iter};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::sink::{Field, Filter, Sink, SnapshotStream, StoreError};

/// Rows fetched per lock acquisition when streaming a sorted query.
const PAGE_SIZE: usize = 256;

/// Rows buffered between the page reader and the stream consumer.
const STREAM_BUFFER: usize = 64;

const SNAPSHOT_COLUMNS: &str =
    "identity, captured_at, fuel_level, cleanliness, license_plate, address, latitude, longitude";

/// One row of a sorted page: the sort key and rowid used to resume after
/// it, plus the decoded snapshot.
type PageRow = (Value, i64, VehicleSnapshot);

/// A snapshot sink backed by a single SQLite connection. Timestamps are
/// stored as integer microseconds since the Unix epoch so they sort numerically.
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
    label: String,
}

impl SqliteSink {
    /// Open or create a SQLite database at the given path.
    /// Creates parent directories if they do not exist.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn, path.display().to_string())
    }

    /// Open a private in-memory database. Everything is lost on drop.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, ":memory:".to_string())
    }

    fn init(conn: Connection, label: String) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS raw (
                identity TEXT NOT NULL,
                captured_at INTEGER NOT NULL,
                fuel_level INTEGER NOT NULL,
                cleanliness TEXT NOT NULL,
                license_plate TEXT NOT NULL,
                address TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            label,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        lock_conn(&self.conn)
    }
}

fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
    conn.lock()
        .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
}

fn micros_to_datetime(micros: i64) -> Result<DateTime<Utc>, StoreError> {
    DateTime::from_timestamp_micros(micros)
        .ok_or_else(|| StoreError::InvalidRow(format!("captured_at out of range: {}", micros)))
}

/// Fetch up to `limit` rows ordered by (`sort`, rowid), starting strictly
/// after `after` when given.
fn fetch_page(
    conn: &Connection,
    filter: &Filter,
    sort: Field,
    after: Option<&(Value, i64)>,
    limit: usize,
) -> Result<Vec<PageRow>, StoreError> {
    let sort_col = sort.column();
    let mut clauses: Vec<String> = Vec::new();
    let mut values: Vec<Value> = Vec::new();

    if let Filter::Identity(identity) = filter {
        clauses.push("identity = ?".to_string());
        values.push(Value::Text(identity.clone()));
    }
    if let Some((key, rowid)) = after {
        clauses.push(format!("({}, rowid) > (?, ?)", sort_col));
        values.push(key.clone());
        values.push(Value::Integer(*rowid));
    }

    let mut sql = format!("SELECT {}, rowid, {} FROM raw", sort_col, SNAPSHOT_COLUMNS);
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(&format!(" ORDER BY {} ASC, rowid ASC LIMIT {}", sort_col, limit));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
        Ok((
            row.get::<_, Value>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, i64>(3)?,
            row.get::<_, i64>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, f64>(8)?,
            row.get::<_, f64>(9)?,
        ))
    })?;

    let mut page = Vec::new();
    for row in rows {
        let (key, rowid, identity, micros, fuel_level, cleanliness, license_plate, address, lat, lon) =
            row?;
        page.push((
            key,
            rowid,
            VehicleSnapshot {
                identity,
                captured_at: micros_to_datetime(micros)?,
                fuel_level,
                cleanliness,
                license_plate,
                position: Position {
                    address,
                    latitude: lat,
                    longitude: lon,
                },
            },
        ));
    }
    Ok(page)
}

/// Feed `first` and every following page into `tx`. Stops early when the
/// receiving stream has been dropped.
fn stream_pages(
    conn: Arc<Mutex<Connection>>,
    filter: Filter,
    sort: Field,
    first: Vec<PageRow>,
    tx: mpsc::Sender<Result<VehicleSnapshot, StoreError>>,
) {
    let mut page = first;
    let mut after: Option<(Value, i64)> = None;

    loop {
        let exhausted = page.len() < PAGE_SIZE;
        for (key, rowid, snapshot) in page {
            after = Some((key, rowid));
            if tx.blocking_send(Ok(snapshot)).is_err() {
                return;
            }
        }
        if exhausted {
            return;
        }

        let next = lock_conn(&conn)
            .and_then(|guard| fetch_page(&guard, &filter, sort, after.as_ref(), PAGE_SIZE));
        page = match next {
            Ok(page) => page,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                return;
            }
        };
    }
}

#[async_trait]
impl Sink for SqliteSink {
    async fn insert(&self, snapshot: &VehicleSnapshot) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO raw (identity, captured_at, fuel_level, cleanliness, license_plate, address, latitude, longitude)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                snapshot.identity,
                snapshot.captured_at.timestamp_micros(),
                snapshot.fuel_level,
                snapshot.cleanliness,
                snapshot.license_plate,
                snapshot.position.address,
                snapshot.position.latitude,
                snapshot.position.longitude,
            ],
        )?;
        Ok(())
    }

    async fn ensure_index(&self, fields: &[Field]) -> Result<(), StoreError> {
        if fields.is_empty() {
            return Ok(());
        }
        let columns: Vec<&str> = fields.iter().map(|f| f.column()).collect();
        let sql = format!(
            "CREATE INDEX IF NOT EXISTS raw_{}_idx ON raw ({})",
            columns.join("_"),
            columns.join(", ")
        );
        self.lock()?.execute_batch(&sql)?;
        Ok(())
    }

    async fn distinct_values(&self, field: Field) -> Result<BTreeSet<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT DISTINCT {} FROM raw", field.column()))?;
        let rows = stmt.query_map([], |row| row.get::<_, Value>(0))?;

        let mut values = BTreeSet::new();
        for row in rows {
            let value = match (field, row?) {
                (Field::Identity, Value::Text(s)) => s,
                (Field::CapturedAt, Value::Integer(micros)) => micros_to_datetime(micros)?.to_rfc3339(),
                (field, other) => {
                    return Err(StoreError::InvalidRow(format!(
                        "unexpected {} value {:?}",
                        field, other
                    )));
                }
            };
            values.insert(value);
        }
        Ok(values)
    }

    async fn find_sorted(&self, filter: Filter, sort: Field) -> Result<SnapshotStream, StoreError> {
        // The first page is read here so a broken query fails the call itself.
        let first = {
            let conn = self.lock()?;
            fetch_page(&conn, &filter, sort, None, PAGE_SIZE)?
        };

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || stream_pages(conn, filter, sort, first, tx));

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM raw", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    fn describe(&self) -> String {
        format!("sqlite {}", self.label)
    }
}
