// ABOUTME: Parses store connection strings and opens the matching snapshot sink.
// ABOUTME: Supports sqlite://<path>, sqlite::memory:, memory://, and bare database file paths.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::memory::MemorySink;
use crate::sink::{Sink, StoreError};
use crate::sqlite::SqliteSink;

/// Default connection string: a SQLite database in the working directory.
pub const DEFAULT_STORE_URL: &str = "sqlite://fleetroute.db";

/// A parsed store connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreUrl {
    Sqlite(PathBuf),
    SqliteMemory,
    Memory,
}

impl StoreUrl {
    pub fn parse(url: &str) -> Result<Self, StoreError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(StoreError::UnsupportedUrl("empty store url".to_string()));
        }

        if url == "memory://" || url == "memory:" {
            return Ok(StoreUrl::Memory);
        }
        if url == "sqlite::memory:" || url == "sqlite://:memory:" {
            return Ok(StoreUrl::SqliteMemory);
        }
        if let Some(path) = url.strip_prefix("sqlite://") {
            if path.is_empty() {
                return Err(StoreError::UnsupportedUrl(url.to_string()));
            }
            return Ok(StoreUrl::Sqlite(PathBuf::from(path)));
        }
        if url.contains("://") {
            return Err(StoreError::UnsupportedUrl(url.to_string()));
        }

        Ok(StoreUrl::Sqlite(PathBuf::from(url)))
    }
}

impl fmt::Display for StoreUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreUrl::Sqlite(path) => write!(f, "sqlite://{}", path.display()),
            StoreUrl::SqliteMemory => f.write_str("sqlite::memory:"),
            StoreUrl::Memory => f.write_str("memory://"),
        }
    }
}

/// Open the sink a connection string points at.
pub fn open_sink(url: &str) -> Result<Arc<dyn Sink>, StoreError> {
    let sink: Arc<dyn Sink> = match StoreUrl::parse(url)? {
        StoreUrl::Sqlite(path) => Arc::new(SqliteSink::open(&path)?),
        StoreUrl::SqliteMemory => Arc::new(SqliteSink::open_in_memory()?),
        StoreUrl::Memory => Arc::new(MemorySink::new()),
    };
    tracing::info!("opened snapshot store {}", sink.describe());
    Ok(sink)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_supported_forms() {
        assert_eq!(
            StoreUrl::parse("sqlite://data/fleet.db").unwrap(),
            StoreUrl::Sqlite(PathBuf::from("data/fleet.db"))
        );
        assert_eq!(
            StoreUrl::parse("sqlite:///var/lib/fleet.db").unwrap(),
            StoreUrl::Sqlite(PathBuf::from("/var/lib/fleet.db"))
        );
        assert_eq!(StoreUrl::parse("sqlite::memory:").unwrap(), StoreUrl::SqliteMemory);
        assert_eq!(StoreUrl::parse("memory://").unwrap(), StoreUrl::Memory);
        assert_eq!(
            StoreUrl::parse("fleet.db").unwrap(),
            StoreUrl::Sqlite(PathBuf::from("fleet.db"))
        );
        assert_eq!(
            StoreUrl::parse(DEFAULT_STORE_URL).unwrap(),
            StoreUrl::Sqlite(PathBuf::from("fleetroute.db"))
        );
    }

    #[test]
    fn rejects_unknown_schemes() {
        let err = StoreUrl::parse("mongodb://localhost").unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedUrl(_)));
        assert!(err.to_string().contains("mongodb://localhost"));

        assert!(StoreUrl::parse("").is_err());
        assert!(StoreUrl::parse("sqlite://").is_err());
    }

    #[test]
    fn display_round_trips() {
        for url in ["sqlite://fleet.db", "sqlite::memory:", "memory://"] {
            let parsed = StoreUrl::parse(url).unwrap();
            assert_eq!(StoreUrl::parse(&parsed.to_string()).unwrap(), parsed);
        }
    }

    #[tokio::test]
    async fn open_sink_creates_sqlite_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("fleet.db");

        let sink = open_sink(&format!("sqlite://{}", path.display())).unwrap();
        assert_eq!(sink.count().await.unwrap(), 0);
        assert!(path.exists());
    }
}
