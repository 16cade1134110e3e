// ABOUTME: Append-only JSONL log of reconstructed routes, one route per line.
// ABOUTME: Provides durable append and sequential replay for later analysis.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::routes::Route;

/// Errors that can occur during route log operations.
#[derive(Debug, Error)]
pub enum RouteLogError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// An append-only JSONL route log backed by a file.
pub struct RouteLog {
    path: PathBuf,
    file: File,
}

impl RouteLog {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open (or create) a route log at the given path in append mode.
    /// Creates parent directories if they do not exist.
    pub fn open(path: &Path) -> Result<Self, RouteLogError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Append one route as a single JSON line and fsync.
    pub fn append(&mut self, route: &Route) -> Result<(), RouteLogError> {
        let mut writer = BufWriter::new(&self.file);
        serde_json::to_writer(&mut writer, route)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        drop(writer);
        self.file.sync_all()?;
        Ok(())
    }

    /// Read every route back in the order it was appended. Empty lines are skipped.
    pub fn replay(path: &Path) -> Result<Vec<Route>, RouteLogError> {
        let reader = BufReader::new(File::open(path)?);
        let mut routes = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            routes.push(serde_json::from_str(&line)?);
        }

        Ok(routes)
    }
}
