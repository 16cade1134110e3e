// ABOUTME: Recursive discovery of raw snapshot files under a root directory.
// ABOUTME: Derives each file's capture time from its Unix-seconds file stem; bad entries are reported, not fatal.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors reported for a single entry during the walk. Neither variant
/// stops the walk; the iterator moves on to the next entry.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("walking {} failed: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("invalid filename {} ({stem})", .path.display())]
    Timestamp { path: PathBuf, stem: String },

    #[error("resolving link {} failed: {source}", .path.display())]
    Link {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not following linked directory {}", .path.display())]
    LinkedDirectory { path: PathBuf },
}

/// A raw snapshot file together with the capture time derived from its name.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotFile {
    pub path: PathBuf,
    pub captured_at: DateTime<Utc>,
}

/// Walks a raw folder and yields every regular file as a [`SnapshotFile`].
/// Links to files are followed; links to directories are reported and
/// skipped, which keeps the walk free of cycles.
#[derive(Debug, Clone)]
pub struct SnapshotResolver {
    root: PathBuf,
}

impl SnapshotResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a recursive walk. Entries within one directory are visited in
    /// file-name order, so equal-width stems come out oldest first.
    pub fn walk(&self) -> SnapshotFiles {
        SnapshotFiles {
            inner: WalkDir::new(&self.root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter(),
        }
    }
}

/// Iterator returned by [`SnapshotResolver::walk`].
pub struct SnapshotFiles {
    inner: walkdir::IntoIter,
}

impl Iterator for SnapshotFiles {
    type Item = Result<SnapshotFile, ResolveError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(source) => {
                    let path = source.path().map(Path::to_path_buf).unwrap_or_default();
                    return Some(Err(ResolveError::Walk { path, source }));
                }
            };

            let path = if entry.path_is_symlink() {
                match fs::metadata(entry.path()) {
                    Ok(meta) if meta.is_file() => entry.into_path(),
                    Ok(meta) if meta.is_dir() => {
                        return Some(Err(ResolveError::LinkedDirectory {
                            path: entry.into_path(),
                        }));
                    }
                    Ok(_) => continue,
                    Err(source) => {
                        return Some(Err(ResolveError::Link {
                            path: entry.into_path(),
                            source,
                        }));
                    }
                }
            } else if entry.file_type().is_file() {
                entry.into_path()
            } else {
                continue;
            };

            return Some(
                capture_time_from_path(&path).map(|captured_at| SnapshotFile { path, captured_at }),
            );
        }
    }
}

/// Derive a capture time from a file name such as `1400000000.json`: the
/// stem without its final extension, read as base-10 Unix seconds.
pub fn capture_time_from_path(path: &Path) -> Result<DateTime<Utc>, ResolveError> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    stem.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .ok_or_else(|| ResolveError::Timestamp {
            path: path.to_path_buf(),
            stem,
        })
}
