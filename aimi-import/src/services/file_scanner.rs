//! Audio file scanner
//!
//! Walks a source tree and yields every audio file together with its
//! content-derived [`FileIdentity`]. The walk is lazy (one file is hashed per
//! `next()`), deterministic (entries are sorted by name) and free of side
//! effects, so it can be restarted at will.
//!
//! Symlinks are followed. A broken link or a link loop is reported as a
//! per-entry [`ScanError`] and the walk continues.

use crate::models::FileIdentity;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use walkdir::{DirEntry, WalkDir};

/// Extensions recognised when none are configured
pub const DEFAULT_AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "opus", "ogg", "flac", "wav", "aac"];

/// System entries skipped in addition to dot-files
const IGNORED_NAMES: &[&str] = &[
    "Thumbs.db",
    "desktop.ini",
    "@eaDir",
    "$RECYCLE.BIN",
    "System Volume Information",
];

/// Audio file scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Directory entry could not be visited (broken symlink, loop, permissions)
    #[error("Cannot access {}: {reason}", display_opt(.path))]
    Entry {
        path: Option<PathBuf>,
        reason: String,
    },

    /// File could not be read for hashing
    #[error("Cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn display_opt(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<unknown>".to_string())
}

impl ScanError {
    /// True for errors that abort the whole scan rather than one entry
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScanError::PathNotFound(_) | ScanError::NotADirectory(_))
    }
}

/// One candidate file found by the scanner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub identity: FileIdentity,
    pub size_bytes: u64,
}

/// Audio file scanner
#[derive(Debug, Clone)]
pub struct FileScanner {
    extensions: Vec<String>,
}

impl FileScanner {
    /// Scanner for [`DEFAULT_AUDIO_EXTENSIONS`]
    pub fn new() -> Self {
        Self::with_extensions(DEFAULT_AUDIO_EXTENSIONS.iter().copied())
    }

    /// Scanner for the given extensions (case-insensitive, leading dot optional)
    pub fn with_extensions<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            extensions: extensions
                .into_iter()
                .map(|e| e.as_ref().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    /// Start a scan of `root`
    ///
    /// Fails only when `root` is missing or not a directory; every other
    /// problem is reported per entry by the returned iterator.
    pub fn scan(&self, root: &Path) -> Result<Scan, ScanError> {
        if !root.exists() {
            return Err(ScanError::PathNotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }

        let walker = WalkDir::new(root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter();

        Ok(Scan {
            scanner: self.clone(),
            walker,
        })
    }

    /// Run a scan on the blocking pool, streaming results through a bounded channel
    ///
    /// The walk stops early when the receiver is dropped.
    pub fn spawn(
        &self,
        root: &Path,
        capacity: usize,
    ) -> Result<mpsc::Receiver<Result<ScannedFile, ScanError>>, ScanError> {
        let scan = self.scan(root)?;
        let (tx, rx) = mpsc::channel(capacity.max(1));

        tokio::task::spawn_blocking(move || {
            for item in scan {
                if tx.blocking_send(item).is_err() {
                    tracing::debug!("Scan receiver dropped, stopping walk");
                    break;
                }
            }
        });

        Ok(rx)
    }

    /// Check whether the extension of `path` is a configured audio extension
    pub fn is_audio_path(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .map(|ext| self.extensions.iter().any(|e| *e == ext))
            .unwrap_or(false)
    }

    /// Dot-files and well-known system entries
    fn is_ignored(entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        name.starts_with('.') || IGNORED_NAMES.iter().any(|ignored| name == *ignored)
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy scan over one source tree
pub struct Scan {
    scanner: FileScanner,
    walker: walkdir::IntoIter,
}

impl Iterator for Scan {
    type Item = Result<ScannedFile, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf);
                    tracing::warn!(path = %display_opt(&path), error = %e, "Error accessing entry");
                    return Some(Err(ScanError::Entry {
                        path,
                        reason: e.to_string(),
                    }));
                }
            };

            // The root itself is never filtered
            if entry.depth() > 0 && FileScanner::is_ignored(&entry) {
                if entry.file_type().is_dir() {
                    self.walker.skip_current_dir();
                }
                continue;
            }

            if !entry.file_type().is_file() || !self.scanner.is_audio_path(entry.path()) {
                continue;
            }

            let path = entry.path().to_path_buf();
            let result = entry
                .metadata()
                .map_err(|e| ScanError::Entry {
                    path: Some(path.clone()),
                    reason: e.to_string(),
                })
                .and_then(|meta| {
                    FileIdentity::of_file(&path)
                        .map(|identity| ScannedFile {
                            path: path.clone(),
                            identity,
                            size_bytes: meta.len(),
                        })
                        .map_err(|source| ScanError::Read {
                            path: path.clone(),
                            source,
                        })
                });

            if let Err(e) = &result {
                tracing::warn!(path = %path.display(), error = %e, "Excluding unreadable file");
            }
            return Some(result);
        }
    }
}
