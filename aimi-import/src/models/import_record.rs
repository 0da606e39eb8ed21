//! Import records and their state machine
//!
//! One [`ImportRecord`] exists per [`FileIdentity`]. Records move through
//! `Pending → {Resolved, Failed}`; `Failed` may be re-claimed until the
//! attempt cap is reached. `Resolved` and `BulkSkipped` never change again.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

// ============================================================================
// File Identity
// ============================================================================

/// Content-derived identity of a candidate file (hex SHA-256)
///
/// Moving or renaming a file keeps its identity; re-encoding or retagging it
/// produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileIdentity(String);

/// Rejected identity string
#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid file identity {0:?}: expected 64 hex characters")]
pub struct IdentityParseError(pub String);

impl FileIdentity {
    /// Hash the file content in 1MB chunks
    pub fn of_file(path: &Path) -> std::io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; 1024 * 1024];

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    /// Identity of an in-memory byte slice (same digest as [`FileIdentity::of_file`])
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self(format!("{:x}", Sha256::digest(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FileIdentity {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(IdentityParseError(s.to_string()))
        }
    }
}

// ============================================================================
// Status and Metadata
// ============================================================================

/// Processing status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    /// Claimed by a run; resolution in progress (or interrupted)
    Pending,
    /// Seeded by bulk import; never resolved
    BulkSkipped,
    /// Resolved and placed in the library
    Resolved,
    /// Last attempt failed
    Failed,
}

impl ImportStatus {
    pub const ALL: [ImportStatus; 4] = [
        ImportStatus::Pending,
        ImportStatus::BulkSkipped,
        ImportStatus::Resolved,
        ImportStatus::Failed,
    ];

    /// Database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::BulkSkipped => "bulk_skipped",
            ImportStatus::Resolved => "resolved",
            ImportStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImportStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ImportStatus::Pending),
            "bulk_skipped" | "bulk-skipped" => Ok(ImportStatus::BulkSkipped),
            "resolved" => Ok(ImportStatus::Resolved),
            "failed" => Ok(ImportStatus::Failed),
            other => Err(format!("Unknown import status: {}", other)),
        }
    }
}

/// Resolved track tags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackMetadata {
    /// Clean track title
    pub title: String,
    /// Artist field as written to the tag (may hold `;`-separated names)
    pub artist: String,
    /// Every credited artist (main, featured, producers)
    #[serde(default)]
    pub artists: Vec<String>,
    #[serde(default)]
    pub album: Option<String>,
    #[serde(default)]
    pub year: Option<u32>,
}

impl TrackMetadata {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        let artist = artist.into();
        Self {
            title: title.into(),
            artists: vec![artist.clone()],
            artist,
            album: None,
            year: None,
        }
    }

    /// First `;`-separated entry of the artist field
    pub fn main_artist(&self) -> &str {
        self.artist
            .split(';')
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or("")
    }
}

// ============================================================================
// Import Record
// ============================================================================

/// Persisted outcome of processing one file identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportRecord {
    pub identity: FileIdentity,
    pub status: ImportStatus,
    /// File name when first observed
    pub original_name: String,
    /// Path when first observed
    pub source_path: PathBuf,
    /// Present only when `status == Resolved`
    pub metadata: Option<TrackMetadata>,
    /// Library location of the placed file (Resolved only)
    pub storage_path: Option<PathBuf>,
    /// Error text of the most recent failed attempt
    pub last_error: Option<String>,
    /// Resolution attempts started for this identity
    pub attempt_count: u32,
    pub first_seen_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
}

impl ImportRecord {
    /// Record claimed by the first resolution attempt
    pub fn pending(identity: FileIdentity, source_path: &Path, now: DateTime<Utc>) -> Self {
        Self::new(identity, ImportStatus::Pending, source_path, 1, now)
    }

    /// Record seeded by bulk import
    pub fn bulk_skipped(identity: FileIdentity, source_path: &Path, now: DateTime<Utc>) -> Self {
        Self::new(identity, ImportStatus::BulkSkipped, source_path, 0, now)
    }

    fn new(
        identity: FileIdentity,
        status: ImportStatus,
        source_path: &Path,
        attempt_count: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let original_name = source_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        Self {
            identity,
            status,
            original_name,
            source_path: source_path.to_path_buf(),
            metadata: None,
            storage_path: None,
            last_error: None,
            attempt_count,
            first_seen_at: now,
            last_attempt_at: now,
        }
    }

    /// True when the record will never be resolved again
    pub fn is_terminal(&self, max_attempts: u32) -> bool {
        match self.status {
            ImportStatus::Resolved | ImportStatus::BulkSkipped => true,
            ImportStatus::Failed => self.attempt_count >= max_attempts,
            ImportStatus::Pending => false,
        }
    }

    /// Apply a state transition in place
    ///
    /// On error the record is left untouched.
    pub fn apply(&mut self, transition: Transition) -> Result<(), TransitionError> {
        match (self.status, transition) {
            (ImportStatus::Resolved | ImportStatus::BulkSkipped, _) => {
                Err(TransitionError::Immutable(self.status))
            }

            (
                ImportStatus::Failed,
                Transition::Claim {
                    now, max_attempts, ..
                },
            ) => {
                if self.attempt_count >= max_attempts {
                    return Err(TransitionError::Exhausted {
                        attempts: self.attempt_count,
                    });
                }
                self.status = ImportStatus::Pending;
                self.attempt_count += 1;
                self.last_attempt_at = now;
                Ok(())
            }

            (
                ImportStatus::Pending,
                Transition::Claim {
                    now,
                    lease,
                    max_attempts,
                },
            ) => {
                if now - self.last_attempt_at < lease {
                    return Err(TransitionError::InFlight {
                        since: self.last_attempt_at,
                    });
                }
                // Interrupted attempt; it still counts
                if self.attempt_count >= max_attempts {
                    self.status = ImportStatus::Failed;
                    self.last_error = Some("attempt interrupted before completion".to_string());
                } else {
                    self.attempt_count += 1;
                }
                self.last_attempt_at = now;
                Ok(())
            }

            (
                ImportStatus::Pending,
                Transition::Resolve {
                    metadata,
                    storage_path,
                    now,
                },
            ) => {
                self.status = ImportStatus::Resolved;
                self.metadata = Some(metadata);
                self.storage_path = Some(storage_path);
                self.last_error = None;
                self.last_attempt_at = now;
                Ok(())
            }

            (ImportStatus::Pending, Transition::Fail { error, now }) => {
                self.status = ImportStatus::Failed;
                self.last_error = Some(error);
                self.last_attempt_at = now;
                Ok(())
            }

            (from, transition) => Err(TransitionError::Invalid {
                from,
                transition: transition.name(),
            }),
        }
    }
}

/// State change requested by the resolution driver
#[derive(Debug, Clone)]
pub enum Transition {
    /// Start a new attempt on a `Failed` (under the cap) or stale `Pending` record
    Claim {
        now: DateTime<Utc>,
        /// Age after which a `Pending` record is considered abandoned
        lease: Duration,
        max_attempts: u32,
    },
    /// Commit a successful resolution; the file is already placed
    Resolve {
        metadata: TrackMetadata,
        storage_path: PathBuf,
        now: DateTime<Utc>,
    },
    /// Record a failed attempt
    Fail { error: String, now: DateTime<Utc> },
}

impl Transition {
    pub fn name(&self) -> &'static str {
        match self {
            Transition::Claim { .. } => "claim",
            Transition::Resolve { .. } => "resolve",
            Transition::Fail { .. } => "fail",
        }
    }
}

/// Rejected state transition
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Record is {0} and can no longer change")]
    Immutable(ImportStatus),

    #[error("Retry cap reached after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Attempt in progress since {since}")]
    InFlight { since: DateTime<Utc> },

    #[error("Cannot {transition} a {from} record")]
    Invalid {
        from: ImportStatus,
        transition: &'static str,
    },
}

// ============================================================================
// Tests
// ============================================================================
