//! Tagging Sink: places resolved files in the destination library
//!
//! Layout is `<dest>/<main artist>/<title>.<ext>`. A file is first copied to a
//! hidden `.part` file beside its destination, tagged, synced and then renamed
//! into place, so the library never holds a half-written track. Placing the
//! same track twice finds the first copy and writes nothing.

use crate::models::TrackMetadata;
use lofty::config::WriteOptions;
use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::{Accessor, Tag};
use serde::Deserialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use thiserror::Error;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const UNKNOWN_ARTIST: &str = "Unknown_Artist";
const UNKNOWN_TITLE: &str = "Unknown_Title";
const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// What happens to the source file after a successful import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PlacementMode {
    /// Leave the source in place
    #[default]
    Copy,
    /// Delete the source once the import is committed
    Move,
}

/// Result of placing one file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// A new tagged file was written
    Written(PathBuf),
    /// The library already held this track; nothing was written
    Existing(PathBuf),
}

impl Placement {
    pub fn path(&self) -> &Path {
        match self {
            Placement::Written(p) | Placement::Existing(p) => p,
        }
    }
}

/// Tagging and placement errors
#[derive(Debug, Error)]
pub enum TagError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot tag {}: {reason}", .path.display())]
    Tag { path: PathBuf, reason: String },

    #[error("Source has no file extension: {}", .0.display())]
    NoExtension(PathBuf),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> TagError + '_ {
    move |source| TagError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Writes resolved metadata into the library
///
/// `place` must be idempotent: placing the same source with the same metadata
/// again returns the earlier result without writing a second file.
pub trait TaggingSink: Send + Sync {
    fn place(&self, source: &Path, metadata: &TrackMetadata) -> Result<Placement, TagError>;
}

/// Filesystem library writer
#[derive(Debug, Clone)]
pub struct LibraryWriter {
    dest_root: PathBuf,
}

impl LibraryWriter {
    pub fn new(dest_root: impl Into<PathBuf>) -> Self {
        Self {
            dest_root: dest_root.into(),
        }
    }

    /// Final path for `metadata` (no filesystem access)
    pub fn destination_for(&self, source: &Path, metadata: &TrackMetadata) -> Result<PathBuf, TagError> {
        let ext = extension_of(source)?;
        Ok(self
            .artist_dir(metadata)
            .join(format!("{}.{}", sanitize(&metadata.title, UNKNOWN_TITLE), ext)))
    }

    fn artist_dir(&self, metadata: &TrackMetadata) -> PathBuf {
        self.dest_root
            .join(sanitize(metadata.main_artist(), UNKNOWN_ARTIST))
    }

    /// First visible file in `dir` whose normalised stem equals the normalised
    /// (sanitised) title
    fn find_existing(dir: &Path, title: &str) -> Result<Option<PathBuf>, TagError> {
        let wanted = normalize_title(title);
        if wanted.is_empty() || !dir.is_dir() {
            return Ok(None);
        }

        let mut matches = Vec::new();
        for entry in fs::read_dir(dir).map_err(io_err(dir))? {
            let entry = entry.map_err(io_err(dir))?;
            let path = entry.path();
            if !path.is_file() || entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            if normalize_title(&stem) == wanted {
                matches.push(path);
            }
        }

        matches.sort();
        Ok(matches.into_iter().next())
    }
}

impl TaggingSink for LibraryWriter {
    fn place(&self, source: &Path, metadata: &TrackMetadata) -> Result<Placement, TagError> {
        let destination = self.destination_for(source, metadata)?;
        let dir = self.artist_dir(metadata);

        let title = sanitize(&metadata.title, UNKNOWN_TITLE);
        if let Some(existing) = Self::find_existing(&dir, &title)? {
            tracing::info!(
                source = %source.display(),
                existing = %existing.display(),
                "Track already in library"
            );
            return Ok(Placement::Existing(existing));
        }

        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let part = part_path(&destination);
        let result = write_part(source, &part, metadata).and_then(|()| {
            fs::rename(&part, &destination).map_err(io_err(&destination))
        });

        if let Err(e) = result {
            if part.exists() {
                if let Err(cleanup) = fs::remove_file(&part) {
                    tracing::warn!(path = %part.display(), error = %cleanup, "Cannot remove partial file");
                }
            }
            return Err(e);
        }

        sync_dir(&dir);

        tracing::info!(
            source = %source.display(),
            destination = %destination.display(),
            "Placed tagged file"
        );
        Ok(Placement::Written(destination))
    }
}

/// Copy, tag and fsync the temporary file
fn write_part(source: &Path, part: &Path, metadata: &TrackMetadata) -> Result<(), TagError> {
    fs::copy(source, part).map_err(io_err(source))?;
    write_tags(part, metadata)?;
    File::open(part)
        .and_then(|f| f.sync_all())
        .map_err(io_err(part))
}

/// Write title, main artist, album and year into the primary tag
pub fn write_tags(path: &Path, metadata: &TrackMetadata) -> Result<(), TagError> {
    let tag_err = |e: lofty::error::LoftyError| TagError::Tag {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let mut tagged_file = Probe::open(path).map_err(tag_err)?.read().map_err(tag_err)?;

    if tagged_file.primary_tag().is_none() {
        let tag_type = tagged_file.primary_tag_type();
        tagged_file.insert_tag(Tag::new(tag_type));
    }

    let tag = tagged_file.primary_tag_mut().ok_or_else(|| TagError::Tag {
        path: path.to_path_buf(),
        reason: "no writable tag".to_string(),
    })?;

    tag.set_title(metadata.title.clone());
    tag.set_artist(metadata.main_artist().to_string());
    if let Some(album) = &metadata.album {
        tag.set_album(album.clone());
    }
    if let Some(year) = metadata.year {
        tag.set_year(year);
    }

    tagged_file
        .save_to_path(path, WriteOptions::default())
        .map_err(tag_err)
}

/// `.<name>.part.<ext>` beside `destination` (extension kept for format probing)
fn part_path(destination: &Path) -> PathBuf {
    let stem = destination
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let ext = destination
        .extension()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.part.{}", stem, ext))
}

fn extension_of(source: &Path) -> Result<String, TagError> {
    source
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| TagError::NoExtension(source.to_path_buf()))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        tracing::debug!(dir = %dir.display(), error = %e, "Directory sync failed");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Strip characters that are invalid in file names
pub fn sanitize(name: &str, fallback: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !FORBIDDEN_CHARS.contains(c)).collect();
    let cleaned = cleaned.trim().trim_matches('.').trim();
    if cleaned.is_empty() {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

/// Comparison key for titles: NFKD without marks, lower case, punctuation dropped
pub fn normalize_title(title: &str) -> String {
    let folded: String = title
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}
