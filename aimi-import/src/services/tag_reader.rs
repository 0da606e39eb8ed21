//! Embedded tag hints
//!
//! Reads whatever tags the downloader left in a file (title, artist, album,
//! year) so the resolver can start from them. Files with missing or unreadable
//! tags yield empty hints.

use lofty::prelude::*;
use lofty::probe::Probe;
use serde::Serialize;
use std::path::Path;

/// Tags already present in a candidate file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TagHints {
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub year: Option<u32>,
}

impl TagHints {
    /// Both artist and title present
    pub fn is_complete(&self) -> bool {
        self.artist.is_some() && self.title.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.artist.is_none() && self.title.is_none() && self.album.is_none() && self.year.is_none()
    }
}

/// Read tag hints from `path`
pub fn read_hints(path: &Path) -> TagHints {
    let tagged_file = match Probe::open(path).and_then(|probe| probe.read()) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "No readable tags");
            return TagHints::default();
        }
    };

    let Some(tag) = tagged_file.primary_tag().or_else(|| tagged_file.first_tag()) else {
        return TagHints::default();
    };

    let hints = TagHints {
        artist: non_empty(tag.artist().as_deref()),
        title: non_empty(tag.title().as_deref()),
        album: non_empty(tag.album().as_deref()),
        year: tag.year().filter(|y| *y > 0),
    };

    tracing::debug!(
        path = %path.display(),
        artist = ?hints.artist,
        title = ?hints.title,
        "Read embedded tags"
    );

    hints
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
