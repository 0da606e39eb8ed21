//! Library duplicate linking
//!
//! A download whose embedded artist and title closely match a track that is
//! already resolved is linked to that track instead of being resolved again.

use crate::models::{ImportRecord, ImportStatus};
use crate::services::tag_reader::TagHints;

/// Fuzzy artist/title matcher over resolved records
#[derive(Debug, Clone, Copy)]
pub struct DuplicateMatcher {
    ratio: f64,
}

impl DuplicateMatcher {
    /// `ratio` of 0 disables matching
    pub fn new(ratio: f64) -> Self {
        Self { ratio }
    }

    pub fn is_enabled(&self) -> bool {
        self.ratio > 0.0
    }

    /// Best resolved record whose artist and title both reach the ratio
    pub fn find<'a>(&self, hints: &TagHints, candidates: &'a [ImportRecord]) -> Option<&'a ImportRecord> {
        if !self.is_enabled() {
            return None;
        }
        let (artist, title) = match (&hints.artist, &hints.title) {
            (Some(artist), Some(title)) => (artist, title),
            _ => return None,
        };

        candidates
            .iter()
            .filter(|r| r.status == ImportStatus::Resolved && r.storage_path.is_some())
            .filter_map(|record| {
                let metadata = record.metadata.as_ref()?;
                let artist_score = similarity(artist, &metadata.artist)
                    .max(similarity(artist, metadata.main_artist()));
                let title_score = similarity(title, &metadata.title);

                (artist_score >= self.ratio && title_score >= self.ratio)
                    .then_some((record, artist_score + title_score))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(record, score)| {
                tracing::debug!(
                    identity = %record.identity.short(),
                    score = score / 2.0,
                    "Fuzzy library match"
                );
                record
            })
    }
}

/// Case-insensitive normalised Levenshtein similarity in `0.0..=1.0`
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(&a.trim().to_lowercase(), &b.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileIdentity, TrackMetadata, Transition};
    use chrono::Utc;
    use std::path::{Path, PathBuf};

    fn resolved(seed: &[u8], artist: &str, title: &str) -> ImportRecord {
        let now = Utc::now();
        let mut record = ImportRecord::pending(FileIdentity::of_bytes(seed), Path::new("/in/x.mp3"), now);
        record
            .apply(Transition::Resolve {
                metadata: TrackMetadata::new(artist, title),
                storage_path: PathBuf::from(format!("/lib/{}/{}.mp3", artist, title)),
                now,
            })
            .unwrap();
        record
    }

    fn hints(artist: &str, title: &str) -> TagHints {
        TagHints {
            artist: Some(artist.to_string()),
            title: Some(title.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_similarity_is_case_insensitive() {
        assert_eq!(similarity("Daft Punk", "daft punk"), 1.0);
        assert!(similarity("Daft Punk", "Justice") < 0.5);
    }

    #[test]
    fn test_finds_close_match() {
        let library = vec![
            resolved(b"1", "Daft Punk", "Digital Love"),
            resolved(b"2", "Daft Punk", "One More Time"),
        ];

        let matcher = DuplicateMatcher::new(0.9);
        let found = matcher.find(&hints("daft punk", "One More Time "), &library).unwrap();
        assert_eq!(found.identity, FileIdentity::of_bytes(b"2"));
    }

    #[test]
    fn test_requires_both_fields() {
        let library = vec![resolved(b"1", "Muse", "Uprising")];
        let matcher = DuplicateMatcher::new(0.95);

        assert!(matcher.find(&hints("Muse", "Starlight"), &library).is_none());
        assert!(matcher.find(&hints("Blur", "Uprising"), &library).is_none());

        let partial = TagHints {
            title: Some("Uprising".to_string()),
            ..Default::default()
        };
        assert!(matcher.find(&partial, &library).is_none());
    }

    #[test]
    fn test_main_artist_matches_multi_artist_record() {
        let library = vec![resolved(b"1", "SubSoul; ACRAZE", "Do It To It")];
        let matcher = DuplicateMatcher::new(0.95);
        assert!(matcher.find(&hints("SubSoul", "Do It To It"), &library).is_some());
    }

    #[test]
    fn test_zero_ratio_disables_matching() {
        let library = vec![resolved(b"1", "Muse", "Uprising")];
        let matcher = DuplicateMatcher::new(0.0);
        assert!(!matcher.is_enabled());
        assert!(matcher.find(&hints("Muse", "Uprising"), &library).is_none());
    }
}
