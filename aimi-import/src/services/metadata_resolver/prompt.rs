//! Prompt construction and answer parsing shared by every backend

use super::{ResolveError, ResolveRequest};
use crate::models::TrackMetadata;
use crate::services::tag_reader::TagHints;
use serde::Deserialize;

/// System instructions sent ahead of every request
pub const SYSTEM_PROMPT: &str = "You clean up music metadata for downloaded audio files. \
File names often carry noise such as \"Official Video\", \"Lyrics\", \"HD\", \"Audio\", \
channel names or upload tags; drop it. Keep remix and version information that is part of \
the title. List every credited artist with the main artist first; featured artists and \
producers follow. Answer with a single JSON object and nothing else.";

/// Build the per-file prompt
pub fn build_prompt(request: &ResolveRequest) -> String {
    let mut prompt = format!("File name: {}\n", request.display_name());

    let TagHints {
        artist,
        title,
        album,
        year,
    } = &request.hints;
    if let Some(artist) = artist {
        prompt.push_str(&format!("Embedded artist: {}\n", artist));
    }
    if let Some(title) = title {
        prompt.push_str(&format!("Embedded title: {}\n", title));
    }
    if let Some(album) = album {
        prompt.push_str(&format!("Embedded album: {}\n", album));
    }
    if let Some(year) = year {
        prompt.push_str(&format!("Embedded year: {}\n", year));
    }

    prompt.push_str(
        "\nIf the embedded artist and title are already clean and correct, answer \
{\"use_as_is\": true}.\nOtherwise answer {\"use_as_is\": false, \"artist\": \"main artist\", \
\"artists\": [\"main artist\", \"featured artist\"], \"title\": \"clean title\", \
\"album\": null, \"year\": null}.",
    );
    prompt
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ArtistList {
    Joined(String),
    List(Vec<String>),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum YearValue {
    Number(u32),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct Answer {
    #[serde(default)]
    use_as_is: bool,
    artist: Option<String>,
    artists: Option<ArtistList>,
    title: Option<String>,
    album: Option<String>,
    year: Option<YearValue>,
}

/// Parse a model answer into metadata
///
/// Accepts JSON wrapped in prose or code fences. `use_as_is` falls back to the
/// embedded hints, which must then carry both artist and title.
pub fn parse_answer(text: &str, hints: &TagHints) -> Result<TrackMetadata, ResolveError> {
    let json = extract_json_object(text)
        .ok_or_else(|| ResolveError::Parse(format!("no JSON object in answer: {}", truncate(text))))?;
    let answer: Answer =
        serde_json::from_str(json).map_err(|e| ResolveError::Parse(e.to_string()))?;

    if answer.use_as_is {
        return match (&hints.artist, &hints.title) {
            (Some(artist), Some(title)) => {
                let mut metadata = metadata_from(split_artists(artist), title.clone());
                metadata.album = hints.album.clone();
                metadata.year = hints.year;
                Ok(metadata)
            }
            _ => Err(ResolveError::Incomplete(
                "use_as_is without embedded artist and title".to_string(),
            )),
        };
    }

    let mut artists = match answer.artists {
        Some(ArtistList::Joined(s)) => split_artists(&s),
        Some(ArtistList::List(list)) => clean_list(list),
        None => Vec::new(),
    };
    if let Some(main) = answer.artist.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        // The main artist leads the credit list
        artists.retain(|a| !a.eq_ignore_ascii_case(main));
        artists.insert(0, main.to_string());
    }

    let title = answer
        .title
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    if artists.is_empty() {
        return Err(ResolveError::Incomplete("missing artist".to_string()));
    }
    let title = title.ok_or_else(|| ResolveError::Incomplete("missing title".to_string()))?;

    let mut metadata = metadata_from(artists, title);
    metadata.album = answer
        .album
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());
    metadata.year = match answer.year {
        Some(YearValue::Number(y)) => Some(y),
        Some(YearValue::Text(s)) => s.trim().get(..4).and_then(|y| y.parse().ok()),
        None => None,
    }
    .filter(|y| *y > 0);

    Ok(metadata)
}

fn metadata_from(artists: Vec<String>, title: String) -> TrackMetadata {
    TrackMetadata {
        title,
        artist: artists.join("; "),
        artists,
        album: None,
        year: None,
    }
}

fn split_artists(joined: &str) -> Vec<String> {
    clean_list(joined.split(';').map(str::to_string).collect())
}

fn clean_list(list: Vec<String>) -> Vec<String> {
    list.into_iter()
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty())
        .collect()
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn truncate(text: &str) -> String {
    text.chars().take(120).collect()
}
