//! Feed parsing: raw RSS bytes in, [`NormalizedFeed`] out.
//!
//! The normalized document preserves feed document order for episodes and
//! keeps person mentions verbatim; all interpretation (identity matching,
//! person resolution, statistics) happens downstream.

pub mod sniff;

use chrono::{DateTime, Utc};
use rss::{Channel, Item};
use serde::Serialize;

use crate::error::ParseError;

/// Namespace prefix podcast feeds use for Podcasting 2.0 elements.
const PODCAST_NS_PREFIX: &str = "podcast";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonRole {
    Host,
    Guest,
}

/// A raw person mention from a `podcast:person` tag, verbatim from the feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonMention {
    pub name: String,
    pub role: PersonRole,
    pub url: Option<String>,
    pub img_url: Option<String>,
}

/// One `(name, parent)` category pair from the iTunes taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryPair {
    pub name: String,
    pub parent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NormalizedEpisode {
    pub guid: Option<String>,
    pub title: Option<String>,
    pub show_notes: Option<String>,
    pub episode_url: Option<String>,
    pub release_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub episode_number: Option<i64>,
    pub season_number: Option<i64>,
    /// "full" / "trailer" / "bonus" as declared; empty means full.
    pub episode_type: String,
    pub explicit: bool,
    pub enclosure_url: String,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub transcript_detected: bool,
    pub cw_present: bool,
    pub people: Vec<PersonMention>,
}

/// Parsed and normalized feed document. Episode order is feed document
/// order, not release-date order.
#[derive(Debug, Clone, Serialize)]
pub struct NormalizedFeed {
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub email: Option<String>,
    pub site_url: Option<String>,
    pub language: Option<String>,
    pub generator: Option<String>,
    pub explicit: bool,
    pub itunes_feed_type: Option<String>,
    pub funding_url: Option<String>,
    pub cover_art_url: Option<String>,
    pub keywords: Vec<String>,
    pub has_itunes_data: bool,
    pub has_podcast_index_data: bool,
    pub categories: Vec<CategoryPair>,
    pub episodes: Vec<NormalizedEpisode>,
    /// Feed items skipped because they carried no enclosure.
    pub skipped_items: usize,
}

/// Parse raw feed bytes into a [`NormalizedFeed`].
///
/// Missing optional fields become `None`; only a document that cannot be
/// read as a feed at all fails.
pub fn parse(bytes: &[u8]) -> Result<NormalizedFeed, ParseError> {
    let channel = Channel::read_from(bytes).map_err(|e| {
        if looks_like_xml(bytes) {
            ParseError::Malformed(e.to_string())
        } else {
            ParseError::NotAFeed(
                "document does not look like an RSS feed".to_string(),
            )
        }
    })?;

    let itunes = channel.itunes_ext();
    let podcast_ns = channel.extensions().get(PODCAST_NS_PREFIX);

    let mut has_itunes_data = itunes.is_some();
    let mut has_podcast_index_data = podcast_ns.is_some();

    let funding_url = podcast_ns
        .and_then(|ns| ns.get("funding"))
        .and_then(|elements| elements.first())
        .and_then(|e| e.attrs().get("url"))
        .cloned();

    let mut categories = Vec::new();
    if let Some(itunes) = itunes {
        for category in itunes.categories() {
            let parents = split_category_tokens(category.text());
            if parents.is_empty() {
                continue;
            }
            for name in &parents {
                push_unique(
                    &mut categories,
                    CategoryPair {
                        name: name.clone(),
                        parent: None,
                    },
                );
            }
            if let Some(sub) = category.subcategory() {
                for name in split_category_tokens(sub.text()) {
                    push_unique(
                        &mut categories,
                        CategoryPair {
                            name,
                            parent: Some(parents[0].clone()),
                        },
                    );
                }
            }
        }
    }

    let keywords = itunes
        .and_then(|i| i.keywords())
        .map(split_keywords)
        .unwrap_or_default();

    let mut episodes = Vec::new();
    let mut skipped_items = 0usize;
    for item in channel.items() {
        if item.itunes_ext().is_some() {
            has_itunes_data = true;
        }
        if item.extensions().contains_key(PODCAST_NS_PREFIX) {
            has_podcast_index_data = true;
        }
        match normalize_item(item) {
            Some(episode) => episodes.push(episode),
            None => {
                log::debug!(
                    "skipping feed item without enclosure: {:?}",
                    item.title()
                );
                skipped_items += 1;
            }
        }
    }

    Ok(NormalizedFeed {
        title: channel.title().to_string(),
        description: non_empty(channel.description()),
        author: itunes
            .and_then(|i| i.owner())
            .and_then(|o| o.name())
            .or_else(|| itunes.and_then(|i| i.author()))
            .map(str::to_string),
        email: itunes
            .and_then(|i| i.owner())
            .and_then(|o| o.email())
            .map(str::to_string),
        site_url: non_empty(channel.link()),
        language: channel.language().map(str::to_string),
        generator: channel.generator().map(str::to_string),
        explicit: itunes
            .and_then(|i| i.explicit())
            .map(parse_explicit)
            .unwrap_or(false),
        itunes_feed_type: itunes.and_then(|i| i.r#type()).map(str::to_string),
        funding_url,
        cover_art_url: itunes
            .and_then(|i| i.image())
            .map(str::to_string)
            .or_else(|| channel.image().map(|img| img.url().to_string())),
        keywords,
        has_itunes_data,
        has_podcast_index_data,
        categories,
        episodes,
        skipped_items,
    })
}

/// A feed item without an enclosure is not an episode; returns None for those.
fn normalize_item(item: &Item) -> Option<NormalizedEpisode> {
    let enclosure = item.enclosure()?;
    let itunes = item.itunes_ext();
    let podcast_ns = item.extensions().get(PODCAST_NS_PREFIX);

    let title = item.title().map(str::to_string);
    let show_notes = item.description().map(str::to_string);

    let episode_number = itunes
        .and_then(|i| i.episode())
        .and_then(|e| e.trim().parse::<i64>().ok())
        .or_else(|| {
            title
                .as_deref()
                .and_then(extract_episode_number)
                .and_then(|n| n.parse::<i64>().ok())
        });

    let notes_lower = show_notes.as_deref().unwrap_or("").to_lowercase();
    let has_transcript_tag = podcast_ns
        .map(|ns| ns.contains_key("transcript"))
        .unwrap_or(false);
    let transcript_detected = has_transcript_tag || notes_lower.contains("transcript");
    let cw_present = show_notes.as_deref().unwrap_or("").contains("CW")
        || notes_lower.contains("content warning")
        || notes_lower.contains("trigger warning")
        || notes_lower.contains("content note");

    let people = podcast_ns
        .and_then(|ns| ns.get("person"))
        .map(|elements| {
            elements
                .iter()
                .filter_map(|e| {
                    let name = e.value()?.trim().to_string();
                    if name.is_empty() {
                        return None;
                    }
                    // Unknown roles (producer, editor, …) are not tracked.
                    let role = match e
                        .attrs()
                        .get("role")
                        .map(|r| r.to_ascii_lowercase())
                        .as_deref()
                        .unwrap_or("host")
                    {
                        "host" => PersonRole::Host,
                        "guest" => PersonRole::Guest,
                        _ => return None,
                    };
                    Some(PersonMention {
                        name,
                        role,
                        url: e.attrs().get("href").cloned(),
                        img_url: e.attrs().get("img").cloned(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    Some(NormalizedEpisode {
        guid: item.guid().map(|g| g.value().to_string()),
        title,
        show_notes,
        episode_url: item.link().map(str::to_string),
        release_at: item.pub_date().and_then(parse_release_date),
        duration_seconds: itunes
            .and_then(|i| i.duration())
            .and_then(parse_duration_seconds),
        episode_number,
        season_number: itunes
            .and_then(|i| i.season())
            .and_then(|s| s.trim().parse::<i64>().ok()),
        episode_type: itunes
            .and_then(|i| i.episode_type())
            .unwrap_or("full")
            .to_string(),
        explicit: itunes
            .and_then(|i| i.explicit())
            .map(parse_explicit)
            .unwrap_or(false),
        enclosure_url: enclosure.url().to_string(),
        mime_type: non_empty(enclosure.mime_type()),
        file_size: enclosure
            .length()
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|size| *size >= 0),
        transcript_detected,
        cw_present,
        people,
    })
}

/// Split a category token that a feed concatenated incorrectly.
///
/// The delimiter set is `,` `;` `/` plus an internal lowercase-to-uppercase
/// boundary, so `"TechnologyScience"` yields `Technology` and `Science` while
/// `"Society & Culture"` stays intact.
pub fn split_category_tokens(raw: &str) -> Vec<String> {
    let mut out = Vec::new();
    for piece in raw.split([',', ';', '/']) {
        let piece = piece.trim();
        if piece.is_empty() {
            continue;
        }
        let mut current = String::new();
        let mut prev_lower = false;
        for ch in piece.chars() {
            if prev_lower && ch.is_uppercase() {
                let token = current.trim().to_string();
                if !token.is_empty() {
                    out.push(token);
                }
                current = String::new();
            }
            prev_lower = ch.is_lowercase();
            current.push(ch);
        }
        let token = current.trim().to_string();
        if !token.is_empty() {
            out.push(token);
        }
    }
    out
}

fn split_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .collect()
}

/// Extract an episode number from a title like "Episode 123", "#123",
/// "Ep. 123" or "123: …" when the feed omits the itunes tag.
fn extract_episode_number(title: &str) -> Option<String> {
    let patterns = [
        r"Episode\s*(\d+)",
        r"#(\d+)",
        r"Ep\.?\s*(\d+)",
        r"^\s*(\d+)\s*[-:.]",
    ];

    for pattern in patterns {
        if let Ok(re) = regex::Regex::new(pattern) {
            if let Some(caps) = re.captures(title) {
                if let Some(num) = caps.get(1) {
                    return Some(num.as_str().to_string());
                }
            }
        }
    }
    None
}

/// iTunes duration is either plain seconds or HH:MM:SS / MM:SS.
fn parse_duration_seconds(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if !raw.contains(':') {
        return raw.parse::<i64>().ok().filter(|secs| *secs >= 0);
    }
    let mut total: i64 = 0;
    for part in raw.split(':') {
        let value = part.trim().parse::<i64>().ok()?;
        if value < 0 {
            return None;
        }
        total = total * 60 + value;
    }
    Some(total)
}

fn parse_explicit(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "explicit"
    )
}

fn parse_release_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn looks_like_xml(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_start().starts_with('<'),
        Err(_) => false,
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn push_unique(categories: &mut Vec<CategoryPair>, pair: CategoryPair) {
    if !categories.contains(&pair) {
        categories.push(pair);
    }
}
