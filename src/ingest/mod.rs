//! Entity reconciliation: merging a freshly parsed feed into the stored
//! entity graph.
//!
//! One call handles one podcast and runs inside a single transaction, so an
//! aborted run leaves no partial writes behind. Re-running over an unchanged
//! feed is a no-op on the graph.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::AnalyzerConfig;
use crate::error::ReconcileError;
use crate::feed::sniff::{corrected_file_name, file_name_from_url, resolve_enclosure_type};
use crate::feed::{NormalizedEpisode, NormalizedFeed};
use crate::people::attach_or_create;
use crate::stats::{classify_release_frequency, is_dormant};
use crate::store::{
    Database, Episode, EpisodeChange, EpisodeType, NewEpisode, Podcast, ReleaseFrequency,
    StoreScope,
};

/// Feed generators that identify a hosting platform outright.
const GENERATOR_HOST_MAPPING: &[(&str, &str)] = &[
    ("Fireside (https://fireside.fm)", "Fireside.fm"),
    ("https://podbean.com/", "Podbean"),
    ("https://simplecast.com", "Simplecast"),
    ("Transistor (https://transistor.fm)", "Transistor.fm"),
    ("acast.com", "Acast"),
    ("Anchor Podcasts", "Anchor/Spotify"),
    ("Pinecast (https://pinecast.com)", "Pinecast"),
];

/// Generator substrings that identify a hosting platform.
const PARTIAL_GENERATOR_HOST_MAPPING: &[(&str, &str)] = &[
    ("RedCircle", "RedCircle"),
    ("Libsyn", "Libsyn"),
    ("Squarespace", "Squarespace"),
    ("podbean.com", "Podbean"),
];

/// Enclosure-URL domains that identify a hosting platform.
const DOMAIN_HOST_MAPPING: &[(&str, &str)] = &[
    ("buzzsprout.com", "Buzzsprout"),
    ("fireside.fm", "Fireside.fm"),
    ("podbean.com", "Podbean"),
    ("simplecast.com", "Simplecast"),
    ("transistor.fm", "Transistor.fm"),
    ("redcircle.com", "RedCircle"),
    ("acast.com", "Acast"),
    ("pinecast.com", "Pinecast"),
    ("libsyn.com", "Libsyn"),
    ("spreaker.com", "Spreaker"),
    ("soundcloud.com", "Soundcloud"),
    ("anchor.fm", "Anchor/Spotify"),
    ("squarespace.com", "Squarespace"),
    ("blubrry.com", "Blubrry"),
];

/// Third-party download-tracking beacons recognizable from enclosure URLs.
const TRACKING_DOMAINS: &[&str] = &["podtrac", "blubrry"];

/// How many recent enclosure URLs to inspect for host/tracking signals.
const URL_SAMPLE_LIMIT: usize = 10;

/// Summary of one reconciliation run, for the scheduler's logs.
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    pub podcast_id: i64,
    pub podcast_created: bool,
    pub podcast_metadata_changed: bool,
    pub episodes_created: usize,
    pub episodes_updated: usize,
    pub episodes_unchanged: usize,
    pub people_created: usize,
    pub people_attached: usize,
    pub dormant: bool,
    pub release_frequency: ReleaseFrequency,
    pub last_release_at: Option<DateTime<Utc>>,
}

/// Result of checking stored enclosure metadata against real bytes.
#[derive(Debug, Clone, Serialize)]
pub struct EnclosureVerification {
    pub episode_id: i64,
    pub mime_type: String,
    pub file_name: Option<String>,
    pub changed: bool,
}

/// Reconcile a parsed feed into the graph, creating the podcast on first
/// sight of the feed URL. All writes commit together or not at all.
pub fn reconcile_feed(
    db: &Database,
    feed_url: &str,
    feed: &NormalizedFeed,
    config: &AnalyzerConfig,
    now: DateTime<Utc>,
) -> Result<ReconciliationResult, ReconcileError> {
    check_identity_keys(feed)?;

    let result = db.exclusive_write(|store| reconcile_inner(store, feed_url, feed, config, now))?;

    log::info!(
        "reconciled {feed_url}: {} created, {} updated, {} unchanged, dormant={}",
        result.episodes_created,
        result.episodes_updated,
        result.episodes_unchanged,
        result.dormant
    );
    Ok(result)
}

/// Re-check an episode's stored enclosure type against the actual bytes.
/// The sniffed type wins and the stored file name gets a matching extension.
pub fn verify_enclosure(
    db: &Database,
    episode_id: i64,
    bytes: &[u8],
) -> Result<EnclosureVerification, ReconcileError> {
    let episode = db
        .get_episode(episode_id)?
        .ok_or(ReconcileError::EpisodeNotFound(episode_id))?;

    let resolved = resolve_enclosure_type(episode.mime_type.as_deref(), bytes);
    let file_name = episode
        .file_name
        .clone()
        .or_else(|| file_name_from_url(&episode.download_url))
        .map(|name| corrected_file_name(&name, &resolved.mime_type));

    let mut changes = Vec::new();
    if episode.mime_type.as_deref() != Some(resolved.mime_type.as_str()) {
        changes.push(EpisodeChange::MimeType(Some(resolved.mime_type.clone())));
    }
    if file_name != episode.file_name {
        changes.push(EpisodeChange::FileName(file_name.clone()));
    }
    let changed = !changes.is_empty();
    if changed {
        log::debug!(
            "episode {episode_id}: enclosure resolved to {} (was {:?})",
            resolved.mime_type,
            episode.mime_type
        );
        db.update_episode_fields(episode_id, &changes)?;
    }

    Ok(EnclosureVerification {
        episode_id,
        mime_type: resolved.mime_type,
        file_name,
        changed,
    })
}

fn reconcile_inner(
    store: &StoreScope<'_>,
    feed_url: &str,
    feed: &NormalizedFeed,
    config: &AnalyzerConfig,
    now: DateTime<Utc>,
) -> Result<ReconciliationResult, ReconcileError> {
    let (podcast_id, podcast_created) = store.get_or_create_podcast(feed_url, &feed.title)?;
    let before = store
        .get_podcast(podcast_id)?
        .ok_or(ReconcileError::PodcastNotFound(podcast_id))?;

    let category_ids = upsert_categories(store, feed)?;
    sync_podcast_categories(store, podcast_id, &category_ids)?;
    sync_podcast_tags(store, podcast_id, &feed.keywords)?;

    let mut episodes_created = 0usize;
    let mut episodes_updated = 0usize;
    let mut episodes_unchanged = 0usize;
    let mut people_created = 0usize;
    let mut people_attached = 0usize;

    for item in &feed.episodes {
        let season_id = match item.season_number {
            Some(number) => Some(store.get_or_create_season(podcast_id, number)?.0),
            None => None,
        };

        let existing = find_existing_episode(store, podcast_id, item)?;
        let episode_id = match existing {
            None => {
                let id = store.insert_episode(&new_episode(podcast_id, item, season_id))?;
                episodes_created += 1;
                id
            }
            Some(episode) => {
                let changes = episode_changes(&episode, item, season_id);
                if changes.is_empty() {
                    episodes_unchanged += 1;
                } else {
                    log::debug!(
                        "episode {} changed fields: {:?}",
                        episode.id,
                        changes.iter().map(|c| c.column()).collect::<Vec<_>>()
                    );
                    store.update_episode_fields(episode.id, &changes)?;
                    episodes_updated += 1;
                }
                episode.id
            }
        };

        for mention in &item.people {
            let attached = attach_or_create(store, episode_id, mention)?;
            if attached.created {
                people_created += 1;
            }
            if attached.edge_added {
                people_attached += 1;
            }
        }
    }

    let release_times = store.release_times(podcast_id, false)?;
    let last_release_at = release_times.last().copied();
    let dormant = is_dormant(last_release_at, now, config.staleness_days);
    let full_release_times = store.release_times(podcast_id, true)?;
    let release_frequency = classify_release_frequency(&full_release_times, &config.boundaries);

    let after = updated_podcast(&before, feed, last_release_at, dormant, release_frequency);
    let podcast_metadata_changed = after != before;
    if podcast_metadata_changed {
        let mut after = after;
        after.last_checked_at = Some(now);
        store.save_podcast(&after)?;
    } else {
        store.touch_last_checked(podcast_id, now)?;
    }

    Ok(ReconciliationResult {
        podcast_id,
        podcast_created,
        podcast_metadata_changed,
        episodes_created,
        episodes_updated,
        episodes_unchanged,
        people_created,
        people_attached,
        dormant,
        release_frequency,
        last_release_at,
    })
}

/// Reject a feed where two episodes resolve to the same identity key before
/// anything is written.
fn check_identity_keys(feed: &NormalizedFeed) -> Result<(), ReconcileError> {
    let mut seen = HashSet::new();
    for item in &feed.episodes {
        let key = identity_key(item);
        if !seen.insert(key.clone()) {
            return Err(ReconcileError::DuplicateIdentity { key });
        }
    }
    Ok(())
}

/// Stable feed-supplied GUID when present, enclosure URL otherwise.
fn identity_key(item: &NormalizedEpisode) -> String {
    match &item.guid {
        Some(guid) => format!("guid:{guid}"),
        None => format!("url:{}", item.enclosure_url),
    }
}

fn find_existing_episode(
    store: &StoreScope<'_>,
    podcast_id: i64,
    item: &NormalizedEpisode,
) -> Result<Option<Episode>, ReconcileError> {
    let episode = match &item.guid {
        Some(guid) => match store.find_episode_by_guid(podcast_id, guid)? {
            Some(found) => Some(found),
            // A publisher that starts emitting guids must not twin rows that
            // were stored by enclosure URL. Rows already keyed by a different
            // guid stay out of the fallback.
            None => store
                .find_episode_by_download_url(podcast_id, &item.enclosure_url)?
                .filter(|found| found.guid.is_none()),
        },
        None => store.find_episode_by_download_url(podcast_id, &item.enclosure_url)?,
    };
    Ok(episode)
}

fn new_episode(podcast_id: i64, item: &NormalizedEpisode, season_id: Option<i64>) -> NewEpisode {
    NewEpisode {
        podcast_id,
        guid: item.guid.clone(),
        title: item.title.clone(),
        episode_number: item.episode_number,
        season_id,
        episode_type: EpisodeType::from(item.episode_type.as_str()),
        show_notes: item.show_notes.clone(),
        episode_url: item.episode_url.clone(),
        download_url: item.enclosure_url.clone(),
        file_name: file_name_from_url(&item.enclosure_url),
        mime_type: item.mime_type.clone(),
        file_size: item.file_size,
        duration_seconds: item.duration_seconds,
        release_at: item.release_at,
        explicit: item.explicit,
        cw_present: item.cw_present,
        transcript_detected: item.transcript_detected,
    }
}

/// Field-level diff between the stored row and the normalized feed item.
fn episode_changes(
    existing: &Episode,
    item: &NormalizedEpisode,
    season_id: Option<i64>,
) -> Vec<EpisodeChange> {
    let mut changes = Vec::new();

    // Identity fields are only ever gained or corrected, never cleared.
    if item.guid.is_some() && existing.guid != item.guid {
        changes.push(EpisodeChange::Guid(item.guid.clone()));
    }
    if existing.download_url != item.enclosure_url {
        changes.push(EpisodeChange::DownloadUrl(item.enclosure_url.clone()));
        changes.push(EpisodeChange::FileName(file_name_from_url(
            &item.enclosure_url,
        )));
        // A new enclosure invalidates any previously sniffed type.
        if existing.mime_type != item.mime_type {
            changes.push(EpisodeChange::MimeType(item.mime_type.clone()));
        }
    } else if existing.mime_type.is_none() && item.mime_type.is_some() {
        // Same enclosure: a sniffed type on record wins over the declaration.
        changes.push(EpisodeChange::MimeType(item.mime_type.clone()));
    }

    if existing.title != item.title {
        changes.push(EpisodeChange::Title(item.title.clone()));
    }
    if existing.episode_number != item.episode_number {
        changes.push(EpisodeChange::EpisodeNumber(item.episode_number));
    }
    if existing.season_id != season_id {
        changes.push(EpisodeChange::SeasonId(season_id));
    }
    let episode_type = EpisodeType::from(item.episode_type.as_str());
    if existing.episode_type != episode_type {
        changes.push(EpisodeChange::EpisodeType(episode_type.to_string()));
    }
    if existing.show_notes != item.show_notes {
        changes.push(EpisodeChange::ShowNotes(item.show_notes.clone()));
    }
    if existing.episode_url != item.episode_url {
        changes.push(EpisodeChange::EpisodeUrl(item.episode_url.clone()));
    }
    if existing.file_size != item.file_size {
        changes.push(EpisodeChange::FileSize(item.file_size));
    }
    if existing.duration_seconds != item.duration_seconds {
        changes.push(EpisodeChange::DurationSeconds(item.duration_seconds));
    }
    if existing.release_at != item.release_at {
        changes.push(EpisodeChange::ReleaseAt(item.release_at));
    }
    if existing.explicit != item.explicit {
        changes.push(EpisodeChange::Explicit(item.explicit));
    }
    if existing.cw_present != item.cw_present {
        changes.push(EpisodeChange::CwPresent(item.cw_present));
    }
    if existing.transcript_detected != item.transcript_detected {
        changes.push(EpisodeChange::TranscriptDetected(item.transcript_detected));
    }

    changes
}

/// Upsert the feed's category pairs, parents before children, returning the
/// ids to attach to the podcast.
fn upsert_categories(
    store: &StoreScope<'_>,
    feed: &NormalizedFeed,
) -> Result<Vec<i64>, ReconcileError> {
    let mut parent_ids: HashMap<String, i64> = HashMap::new();
    let mut ids = Vec::new();
    for pair in &feed.categories {
        let id = match &pair.parent {
            None => {
                let (id, _) = store.get_or_create_category(&pair.name, None)?;
                parent_ids.insert(pair.name.clone(), id);
                id
            }
            Some(parent) => {
                let parent_id = match parent_ids.get(parent) {
                    Some(id) => *id,
                    None => {
                        let (id, _) = store.get_or_create_category(parent, None)?;
                        parent_ids.insert(parent.clone(), id);
                        id
                    }
                };
                store.get_or_create_category(&pair.name, Some(parent_id))?.0
            }
        };
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

/// Rewrite the podcast's category edges only when the attached set actually
/// changed, so an unchanged feed issues no writes here.
fn sync_podcast_categories(
    store: &StoreScope<'_>,
    podcast_id: i64,
    category_ids: &[i64],
) -> Result<(), ReconcileError> {
    let current = store.podcast_category_ids(podcast_id)?;
    let mut incoming = category_ids.to_vec();
    incoming.sort_unstable();
    if current != incoming {
        store.set_podcast_categories(podcast_id, category_ids)?;
    }
    Ok(())
}

/// Same contract as [`sync_podcast_categories`], for keyword tags.
fn sync_podcast_tags(
    store: &StoreScope<'_>,
    podcast_id: i64,
    keywords: &[String],
) -> Result<(), ReconcileError> {
    let current = store.tags_for_podcast(podcast_id)?;
    let mut incoming = keywords.to_vec();
    incoming.sort_unstable();
    incoming.dedup();
    if current != incoming {
        store.set_podcast_tags(podcast_id, keywords)?;
    }
    Ok(())
}

fn updated_podcast(
    before: &Podcast,
    feed: &NormalizedFeed,
    last_release_at: Option<DateTime<Utc>>,
    dormant: bool,
    release_frequency: ReleaseFrequency,
) -> Podcast {
    let enclosure_urls: Vec<&str> = feed
        .episodes
        .iter()
        .take(URL_SAMPLE_LIMIT)
        .map(|e| e.enclosure_url.as_str())
        .collect();

    Podcast {
        id: before.id,
        title: feed.title.clone(),
        feed_url: before.feed_url.clone(),
        description: feed.description.clone(),
        author: feed.author.clone().or_else(|| before.author.clone()),
        email: feed.email.clone().or_else(|| before.email.clone()),
        site_url: feed.site_url.clone(),
        funding_url: feed.funding_url.clone(),
        cover_art_url: feed.cover_art_url.clone().or_else(|| before.cover_art_url.clone()),
        language: feed.language.clone(),
        generator: feed.generator.clone(),
        explicit: feed.explicit,
        itunes_feed_type: feed.itunes_feed_type.clone(),
        probable_feed_host: infer_feed_host(feed.generator.as_deref(), &enclosure_urls)
            .or_else(|| before.probable_feed_host.clone()),
        release_frequency,
        dormant,
        // Capability flags latch on; a later sparse parse never unsets them.
        has_itunes_data: before.has_itunes_data || feed.has_itunes_data,
        has_podcast_index_data: before.has_podcast_index_data || feed.has_podcast_index_data,
        has_structured_funding: before.has_structured_funding || feed.funding_url.is_some(),
        has_tracking_data: before.has_tracking_data || detect_tracking(&enclosure_urls),
        last_checked_at: before.last_checked_at,
        last_release_at,
    }
}

/// Best-effort hosting-platform inference from the generator string, then
/// from recent enclosure domains.
fn infer_feed_host(generator: Option<&str>, enclosure_urls: &[&str]) -> Option<String> {
    if let Some(generator) = generator {
        for (known, host) in GENERATOR_HOST_MAPPING {
            if generator == *known {
                return Some((*host).to_string());
            }
        }
        for (fragment, host) in PARTIAL_GENERATOR_HOST_MAPPING {
            if generator.contains(fragment) {
                return Some((*host).to_string());
            }
        }
    }
    for url in enclosure_urls {
        for (domain, host) in DOMAIN_HOST_MAPPING {
            if url.contains(domain) {
                return Some((*host).to_string());
            }
        }
    }
    None
}

fn detect_tracking(enclosure_urls: &[&str]) -> bool {
    enclosure_urls
        .iter()
        .any(|url| TRACKING_DOMAINS.iter().any(|domain| url.contains(domain)))
}
