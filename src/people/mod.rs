//! Person identity resolution.
//!
//! Auto-attach is deliberately conservative: an exact case-insensitive name
//! match or nothing. Two real people sharing a display name will collide and
//! one person spelled differently across feeds will split; both are accepted
//! limitations of feed-supplied identity, resolved manually via [`merge`].

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::MergeError;
use crate::feed::{PersonMention, PersonRole};
use crate::store::{Database, MergeStats, Person, StoreScope};

/// Outcome of resolving one feed person mention.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachResult {
    pub person_id: i64,
    pub created: bool,
    pub edge_added: bool,
}

/// Episodes where both merge candidates already appear.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConflictReport {
    pub source_id: i64,
    pub destination_id: i64,
    pub common_host_episodes: Vec<i64>,
    pub common_guest_episodes: Vec<i64>,
    /// Episodes where both people appear in any role, including one hosting
    /// while the other guests.
    pub common_episodes: Vec<i64>,
    pub is_conflict_free: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeOutcome {
    pub destination: Person,
    pub hosted_moved: usize,
    pub guested_moved: usize,
    pub duplicate_edges_dropped: usize,
}

/// Follow a retired person's redirect to the primary record. At most one hop
/// can exist because merging into a retired record is rejected.
pub fn resolve_person(db: &Database, id: i64) -> Result<Option<Person>> {
    let Some(person) = db.get_person(id)? else {
        return Ok(None);
    };
    match person.merged_into {
        Some(target) => db.get_person(target),
        None => Ok(Some(person)),
    }
}

/// Attach a feed person mention to an episode, creating the person if no
/// existing record matches the name exactly (case-insensitive). Runs against
/// a write scope so the attach joins the reconciliation's transaction.
pub fn attach_or_create(
    store: &StoreScope<'_>,
    episode_id: i64,
    mention: &PersonMention,
) -> Result<AttachResult> {
    let (person, created) = match store.find_person_by_name(&mention.name)? {
        Some(found) if found.is_retired() => {
            let target_id = found.merged_into.unwrap_or(found.id);
            let target = store.get_person(target_id)?.unwrap_or(found);
            (target, false)
        }
        Some(found) => (found, false),
        None => {
            let id = store.create_person(
                &mention.name,
                mention.url.as_deref(),
                mention.img_url.as_deref(),
            )?;
            log::debug!("created person {id} for feed name {:?}", mention.name);
            let person = store
                .get_person(id)?
                .ok_or_else(|| anyhow::anyhow!("person {id} vanished after insert"))?;
            (person, true)
        }
    };

    // A mention may carry urls an earlier one lacked.
    let needs_url = person.url.is_none() && mention.url.is_some();
    let needs_img = person.img_url.is_none() && mention.img_url.is_some();
    if !created && (needs_url || needs_img) {
        store.update_person_urls(
            person.id,
            person.url.as_deref().or(mention.url.as_deref()),
            person.img_url.as_deref().or(mention.img_url.as_deref()),
        )?;
    }

    let edge_added = match mention.role {
        PersonRole::Host => store.add_host_edge(episode_id, person.id)?,
        PersonRole::Guest => store.add_guest_edge(episode_id, person.id)?,
    };

    Ok(AttachResult {
        person_id: person.id,
        created,
        edge_added,
    })
}

/// Enumerate the episodes where source and destination already overlap, so a
/// caller can show what a merge would collapse before committing to it.
pub fn analyze_merge_conflict(
    db: &Database,
    source_id: i64,
    destination_id: i64,
) -> Result<ConflictReport, MergeError> {
    let _source = db
        .get_person(source_id)?
        .ok_or(MergeError::PersonNotFound(source_id))?;
    let _destination = db
        .get_person(destination_id)?
        .ok_or(MergeError::PersonNotFound(destination_id))?;

    let source_hosted = db.hosted_episode_ids(source_id)?;
    let source_guested = db.guest_episode_ids(source_id)?;
    let destination_hosted = db.hosted_episode_ids(destination_id)?;
    let destination_guested = db.guest_episode_ids(destination_id)?;

    let common_host_episodes = intersect(&source_hosted, &destination_hosted);
    let common_guest_episodes = intersect(&source_guested, &destination_guested);

    // The overall conflict set ignores roles: one person hosting an episode
    // the other guests on still collapses into a self-appearance on merge.
    let mut common_episodes = intersect(
        &union(&source_hosted, &source_guested),
        &union(&destination_hosted, &destination_guested),
    );
    common_episodes.sort_unstable();

    let is_conflict_free = common_episodes.is_empty();

    Ok(ConflictReport {
        source_id,
        destination_id,
        common_host_episodes,
        common_guest_episodes,
        common_episodes,
        is_conflict_free,
    })
}

/// Merge `source` into `destination`.
///
/// Irreversible: the caller is responsible for confirming with a human
/// first. All edge moves and the retirement commit atomically; on conflict
/// the destination's existing edge wins and the source edge is dropped.
pub fn merge(
    db: &Database,
    source_id: i64,
    destination_id: i64,
    now: DateTime<Utc>,
) -> Result<MergeOutcome, MergeError> {
    if source_id == destination_id {
        return Err(MergeError::SelfMerge);
    }
    let source = db
        .get_person(source_id)?
        .ok_or(MergeError::PersonNotFound(source_id))?;
    let destination = db
        .get_person(destination_id)?
        .ok_or(MergeError::PersonNotFound(destination_id))?;
    if source.is_retired() {
        return Err(MergeError::SourceRetired(source_id));
    }
    if destination.is_retired() {
        return Err(MergeError::DestinationRetired(destination_id));
    }

    let stats: MergeStats = db.merge_people(&source, &destination, now)?;
    log::info!(
        "merged person {} ({}) into {} ({}): {} host edges, {} guest edges, {} duplicates dropped",
        source.id,
        source.name,
        destination.id,
        destination.name,
        stats.hosted_moved,
        stats.guested_moved,
        stats.duplicate_edges_dropped
    );

    let destination = db
        .get_person(destination_id)?
        .ok_or(MergeError::PersonNotFound(destination_id))?;

    Ok(MergeOutcome {
        destination,
        hosted_moved: stats.hosted_moved,
        guested_moved: stats.guested_moved,
        duplicate_edges_dropped: stats.duplicate_edges_dropped,
    })
}

fn intersect(a: &[i64], b: &[i64]) -> Vec<i64> {
    a.iter().filter(|id| b.contains(id)).copied().collect()
}

fn union(a: &[i64], b: &[i64]) -> Vec<i64> {
    let mut out = a.to_vec();
    for id in b {
        if !out.contains(id) {
            out.push(*id);
        }
    }
    out
}
