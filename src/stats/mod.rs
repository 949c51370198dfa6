//! Read-side statistics over the reconciled entity graph.
//!
//! Everything here is derived and recomputable; the reconciler memoizes
//! frequency and dormancy on the podcast row for the scheduler's benefit,
//! but these functions always work from the underlying episodes.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::{AnalyzerConfig, FrequencyBoundaries};
use crate::people::resolve_person;
use crate::store::{Database, ReleaseFrequency};

/// Scope selector for aggregate queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatScope {
    Podcast(i64),
    Group(i64),
}

#[derive(Debug, Clone, Serialize)]
pub struct PodcastStats {
    pub podcast_id: i64,
    pub title: String,
    pub episode_count: i64,
    pub season_count: i64,
    pub total_duration_seconds: i64,
    pub median_duration_seconds: Option<f64>,
    pub release_frequency: ReleaseFrequency,
    pub dormant: bool,
    pub last_release_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryRollup {
    pub name: String,
    pub parent: Option<String>,
    pub podcast_count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodcastAppearance {
    pub podcast_id: i64,
    pub title: String,
    pub hosted_episodes: i64,
    pub guested_episodes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PersonAppearances {
    pub person_id: i64,
    pub name: String,
    pub hosted_podcasts: i64,
    pub guested_podcasts: i64,
    pub distinct_podcasts: i64,
    pub by_podcast: Vec<PodcastAppearance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupStats {
    pub group_id: i64,
    pub name: String,
    pub podcast_count: i64,
    pub episode_count: i64,
    pub total_duration_seconds: i64,
    pub median_duration_seconds: Option<f64>,
    pub dormant_feeds: i64,
    pub feeds_with_itunes_data: i64,
    pub feeds_with_podcast_index_data: i64,
    pub feeds_with_structured_funding: i64,
    pub feeds_with_tracking_data: i64,
    pub categories: Vec<CategoryRollup>,
}

/// Classify release cadence from the median gap between consecutive
/// releases. Boundary values land in the tighter bucket; fewer than two
/// timestamps is `Unknown`.
pub fn classify_release_frequency(
    release_times: &[DateTime<Utc>],
    boundaries: &FrequencyBoundaries,
) -> ReleaseFrequency {
    if release_times.len() < 2 {
        return ReleaseFrequency::Unknown;
    }
    let mut times = release_times.to_vec();
    times.sort_unstable();
    let gaps: Vec<i64> = times
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_seconds())
        .collect();
    let Some(median_gap) = median_high(&gaps) else {
        return ReleaseFrequency::Unknown;
    };

    let days = |d: i64| d * 86_400;
    if median_gap <= days(boundaries.daily_max_days) {
        ReleaseFrequency::Daily
    } else if median_gap <= days(boundaries.several_per_week_max_days) {
        ReleaseFrequency::SeveralPerWeek
    } else if median_gap <= days(boundaries.weekly_max_days) {
        ReleaseFrequency::Weekly
    } else if median_gap <= days(boundaries.biweekly_max_days) {
        ReleaseFrequency::Biweekly
    } else if median_gap <= days(boundaries.monthly_max_days) {
        ReleaseFrequency::Monthly
    } else {
        ReleaseFrequency::AdHoc
    }
}

/// Dormancy rule: no release within the staleness window, or no dated
/// releases at all.
pub fn is_dormant(
    last_release_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    staleness_days: i64,
) -> bool {
    match last_release_at {
        Some(at) => now - at > Duration::days(staleness_days),
        None => true,
    }
}

/// Upper median: the greater of the two central values for an even count.
/// Used for release gaps, where a representative observed value beats an
/// interpolated one. `None` for an empty slice.
pub fn median_high(values: &[i64]) -> Option<i64> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted.get(sorted.len() / 2).copied()
}

/// Statistical median with the standard even/odd midpoint rule.
pub fn median_duration(durations: &[i64]) -> Option<f64> {
    if durations.is_empty() {
        return None;
    }
    let mut sorted = durations.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid] as f64)
    } else {
        Some((sorted[mid - 1] + sorted[mid]) as f64 / 2.0)
    }
}

pub fn total_duration(durations: &[i64]) -> i64 {
    durations.iter().sum()
}

/// Derived aggregates for one podcast, computed fresh from its episodes.
pub fn podcast_stats(
    db: &Database,
    podcast_id: i64,
    config: &AnalyzerConfig,
    now: DateTime<Utc>,
) -> Result<Option<PodcastStats>> {
    let Some(podcast) = db.get_podcast(podcast_id)? else {
        return Ok(None);
    };
    let durations = db.durations(podcast_id)?;
    // Trailers and bonus episodes would distort the cadence, so frequency
    // uses full episodes only.
    let release_times = db.release_times(podcast_id, true)?;
    let all_release_times = db.release_times(podcast_id, false)?;
    let last_release_at = all_release_times.last().copied();

    Ok(Some(PodcastStats {
        podcast_id,
        title: podcast.title,
        episode_count: db.count_episodes(podcast_id)?,
        season_count: db.season_count(podcast_id)?,
        total_duration_seconds: total_duration(&durations),
        median_duration_seconds: median_duration(&durations),
        release_frequency: classify_release_frequency(&release_times, &config.boundaries),
        dormant: is_dormant(last_release_at, now, config.staleness_days),
        last_release_at,
    }))
}

/// Distinct-podcast count per category for a podcast or an analysis group,
/// parent names preserved for display grouping.
pub fn category_rollup(db: &Database, scope: StatScope) -> Result<Vec<CategoryRollup>> {
    let podcast_ids = match scope {
        StatScope::Podcast(id) => vec![id],
        StatScope::Group(id) => db.group_podcast_ids(id)?,
    };

    let mut counts: BTreeMap<(Option<String>, String), i64> = BTreeMap::new();
    for podcast_id in podcast_ids {
        for (category, parent_name) in db.categories_for_podcast(podcast_id)? {
            *counts.entry((parent_name, category.name)).or_insert(0) += 1;
        }
    }

    Ok(counts
        .into_iter()
        .map(|((parent, name), podcast_count)| CategoryRollup {
            name,
            parent,
            podcast_count,
        })
        .collect())
}

/// Appearance counts for a person, always dereferenced through any merge
/// redirect so a retired record never surfaces.
pub fn person_appearances(db: &Database, person_id: i64) -> Result<Option<PersonAppearances>> {
    let Some(person) = resolve_person(db, person_id)? else {
        return Ok(None);
    };

    let mut by_podcast: BTreeMap<i64, PodcastAppearance> = BTreeMap::new();
    for (podcast_id, title, count) in db.appearance_counts_by_podcast(person.id, true)? {
        by_podcast
            .entry(podcast_id)
            .or_insert_with(|| PodcastAppearance {
                podcast_id,
                title,
                hosted_episodes: 0,
                guested_episodes: 0,
            })
            .hosted_episodes = count;
    }
    for (podcast_id, title, count) in db.appearance_counts_by_podcast(person.id, false)? {
        by_podcast
            .entry(podcast_id)
            .or_insert_with(|| PodcastAppearance {
                podcast_id,
                title,
                hosted_episodes: 0,
                guested_episodes: 0,
            })
            .guested_episodes = count;
    }

    let by_podcast: Vec<PodcastAppearance> = by_podcast.into_values().collect();
    let hosted_podcasts = by_podcast.iter().filter(|a| a.hosted_episodes > 0).count() as i64;
    let guested_podcasts = by_podcast.iter().filter(|a| a.guested_episodes > 0).count() as i64;

    Ok(Some(PersonAppearances {
        person_id: person.id,
        name: person.name,
        hosted_podcasts,
        guested_podcasts,
        distinct_podcasts: by_podcast.len() as i64,
        by_podcast,
    }))
}

/// Aggregates across an analysis group: member podcasts plus any directly
/// assigned episodes whose podcast is not already a member.
pub fn group_stats(db: &Database, group_id: i64) -> Result<Option<GroupStats>> {
    let Some(group) = db.get_group(group_id)? else {
        return Ok(None);
    };
    let podcast_ids = db.group_podcast_ids(group_id)?;

    let mut episode_count = 0i64;
    let mut durations: Vec<i64> = Vec::new();
    let mut dormant_feeds = 0i64;
    let mut feeds_with_itunes_data = 0i64;
    let mut feeds_with_podcast_index_data = 0i64;
    let mut feeds_with_structured_funding = 0i64;
    let mut feeds_with_tracking_data = 0i64;

    for podcast_id in &podcast_ids {
        let Some(podcast) = db.get_podcast(*podcast_id)? else {
            continue;
        };
        episode_count += db.count_episodes(*podcast_id)?;
        durations.extend(db.durations(*podcast_id)?);
        if podcast.dormant {
            dormant_feeds += 1;
        }
        if podcast.has_itunes_data {
            feeds_with_itunes_data += 1;
        }
        if podcast.has_podcast_index_data {
            feeds_with_podcast_index_data += 1;
        }
        if podcast.has_structured_funding {
            feeds_with_structured_funding += 1;
        }
        if podcast.has_tracking_data {
            feeds_with_tracking_data += 1;
        }
    }

    for episode_id in db.group_episode_ids(group_id)? {
        let Some(episode) = db.get_episode(episode_id)? else {
            continue;
        };
        if podcast_ids.contains(&episode.podcast_id) {
            continue; // already counted via the member podcast
        }
        episode_count += 1;
        if let Some(duration) = episode.duration_seconds {
            durations.push(duration);
        }
    }

    Ok(Some(GroupStats {
        group_id,
        name: group.name,
        podcast_count: podcast_ids.len() as i64,
        episode_count,
        total_duration_seconds: total_duration(&durations),
        median_duration_seconds: median_duration(&durations),
        dormant_feeds,
        feeds_with_itunes_data,
        feeds_with_podcast_index_data,
        feeds_with_structured_funding,
        feeds_with_tracking_data,
        categories: category_rollup(db, StatScope::Group(group_id))?,
    }))
}
