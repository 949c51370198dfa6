use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// iTunes episode type. Feeds that omit the tag are assumed `Full`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeType {
    Full,
    Trailer,
    Bonus,
}

impl Default for EpisodeType {
    fn default() -> Self {
        Self::Full
    }
}

impl std::fmt::Display for EpisodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Trailer => write!(f, "trailer"),
            Self::Bonus => write!(f, "bonus"),
        }
    }
}

impl From<&str> for EpisodeType {
    fn from(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "trailer" => Self::Trailer,
            "bonus" => Self::Bonus,
            _ => Self::Full,
        }
    }
}

/// How often a podcast releases, derived from the median gap between
/// consecutive release dates. `Unknown` means fewer than two data points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleaseFrequency {
    Daily,
    SeveralPerWeek,
    Weekly,
    Biweekly,
    Monthly,
    AdHoc,
    Unknown,
}

impl Default for ReleaseFrequency {
    fn default() -> Self {
        Self::Unknown
    }
}

impl std::fmt::Display for ReleaseFrequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily => write!(f, "daily"),
            Self::SeveralPerWeek => write!(f, "several_per_week"),
            Self::Weekly => write!(f, "weekly"),
            Self::Biweekly => write!(f, "biweekly"),
            Self::Monthly => write!(f, "monthly"),
            Self::AdHoc => write!(f, "adhoc"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl From<&str> for ReleaseFrequency {
    fn from(s: &str) -> Self {
        match s {
            "daily" => Self::Daily,
            "several_per_week" => Self::SeveralPerWeek,
            "weekly" => Self::Weekly,
            "biweekly" => Self::Biweekly,
            "monthly" => Self::Monthly,
            "adhoc" => Self::AdHoc,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Podcast {
    pub id: i64,
    pub title: String,
    pub feed_url: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub email: Option<String>,
    pub site_url: Option<String>,
    pub funding_url: Option<String>,
    pub cover_art_url: Option<String>,
    pub language: Option<String>,
    pub generator: Option<String>,
    pub explicit: bool,
    pub itunes_feed_type: Option<String>,
    pub probable_feed_host: Option<String>,
    pub release_frequency: ReleaseFrequency,
    pub dormant: bool,
    pub has_itunes_data: bool,
    pub has_podcast_index_data: bool,
    pub has_structured_funding: bool,
    pub has_tracking_data: bool,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_release_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub podcast_id: i64,
    pub guid: Option<String>,
    pub title: Option<String>,
    pub episode_number: Option<i64>,
    pub season_id: Option<i64>,
    pub episode_type: EpisodeType,
    pub show_notes: Option<String>,
    pub episode_url: Option<String>,
    pub download_url: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub release_at: Option<DateTime<Utc>>,
    pub explicit: bool,
    pub cw_present: bool,
    pub transcript_detected: bool,
}

/// Field set for inserting a new episode row. The id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub podcast_id: i64,
    pub guid: Option<String>,
    pub title: Option<String>,
    pub episode_number: Option<i64>,
    pub season_id: Option<i64>,
    pub episode_type: EpisodeType,
    pub show_notes: Option<String>,
    pub episode_url: Option<String>,
    pub download_url: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    pub file_size: Option<i64>,
    pub duration_seconds: Option<i64>,
    pub release_at: Option<DateTime<Utc>>,
    pub explicit: bool,
    pub cw_present: bool,
    pub transcript_detected: bool,
}

/// One changed column of an existing episode row.
///
/// The reconciler diffs the stored row against the normalized feed item and
/// applies only the variants that actually differ, so an unchanged episode
/// produces zero writes and the delta itself stays reportable and testable.
#[derive(Debug, Clone, PartialEq)]
pub enum EpisodeChange {
    Guid(Option<String>),
    Title(Option<String>),
    EpisodeNumber(Option<i64>),
    SeasonId(Option<i64>),
    EpisodeType(String),
    ShowNotes(Option<String>),
    EpisodeUrl(Option<String>),
    DownloadUrl(String),
    FileName(Option<String>),
    MimeType(Option<String>),
    FileSize(Option<i64>),
    DurationSeconds(Option<i64>),
    ReleaseAt(Option<DateTime<Utc>>),
    Explicit(bool),
    CwPresent(bool),
    TranscriptDetected(bool),
}

impl EpisodeChange {
    pub fn column(&self) -> &'static str {
        match self {
            Self::Guid(_) => "guid",
            Self::Title(_) => "title",
            Self::EpisodeNumber(_) => "episode_number",
            Self::SeasonId(_) => "season_id",
            Self::EpisodeType(_) => "episode_type",
            Self::ShowNotes(_) => "show_notes",
            Self::EpisodeUrl(_) => "episode_url",
            Self::DownloadUrl(_) => "download_url",
            Self::FileName(_) => "file_name",
            Self::MimeType(_) => "mime_type",
            Self::FileSize(_) => "file_size",
            Self::DurationSeconds(_) => "duration_seconds",
            Self::ReleaseAt(_) => "release_at",
            Self::Explicit(_) => "explicit",
            Self::CwPresent(_) => "cw_present",
            Self::TranscriptDetected(_) => "transcript_detected",
        }
    }

    pub(crate) fn value(&self) -> &dyn rusqlite::ToSql {
        match self {
            Self::Guid(v) => v,
            Self::Title(v) => v,
            Self::EpisodeNumber(v) => v,
            Self::SeasonId(v) => v,
            Self::EpisodeType(v) => v,
            Self::ShowNotes(v) => v,
            Self::EpisodeUrl(v) => v,
            Self::DownloadUrl(v) => v,
            Self::FileName(v) => v,
            Self::MimeType(v) => v,
            Self::FileSize(v) => v,
            Self::DurationSeconds(v) => v,
            Self::ReleaseAt(v) => v,
            Self::Explicit(v) => v,
            Self::CwPresent(v) => v,
            Self::TranscriptDetected(v) => v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Season {
    pub id: i64,
    pub podcast_id: i64,
    pub season_number: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    pub id: i64,
    pub name: String,
    pub url: Option<String>,
    pub img_url: Option<String>,
    /// Primary record this person has been merged into, if any.
    pub merged_into: Option<i64>,
    pub merged_at: Option<DateTime<Utc>>,
}

impl Person {
    /// A retired person has been merged into another record and is excluded
    /// from listings; reads must dereference through `merged_into`.
    pub fn is_retired(&self) -> bool {
        self.merged_into.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub parent_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisGroup {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
}
