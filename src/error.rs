use thiserror::Error;

/// Failure to turn raw feed bytes into a [`crate::feed::NormalizedFeed`].
///
/// A `ParseError` aborts the ingestion run that triggered it; nothing is
/// written. Missing optional fields inside an otherwise well-formed feed are
/// recovered locally and never surface here.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("document is not a recognizable podcast feed: {0}")]
    NotAFeed(String),

    #[error("malformed feed document: {0}")]
    Malformed(String),
}

/// Failure during reconciliation of a parsed feed against the stored graph.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Two episodes in the same feed document resolved to the same identity
    /// key. Matching would be ambiguous, so the run aborts with no writes.
    #[error("feed contains two episodes with the same identity key: {key}")]
    DuplicateIdentity { key: String },

    #[error("podcast {0} not found")]
    PodcastNotFound(i64),

    #[error("episode {0} not found")]
    EpisodeNotFound(i64),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Invalid person-merge request. None of these leave any state change behind.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("a person record cannot be merged into itself")]
    SelfMerge,

    #[error("source person {0} has already been merged into another record")]
    SourceRetired(i64),

    #[error("destination person {0} is retired; merge into its primary record instead")]
    DestinationRetired(i64),

    #[error("person {0} not found")]
    PersonNotFound(i64),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}
