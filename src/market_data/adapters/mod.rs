// Shared trait + outcome types for venue samplers

use std::time::Duration;

use crate::engine::types::Sample;
use crate::market_data::signing::SigningError;

#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    Sample(Sample),
    // Thin or empty book: a normal result, not an error.
    NoData { book: String, reason: NoDataReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoDataReason {
    MissingPayload,
    EmptyBids,
    EmptyAsks,
}

impl std::fmt::Display for NoDataReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NoDataReason::MissingPayload => write!(f, "missing payload"),
            NoDataReason::EmptyBids => write!(f, "empty bids"),
            NoDataReason::EmptyAsks => write!(f, "empty asks"),
        }
    }
}

/// Everything that can go wrong fetching one snapshot. All variants are
/// transient from the poller's point of view: the tick is skipped.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("venue answered with status {0}")]
    Status(u16),
    #[error("undecodable response: {0}")]
    Decode(String),
    #[error(transparent)]
    Signing(#[from] SigningError),
}

#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    /// One top-of-book snapshot for `book`.
    async fn sample(&self, book: &str) -> Result<SampleOutcome, FetchError>;
}

pub mod bitso;
pub mod bitso_types;
