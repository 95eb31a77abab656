//! Error types for the dealer.
//!
//! Every instrument-scoped failure is a [`DealError`]; the scheduler catches
//! it at the task boundary. [`ConfigError`] is only raised during startup.

use std::path::PathBuf;
use thiserror::Error;

use crate::persistence::DealState;

/// Failure while driving a single instrument's deal.
#[derive(Debug, Error)]
pub enum DealError {
    #[error("conflicting state for {instrument_id}: {count} markers match in {dir}")]
    ConflictingState {
        instrument_id: String,
        count: usize,
        dir: PathBuf,
    },

    #[error("corrupt state for {instrument_id}: {reason}")]
    CorruptState {
        instrument_id: String,
        reason: String,
    },

    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid transition {from} -> {to} for {instrument_id}")]
    InvalidTransition {
        instrument_id: String,
        from: DealState,
        to: DealState,
    },

    #[error("execution failed for {instrument_id}: {reason}")]
    Execution {
        instrument_id: String,
        reason: String,
    },

    #[error("gave up waiting for {condition} on {instrument_id} after {waited_secs}s")]
    WaitTimeout {
        instrument_id: String,
        condition: String,
        waited_secs: u64,
    },
}

impl DealError {
    pub(crate) fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DealError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by the quote feed collaborator.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("failed to connect to feed: {0}")]
    Connect(String),

    #[error("subscribe to {instrument_id} failed: {reason}")]
    Subscribe {
        instrument_id: String,
        reason: String,
    },

    #[error("unsubscribe from {instrument_id} failed: {reason}")]
    Unsubscribe {
        instrument_id: String,
        reason: String,
    },

    #[error("stream error: {0}")]
    Stream(String),

    #[error("feed disconnected")]
    Disconnected,
}

/// Malformed or missing configuration. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("prices file not found: {0}")]
    MissingFile(PathBuf),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflicting_state_message_names_instrument() {
        let err = DealError::ConflictingState {
            instrument_id: "BBG000B9XRY4".to_string(),
            count: 2,
            dir: PathBuf::from("deals/current"),
        };
        let msg = err.to_string();
        assert!(msg.contains("BBG000B9XRY4"));
        assert!(msg.contains("2 markers"));
    }

    #[test]
    fn test_feed_error_converts_into_deal_error() {
        let err: DealError = FeedError::Disconnected.into();
        assert!(matches!(err, DealError::Feed(FeedError::Disconnected)));
    }
}
