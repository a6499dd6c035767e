use thiserror::Error;

use crate::config::ConfigError;
use crate::db::StoreError;
use crate::fetch::FetchError;
use crate::notify::NotifyError;

/// Failure of a whole fetch → reconcile → notify cycle.
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("store failure: {0}")]
    Store(StoreError),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("fetch failed: {0}")]
    Fetch(FetchError),
    #[error("notification failed: {0}")]
    Notify(#[from] NotifyError),
}

impl From<StoreError> for WatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MalformedInput(detail) => WatchError::MalformedInput(detail),
            other => WatchError::Store(other),
        }
    }
}

impl From<FetchError> for WatchError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Malformed(detail) => WatchError::MalformedInput(detail),
            other => WatchError::Fetch(other),
        }
    }
}
