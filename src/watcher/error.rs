//! Error types for the watch service.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("Confined task panicked: {reason}")]
    TaskPanicked { reason: String },

    #[error("Watcher has been shut down")]
    ShutDown,
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

impl WatchError {
    /// Build a `TaskPanicked` error from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let reason = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };
        WatchError::TaskPanicked { reason }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_payload_is_preserved() {
        let payload = std::panic::catch_unwind(|| panic!("subscriber exploded")).unwrap_err();
        let error = WatchError::from_panic(payload);
        assert_eq!(
            error.to_string(),
            "Confined task panicked: subscriber exploded"
        );

        let formatted = std::panic::catch_unwind(|| panic!("batch {}", 7)).unwrap_err();
        assert!(matches!(
            WatchError::from_panic(formatted),
            WatchError::TaskPanicked { reason } if reason == "batch 7"
        ));
    }
}
