use thiserror::Error;

/// Errors from the persisted key/value store and the stats repository.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Stats were modified concurrently (expected revision {expected}, found {found})")]
    Conflict { expected: u64, found: u64 },

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Errors from the offline asset cache.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Failed to fetch {path}: {reason}")]
    Fetch { path: String, reason: String },

    #[error("Cache store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache store not found: {0}")]
    StoreNotFound(String),

    #[error("Duplicate manifest entry: {0}")]
    DuplicateEntry(String),

    #[error("Worker did not acknowledge: {0}")]
    WorkerUnresponsive(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Maximum length for fetch error bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 200;

impl CacheError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let cut = (0..=MAX_ERROR_BODY_LENGTH)
                .rev()
                .find(|&i| body.is_char_boundary(i))
                .unwrap_or(0);
            format!("{}... (truncated, {} total bytes)", &body[..cut], body.len())
        }
    }

    pub fn from_status(path: &str, status: reqwest::StatusCode, body: &str) -> Self {
        CacheError::Fetch {
            path: path.to_string(),
            reason: format!("status {}: {}", status, Self::truncate_body(body)),
        }
    }
}

/// Errors from the one-shot stats migration.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid legacy date key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },

    #[error("Invalid record for {key:?}: {reason}")]
    InvalidRecord { key: String, reason: String },

    #[error("Legacy date {0} has no instant at the legacy offset")]
    NonexistentInstant(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_truncates_long_bodies() {
        let body = "x".repeat(1000);
        let err = CacheError::from_status("/app.js", reqwest::StatusCode::NOT_FOUND, &body);
        let msg = err.to_string();
        assert!(msg.contains("/app.js"));
        assert!(msg.contains("404"));
        assert!(msg.contains("truncated, 1000 total bytes"));
    }

    #[test]
    fn test_conflict_message() {
        let err = StoreError::Conflict { expected: 3, found: 4 };
        assert_eq!(
            err.to_string(),
            "Stats were modified concurrently (expected revision 3, found 4)"
        );
    }
}
