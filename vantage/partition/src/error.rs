/// Failures of a partitioned operation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0} not found")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("invalid continue token: {0}")]
    InvalidCursor(#[from] CursorError),

    /// A partition's list or watch failed. Fatal to the whole operation.
    #[error("failed to fetch partition {partition:?}: {error}")]
    Fetch {
        partition: String,
        error: anyhow::Error,
    },

    /// A single-object operation failed in the partition's store.
    #[error(transparent)]
    Store(anyhow::Error),

    /// The operation was cancelled, either by the caller or by a failure in another partition.
    #[error("operation cancelled")]
    Cancelled,

    #[error("partition task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, thiserror::Error)]
pub enum CursorError {
    #[error("not base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("malformed state: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn fetch(partition: impl Into<String>, error: anyhow::Error) -> Self {
        Self::Fetch {
            partition: partition.into(),
            error,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
