use thiserror::Error;

/// Error taxonomy for the dataset sync engine.
///
/// Kinds are disjoint and carry their cause chain. `IllegalArgument` and
/// `IllegalState` are synchronous and never wrap a lower-level cause; the
/// rest can originate from storage or a remote transport failure.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Transport/IO failure talking to the remote store. Transient; the
    /// caller may retry.
    #[error("network error: {0}")]
    Network(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The server reports the dataset does not exist.
    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    /// `UpdateRecords` was rejected because the server advanced past the
    /// caller's `sync_session_token`.
    #[error("sync conflict on dataset {0}")]
    DataConflict(String),

    /// Per-user or per-dataset quota exceeded, locally or remotely.
    #[error("data limit exceeded: {0}")]
    DataLimitExceeded(String),

    /// Local embedded database failure.
    #[error("local storage error: {0}")]
    Storage(#[source] rusqlite::Error),

    /// Invalid dataset name or record key. Raised before any I/O.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// Operation is invalid in the current local state (e.g. opening a
    /// dataset that is locally deleted and not yet reconciled).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A control callback (`on_conflict`, `on_dataset_deleted`,
    /// `on_datasets_merged`) returned `false`, cancelling the sync session.
    #[error("sync session cancelled")]
    ManualCancel,
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::Storage(e)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
