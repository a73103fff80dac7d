use thiserror::Error;
use vaccibot_notify::NotifyError;
use vaccibot_storage::StorageError;

/// Failures while wiring the pipeline together. All of them are fatal.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("invalid keyword pattern: {0}")]
    Keywords(#[from] regex::Error),

    #[error("notifier setup failed: {0}")]
    Notify(#[from] NotifyError),
}

/// Failures of a single dedup decision. The slot is skipped for this cycle.
#[derive(Error, Debug)]
pub enum DedupError {
    #[error("dedup store: {0}")]
    Store(#[from] StorageError),

    #[error("delivery: {0}")]
    Notify(#[from] NotifyError),

    #[error("encoding dedup state: {0}")]
    Codec(#[from] serde_json::Error),
}
