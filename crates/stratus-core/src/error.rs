use thiserror::Error;

pub type StratusResult<T> = Result<T, StratusError>;

/// Configuration the daemon refuses to start with.
#[derive(Debug, Error)]
pub enum StratusError {
    #[error("hydration.chunk_size must be a non-zero multiple of {alignment}, got {got}")]
    UnalignedChunkSize { got: usize, alignment: usize },

    #[error("hydration.queue_capacity must be at least 1")]
    EmptyQueue,

    #[error("sync_root.display_name must not be empty")]
    MissingDisplayName,

    #[error("storage.backend must be \"s3\" or \"fs\", got {0:?}")]
    UnknownBackend(String),
}
