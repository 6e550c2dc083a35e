//! Error types for queryd.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("configuration error: {0}")]
    Config(String),

    // --- admission ---
    #[error("submission queue is full")]
    QueueFull,

    #[error("engine is not accepting jobs")]
    EngineClosed,

    #[error("job abandoned during shutdown")]
    Abandoned,

    // --- lifecycle usage ---
    #[error("dispatcher already started")]
    AlreadyStarted,

    #[error("dispatcher is not running")]
    NotRunning,

    #[error("dispatcher stop already requested")]
    AlreadyStopping,

    // --- invariant violations ---
    #[error("idle registry overflow: worker {0} registered while the pool was full")]
    PoolOverflow(usize),

    // --- execution ---
    #[error("request creation failed: {0}")]
    RequestBuild(String),

    #[error("sending request failed: {0}")]
    Send(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error came out of an `Executor` run rather than the engine itself.
    pub fn is_execution(&self) -> bool {
        matches!(self, Error::RequestBuild(_) | Error::Send(_) | Error::Database(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
