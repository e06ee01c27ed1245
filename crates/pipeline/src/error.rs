//! Pipeline error types.

/// Errors produced by pipeline stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(#[from] fraglift_crypto::CryptoError),

    #[error("media error: {0}")]
    Media(#[from] fraglift_media::MediaError),

    #[error("host error: {0}")]
    Host(#[from] fraglift_host::HostError),

    #[error("queue closed")]
    QueueClosed(#[from] crate::queue::QueueClosed),

    #[error("session already started")]
    AlreadyStarted,
}
