use thiserror::Error;

/// Errors raised by the segmenter actor.
#[derive(Debug, Error)]
pub enum SegmenterError {
    #[error("segmenter is no longer active: finish() was already called")]
    NotActive,

    #[error("no frames pending to force a segment boundary")]
    NoFramesPending,

    #[error("ingested frame timestamp {got} is before the last seen timestamp {last}")]
    NonMonotonicTimestamp { last: f64, got: f64 },

    #[error("forced cut at max duration: {0}")]
    MaxDurationExceeded(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Errors raised by [`crate::crypto::AesCbc`] and the sample-level encryptors.
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid AES key size: expected 16 bytes, got {0}")]
    InvalidKeySize(usize),

    #[error("invalid AES IV size: expected 16 bytes, got {0}")]
    InvalidIvSize(usize),

    #[error("crypto operation failed: {0}")]
    CryptoFailed(String),

    #[error("unsupported encryption method: {0}")]
    UnsupportedMethod(String),

    #[error("segment not found at path: {0}")]
    SegmentNotFound(String),

    #[error("key file not found at path: {0}")]
    KeyNotFound(String),
}

/// Errors surfaced while building ISOBMFF boxes or MPEG-TS packets.
#[derive(Debug, Error)]
pub enum MuxerError {
    #[error("box size overflowed a 32-bit field (box {0:?} payload {1} bytes)")]
    BoxSizeOverflow([u8; 4], usize),

    #[error("malformed media: {0}")]
    MalformedMedia(String),
}

/// Top-level error type composing every component's error kind.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Segmenter(#[from] SegmenterError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error(transparent)]
    Muxer(#[from] MuxerError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
