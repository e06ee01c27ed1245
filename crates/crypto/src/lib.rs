//! Seekable stream encryption for upload fragments.
//!
//! Fragments of one file are encrypted independently and out of order, yet
//! must decrypt as a single continuous ciphertext stream. Both supported
//! ciphers (AES-CTR, ChaCha20) position their keystream at the fragment's
//! byte offset before encrypting, so `encrypt(bytes, offset)` is
//! deterministic regardless of upload order.

mod checksum;
mod cipher;
mod secrets;

pub use checksum::{fold_crc32, round_up_to_64};
pub use cipher::encrypt;
pub use secrets::Secrets;

/// Errors produced while encrypting or handling key material.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid base64 key material: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid {what} length: expected {expected} bytes, got {got}")]
    Length {
        what: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("missing key material for encrypted upload")]
    MissingSecrets,
}
