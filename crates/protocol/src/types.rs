use serde::{Deserialize, Serialize};

/// Errors from protocol value conversions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown encryption method: {0}")]
    UnknownEncryptionMethod(u8),
}

/// Per-request limits imposed by the attachment host.
///
/// Both values come from backend configuration, never hard-coded; every
/// upload request the producer emits must fit inside them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostLimits {
    /// Maximum payload size of one multipart request, in bytes.
    pub max_payload_size: u64,
    /// Maximum number of attachments in one request.
    pub max_attachments: usize,
}

impl HostLimits {
    pub fn new(max_payload_size: u64, max_attachments: usize) -> Self {
        Self {
            max_payload_size,
            max_attachments,
        }
    }
}

/// Encryption method applied to file bytes before upload.
///
/// Serialized as an integer to match the backend's contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum EncryptionMethod {
    #[default]
    NotEncrypted,
    AesCtr,
    ChaCha20,
}

impl EncryptionMethod {
    /// Returns `true` if bytes are uploaded as-is.
    pub fn is_plaintext(self) -> bool {
        matches!(self, EncryptionMethod::NotEncrypted)
    }
}

impl From<EncryptionMethod> for u8 {
    fn from(m: EncryptionMethod) -> u8 {
        match m {
            EncryptionMethod::NotEncrypted => 0,
            EncryptionMethod::AesCtr => 1,
            EncryptionMethod::ChaCha20 => 2,
        }
    }
}

impl TryFrom<u8> for EncryptionMethod {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(EncryptionMethod::NotEncrypted),
            1 => Ok(EncryptionMethod::AesCtr),
            2 => Ok(EncryptionMethod::ChaCha20),
            other => Err(ProtocolError::UnknownEncryptionMethod(other)),
        }
    }
}
