use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use fraglift_protocol::EncryptionMethod;
use rand::RngCore;

use crate::CryptoError;

/// Key length shared by both ciphers.
const KEY_LEN: usize = 32;

/// Nonce lengths per cipher: AES-CTR carries its block counter in the iv
/// tail, ChaCha20 uses a 12-byte nonce with a separate counter.
const AES_IV_LEN: usize = 16;
const CHACHA_IV_LEN: usize = 12;

/// Per-file (or per-artifact) key material, base64-encoded for transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Secrets {
    pub key: String,
    pub iv: String,
}

impl Secrets {
    /// Generates fresh random key material for `method`.
    ///
    /// Returns `None` for plaintext uploads.
    pub fn generate(method: EncryptionMethod) -> Option<Self> {
        let iv_len = match method {
            EncryptionMethod::NotEncrypted => return None,
            EncryptionMethod::AesCtr => AES_IV_LEN,
            EncryptionMethod::ChaCha20 => CHACHA_IV_LEN,
        };

        let mut rng = rand::rng();
        let mut key = vec![0u8; KEY_LEN];
        let mut iv = vec![0u8; iv_len];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut iv);

        Some(Self {
            key: BASE64.encode(&key),
            iv: BASE64.encode(&iv),
        })
    }

    /// Decodes the key, validating its length.
    pub fn key_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        decode_exact("key", &self.key, KEY_LEN)
    }

    /// Decodes the iv, validating its length for `method`.
    pub fn iv_bytes(&self, method: EncryptionMethod) -> Result<Vec<u8>, CryptoError> {
        let expected = match method {
            EncryptionMethod::NotEncrypted => return Ok(Vec::new()),
            EncryptionMethod::AesCtr => AES_IV_LEN,
            EncryptionMethod::ChaCha20 => CHACHA_IV_LEN,
        };
        decode_exact("iv", &self.iv, expected)
    }
}

fn decode_exact(what: &'static str, b64: &str, expected: usize) -> Result<Vec<u8>, CryptoError> {
    let bytes = BASE64.decode(b64)?;
    if bytes.len() != expected {
        return Err(CryptoError::Length {
            what,
            expected,
            got: bytes.len(),
        });
    }
    Ok(bytes)
}
