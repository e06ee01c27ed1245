use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use fraglift_protocol::EncryptionMethod;

use crate::{CryptoError, Secrets};

type Aes256Ctr = ctr::Ctr128BE<aes::Aes256>;

/// Encrypts `bytes` as the slice of the file stream starting at
/// `byte_offset`.
///
/// The keystream is seeked to `byte_offset` before applying, so fragments
/// encrypted independently concatenate into one valid ciphertext stream.
/// Plaintext uploads return the input unchanged.
pub fn encrypt(
    bytes: Vec<u8>,
    method: EncryptionMethod,
    secrets: Option<&Secrets>,
    byte_offset: u64,
) -> Result<Vec<u8>, CryptoError> {
    if method.is_plaintext() {
        return Ok(bytes);
    }
    let secrets = secrets.ok_or(CryptoError::MissingSecrets)?;
    let key = secrets.key_bytes()?;
    let iv = secrets.iv_bytes(method)?;

    let mut out = bytes;
    match method {
        EncryptionMethod::NotEncrypted => unreachable!("handled above"),
        EncryptionMethod::AesCtr => {
            let mut cipher = Aes256Ctr::new(key.as_slice().into(), iv.as_slice().into());
            cipher.seek(byte_offset);
            cipher.apply_keystream(&mut out);
        }
        EncryptionMethod::ChaCha20 => {
            let mut cipher = ChaCha20::new(key.as_slice().into(), iv.as_slice().into());
            cipher.seek(byte_offset);
            cipher.apply_keystream(&mut out);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secrets(method: EncryptionMethod) -> Secrets {
        Secrets::generate(method).unwrap()
    }

    #[test]
    fn plaintext_passthrough() {
        let data = b"hello".to_vec();
        let out = encrypt(data.clone(), EncryptionMethod::NotEncrypted, None, 0).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn missing_secrets_is_an_error() {
        let result = encrypt(vec![1, 2, 3], EncryptionMethod::ChaCha20, None, 0);
        assert!(matches!(result, Err(CryptoError::MissingSecrets)));
    }

    #[test]
    fn encryption_changes_bytes() {
        for method in [EncryptionMethod::AesCtr, EncryptionMethod::ChaCha20] {
            let s = secrets(method);
            let data = vec![0u8; 256];
            let out = encrypt(data.clone(), method, Some(&s), 0).unwrap();
            assert_ne!(out, data);
            assert_eq!(out.len(), data.len());
        }
    }

    #[test]
    fn deterministic_for_same_offset() {
        for method in [EncryptionMethod::AesCtr, EncryptionMethod::ChaCha20] {
            let s = secrets(method);
            let data = b"the same plaintext".to_vec();
            let a = encrypt(data.clone(), method, Some(&s), 4096).unwrap();
            let b = encrypt(data, method, Some(&s), 4096).unwrap();
            assert_eq!(a, b);
        }
    }

    // The core contract: splitting a stream into fragments at arbitrary
    // offsets and encrypting each independently must equal encrypting the
    // whole stream at once.
    #[test]
    fn fragment_encryption_is_stream_continuous() {
        for method in [EncryptionMethod::AesCtr, EncryptionMethod::ChaCha20] {
            let s = secrets(method);
            let stream: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

            let whole = encrypt(stream.clone(), method, Some(&s), 0).unwrap();

            // Split at offsets that align with neither cipher's block size.
            let splits = [0usize, 113, 400, 641, 1000];
            let mut reassembled = Vec::new();
            for pair in splits.windows(2) {
                let (start, end) = (pair[0], pair[1]);
                let frag = stream[start..end].to_vec();
                let enc = encrypt(frag, method, Some(&s), start as u64).unwrap();
                reassembled.extend_from_slice(&enc);
            }

            assert_eq!(reassembled, whole);
        }
    }
}
