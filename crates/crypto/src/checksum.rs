/// Folds `bytes` into a running CRC-32.
///
/// Folding fragments in file-offset order produces the same value as a
/// single CRC over the whole file, regardless of the order fragments are
/// later uploaded.
pub fn fold_crc32(crc: u32, bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new_with_initial(crc);
    hasher.update(bytes);
    hasher.finalize()
}

/// Rounds `size` up to the next 64-byte multiple.
///
/// Declared attachment sizes are padded to the cipher block boundary so the
/// request budget never underestimates the encrypted payload.
pub fn round_up_to_64(size: u64) -> u64 {
    size.div_ceil(64) * 64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_matches_whole_buffer_crc() {
        let data: Vec<u8> = (0..500u32).map(|i| (i * 7 % 256) as u8).collect();

        let whole = fold_crc32(0, &data);

        let mut folded = 0;
        for chunk in data.chunks(123) {
            folded = fold_crc32(folded, chunk);
        }
        assert_eq!(folded, whole);
    }

    #[test]
    fn fold_of_empty_slice_is_identity() {
        let crc = fold_crc32(0, b"abc");
        assert_eq!(fold_crc32(crc, &[]), crc);
    }

    #[test]
    fn round_up_boundaries() {
        assert_eq!(round_up_to_64(0), 0);
        assert_eq!(round_up_to_64(1), 64);
        assert_eq!(round_up_to_64(64), 64);
        assert_eq!(round_up_to_64(65), 128);
        assert_eq!(round_up_to_64(1000), 1024);
    }
}
