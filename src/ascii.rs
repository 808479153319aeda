//! Fast 7-bit ASCII validation.

const HIGH_BIT_MASK: u64 = 0x8080_8080_8080_8080;

/// Returns `true` if every byte in `buf` has its high bit clear.
///
/// Bytes are checked a word at a time, falling back to a byte-at-a-time tail
/// loop for the remainder.
pub fn is_ascii(buf: &[u8]) -> bool {
    let chunks = buf.chunks_exact(8);
    let tail = chunks.remainder();

    for chunk in chunks {
        // SAFETY: `chunk` is exactly 8 bytes, from `chunks_exact(8)`.
        let word = u64::from_ne_bytes(chunk.try_into().unwrap());

        if word & HIGH_BIT_MASK != 0 {
            return false;
        }
    }

    tail.iter().all(|&b| b < 0x80)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ascii() {
        assert!(is_ascii(b""));
        assert!(is_ascii(b"r0"));
        assert!(is_ascii(b"a reasonably long all-ascii read name/1"));

        assert!(!is_ascii(b"\xff"));
        assert!(!is_ascii(b"0123456\xff"));
        assert!(!is_ascii(b"a reasonably long read name with a \xffbyte/1"));
    }
}
