use std::io::{Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::error::{ProtocolError, Result};

/// Deflate `data` with zlib at the given level (0-9).
///
/// # Errors
/// Returns `ProtocolError::Framing` if the encoder fails, which only happens
/// on I/O errors of the in-memory sink and is effectively unreachable.
pub fn deflate(data: &[u8], level: u32) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(level));
    encoder
        .write_all(data)
        .and_then(|()| encoder.finish())
        .map_err(|e| ProtocolError::Framing(format!("Deflate failed: {e}")))
}

/// Inflate `data` and require the output to be exactly `expected_len` bytes.
///
/// The frame body carries the uncompressed length on the wire; a payload
/// that inflates to anything else is corrupt or hostile. `max_len` caps the
/// output before allocation so a forged length cannot be used as a
/// decompression bomb.
///
/// # Errors
/// Returns `ProtocolError::Framing` if:
/// - `expected_len` exceeds `max_len`
/// - the zlib stream is malformed
/// - the inflated size differs from `expected_len`
pub fn inflate_exact(data: &[u8], expected_len: usize, max_len: usize) -> Result<Vec<u8>> {
    if expected_len > max_len {
        return Err(ProtocolError::Framing(format!(
            "Declared uncompressed length {expected_len} exceeds maximum {max_len}"
        )));
    }

    let mut out = Vec::with_capacity(expected_len);
    let mut decoder = ZlibDecoder::new(data);

    // Read one byte past the declared length so an over-long stream is
    // caught instead of silently truncated.
    let mut limited = decoder.by_ref().take(expected_len as u64 + 1);
    limited
        .read_to_end(&mut out)
        .map_err(|e| ProtocolError::Framing(format!("Inflate failed: {e}")))?;

    if out.len() != expected_len {
        return Err(ProtocolError::Framing(format!(
            "Inflated to {} bytes, expected {expected_len}",
            out.len()
        )));
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_deflate_inflate_roundtrip() {
        let original = b"Hello, world! A body worth compressing, repeated. \
                         Hello, world! A body worth compressing, repeated.";
        let compressed = deflate(original, 6).unwrap();
        let inflated = inflate_exact(&compressed, original.len(), 1 << 20).unwrap();
        assert_eq!(inflated.as_slice(), original.as_slice());
    }

    #[test]
    fn test_repetitive_data_shrinks() {
        let data = vec![0x41u8; 4096];
        let compressed = deflate(&data, 6).unwrap();
        assert!(compressed.len() < data.len() / 4);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let data = vec![7u8; 256];
        let compressed = deflate(&data, 6).unwrap();
        assert!(inflate_exact(&compressed, 255, 1 << 20).is_err());
        assert!(inflate_exact(&compressed, 257, 1 << 20).is_err());
    }

    #[test]
    fn test_bomb_guard() {
        let data = vec![0u8; 1 << 16];
        let compressed = deflate(&data, 9).unwrap();
        // Declared length above the cap is rejected before any inflation
        assert!(inflate_exact(&compressed, 1 << 16, 1 << 10).is_err());
    }

    #[test]
    fn test_malformed_stream_rejected() {
        let garbage = [0x01u8, 0x02, 0x03, 0x04];
        assert!(inflate_exact(&garbage, 16, 1 << 20).is_err());
    }
}
