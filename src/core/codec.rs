//! Length-delimited frame codec for the client protocol.
//!
//! Wire layout per frame: `varint total-length` then exactly that many body
//! bytes. With the compression sub-layer active the body is
//! `varint uncompressed-length` + payload, where length 0 marks a raw
//! payload below the threshold. The stream cipher, once installed, sits
//! transparently under the framing in both directions.
//!
//! The codec is driven through `tokio_util::codec::Framed`; returning
//! `Ok(None)` from `decode` is the partial-read suspension point where
//! frame reassembly waits for more bytes.

use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::config::TransportConfig;
use crate::core::varint::{get_varint, peek_varint, put_varint, varint_len};
use crate::error::{ProtocolError, Result};
use crate::utils::compression::{deflate, inflate_exact};
use crate::utils::crypto::{cipher_pair, StreamDecryptor, StreamEncryptor};

/// One decoded unit of the inbound stream.
#[derive(Debug)]
pub enum Frame {
    /// A complete frame body (decompressed, decrypted): `varint packet-id`
    /// followed by the packet fields.
    Packet(Bytes),
    /// The single-byte legacy status probe, only possible before the first
    /// frame of a fresh connection.
    LegacyProbe,
}

#[derive(Clone, Copy)]
struct CompressionSettings {
    threshold: usize,
    level: u32,
}

/// Framing, compression, and cipher stages of one connection, both
/// directions.
pub struct FrameCodec {
    max_frame_len: usize,
    legacy_probe: u8,
    compression: Option<CompressionSettings>,
    compression_level: u32,
    encryptor: Option<StreamEncryptor>,
    decryptor: Option<StreamDecryptor>,
    /// Bytes at the front of the read buffer that are already plaintext.
    /// Everything past this mark still needs a decrypt pass.
    plaintext: usize,
    first_byte_seen: bool,
}

impl FrameCodec {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            max_frame_len: config.max_frame_len,
            legacy_probe: config.legacy_probe,
            compression: None,
            compression_level: config.compression_level,
            encryptor: None,
            decryptor: None,
            plaintext: 0,
            first_byte_seen: false,
        }
    }

    /// Activate the compression sub-layer. A negative threshold keeps it
    /// disabled.
    pub fn enable_compression(&mut self, threshold: i32) {
        let level = self.compression_level;
        self.compression = usize::try_from(threshold)
            .ok()
            .map(|threshold| CompressionSettings { threshold, level });
    }

    pub fn compression_enabled(&self) -> bool {
        self.compression.is_some()
    }

    /// Install the stream cipher for both directions.
    ///
    /// `pending` is the slice of the read buffer that arrived before this
    /// call but has not been framed yet; those bytes are ciphertext already
    /// and are decrypted here so the very next `decode` sees plaintext.
    /// The caller is responsible for flushing queued outbound frames first.
    ///
    /// # Errors
    /// Returns `ProtocolError::Crypto` for an invalid shared secret.
    pub fn install_cipher(&mut self, secret: &[u8], pending: &mut BytesMut) -> Result<()> {
        let (encryptor, mut decryptor) = cipher_pair(secret)?;
        decryptor.decrypt(&mut pending[..]);
        self.plaintext = pending.len();
        self.encryptor = Some(encryptor);
        self.decryptor = Some(decryptor);
        Ok(())
    }

    pub fn cipher_installed(&self) -> bool {
        self.encryptor.is_some()
    }

    fn decompress_body(&self, mut body: Bytes) -> Result<Bytes> {
        let declared = get_varint(&mut body)? as usize;
        if declared == 0 {
            // Sentinel: payload travelled raw, below the threshold
            return Ok(body);
        }
        let inflated = inflate_exact(&body, declared, self.max_frame_len)?;
        Ok(Bytes::from(inflated))
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        // Bytes that arrived since the last call are still ciphertext once
        // the cipher is live.
        if let Some(decryptor) = &mut self.decryptor {
            if src.len() > self.plaintext {
                decryptor.decrypt(&mut src[self.plaintext..]);
            }
        }
        self.plaintext = src.len();

        if !self.first_byte_seen {
            if src.is_empty() {
                return Ok(None);
            }
            self.first_byte_seen = true;
            if src[0] == self.legacy_probe {
                src.advance(1);
                self.plaintext -= 1;
                return Ok(Some(Frame::LegacyProbe));
            }
        }

        let (length, header_len) = match peek_varint(&src[..])? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };
        let length = length as usize;

        if length > self.max_frame_len {
            return Err(ProtocolError::Framing(format!(
                "Declared frame length {length} exceeds maximum {}",
                self.max_frame_len
            )));
        }

        if src.len() < header_len + length {
            src.reserve(header_len + length - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let body = src.split_to(length).freeze();
        self.plaintext -= header_len + length;

        let body = if self.compression.is_some() {
            self.decompress_body(body)?
        } else {
            body
        };
        Ok(Some(Frame::Packet(body)))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<()> {
        let body = match self.compression {
            Some(settings) if item.len() >= settings.threshold => {
                // At or above the threshold the body must be compressed;
                // the boundary is inclusive.
                let compressed = deflate(&item, settings.level)?;
                let mut body =
                    BytesMut::with_capacity(varint_len(item.len() as u32) + compressed.len());
                put_varint(&mut body, item.len() as u32);
                body.extend_from_slice(&compressed);
                body.freeze()
            }
            Some(_) => {
                let mut body = BytesMut::with_capacity(1 + item.len());
                put_varint(&mut body, 0);
                body.extend_from_slice(&item);
                body.freeze()
            }
            None => item,
        };

        let start = dst.len();
        dst.reserve(varint_len(body.len() as u32) + body.len());
        put_varint(dst, body.len() as u32);
        dst.extend_from_slice(&body);

        if let Some(encryptor) = &mut self.encryptor {
            encryptor.encrypt(&mut dst[start..]);
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn codec() -> FrameCodec {
        FrameCodec::new(&TransportConfig::default())
    }

    fn encode_one(codec: &mut FrameCodec, body: &[u8]) -> BytesMut {
        let mut out = BytesMut::new();
        codec
            .encode(Bytes::copy_from_slice(body), &mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_frame_roundtrip() {
        let mut codec = codec();
        let mut wire = encode_one(&mut codec, b"\x00hello");

        match codec.decode(&mut wire).unwrap() {
            Some(Frame::Packet(body)) => assert_eq!(&body[..], b"\x00hello"),
            other => panic!("Unexpected decode result: {other:?}"),
        }
        assert!(codec.decode(&mut wire).unwrap().is_none());
    }

    #[test]
    fn test_reassembly_one_byte_at_a_time() {
        let mut sender = codec();
        let wire = encode_one(&mut sender, b"\x04split across many reads");

        let mut receiver = codec();
        let mut buf = BytesMut::new();
        let mut decoded = None;
        for (i, byte) in wire.iter().enumerate() {
            buf.extend_from_slice(&[*byte]);
            match receiver.decode(&mut buf).unwrap() {
                Some(Frame::Packet(body)) => {
                    assert_eq!(i, wire.len() - 1, "Frame completed early");
                    decoded = Some(body);
                }
                Some(Frame::LegacyProbe) => panic!("Not a legacy probe"),
                None => assert!(i < wire.len() - 1),
            }
        }
        assert_eq!(&decoded.unwrap()[..], b"\x04split across many reads");
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut codec = codec();
        let mut wire = BytesMut::new();
        put_varint(&mut wire, (MAX_TEST_FRAME + 1) as u32);
        assert!(matches!(
            codec.decode(&mut wire),
            Err(ProtocolError::Framing(_))
        ));
    }

    const MAX_TEST_FRAME: usize = crate::config::MAX_FRAME_LEN;

    #[test]
    fn test_compression_boundary_inclusive() {
        let threshold = 64usize;

        // Exactly at the threshold: compressed (non-zero declared length)
        let mut codec = codec();
        codec.enable_compression(threshold as i32);
        let body = vec![0x2au8; threshold];
        let mut wire = encode_one(&mut codec, &body);
        let (frame_len, header) = peek_varint(&wire[..]).unwrap().unwrap();
        let mut frame_body = Bytes::copy_from_slice(&wire[header..header + frame_len as usize]);
        assert_eq!(get_varint(&mut frame_body).unwrap() as usize, threshold);

        match codec.decode(&mut wire).unwrap() {
            Some(Frame::Packet(decoded)) => assert_eq!(&decoded[..], &body[..]),
            other => panic!("Unexpected: {other:?}"),
        }

        // One byte below: raw with sentinel 0
        let body = vec![0x2au8; threshold - 1];
        let mut wire = encode_one(&mut codec, &body);
        let (frame_len, header) = peek_varint(&wire[..]).unwrap().unwrap();
        let mut frame_body = Bytes::copy_from_slice(&wire[header..header + frame_len as usize]);
        assert_eq!(get_varint(&mut frame_body).unwrap(), 0);
        assert_eq!(&frame_body[..], &body[..]);

        match codec.decode(&mut wire).unwrap() {
            Some(Frame::Packet(decoded)) => assert_eq!(&decoded[..], &body[..]),
            other => panic!("Unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_negative_threshold_disables_compression() {
        let mut codec = codec();
        codec.enable_compression(-1);
        assert!(!codec.compression_enabled());
    }

    #[test]
    fn test_compressed_body_must_inflate_exactly() {
        let mut codec = codec();
        codec.enable_compression(0);

        // Forge a frame whose declared uncompressed length disagrees with
        // the actual payload
        let payload = deflate(&[7u8; 100], 6).unwrap();
        let mut body = BytesMut::new();
        put_varint(&mut body, 99);
        body.extend_from_slice(&payload);
        let mut wire = BytesMut::new();
        put_varint(&mut wire, body.len() as u32);
        wire.extend_from_slice(&body);

        assert!(matches!(
            codec.decode(&mut wire),
            Err(ProtocolError::Framing(_))
        ));
    }

    #[test]
    fn test_legacy_probe_detected_only_first() {
        let mut codec = codec();
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&[0xFE]);
        assert!(matches!(
            codec.decode(&mut wire).unwrap(),
            Some(Frame::LegacyProbe)
        ));

        // After any framed traffic the probe byte is ordinary frame data
        let mut codec = codec_with_first_frame_done();
        let mut wire = BytesMut::new();
        wire.extend_from_slice(&[0xFE]);
        // 0xFE reads as a varint continuation byte; not enough data yet
        assert!(codec.decode(&mut wire).unwrap().is_none());
    }

    fn codec_with_first_frame_done() -> FrameCodec {
        let mut sender = codec();
        let mut receiver = codec();
        let mut wire = encode_one(&mut sender, b"\x00");
        receiver.decode(&mut wire).unwrap();
        receiver
    }

    #[test]
    fn test_cipher_roundtrip_through_codec() {
        let secret = [9u8; 16];
        let mut client = codec();
        let mut server = codec();

        // Traffic before install is plaintext
        let mut wire = encode_one(&mut client, b"\x00pre");
        assert!(matches!(
            server.decode(&mut wire).unwrap(),
            Some(Frame::Packet(_))
        ));

        let mut empty = BytesMut::new();
        client.install_cipher(&secret, &mut empty).unwrap();
        let mut empty = BytesMut::new();
        server.install_cipher(&secret, &mut empty).unwrap();

        let mut wire = encode_one(&mut client, b"\x01sealed");
        // Ciphertext differs from the plaintext encoding
        let mut reference = codec();
        let plain = encode_one(&mut reference, b"\x01sealed");
        assert_ne!(&wire[..], &plain[..]);

        match server.decode(&mut wire).unwrap() {
            Some(Frame::Packet(body)) => assert_eq!(&body[..], b"\x01sealed"),
            other => panic!("Unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_cipher_install_decrypts_pending_bytes() {
        let secret = [3u8; 16];
        let mut client = codec();
        let mut server = codec();

        // Client installs first, then sends; the server receives ciphertext
        // into its buffer before its own install.
        let mut empty = BytesMut::new();
        client.install_cipher(&secret, &mut empty).unwrap();
        let wire = encode_one(&mut client, b"\x02queued");

        let mut pending = BytesMut::from(&wire[..]);
        server.install_cipher(&secret, &mut pending).unwrap();

        match server.decode(&mut pending).unwrap() {
            Some(Frame::Packet(body)) => assert_eq!(&body[..], b"\x02queued"),
            other => panic!("Unexpected: {other:?}"),
        }
    }
}
