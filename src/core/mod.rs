//! # Core Protocol Components
//!
//! Low-level framing, varints, and wire field primitives.
//!
//! This module provides the foundation for the protocol, handling frame
//! assembly, the compression sub-layer, and the transparent cipher stage.
//!
//! ## Components
//! - **Codec**: Tokio codec for length-delimited frames over byte streams
//! - **Varint**: 7-bit-per-byte length and id encoding
//! - **Wire**: length-prefixed strings, arrays, uuids
//!
//! ## Wire Format
//! ```text
//! [Length(varint)] [Body(N)]
//! Body (compression active) = [UncompressedLength(varint)] [Payload]
//! Body (otherwise)          = [PacketId(varint)] [Fields]
//! ```
//!
//! ## Security
//! - Frame length cap (2MB default) prevents memory exhaustion
//! - Length validation before allocation
//! - Exact-inflate check defeats decompression bombs

pub mod codec;
pub mod varint;
pub mod wire;
