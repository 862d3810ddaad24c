//! # Error Types
//!
//! Comprehensive error handling for the protocol stack.
//!
//! This module defines all error variants that can occur while serving a
//! client connection, from low-level I/O failures to login-handshake
//! rejections.
//!
//! ## Error Categories
//! - **I/O Errors**: socket failures, unexpected stream ends
//! - **Framing Errors**: bad or oversized frame lengths, malformed legacy probes
//! - **Protocol Errors**: packets valid in shape but illegal for the current state
//! - **Cryptographic Errors**: RSA/stream-cipher failures during the handshake
//! - **Auth Errors**: session verification rejections, user-facing
//!
//! Every error is scoped to a single connection except [`ProtocolError::RegistryConflict`],
//! which is raised once during startup and is fatal to the process.
//!
//! All errors implement `std::error::Error` for interoperability.

use std::io;
use thiserror::Error;

use crate::protocol::state::{Direction, ProtocolState};

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common error cases.
pub mod constants {
    /// Dispatcher-related error messages
    pub const ERR_DUPLICATE_TRANSLATOR: &str = "Translator already registered for packet kind";

    /// Framing errors
    pub const ERR_FRAME_TOO_LARGE: &str = "Declared frame length exceeds maximum";
    pub const ERR_VARINT_TOO_LONG: &str = "Varint wider than 5 bytes";
    pub const ERR_TRUNCATED_FIELD: &str = "Packet field extends past the frame";

    /// Cryptographic errors
    pub const ERR_RSA_DECRYPT: &str = "Failed to decrypt login payload";
    pub const ERR_BAD_SECRET_LENGTH: &str = "Shared secret is not a valid cipher key";

    /// Auth errors, shown to the client as disconnect reasons
    pub const ERR_VERIFY_TOKEN_MISMATCH: &str = "Verify token mismatch";
    pub const ERR_INVALID_SESSION: &str = "Invalid session (try restarting your game)";
    pub const ERR_SESSION_UNREACHABLE: &str = "Authentication servers are down, try again later";
    pub const ERR_SERVER_FULL: &str = "The server is full";
    pub const ERR_ALREADY_ONLINE: &str = "You are already connected to this server";
}

// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Bad or oversized frame length, malformed legacy probe. Closes the
    /// connection.
    #[error("Framing error: {0}")]
    Framing(String),

    /// Packet id known to the registry but illegal for the connection's
    /// current state or direction. Closes the connection.
    #[error("Illegal packet 0x{id:02x} for {state:?}/{direction:?}")]
    ProtocolState {
        state: ProtocolState,
        direction: Direction,
        id: i32,
    },

    /// Packet id not registered anywhere. The frame is skipped and the
    /// connection continues; this is the forward-compatibility path, not a
    /// failure.
    #[error("Unknown packet 0x{id:02x} in {state:?}/{direction:?}")]
    UnknownPacket {
        state: ProtocolState,
        direction: Direction,
        id: i32,
    },

    /// Malformed encrypted payload or decrypt failure. Closes the connection.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Login handshake rejection. Surfaced to the client as a localized
    /// disconnect reason; never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A state-machine move the transition table forbids.
    #[error("Illegal state transition {from:?} -> {to:?}")]
    IllegalTransition {
        from: ProtocolState,
        to: ProtocolState,
    },

    /// Duplicate (state, direction, id) registration. Startup-fatal.
    #[error("Duplicate packet registration: 0x{id:02x} in {state:?}/{direction:?}")]
    RegistryConflict {
        state: ProtocolState,
        direction: Direction,
        id: i32,
    },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
