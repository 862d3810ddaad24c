//! The closed set of packets the stack understands, one tagged variant per
//! packet, each paired with explicit encode/decode functions. The game-logic
//! PLAY catalogue is intentionally minimal (keep-alive and the kick packet);
//! everything else plugs into the same registry.
//!
//! Field order in the decode/encode functions is the wire order.

use bytes::{Bytes, BytesMut};
use uuid::Uuid;

use crate::core::varint::{get_varint, put_varint};
use crate::core::wire::{
    get_bool, get_byte_array, get_i64, get_string, get_u16, get_uuid, put_bool, put_byte_array,
    put_string, put_uuid,
};
use crate::error::{ProtocolError, Result};

/// Numeric packet ids, grouped by state and direction.
pub mod ids {
    pub const HANDSHAKE: i32 = 0x00;

    pub const STATUS_REQUEST: i32 = 0x00;
    pub const STATUS_PING: i32 = 0x01;
    pub const STATUS_RESPONSE: i32 = 0x00;
    pub const STATUS_PONG: i32 = 0x01;

    pub const LOGIN_START: i32 = 0x00;
    pub const LOGIN_ENCRYPTION_RESPONSE: i32 = 0x01;
    pub const LOGIN_DISCONNECT: i32 = 0x00;
    pub const LOGIN_ENCRYPTION_REQUEST: i32 = 0x01;
    pub const LOGIN_SUCCESS: i32 = 0x02;
    pub const LOGIN_SET_COMPRESSION: i32 = 0x03;

    pub const PLAY_KEEP_ALIVE_IN: i32 = 0x12;
    pub const PLAY_DISCONNECT: i32 = 0x19;
    pub const PLAY_KEEP_ALIVE_OUT: i32 = 0x20;
}

/// Client intent declared by the handshake packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeIntent {
    Status,
    Login,
}

/// Client-supplied public key data carried by login-start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyData {
    /// Expiry timestamp, epoch milliseconds
    pub expires_at: i64,
    /// Public key, DER encoded
    pub key: Vec<u8>,
    /// Signature over key and expiry
    pub signature: Vec<u8>,
}

/// One profile property, e.g. the texture payload of login-success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    pub signature: Option<String>,
}

/// Discriminant of a serverbound packet, the dispatcher's routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InboundKind {
    Handshake,
    StatusRequest,
    Ping,
    LoginStart,
    EncryptionResponse,
    KeepAlive,
}

/// Packets the server decodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerboundPacket {
    Handshake {
        protocol_version: i32,
        server_address: String,
        server_port: u16,
        intent: HandshakeIntent,
    },
    StatusRequest,
    Ping {
        payload: i64,
    },
    LoginStart {
        username: String,
        public_key: Option<PublicKeyData>,
    },
    EncryptionResponse {
        shared_secret: Vec<u8>,
        verify_token: Vec<u8>,
    },
    KeepAlive {
        id: i64,
    },
}

impl ServerboundPacket {
    pub fn kind(&self) -> InboundKind {
        match self {
            Self::Handshake { .. } => InboundKind::Handshake,
            Self::StatusRequest => InboundKind::StatusRequest,
            Self::Ping { .. } => InboundKind::Ping,
            Self::LoginStart { .. } => InboundKind::LoginStart,
            Self::EncryptionResponse { .. } => InboundKind::EncryptionResponse,
            Self::KeepAlive { .. } => InboundKind::KeepAlive,
        }
    }
}

/// Discriminant of a clientbound packet, the encode-side registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboundKind {
    StatusResponse,
    Pong,
    LoginDisconnect,
    EncryptionRequest,
    LoginSuccess,
    SetCompression,
    PlayDisconnect,
    KeepAlive,
}

impl OutboundKind {
    /// Every clientbound kind; the registry build step checks totality
    /// against this list.
    pub const ALL: [OutboundKind; 8] = [
        OutboundKind::StatusResponse,
        OutboundKind::Pong,
        OutboundKind::LoginDisconnect,
        OutboundKind::EncryptionRequest,
        OutboundKind::LoginSuccess,
        OutboundKind::SetCompression,
        OutboundKind::PlayDisconnect,
        OutboundKind::KeepAlive,
    ];
}

/// Packets the server encodes.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientboundPacket {
    StatusResponse {
        /// Status document, JSON
        payload: String,
    },
    Pong {
        payload: i64,
    },
    LoginDisconnect {
        reason: String,
    },
    EncryptionRequest {
        server_id: String,
        /// Server public key, standard DER form
        public_key: Vec<u8>,
        verify_token: Vec<u8>,
    },
    LoginSuccess {
        uuid: Uuid,
        username: String,
        properties: Vec<ProfileProperty>,
    },
    SetCompression {
        /// Threshold the connection switches to; negative disables
        threshold: i32,
    },
    PlayDisconnect {
        reason: String,
    },
    KeepAlive {
        id: i64,
    },
}

impl ClientboundPacket {
    pub fn kind(&self) -> OutboundKind {
        match self {
            Self::StatusResponse { .. } => OutboundKind::StatusResponse,
            Self::Pong { .. } => OutboundKind::Pong,
            Self::LoginDisconnect { .. } => OutboundKind::LoginDisconnect,
            Self::EncryptionRequest { .. } => OutboundKind::EncryptionRequest,
            Self::LoginSuccess { .. } => OutboundKind::LoginSuccess,
            Self::SetCompression { .. } => OutboundKind::SetCompression,
            Self::PlayDisconnect { .. } => OutboundKind::PlayDisconnect,
            Self::KeepAlive { .. } => OutboundKind::KeepAlive,
        }
    }

    /// Serialize the packet body (fields only, no id) into `buf`.
    pub fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            Self::StatusResponse { payload } => put_string(buf, payload),
            Self::Pong { payload } | Self::KeepAlive { id: payload } => {
                buf.extend_from_slice(&payload.to_be_bytes());
            }
            Self::LoginDisconnect { reason } | Self::PlayDisconnect { reason } => {
                put_string(buf, &text_component(reason));
            }
            Self::EncryptionRequest {
                server_id,
                public_key,
                verify_token,
            } => {
                put_string(buf, server_id);
                put_byte_array(buf, public_key);
                put_byte_array(buf, verify_token);
            }
            Self::LoginSuccess {
                uuid,
                username,
                properties,
            } => {
                put_uuid(buf, uuid);
                put_string(buf, username);
                put_varint(buf, properties.len() as u32);
                for property in properties {
                    put_string(buf, &property.name);
                    put_string(buf, &property.value);
                    put_bool(buf, property.signature.is_some());
                    if let Some(signature) = &property.signature {
                        put_string(buf, signature);
                    }
                }
            }
            Self::SetCompression { threshold } => put_varint(buf, *threshold as u32),
        }
    }
}

/// Wrap a plain reason string in the JSON text component the wire expects.
fn text_component(reason: &str) -> String {
    serde_json::json!({ "text": reason }).to_string()
}

// ---------------------------------------------------------------------------
// Serverbound decode functions, registered in the packet registry
// ---------------------------------------------------------------------------

pub fn decode_handshake(buf: &mut Bytes) -> Result<ServerboundPacket> {
    let protocol_version = get_varint(buf)? as i32;
    let server_address = get_string(buf)?;
    let server_port = get_u16(buf)?;
    let intent = match get_varint(buf)? {
        1 => HandshakeIntent::Status,
        2 => HandshakeIntent::Login,
        other => {
            return Err(ProtocolError::Framing(format!(
                "Unknown handshake intent {other}"
            )))
        }
    };
    Ok(ServerboundPacket::Handshake {
        protocol_version,
        server_address,
        server_port,
        intent,
    })
}

pub fn decode_status_request(_buf: &mut Bytes) -> Result<ServerboundPacket> {
    Ok(ServerboundPacket::StatusRequest)
}

pub fn decode_ping(buf: &mut Bytes) -> Result<ServerboundPacket> {
    Ok(ServerboundPacket::Ping {
        payload: get_i64(buf)?,
    })
}

pub fn decode_login_start(buf: &mut Bytes) -> Result<ServerboundPacket> {
    let username = get_string(buf)?;
    let public_key = if get_bool(buf)? {
        Some(PublicKeyData {
            expires_at: get_i64(buf)?,
            key: get_byte_array(buf)?,
            signature: get_byte_array(buf)?,
        })
    } else {
        None
    };
    Ok(ServerboundPacket::LoginStart {
        username,
        public_key,
    })
}

pub fn decode_encryption_response(buf: &mut Bytes) -> Result<ServerboundPacket> {
    Ok(ServerboundPacket::EncryptionResponse {
        shared_secret: get_byte_array(buf)?,
        verify_token: get_byte_array(buf)?,
    })
}

pub fn decode_keep_alive(buf: &mut Bytes) -> Result<ServerboundPacket> {
    Ok(ServerboundPacket::KeepAlive {
        id: get_i64(buf)?,
    })
}

// ---------------------------------------------------------------------------
// Serverbound encode / clientbound decode, the client half of the wire.
// The server never calls these; clients, proxies, and the integration tests do.
// ---------------------------------------------------------------------------

impl ServerboundPacket {
    /// Serialize the packet body (fields only, no id) into `buf`.
    pub fn encode_body(&self, buf: &mut BytesMut) {
        match self {
            Self::Handshake {
                protocol_version,
                server_address,
                server_port,
                intent,
            } => {
                put_varint(buf, *protocol_version as u32);
                put_string(buf, server_address);
                buf.extend_from_slice(&server_port.to_be_bytes());
                put_varint(
                    buf,
                    match intent {
                        HandshakeIntent::Status => 1,
                        HandshakeIntent::Login => 2,
                    },
                );
            }
            Self::StatusRequest => {}
            Self::Ping { payload } | Self::KeepAlive { id: payload } => {
                buf.extend_from_slice(&payload.to_be_bytes());
            }
            Self::LoginStart {
                username,
                public_key,
            } => {
                put_string(buf, username);
                put_bool(buf, public_key.is_some());
                if let Some(data) = public_key {
                    buf.extend_from_slice(&data.expires_at.to_be_bytes());
                    put_byte_array(buf, &data.key);
                    put_byte_array(buf, &data.signature);
                }
            }
            Self::EncryptionResponse {
                shared_secret,
                verify_token,
            } => {
                put_byte_array(buf, shared_secret);
                put_byte_array(buf, verify_token);
            }
        }
    }
}

pub fn decode_status_response(buf: &mut Bytes) -> Result<ClientboundPacket> {
    Ok(ClientboundPacket::StatusResponse {
        payload: get_string(buf)?,
    })
}

pub fn decode_pong(buf: &mut Bytes) -> Result<ClientboundPacket> {
    Ok(ClientboundPacket::Pong {
        payload: get_i64(buf)?,
    })
}

pub fn decode_encryption_request(buf: &mut Bytes) -> Result<ClientboundPacket> {
    Ok(ClientboundPacket::EncryptionRequest {
        server_id: get_string(buf)?,
        public_key: get_byte_array(buf)?,
        verify_token: get_byte_array(buf)?,
    })
}

pub fn decode_login_success(buf: &mut Bytes) -> Result<ClientboundPacket> {
    let uuid = get_uuid(buf)?;
    let username = get_string(buf)?;
    let count = get_varint(buf)? as usize;
    let mut properties = Vec::with_capacity(count.min(16));
    for _ in 0..count {
        let name = get_string(buf)?;
        let value = get_string(buf)?;
        let signature = if get_bool(buf)? {
            Some(get_string(buf)?)
        } else {
            None
        };
        properties.push(ProfileProperty {
            name,
            value,
            signature,
        });
    }
    Ok(ClientboundPacket::LoginSuccess {
        uuid,
        username,
        properties,
    })
}

pub fn decode_set_compression(buf: &mut Bytes) -> Result<ClientboundPacket> {
    Ok(ClientboundPacket::SetCompression {
        threshold: get_varint(buf)? as i32,
    })
}

pub fn decode_login_disconnect(buf: &mut Bytes) -> Result<ClientboundPacket> {
    let raw = get_string(buf)?;
    let reason = serde_json::from_str::<serde_json::Value>(&raw)
        .ok()
        .and_then(|v| v.get("text").and_then(|t| t.as_str()).map(String::from))
        .unwrap_or(raw);
    Ok(ClientboundPacket::LoginDisconnect { reason })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn body_of(packet: &ClientboundPacket) -> Bytes {
        let mut buf = BytesMut::new();
        packet.encode_body(&mut buf);
        buf.freeze()
    }

    #[test]
    fn test_handshake_decode() {
        let packet = ServerboundPacket::Handshake {
            protocol_version: 760,
            server_address: "play.example.net".to_string(),
            server_port: 25565,
            intent: HandshakeIntent::Login,
        };
        let mut buf = BytesMut::new();
        packet.encode_body(&mut buf);
        let mut body = buf.freeze();
        assert_eq!(decode_handshake(&mut body).unwrap(), packet);
        assert!(body.is_empty());
    }

    #[test]
    fn test_handshake_bad_intent_rejected() {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, 760);
        put_string(&mut buf, "host");
        buf.extend_from_slice(&25565u16.to_be_bytes());
        put_varint(&mut buf, 9);
        assert!(decode_handshake(&mut buf.freeze()).is_err());
    }

    #[test]
    fn test_login_start_with_key_data() {
        let packet = ServerboundPacket::LoginStart {
            username: "Alice".to_string(),
            public_key: Some(PublicKeyData {
                expires_at: 1_700_000_000_000,
                key: vec![1, 2, 3],
                signature: vec![4, 5],
            }),
        };
        let mut buf = BytesMut::new();
        packet.encode_body(&mut buf);
        assert_eq!(decode_login_start(&mut buf.freeze()).unwrap(), packet);
    }

    #[test]
    fn test_login_start_without_key_data() {
        let packet = ServerboundPacket::LoginStart {
            username: "Alice".to_string(),
            public_key: None,
        };
        let mut buf = BytesMut::new();
        packet.encode_body(&mut buf);
        assert_eq!(decode_login_start(&mut buf.freeze()).unwrap(), packet);
    }

    #[test]
    fn test_encryption_request_roundtrip() {
        let packet = ClientboundPacket::EncryptionRequest {
            server_id: "a1b2c3".to_string(),
            public_key: vec![9; 162],
            verify_token: vec![1, 2, 3, 4],
        };
        let mut body = body_of(&packet);
        assert_eq!(decode_encryption_request(&mut body).unwrap(), packet);
    }

    #[test]
    fn test_login_success_roundtrip() {
        let packet = ClientboundPacket::LoginSuccess {
            uuid: Uuid::new_v4(),
            username: "Alice".to_string(),
            properties: vec![ProfileProperty {
                name: "textures".to_string(),
                value: "ZGF0YQ==".to_string(),
                signature: Some("c2ln".to_string()),
            }],
        };
        let mut body = body_of(&packet);
        assert_eq!(decode_login_success(&mut body).unwrap(), packet);
    }

    #[test]
    fn test_disconnect_reason_is_text_component() {
        let packet = ClientboundPacket::LoginDisconnect {
            reason: "Server is full".to_string(),
        };
        let mut body = body_of(&packet);
        let raw = get_string(&mut body).unwrap();
        assert_eq!(raw, r#"{"text":"Server is full"}"#);
    }

    #[test]
    fn test_truncated_encryption_response_rejected() {
        let mut buf = BytesMut::new();
        put_byte_array(&mut buf, &[0u8; 128]);
        // Second array missing entirely
        assert!(decode_encryption_response(&mut buf.freeze()).is_err());
    }
}
