//! Static bidirectional packet registry: `(state, direction, id)` → decode
//! behavior for inbound packets, packet kind → `(state, id)` for outbound.
//! Built exactly once at startup by [`PacketRegistry::build`] and shared
//! immutably afterwards; a duplicate triple is startup-fatal, never a
//! per-connection error.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;

use crate::error::{ProtocolError, Result};
use crate::protocol::packets::{self, ids, ClientboundPacket, OutboundKind, ServerboundPacket};
use crate::protocol::state::{Direction, ProtocolState};

/// Decode function for one inbound packet body (fields only, id already
/// consumed by the caller).
pub type DecodeFn = fn(&mut Bytes) -> Result<ServerboundPacket>;

/// Immutable lookup tables for the whole packet catalogue.
pub struct PacketRegistry {
    inbound: HashMap<(ProtocolState, i32), DecodeFn>,
    outbound: HashMap<OutboundKind, (ProtocolState, i32)>,
    /// Every registered triple, for distinguishing "known id, wrong place"
    /// from "unknown id".
    known: HashSet<(ProtocolState, Direction, i32)>,
}

impl PacketRegistry {
    /// Build the full registry. This is the single registration point for
    /// every packet type; the returned registry is never mutated again.
    ///
    /// # Errors
    /// Returns `ProtocolError::RegistryConflict` on a duplicate
    /// (state, direction, id) triple, and `ProtocolError::Config` if a
    /// clientbound kind was left unregistered (`id_of` must be total).
    pub fn build() -> Result<Self> {
        let mut registry = Self {
            inbound: HashMap::new(),
            outbound: HashMap::new(),
            known: HashSet::new(),
        };

        use ProtocolState::*;

        registry.register_inbound(Handshake, ids::HANDSHAKE, packets::decode_handshake)?;

        registry.register_inbound(Status, ids::STATUS_REQUEST, packets::decode_status_request)?;
        registry.register_inbound(Status, ids::STATUS_PING, packets::decode_ping)?;
        registry.register_outbound(Status, ids::STATUS_RESPONSE, OutboundKind::StatusResponse)?;
        registry.register_outbound(Status, ids::STATUS_PONG, OutboundKind::Pong)?;

        registry.register_inbound(Login, ids::LOGIN_START, packets::decode_login_start)?;
        registry.register_inbound(
            Login,
            ids::LOGIN_ENCRYPTION_RESPONSE,
            packets::decode_encryption_response,
        )?;
        registry.register_outbound(Login, ids::LOGIN_DISCONNECT, OutboundKind::LoginDisconnect)?;
        registry.register_outbound(
            Login,
            ids::LOGIN_ENCRYPTION_REQUEST,
            OutboundKind::EncryptionRequest,
        )?;
        registry.register_outbound(Login, ids::LOGIN_SUCCESS, OutboundKind::LoginSuccess)?;
        registry.register_outbound(
            Login,
            ids::LOGIN_SET_COMPRESSION,
            OutboundKind::SetCompression,
        )?;

        registry.register_inbound(Play, ids::PLAY_KEEP_ALIVE_IN, packets::decode_keep_alive)?;
        registry.register_outbound(Play, ids::PLAY_DISCONNECT, OutboundKind::PlayDisconnect)?;
        registry.register_outbound(Play, ids::PLAY_KEEP_ALIVE_OUT, OutboundKind::KeepAlive)?;

        for kind in OutboundKind::ALL {
            if !registry.outbound.contains_key(&kind) {
                return Err(ProtocolError::Config(format!(
                    "Clientbound kind {kind:?} has no registered id"
                )));
            }
        }

        Ok(registry)
    }

    fn register_inbound(&mut self, state: ProtocolState, id: i32, decode: DecodeFn) -> Result<()> {
        if !self.known.insert((state, Direction::Serverbound, id)) {
            return Err(ProtocolError::RegistryConflict {
                state,
                direction: Direction::Serverbound,
                id,
            });
        }
        self.inbound.insert((state, id), decode);
        Ok(())
    }

    fn register_outbound(&mut self, state: ProtocolState, id: i32, kind: OutboundKind) -> Result<()> {
        if !self.known.insert((state, Direction::Clientbound, id)) {
            return Err(ProtocolError::RegistryConflict {
                state,
                direction: Direction::Clientbound,
                id,
            });
        }
        self.outbound.insert(kind, (state, id));
        Ok(())
    }

    /// Decode an inbound packet body by (state, id).
    ///
    /// # Errors
    /// - `ProtocolError::UnknownPacket` if no descriptor matches anywhere;
    ///   the caller skips the frame and continues (forward compatibility).
    /// - `ProtocolError::ProtocolState` if the id is registered for this
    ///   state in the clientbound direction, or for a different state;
    ///   the connection must close.
    /// - Framing errors from the field decoders.
    pub fn decode(
        &self,
        state: ProtocolState,
        id: i32,
        body: &mut Bytes,
    ) -> Result<ServerboundPacket> {
        if let Some(decode) = self.inbound.get(&(state, id)) {
            return decode(body);
        }

        let misplaced = self
            .known
            .iter()
            .any(|&(s, d, i)| i == id && (s != state || d == Direction::Clientbound));
        if misplaced {
            return Err(ProtocolError::ProtocolState {
                state,
                direction: Direction::Serverbound,
                id,
            });
        }

        Err(ProtocolError::UnknownPacket {
            state,
            direction: Direction::Serverbound,
            id,
        })
    }

    /// Id and owning state for an outbound packet. Total over every
    /// [`OutboundKind`]; totality is checked at build time.
    pub fn id_of(&self, packet: &ClientboundPacket) -> Result<(ProtocolState, i32)> {
        self.outbound
            .get(&packet.kind())
            .copied()
            .ok_or_else(|| ProtocolError::Config(format!("Unregistered kind {:?}", packet.kind())))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_build_succeeds() {
        assert!(PacketRegistry::build().is_ok());
    }

    #[test]
    fn test_duplicate_registration_conflicts() {
        let mut registry = PacketRegistry::build().unwrap();
        let result = registry.register_inbound(
            ProtocolState::Login,
            ids::LOGIN_START,
            packets::decode_login_start,
        );
        assert!(matches!(
            result,
            Err(ProtocolError::RegistryConflict {
                state: ProtocolState::Login,
                direction: Direction::Serverbound,
                id: ids::LOGIN_START,
            })
        ));
    }

    #[test]
    fn test_decode_known_packet() {
        let registry = PacketRegistry::build().unwrap();
        let mut buf = BytesMut::new();
        ServerboundPacket::StatusRequest.encode_body(&mut buf);
        let packet = registry
            .decode(ProtocolState::Status, ids::STATUS_REQUEST, &mut buf.freeze())
            .unwrap();
        assert_eq!(packet, ServerboundPacket::StatusRequest);
    }

    #[test]
    fn test_unknown_id_is_skippable() {
        let registry = PacketRegistry::build().unwrap();
        let result = registry.decode(ProtocolState::Play, 0x7f, &mut Bytes::new());
        assert!(matches!(
            result,
            Err(ProtocolError::UnknownPacket { id: 0x7f, .. })
        ));
    }

    #[test]
    fn test_play_id_in_login_is_state_error() {
        let registry = PacketRegistry::build().unwrap();
        let mut body = BytesMut::new();
        body.extend_from_slice(&0i64.to_be_bytes());
        let result = registry.decode(ProtocolState::Login, ids::PLAY_KEEP_ALIVE_IN, &mut body.freeze());
        assert!(matches!(
            result,
            Err(ProtocolError::ProtocolState {
                state: ProtocolState::Login,
                id: ids::PLAY_KEEP_ALIVE_IN,
                ..
            })
        ));
    }

    #[test]
    fn test_clientbound_id_from_client_is_state_error() {
        // Login-success is clientbound-only; a client sending its id in
        // LOGIN is misbehaving even though the id exists in this state.
        let registry = PacketRegistry::build().unwrap();
        let result = registry.decode(ProtocolState::Login, ids::LOGIN_SUCCESS, &mut Bytes::new());
        assert!(matches!(result, Err(ProtocolError::ProtocolState { .. })));
    }

    #[test]
    fn test_id_of_total_over_outbound_kinds() {
        let registry = PacketRegistry::build().unwrap();
        let samples = [
            ClientboundPacket::StatusResponse {
                payload: String::new(),
            },
            ClientboundPacket::Pong { payload: 0 },
            ClientboundPacket::LoginDisconnect {
                reason: String::new(),
            },
            ClientboundPacket::EncryptionRequest {
                server_id: String::new(),
                public_key: Vec::new(),
                verify_token: Vec::new(),
            },
            ClientboundPacket::LoginSuccess {
                uuid: uuid::Uuid::nil(),
                username: String::new(),
                properties: Vec::new(),
            },
            ClientboundPacket::SetCompression { threshold: 256 },
            ClientboundPacket::PlayDisconnect {
                reason: String::new(),
            },
            ClientboundPacket::KeepAlive { id: 0 },
        ];
        for packet in &samples {
            assert!(registry.id_of(packet).is_ok(), "{:?}", packet.kind());
        }
    }
}
