//! The server's translator set: one handler per inbound packet kind,
//! registered into the [`Dispatcher`] by [`build_dispatcher`] at startup.
//!
//! Pre-hooks do the cheap inline gating (state checks, duplicate
//! suppression); post-hooks carry the effects. The encryption-response
//! post-hook is the one place in the whole protocol that starts
//! asynchronous work.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, trace};

use crate::config::{GAME_VERSION, PROTOCOL_VERSION};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{Dispatcher, Translator};
use crate::protocol::handshake::{session_hash, AuthPhase, AuthSession};
use crate::protocol::packets::{
    ClientboundPacket, HandshakeIntent, InboundKind, ServerboundPacket,
};
use crate::protocol::state::ProtocolState;
use crate::service::session::GameProfile;
use crate::transport::connection::{Connection, ConnectionEvent};

/// Build the full translator table. Single registration point, mirroring
/// the packet registry build step.
///
/// # Errors
/// Returns `ProtocolError::Config` on a duplicate registration.
pub fn build_dispatcher() -> Result<Dispatcher> {
    let mut dispatcher = Dispatcher::new();
    dispatcher.register(InboundKind::Handshake, Box::new(HandshakeTranslator))?;
    dispatcher.register(InboundKind::StatusRequest, Box::new(StatusRequestTranslator))?;
    dispatcher.register(InboundKind::Ping, Box::new(PingTranslator))?;
    dispatcher.register(InboundKind::LoginStart, Box::new(LoginStartTranslator))?;
    dispatcher.register(
        InboundKind::EncryptionResponse,
        Box::new(EncryptionResponseTranslator),
    )?;
    dispatcher.register(InboundKind::KeepAlive, Box::new(KeepAliveTranslator))?;
    Ok(dispatcher)
}

/// HANDSHAKE: the single packet that declares client intent.
struct HandshakeTranslator;

#[async_trait]
impl Translator for HandshakeTranslator {
    async fn post(&self, connection: &mut Connection, packet: ServerboundPacket) -> Result<()> {
        let ServerboundPacket::Handshake {
            protocol_version,
            intent,
            ..
        } = packet
        else {
            return Ok(());
        };
        debug!(peer = %connection.addr(), protocol_version, ?intent, "Handshake");
        match intent {
            HandshakeIntent::Status => connection.set_state(ProtocolState::Status),
            HandshakeIntent::Login => connection.set_state(ProtocolState::Login),
        }
    }
}

/// STATUS: answer the list query once per connection.
struct StatusRequestTranslator;

#[async_trait]
impl Translator for StatusRequestTranslator {
    fn pre(&self, connection: &mut Connection, _packet: &ServerboundPacket) -> bool {
        !connection.status_answered()
    }

    async fn post(&self, connection: &mut Connection, _packet: ServerboundPacket) -> Result<()> {
        let context = connection.context();
        let sample: Vec<_> = context
            .players
            .sample()
            .into_iter()
            .map(|(name, id)| json!({ "name": name, "id": id }))
            .collect();

        let payload = json!({
            "version": { "name": GAME_VERSION, "protocol": PROTOCOL_VERSION },
            "players": {
                "max": context.config.server.max_players,
                "online": context.players.count(),
                "sample": sample,
            },
            "description": { "text": context.config.server.motd },
        })
        .to_string();

        connection.mark_status_answered();
        connection
            .send(&ClientboundPacket::StatusResponse { payload })
            .await
    }
}

/// STATUS: echo the ping payload, then the exchange is over.
struct PingTranslator;

#[async_trait]
impl Translator for PingTranslator {
    async fn post(&self, connection: &mut Connection, packet: ServerboundPacket) -> Result<()> {
        let ServerboundPacket::Ping { payload } = packet else {
            return Ok(());
        };
        connection
            .send(&ClientboundPacket::Pong { payload })
            .await?;
        connection.close().await;
        Ok(())
    }
}

/// LOGIN: capture the declared identity and either start the encryption
/// exchange (online) or finish immediately (offline).
struct LoginStartTranslator;

#[async_trait]
impl Translator for LoginStartTranslator {
    fn pre(&self, connection: &mut Connection, _packet: &ServerboundPacket) -> bool {
        // A second login-start on the same connection is dead on arrival
        connection.login_username().is_none() && connection.auth_session().is_none()
    }

    async fn post(&self, connection: &mut Connection, packet: ServerboundPacket) -> Result<()> {
        let ServerboundPacket::LoginStart {
            username,
            public_key,
        } = packet
        else {
            return Ok(());
        };

        let context = connection.context();
        if context.players.is_full() {
            return Err(ProtocolError::Auth(constants::ERR_SERVER_FULL.to_string()));
        }

        debug!(peer = %connection.addr(), %username, "Login start");
        connection.set_login_identity(username.clone(), public_key);

        if !context.config.server.online_mode {
            return connection.finish_login(GameProfile::offline(&username)).await;
        }

        let Some(keys) = context.keys.as_ref() else {
            return Err(ProtocolError::Auth(
                constants::ERR_SESSION_UNREACHABLE.to_string(),
            ));
        };

        let session = AuthSession::begin();
        let request = ClientboundPacket::EncryptionRequest {
            server_id: session.server_id.clone(),
            public_key: keys.public_der().to_vec(),
            verify_token: session.verify_token.to_vec(),
        };
        connection.set_auth_session(session);
        connection.send(&request).await
    }
}

/// LOGIN: verify-token check, cipher bootstrap, and the single external
/// verification round trip.
struct EncryptionResponseTranslator;

#[async_trait]
impl Translator for EncryptionResponseTranslator {
    async fn post(&self, connection: &mut Connection, packet: ServerboundPacket) -> Result<()> {
        let ServerboundPacket::EncryptionResponse {
            shared_secret,
            verify_token,
        } = packet
        else {
            return Ok(());
        };

        let context = connection.context();
        let Some(keys) = context.keys.as_ref() else {
            return Err(ProtocolError::Auth(
                "Encryption response without online mode".to_string(),
            ));
        };
        // The session is taken, not borrowed: on any failure below it is
        // already discarded, as a failed attempt must be.
        let mut session = connection.take_auth_session().ok_or_else(|| {
            ProtocolError::Auth("Encryption response before login start".to_string())
        })?;
        if session.phase != AuthPhase::AwaitEncryptionResponse {
            return Err(ProtocolError::Auth(
                "Encryption response out of order".to_string(),
            ));
        }
        let username = connection
            .login_username()
            .ok_or_else(|| ProtocolError::Auth("Missing login username".to_string()))?
            .to_string();

        let echoed = keys.decrypt(&verify_token)?;
        session.check_verify_token(&echoed)?;

        let secret = keys.decrypt(&shared_secret)?;
        // From here on every byte in both directions is encrypted,
        // including whatever of this packet's frame is still buffered.
        connection.install_cipher(&secret).await?;

        let hash = session_hash(&session.server_id, &secret, keys.public_der());
        session.phase = AuthPhase::AwaitSessionVerify;
        connection.set_auth_session(session);

        let verifier = Arc::clone(&context.verifier);
        let events = connection.events_sender();
        let client_ip = connection.addr().ip();
        // The sole suspension point of the protocol: the connection task is
        // free while this is in flight, and the result re-enters through
        // the event channel.
        tokio::spawn(async move {
            let result = verifier.verify(&username, &hash, Some(client_ip)).await;
            let _ = events.send(ConnectionEvent::AuthResolved(result));
        });
        Ok(())
    }
}

/// PLAY: liveness echo from the client.
struct KeepAliveTranslator;

#[async_trait]
impl Translator for KeepAliveTranslator {
    async fn post(&self, connection: &mut Connection, packet: ServerboundPacket) -> Result<()> {
        if let ServerboundPacket::KeepAlive { id } = packet {
            trace!(peer = %connection.addr(), id, "Keep-alive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_dispatcher() {
        assert!(build_dispatcher().is_ok());
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut dispatcher = build_dispatcher().expect("fresh dispatcher");
        let result = dispatcher.register(InboundKind::Ping, Box::new(PingTranslator));
        assert!(matches!(result, Err(ProtocolError::Config(_))));
    }
}
