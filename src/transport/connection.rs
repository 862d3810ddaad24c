//! Per-client connection actor.
//!
//! Each accepted socket gets one tokio task running [`Connection::run`].
//! That task is the single writer for everything the connection owns: the
//! framed socket, the protocol state, the login handshake. Work started
//! elsewhere (the session verification future, other players' broadcasts)
//! re-enters through the connection's event channel, so decode → dispatch
//! stays strictly ordered and no state is touched off-task.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use crate::config::{GAME_VERSION, PROTOCOL_VERSION};
use crate::core::codec::{Frame, FrameCodec};
use crate::core::varint::{get_varint, put_varint};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::AuthSession;
use crate::protocol::packets::{ClientboundPacket, PublicKeyData};
use crate::protocol::state::ProtocolState;
use crate::service::session::GameProfile;
use crate::transport::server::{Player, ServerContext};

/// Work marshaled onto a connection's task from elsewhere.
pub enum ConnectionEvent {
    /// Encode and write a packet. The optional sender resolves the
    /// caller's [`SendSignal`].
    Send(ClientboundPacket, Option<oneshot::Sender<Result<()>>>),
    /// Kick with a user-facing reason.
    Disconnect(String),
    /// The external session verification resolved. Dropped silently if the
    /// connection already closed.
    AuthResolved(Result<GameProfile>),
}

/// Completion signal of an enqueued send. Await it or drop it.
pub struct SendSignal(oneshot::Receiver<Result<()>>);

impl SendSignal {
    /// Wait for the write to complete or fail.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConnectionClosed` if the connection went
    /// away before the packet was written.
    pub async fn wait(self) -> Result<()> {
        match self.0.await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::ConnectionClosed),
        }
    }
}

/// Cloneable handle for enqueueing work onto a connection from outside its
/// task. Enqueueing never blocks the caller.
#[derive(Clone)]
pub struct ConnectionHandle {
    addr: SocketAddr,
    events: mpsc::UnboundedSender<ConnectionEvent>,
}

impl ConnectionHandle {
    #[cfg(test)]
    pub(crate) fn detached(
        addr: SocketAddr,
        events: mpsc::UnboundedSender<ConnectionEvent>,
    ) -> Self {
        Self { addr, events }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Enqueue a packet for sending. The returned signal resolves once the
    /// connection task has written (or failed to write) the packet.
    pub fn send(&self, packet: ClientboundPacket) -> SendSignal {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .events
            .send(ConnectionEvent::Send(packet, Some(tx)));
        SendSignal(rx)
    }

    /// Enqueue a disconnect with a user-facing reason. Safe to call on an
    /// already-closed connection.
    pub fn disconnect(&self, reason: impl Into<String>) {
        let _ = self.events.send(ConnectionEvent::Disconnect(reason.into()));
    }
}

/// One client connection: socket, codec stages, protocol state, identity.
pub struct Connection {
    addr: SocketAddr,
    framed: Framed<TcpStream, FrameCodec>,
    state: ProtocolState,
    login_username: Option<String>,
    public_key: Option<PublicKeyData>,
    auth: Option<AuthSession>,
    owner: Option<Arc<Player>>,
    status_answered: bool,
    closed: bool,
    context: Arc<ServerContext>,
    events_tx: mpsc::UnboundedSender<ConnectionEvent>,
    events_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
}

impl Connection {
    pub fn new(stream: TcpStream, addr: SocketAddr, context: Arc<ServerContext>) -> Self {
        let codec = FrameCodec::new(&context.config.transport);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            addr,
            framed: Framed::new(stream, codec),
            state: ProtocolState::Handshake,
            login_username: None,
            public_key: None,
            auth: None,
            owner: None,
            status_answered: false,
            closed: false,
            context,
            events_tx,
            events_rx,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// True until `close()` has completed.
    pub fn is_open(&self) -> bool {
        !self.closed
    }

    pub fn context(&self) -> Arc<ServerContext> {
        Arc::clone(&self.context)
    }

    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            addr: self.addr,
            events: self.events_tx.clone(),
        }
    }

    pub fn events_sender(&self) -> mpsc::UnboundedSender<ConnectionEvent> {
        self.events_tx.clone()
    }

    pub fn login_username(&self) -> Option<&str> {
        self.login_username.as_deref()
    }

    /// Record the client-declared identity from login-start. The username
    /// is immutable once set.
    pub fn set_login_identity(&mut self, username: String, public_key: Option<PublicKeyData>) {
        debug_assert!(self.login_username.is_none());
        self.login_username = Some(username);
        self.public_key = public_key;
    }

    pub fn public_key_data(&self) -> Option<&PublicKeyData> {
        self.public_key.as_ref()
    }

    pub fn auth_session(&self) -> Option<&AuthSession> {
        self.auth.as_ref()
    }

    pub fn take_auth_session(&mut self) -> Option<AuthSession> {
        self.auth.take()
    }

    pub fn set_auth_session(&mut self, session: AuthSession) {
        self.auth = Some(session);
    }

    pub fn owner(&self) -> Option<&Arc<Player>> {
        self.owner.as_ref()
    }

    pub fn status_answered(&self) -> bool {
        self.status_answered
    }

    pub fn mark_status_answered(&mut self) {
        self.status_answered = true;
    }

    /// Move to `next`, enforcing the state machine.
    ///
    /// # Errors
    /// Returns `ProtocolError::IllegalTransition` for a move the machine
    /// forbids.
    pub fn set_state(&mut self, next: ProtocolState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(ProtocolError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        trace!(peer = %self.addr, from = ?self.state, to = ?next, "State transition");
        self.state = next;
        Ok(())
    }

    /// Drive the connection until it disconnects. Inbound frames are
    /// decoded and dispatched strictly in arrival order; events interleave
    /// between frames, never inside one.
    pub async fn run(mut self) {
        debug!(peer = %self.addr, "Connection open");
        while self.is_open() {
            tokio::select! {
                frame = self.framed.next() => match frame {
                    Some(Ok(frame)) => {
                        if let Err(e) = self.handle_frame(frame).await {
                            self.fail(e).await;
                        }
                    }
                    Some(Err(e)) => self.fail(e).await,
                    None => self.close().await,
                },
                event = self.events_rx.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => self.close().await,
                },
            }
        }
    }

    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        let mut body = match frame {
            Frame::LegacyProbe => {
                debug!(peer = %self.addr, "Legacy status probe");
                self.answer_legacy_probe().await?;
                self.close().await;
                return Ok(());
            }
            Frame::Packet(body) => body,
        };

        let id = get_varint(&mut body)? as i32;
        let packet = match self.context.registry.decode(self.state, id, &mut body) {
            Ok(packet) => packet,
            Err(ProtocolError::UnknownPacket {
                state,
                direction,
                id,
            }) => {
                // Before the handshake there is nothing to be forward
                // compatible with; anything unexpected is a violation.
                if self.state == ProtocolState::Handshake {
                    return Err(ProtocolError::ProtocolState {
                        state,
                        direction,
                        id,
                    });
                }
                // The frame's bytes are already fully consumed, so the
                // stream stays aligned; the packet is a silent no-op.
                debug!(peer = %self.addr, id, state = ?self.state, "Skipping unknown packet");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let context = Arc::clone(&self.context);
        context.dispatcher.dispatch(self, packet).await
    }

    async fn handle_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Send(packet, ack) => {
                let result = self.send(&packet).await;
                match ack {
                    Some(ack) => {
                        let _ = ack.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            self.fail(e).await;
                        }
                    }
                }
            }
            ConnectionEvent::Disconnect(reason) => self.disconnect(&reason).await,
            ConnectionEvent::AuthResolved(result) => {
                if !self.is_open() {
                    debug!(peer = %self.addr, "Dropping verification result, connection closed");
                    return;
                }
                match result {
                    Ok(profile) => {
                        if let Err(e) = self.finish_login(profile).await {
                            self.fail(e).await;
                        }
                    }
                    Err(e) => self.fail(e).await,
                }
            }
        }
    }

    /// Route an error to its per-connection outcome: auth failures kick
    /// with their reason, everything else closes silently.
    async fn fail(&mut self, error: ProtocolError) {
        match error {
            ProtocolError::Auth(reason) => {
                warn!(peer = %self.addr, %reason, "Login failed");
                self.disconnect(&reason).await;
            }
            other => {
                warn!(peer = %self.addr, error = %other, "Closing connection");
                self.close().await;
            }
        }
    }

    /// Encode and write one packet, flushing the socket.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConnectionClosed` after `close()`, or the
    /// underlying codec/I-O error.
    pub async fn send(&mut self, packet: &ClientboundPacket) -> Result<()> {
        if !self.is_open() {
            return Err(ProtocolError::ConnectionClosed);
        }
        let (_, id) = self.context.registry.id_of(packet)?;
        let mut body = BytesMut::with_capacity(64);
        put_varint(&mut body, id as u32);
        packet.encode_body(&mut body);
        self.framed.send(body.freeze()).await
    }

    /// Send the state-appropriate kick packet best-effort, then close.
    pub async fn disconnect(&mut self, reason: &str) {
        if !self.is_open() {
            return;
        }
        info!(peer = %self.addr, %reason, "Disconnecting");
        let kick = match self.state {
            ProtocolState::Login => Some(ClientboundPacket::LoginDisconnect {
                reason: reason.to_string(),
            }),
            ProtocolState::Play => Some(ClientboundPacket::PlayDisconnect {
                reason: reason.to_string(),
            }),
            _ => None,
        };
        if let Some(packet) = kick {
            let _ = self.send(&packet).await;
        }
        self.close().await;
    }

    /// Release the socket and mark the connection DISCONNECTED. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.state = ProtocolState::Disconnected;
        self.auth = None;
        if let Some(player) = self.owner.take() {
            self.context.players.remove(&player.profile.uuid);
            info!(peer = %self.addr, username = %player.profile.username, "Player left");
        }
        let _ = self.framed.get_mut().shutdown().await;
        debug!(peer = %self.addr, "Connection closed");
    }

    /// Install the stream cipher on both directions.
    ///
    /// Ordering contract: packets enqueued before this call are flushed
    /// unencrypted first, and bytes already buffered off the socket are
    /// decrypted in place, so nothing straddles the cipher boundary.
    ///
    /// # Errors
    /// Returns `ProtocolError::Crypto` for an invalid shared secret.
    pub async fn install_cipher(&mut self, secret: &[u8]) -> Result<()> {
        self.drain_queued_sends().await;
        self.framed.flush().await?;

        let mut pending = self.framed.read_buffer_mut().split();
        let result = self.framed.codec_mut().install_cipher(secret, &mut pending);
        self.framed.read_buffer_mut().unsplit(pending);
        result?;
        debug!(peer = %self.addr, "Stream cipher installed");
        Ok(())
    }

    async fn drain_queued_sends(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
        }
    }

    /// Complete the login: negotiate compression, register the player,
    /// announce success, and enter PLAY. Called with the verified profile
    /// in online mode or the offline profile otherwise.
    ///
    /// # Errors
    /// Returns `ProtocolError::Auth` if the player cannot join (capacity,
    /// duplicate identity), or the underlying send error.
    pub async fn finish_login(&mut self, profile: GameProfile) -> Result<()> {
        self.auth = None;

        let threshold = self.context.config.transport.compression_threshold;
        if threshold >= 0 && !self.framed.codec().compression_enabled() {
            self.send(&ClientboundPacket::SetCompression { threshold })
                .await?;
            self.framed.codec_mut().enable_compression(threshold);
        }

        let player = self.context.players.join(profile.clone(), self.handle())?;

        self.send(&ClientboundPacket::LoginSuccess {
            uuid: profile.uuid,
            username: profile.username.clone(),
            properties: profile.properties,
        })
        .await?;

        self.set_state(ProtocolState::Play)?;
        // The owning entity reference: set exactly once, only here.
        self.owner = Some(player);
        info!(peer = %self.addr, username = %profile.username, uuid = %profile.uuid, "Player joined");
        Ok(())
    }

    /// Answer the legacy probe out-of-band: a raw 0xFF blob, no framing,
    /// UTF-16BE fields separated by NUL.
    async fn answer_legacy_probe(&mut self) -> Result<()> {
        let config = &self.context.config.server;
        let text = format!(
            "\u{a7}1\0{}\0{}\0{}\0{}\0{}",
            PROTOCOL_VERSION,
            GAME_VERSION,
            config.motd,
            self.context.players.count(),
            config.max_players,
        );

        let mut blob = BytesMut::new();
        blob.put_u8(0xFF);
        let units: Vec<u16> = text.encode_utf16().collect();
        blob.put_u16(units.len() as u16);
        for unit in units {
            blob.put_u16(unit);
        }

        let stream = self.framed.get_mut();
        stream.write_all(&blob).await?;
        stream.flush().await?;
        Ok(())
    }
}
