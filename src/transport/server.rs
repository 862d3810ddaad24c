//! Accept loop and shared server state.
//!
//! All connections share exactly three things, built once at startup: the
//! immutable packet registry and dispatcher, the stateless session
//! verifier, and the synchronized player manager. Each accepted socket
//! runs independently on its own task; a failed connection is logged and
//! forgotten, never allowed to affect its neighbors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::NetworkConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::ServerKeyChain;
use crate::protocol::registry::PacketRegistry;
use crate::protocol::translators::build_dispatcher;
use crate::service::session::{GameProfile, HttpSessionService, SessionVerifier};
use crate::transport::connection::{Connection, ConnectionHandle};

/// An authenticated player: the verified profile plus the handle of the
/// connection that owns it. This is the narrow seam to the entity
/// subsystem; everything game-side hangs off this struct.
pub struct Player {
    pub profile: GameProfile,
    pub handle: ConnectionHandle,
}

/// The synchronized collection of online players, shared by every
/// connection task.
pub struct PlayerManager {
    max_players: usize,
    players: Mutex<HashMap<Uuid, Arc<Player>>>,
}

impl PlayerManager {
    pub fn new(max_players: usize) -> Self {
        Self {
            max_players,
            players: Mutex::new(HashMap::new()),
        }
    }

    pub fn count(&self) -> usize {
        self.players.lock().map(|players| players.len()).unwrap_or(0)
    }

    pub fn is_full(&self) -> bool {
        self.count() >= self.max_players
    }

    /// Up to a dozen (name, uuid) pairs for the status sample.
    pub fn sample(&self) -> Vec<(String, Uuid)> {
        self.players
            .lock()
            .map(|players| {
                players
                    .values()
                    .take(12)
                    .map(|p| (p.profile.username.clone(), p.profile.uuid))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Admit a verified profile.
    ///
    /// # Errors
    /// Returns `ProtocolError::Auth` when the server is at capacity or the
    /// uuid is already online.
    pub fn join(&self, profile: GameProfile, handle: ConnectionHandle) -> Result<Arc<Player>> {
        let mut players = self
            .players
            .lock()
            .map_err(|_| ProtocolError::Auth(constants::ERR_SERVER_FULL.to_string()))?;
        if players.len() >= self.max_players {
            return Err(ProtocolError::Auth(constants::ERR_SERVER_FULL.to_string()));
        }
        if players.contains_key(&profile.uuid) {
            return Err(ProtocolError::Auth(
                constants::ERR_ALREADY_ONLINE.to_string(),
            ));
        }
        let player = Arc::new(Player {
            profile: profile.clone(),
            handle,
        });
        players.insert(profile.uuid, Arc::clone(&player));
        Ok(player)
    }

    /// Drop a player from the collection. Missing uuids are fine; the
    /// close path is idempotent.
    pub fn remove(&self, uuid: &Uuid) -> Option<Arc<Player>> {
        self.players.lock().ok()?.remove(uuid)
    }

    /// Enqueue a disconnect on every online player's connection.
    pub fn disconnect_all(&self, reason: &str) {
        if let Ok(players) = self.players.lock() {
            for player in players.values() {
                player.handle.disconnect(reason);
            }
        }
    }
}

/// Everything the connections share, assembled once at startup.
pub struct ServerContext {
    pub config: NetworkConfig,
    pub registry: PacketRegistry,
    pub dispatcher: Dispatcher,
    /// RSA key pair for the login exchange; absent in offline mode.
    pub keys: Option<ServerKeyChain>,
    pub verifier: Arc<dyn SessionVerifier>,
    pub players: PlayerManager,
}

impl ServerContext {
    /// Build the shared state: validate config, build the registry and
    /// dispatcher, generate keys (online mode), construct the session
    /// client.
    ///
    /// # Errors
    /// Any failure here is startup-fatal: invalid configuration, registry
    /// or dispatcher conflicts, key generation.
    pub fn initialize(config: NetworkConfig) -> Result<Arc<Self>> {
        let verifier: Arc<dyn SessionVerifier> =
            Arc::new(HttpSessionService::new(&config.session)?);
        Self::with_verifier(config, verifier)
    }

    /// Like [`ServerContext::initialize`] with a caller-supplied verifier;
    /// the seam the integration tests mock through.
    pub fn with_verifier(
        config: NetworkConfig,
        verifier: Arc<dyn SessionVerifier>,
    ) -> Result<Arc<Self>> {
        config.validate_strict()?;
        let registry = PacketRegistry::build()?;
        let dispatcher = build_dispatcher()?;
        let keys = if config.server.online_mode {
            Some(ServerKeyChain::generate()?)
        } else {
            None
        };
        let players = PlayerManager::new(config.server.max_players);
        Ok(Arc::new(Self {
            config,
            registry,
            dispatcher,
            keys,
            verifier,
            players,
        }))
    }
}

/// Bind the configured address and serve until ctrl-c.
#[instrument(skip(context), fields(address = %context.config.server.address))]
pub async fn start_server(context: Arc<ServerContext>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    let listener = TcpListener::bind(&context.config.server.address).await?;
    serve_with_shutdown(listener, context, shutdown_rx).await
}

/// Serve an already-bound listener with an external shutdown channel.
pub async fn serve_with_shutdown(
    listener: TcpListener,
    context: Arc<ServerContext>,
    mut shutdown_rx: mpsc::Receiver<()>,
) -> Result<()> {
    info!(address = %listener.local_addr()?, "Listening");

    // Track active connections
    let active_connections = Arc::new(TokioMutex::new(0u32));

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("Shutting down server. Waiting for connections to close...");
                context.players.disconnect_all("Server closed");

                let timeout = tokio::time::sleep(context.config.server.shutdown_timeout);
                tokio::pin!(timeout);

                loop {
                    tokio::select! {
                        _ = &mut timeout => {
                            warn!("Shutdown timeout reached, forcing exit");
                            break;
                        }
                        _ = tokio::time::sleep(Duration::from_millis(200)) => {
                            let connections = *active_connections.lock().await;
                            debug!(connections = %connections, "Waiting for connections to close");
                            if connections == 0 {
                                info!("All connections closed, shutting down");
                                break;
                            }
                        }
                    }
                }

                return Ok(());
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, addr)) => {
                        debug!(peer = %addr, "Accepted connection");
                        let context = Arc::clone(&context);
                        let active_connections = Arc::clone(&active_connections);

                        {
                            let mut count = active_connections.lock().await;
                            *count += 1;
                        }

                        tokio::spawn(async move {
                            if let Err(e) = stream.set_nodelay(true) {
                                debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
                            }
                            Connection::new(stream, addr, context).run().await;

                            let mut count = active_connections.lock().await;
                            *count -= 1;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn handle() -> ConnectionHandle {
        // A handle whose connection never existed; sends go nowhere, which
        // is all the manager tests need.
        let (tx, rx) = unbounded_channel();
        drop(rx);
        ConnectionHandle::detached("127.0.0.1:0".parse().unwrap(), tx)
    }

    #[test]
    fn test_capacity_enforced() {
        let manager = PlayerManager::new(2);
        manager
            .join(GameProfile::offline("a"), handle())
            .unwrap();
        manager
            .join(GameProfile::offline("b"), handle())
            .unwrap();
        assert!(manager.is_full());
        assert!(matches!(
            manager.join(GameProfile::offline("c"), handle()),
            Err(ProtocolError::Auth(_))
        ));
    }

    #[test]
    fn test_duplicate_uuid_refused() {
        let manager = PlayerManager::new(8);
        manager
            .join(GameProfile::offline("a"), handle())
            .unwrap();
        assert!(matches!(
            manager.join(GameProfile::offline("a"), handle()),
            Err(ProtocolError::Auth(_))
        ));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let manager = PlayerManager::new(8);
        let player = manager
            .join(GameProfile::offline("a"), handle())
            .unwrap();
        assert!(manager.remove(&player.profile.uuid).is_some());
        assert!(manager.remove(&player.profile.uuid).is_none());
        assert_eq!(manager.count(), 0);
    }
}
