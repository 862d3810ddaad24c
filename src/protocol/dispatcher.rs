use std::collections::HashMap;

use async_trait::async_trait;
use tracing::trace;

use crate::error::{constants, ProtocolError, Result};
use crate::protocol::packets::{InboundKind, ServerboundPacket};
use crate::transport::connection::Connection;

/// Handler bound to exactly one packet kind, split into two phases.
///
/// `pre` runs synchronously, inline with decode; returning `false` means
/// "handled, stop here" and suppresses `post`. `post` performs the actual
/// effect and is the only phase allowed to start asynchronous work; any
/// continuation of that work must come back through the connection's event
/// channel, never touch the connection from another task.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Inline fast-path accept/reject. Defaults to accepting.
    fn pre(&self, connection: &mut Connection, packet: &ServerboundPacket) -> bool {
        let _ = (connection, packet);
        true
    }

    /// The effect phase.
    async fn post(&self, connection: &mut Connection, packet: ServerboundPacket) -> Result<()>;
}

/// Packet-kind → translator table. Built once at startup alongside the
/// packet registry and shared immutably; a packet kind with no translator
/// dispatches as a no-op.
pub struct Dispatcher {
    translators: HashMap<InboundKind, Box<dyn Translator>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            translators: HashMap::new(),
        }
    }

    /// Bind a translator to a packet kind.
    ///
    /// # Errors
    /// Returns `ProtocolError::Config` if the kind already has a
    /// translator; like registry conflicts this is startup-fatal.
    pub fn register(&mut self, kind: InboundKind, translator: Box<dyn Translator>) -> Result<()> {
        if self.translators.contains_key(&kind) {
            return Err(ProtocolError::Config(format!(
                "{}: {kind:?}",
                constants::ERR_DUPLICATE_TRANSLATOR
            )));
        }
        self.translators.insert(kind, translator);
        Ok(())
    }

    /// Route one decoded packet, in arrival order, on the connection's own
    /// task.
    pub async fn dispatch(
        &self,
        connection: &mut Connection,
        packet: ServerboundPacket,
    ) -> Result<()> {
        let Some(translator) = self.translators.get(&packet.kind()) else {
            trace!(kind = ?packet.kind(), "No translator registered, ignoring");
            return Ok(());
        };

        if !translator.pre(connection, &packet) {
            trace!(kind = ?packet.kind(), "Translator pre-hook consumed packet");
            return Ok(());
        }
        translator.post(connection, packet).await
    }
}
