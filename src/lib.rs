//! # mantle-protocol
//!
//! Client-facing network protocol stack for the Mantle game-world server:
//! a length-framed, optionally compressed and encrypted binary protocol, a
//! per-connection state machine, and the login handshake that interleaves
//! an external identity check with non-blocking packet processing.
//!
//! ## Architecture
//!
//! ```text
//! bytes → cipher (decrypt) → frame codec (de-frame, decompress)
//!       → registry (decode by id) → dispatcher → translators
//!       → registry (encode) → frame codec → cipher (encrypt) → bytes
//! ```
//!
//! One tokio task per connection; the only shared state is the immutable
//! packet registry/dispatcher, the stateless session client, and the
//! synchronized player manager. The frame codec's partial-read return and
//! the session verification call are the two suspension points; neither
//! blocks any other connection.
//!
//! ## Quick start
//!
//! ```no_run
//! use mantle_protocol::config::NetworkConfig;
//! use mantle_protocol::transport::server::{start_server, ServerContext};
//! use mantle_protocol::utils::logging::init_logging;
//!
//! #[tokio::main]
//! async fn main() -> mantle_protocol::error::Result<()> {
//!     let config = NetworkConfig::from_env()?;
//!     init_logging(&config.logging)?;
//!     let context = ServerContext::initialize(config)?;
//!     start_server(context).await
//! }
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::NetworkConfig;
pub use error::{ProtocolError, Result};
pub use protocol::packets::{ClientboundPacket, ServerboundPacket};
pub use protocol::state::ProtocolState;
pub use transport::connection::{Connection, ConnectionHandle};
pub use transport::server::{start_server, ServerContext};
