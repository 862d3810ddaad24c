//! # External Services
//!
//! Clients for the collaborators the protocol consumes but does not own.
//! Today that is the session-verification service used by online-mode
//! logins.

pub mod session;
