//! Client for the external session-verification service.
//!
//! One stateless instance is constructed at startup and shared by every
//! connection's login handshake; the [`SessionVerifier`] trait is the seam
//! that lets tests substitute a mock without touching the handshake code.

use std::net::IpAddr;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::packets::ProfileProperty;

/// A resolved player identity: uuid, canonical username, optional texture
/// payload.
#[derive(Debug, Clone, PartialEq)]
pub struct GameProfile {
    pub uuid: Uuid,
    pub username: String,
    pub properties: Vec<ProfileProperty>,
}

impl GameProfile {
    /// Offline-mode identity: the uuid is derived deterministically from
    /// the client-declared username so a player keeps their identity
    /// across reconnects.
    pub fn offline(username: &str) -> Self {
        let uuid = Uuid::new_v3(
            &Uuid::NAMESPACE_OID,
            format!("OfflinePlayer:{username}").as_bytes(),
        );
        Self {
            uuid,
            username: username.to_string(),
            properties: Vec::new(),
        }
    }
}

/// External identity check performed once per online-mode login.
#[async_trait]
pub trait SessionVerifier: Send + Sync {
    /// Resolve (username, session hash) to a verified profile.
    ///
    /// # Errors
    /// Returns `ProtocolError::Auth` for an absent/invalid session, an
    /// unreachable service, or a malformed response. Exactly one attempt
    /// is made; callers never retry.
    async fn verify(
        &self,
        username: &str,
        session_hash: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<GameProfile>;
}

/// Profile document returned by the hasJoined endpoint.
#[derive(Debug, Deserialize)]
struct HasJoinedResponse {
    /// Player uuid, hex without dashes
    id: String,
    /// Canonical username
    name: String,
    #[serde(default)]
    properties: Vec<RawProperty>,
}

#[derive(Debug, Deserialize)]
struct RawProperty {
    name: String,
    value: String,
    #[serde(default)]
    signature: Option<String>,
}

/// HTTP implementation backed by the configured session endpoint.
#[derive(Debug, Clone)]
pub struct HttpSessionService {
    client: Client,
    endpoint: String,
    forward_client_ip: bool,
}

impl HttpSessionService {
    /// Build the shared client from configuration.
    ///
    /// # Errors
    /// Returns `ProtocolError::Config` if the underlying HTTP client cannot
    /// be constructed.
    pub fn new(config: &SessionConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(ms) = config.request_timeout_ms {
            builder = builder.timeout(std::time::Duration::from_millis(ms));
        }
        let client = builder
            .build()
            .map_err(|e| ProtocolError::Config(format!("Failed to build session client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            forward_client_ip: config.forward_client_ip,
        })
    }
}

#[async_trait]
impl SessionVerifier for HttpSessionService {
    async fn verify(
        &self,
        username: &str,
        session_hash: &str,
        client_ip: Option<IpAddr>,
    ) -> Result<GameProfile> {
        let url = format!("{}/session/minecraft/hasJoined", self.endpoint);
        let mut query = vec![
            ("username", username.to_string()),
            ("serverId", session_hash.to_string()),
        ];
        if self.forward_client_ip {
            if let Some(ip) = client_ip {
                query.push(("ip", ip.to_string()));
            }
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|_| ProtocolError::Auth(constants::ERR_SESSION_UNREACHABLE.to_string()))?;

        // The service answers an unknown session with 204 No Content
        if response.status() == StatusCode::NO_CONTENT {
            return Err(ProtocolError::Auth(
                constants::ERR_INVALID_SESSION.to_string(),
            ));
        }
        if !response.status().is_success() {
            return Err(ProtocolError::Auth(
                constants::ERR_INVALID_SESSION.to_string(),
            ));
        }

        let document: HasJoinedResponse = response
            .json()
            .await
            .map_err(|_| ProtocolError::Auth(constants::ERR_INVALID_SESSION.to_string()))?;

        let uuid = Uuid::parse_str(&document.id)
            .map_err(|_| ProtocolError::Auth(constants::ERR_INVALID_SESSION.to_string()))?;

        Ok(GameProfile {
            uuid,
            username: document.name,
            properties: document
                .properties
                .into_iter()
                .map(|p| ProfileProperty {
                    name: p.name,
                    value: p.value,
                    signature: p.signature,
                })
                .collect(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_profile_is_deterministic() {
        let first = GameProfile::offline("Alice");
        let second = GameProfile::offline("Alice");
        assert_eq!(first.uuid, second.uuid);
        assert_eq!(first.username, "Alice");
        assert_ne!(first.uuid, GameProfile::offline("alice").uuid);
    }

    #[test]
    fn test_undashed_uuid_parses() {
        let raw = "853c80ef3c3749fdaa49938b674adae6";
        let parsed = Uuid::parse_str(raw).unwrap();
        assert_eq!(
            parsed,
            Uuid::parse_str("853c80ef-3c37-49fd-aa49-938b674adae6").unwrap()
        );
    }

    #[test]
    fn test_has_joined_document_shape() {
        let json = r#"{
            "id": "853c80ef3c3749fdaa49938b674adae6",
            "name": "Alice",
            "properties": [
                {"name": "textures", "value": "ZGF0YQ=="}
            ]
        }"#;
        let document: HasJoinedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(document.name, "Alice");
        assert_eq!(document.properties.len(), 1);
        assert!(document.properties[0].signature.is_none());
    }
}
