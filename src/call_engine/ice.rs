//! STUN/TURN Konfiguration
//!
//! Wird bei jeder neuen Peer Connection aufgelöst, damit zeitlich
//! begrenzte TURN Credentials nie abgelaufen sind.

use crate::crypto::{TurnCredential, DEFAULT_CREDENTIAL_TTL};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use webrtc::ice_transport::ice_server::RTCIceServer;

/// Google STUN Server (kostenlos, für die meisten Verbindungen ausreichend)
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

// ============================================================================
// RELAY DESCRIPTOR
// ============================================================================

/// Ein aufgelöster STUN/TURN Server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayDescriptor {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl RelayDescriptor {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(
        url: impl Into<String>,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            username: Some(username.into()),
            credential: Some(credential.into()),
        }
    }
}

impl From<RelayDescriptor> for RTCIceServer {
    fn from(relay: RelayDescriptor) -> Self {
        RTCIceServer {
            urls: vec![relay.url],
            username: relay.username.unwrap_or_default(),
            credential: relay.credential.unwrap_or_default(),
            ..Default::default()
        }
    }
}

// ============================================================================
// ICE TRANSPORT CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum RelaySource {
    Static(RelayDescriptor),
    /// TURN mit Shared Secret, Credentials werden pro Auflösung erzeugt
    TimeLimited {
        url: String,
        secret: String,
        ttl: Duration,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IceTransportConfig {
    sources: Vec<RelaySource>,
}

impl IceTransportConfig {
    /// Leere Konfiguration (nur Host-Candidates)
    pub fn empty() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn with_static(mut self, relay: RelayDescriptor) -> Self {
        self.sources.push(RelaySource::Static(relay));
        self
    }

    pub fn with_time_limited_turn(
        mut self,
        url: impl Into<String>,
        secret: impl Into<String>,
        ttl: Duration,
    ) -> Self {
        self.sources.push(RelaySource::TimeLimited {
            url: url.into(),
            secret: secret.into(),
            ttl,
        });
        self
    }

    pub fn resolve(&self) -> Vec<RelayDescriptor> {
        self.resolve_at(Utc::now())
    }

    pub fn resolve_at(&self, now: DateTime<Utc>) -> Vec<RelayDescriptor> {
        self.sources
            .iter()
            .filter_map(|source| match source {
                RelaySource::Static(relay) => Some(relay.clone()),
                RelaySource::TimeLimited { url, secret, ttl } => {
                    match TurnCredential::generate_at(secret, *ttl, now) {
                        Ok(credential) => Some(RelayDescriptor::turn(
                            url.clone(),
                            credential.username,
                            credential.credential,
                        )),
                        Err(e) => {
                            tracing::warn!("Skipping TURN server {}: {}", url, e);
                            None
                        }
                    }
                }
            })
            .collect()
    }

    pub fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.resolve().into_iter().map(Into::into).collect()
    }
}

impl Default for IceTransportConfig {
    fn default() -> Self {
        Self::empty().with_static(RelayDescriptor::stun(DEFAULT_STUN_URL))
    }
}

/// Kurzform für eine STUN + TURN-REST Konfiguration mit 24h Credentials
pub fn stun_and_turn(turn_url: &str, secret: &str) -> IceTransportConfig {
    IceTransportConfig::default().with_time_limited_turn(turn_url, secret, DEFAULT_CREDENTIAL_TTL)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_google_stun() {
        let relays = IceTransportConfig::default().resolve();
        assert_eq!(relays, vec![RelayDescriptor::stun(DEFAULT_STUN_URL)]);
    }

    #[test]
    fn test_time_limited_turn_is_resolved_per_call() {
        let config = stun_and_turn("turn:10.80.163.177:3478", "mysecret");

        let early = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let late = DateTime::from_timestamp(1_700_000_100, 0).unwrap();

        let first = config.resolve_at(early);
        let second = config.resolve_at(late);

        assert_eq!(first.len(), 2);
        assert_eq!(first[1].url, "turn:10.80.163.177:3478");
        assert_eq!(first[1].username.as_deref(), Some("1700086400"));
        assert_eq!(second[1].username.as_deref(), Some("1700086500"));
        assert_ne!(first[1].credential, second[1].credential);
    }

    #[test]
    fn test_conversion_to_rtc_ice_server() {
        let server: RTCIceServer = RelayDescriptor::turn("turn:example.org", "u", "p").into();
        assert_eq!(server.urls, vec!["turn:example.org".to_string()]);
        assert_eq!(server.username, "u");
        assert_eq!(server.credential, "p");

        let stun: RTCIceServer = RelayDescriptor::stun(DEFAULT_STUN_URL).into();
        assert!(stun.username.is_empty());
    }
}
