//! Zeitlich begrenzte TURN Credentials
//!
//! Erzeugt Credentials nach der TURN-REST-Konvention, die coturn mit
//! `use-auth-secret` akzeptiert:
//! - Username: Unix-Zeitstempel des Ablaufs
//! - Passwort: `base64(HMAC-SHA1(secret, username))`
//!
//! ## Verwendung
//! ```rust
//! use duocall::crypto::TurnCredential;
//!
//! let credential = TurnCredential::generate("mysecret", std::time::Duration::from_secs(3600))?;
//! assert!(!credential.credential.is_empty());
//! # Ok::<(), duocall::crypto::InvalidLength>(())
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
pub use hmac::digest::InvalidLength;
use sha1::Sha1;
use std::time::Duration;

type HmacSha1 = Hmac<Sha1>;

/// Standard-Gültigkeit: 24 Stunden
pub const DEFAULT_CREDENTIAL_TTL: Duration = Duration::from_secs(24 * 3600);

// ============================================================================
// TURN CREDENTIAL
// ============================================================================

/// Username/Passwort-Paar für einen TURN-Server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnCredential {
    pub username: String,
    pub credential: String,
}

impl TurnCredential {
    /// Erzeugt ein Credential, das ab jetzt `ttl` lang gültig ist
    pub fn generate(secret: &str, ttl: Duration) -> Result<Self, InvalidLength> {
        Self::generate_at(secret, ttl, Utc::now())
    }

    /// Wie [`generate`](Self::generate), aber mit festem Zeitpunkt
    pub fn generate_at(
        secret: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<Self, InvalidLength> {
        let expires_at = now.timestamp() + ttl.as_secs() as i64;
        let username = expires_at.to_string();

        let mut mac = HmacSha1::new_from_slice(secret.as_bytes())?;
        mac.update(username.as_bytes());
        let credential = BASE64.encode(mac.finalize().into_bytes());

        Ok(Self {
            username,
            credential,
        })
    }

    /// Ablaufzeitpunkt aus dem Username
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.username
            .parse::<i64>()
            .ok()
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
    }
}
