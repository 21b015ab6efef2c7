//! Crypto Module - TURN Credentials
//!
//! Dieses Modul verwaltet:
//! - HMAC-SHA1 basierte, zeitlich begrenzte TURN Credentials

mod turn;

pub use turn::{InvalidLength, TurnCredential, DEFAULT_CREDENTIAL_TTL};
