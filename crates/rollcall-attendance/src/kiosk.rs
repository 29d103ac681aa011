//! Kiosk identity and pairing records
//!
//! A kiosk boots unpaired, shows its registration PIN, and becomes a trusted
//! session host once an admin pairs it to a room.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use rand::Rng;
use rollcall_core::db::to_datetime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use crate::pin::Pin;

/// Pairing state of a kiosk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum KioskState {
    Unpaired,
    Paired,
}

/// Where a paired kiosk is installed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Location {
    pub building: String,
    pub room: String,
}

/// A kiosk row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Kiosk {
    pub id: String,
    pub state: KioskState,
    /// Live only while unpaired
    pub registration_pin: Option<String>,
    /// Live only while paired
    pub display_pin: Option<String>,
    /// SHA-256 of the kiosk secret
    pub secret_hash: String,
    pub building: Option<String>,
    pub room: Option<String>,
    pub created_at: i64,
    pub paired_at: Option<i64>,
}

impl Kiosk {
    pub fn is_paired(&self) -> bool {
        self.state == KioskState::Paired
    }

    /// The PIN this kiosk should currently show
    pub fn current_pin(&self) -> Option<&str> {
        match self.state {
            KioskState::Unpaired => self.registration_pin.as_deref(),
            KioskState::Paired => self.display_pin.as_deref(),
        }
    }

    /// Check a presented kiosk secret against the stored hash in constant time
    pub fn verify_secret(&self, secret: &str) -> bool {
        hash_secret(secret)
            .as_bytes()
            .ct_eq(self.secret_hash.as_bytes())
            .into()
    }
}

/// Kiosk summary for API responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskInfo {
    pub id: String,
    pub state: KioskState,
    /// The PIN the kiosk displays: registration PIN while unpaired,
    /// display PIN once paired
    pub pin: Option<String>,
    pub building: Option<String>,
    pub room: Option<String>,
    pub created_at: DateTime<Utc>,
    pub paired_at: Option<DateTime<Utc>>,
}

impl From<&Kiosk> for KioskInfo {
    fn from(kiosk: &Kiosk) -> Self {
        Self {
            id: kiosk.id.clone(),
            state: kiosk.state,
            pin: kiosk.current_pin().map(str::to_string),
            building: kiosk.building.clone(),
            room: kiosk.room.clone(),
            created_at: to_datetime(kiosk.created_at),
            paired_at: kiosk.paired_at.map(to_datetime),
        }
    }
}

/// Returned once to a booting kiosk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskRegistration {
    pub kiosk_id: String,
    pub registration_pin: Pin,
    /// Bearer secret for the kiosk's own requests; only its hash is stored
    pub kiosk_secret: String,
}

/// Result of pairing a kiosk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairedKiosk {
    pub kiosk: KioskInfo,
    pub display_pin: Pin,
}

/// Generate a new kiosk id
pub fn new_kiosk_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generate a random kiosk secret
pub fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    BASE64.encode(bytes)
}

/// Hash a kiosk secret for storage
pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    BASE64.encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kiosk(state: KioskState) -> Kiosk {
        Kiosk {
            id: new_kiosk_id(),
            state,
            registration_pin: Some("111111".into()),
            display_pin: Some("222222".into()),
            secret_hash: hash_secret("secret"),
            building: None,
            room: None,
            created_at: 0,
            paired_at: None,
        }
    }

    #[test]
    fn test_secret_hashing() {
        let secret = generate_secret();
        assert_eq!(hash_secret(&secret), hash_secret(&secret));
        assert_ne!(hash_secret(&secret), hash_secret("different"));
        assert_ne!(generate_secret(), secret);
    }

    #[test]
    fn test_verify_secret() {
        let k = kiosk(KioskState::Unpaired);
        assert!(k.verify_secret("secret"));
        assert!(!k.verify_secret("Secret"));
        assert!(!k.verify_secret(""));
    }

    #[test]
    fn test_verify_secret_rejects_hash_and_prefix() {
        let k = kiosk(KioskState::Paired);
        // Presenting the stored hash itself must not authenticate
        assert!(!k.verify_secret(&k.secret_hash));

        let mut truncated = kiosk(KioskState::Paired);
        truncated.secret_hash.truncate(10);
        assert!(!truncated.verify_secret("secret"));
    }

    #[test]
    fn test_current_pin_follows_state() {
        assert_eq!(kiosk(KioskState::Unpaired).current_pin(), Some("111111"));
        assert_eq!(kiosk(KioskState::Paired).current_pin(), Some("222222"));

        let info = KioskInfo::from(&kiosk(KioskState::Paired));
        assert_eq!(info.pin.as_deref(), Some("222222"));
        assert_eq!(info.state, KioskState::Paired);
    }
}
