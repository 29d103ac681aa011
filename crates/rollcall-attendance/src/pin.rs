//! Six-digit kiosk PINs
//!
//! Two PINs identify a kiosk to humans:
//!
//! - the *registration PIN* shown by an unpaired kiosk, consumed when an
//!   admin pairs it;
//! - the *display PIN* shown by a paired kiosk, which a teacher types to
//!   start a session there. It is reissued on every session start.
//!
//! Uniqueness (registration PINs among unpaired kiosks, display PINs among
//! paired kiosks) is enforced by partial unique indexes. Issuing a PIN draws
//! at random and re-draws whenever the store reports a collision.

use rand::Rng;
use rollcall_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::debug;

/// Draws attempted before giving up on finding a free PIN
pub const MAX_PIN_ATTEMPTS: usize = 100;

/// A 6-digit zero-padded decimal PIN
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Pin(String);

impl Pin {
    /// Draw a PIN uniformly from 000000..=999999
    pub fn random() -> Self {
        let value: u32 = rand::thread_rng().gen_range(0..1_000_000);
        Self(format!("{:06}", value))
    }

    /// Parse user input, accepting the grouped form ("123 456")
    pub fn parse(input: &str) -> Result<Self> {
        let digits: String = input.chars().filter(|c| !c.is_whitespace()).collect();
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::validation("PIN must be 6 digits"));
        }
        Ok(Self(digits))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Display form, e.g. "123 456"
    pub fn grouped(&self) -> String {
        format!("{} {}", &self.0[..3], &self.0[3..])
    }
}

impl std::fmt::Display for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Pin {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Pin {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<Pin> for String {
    fn from(pin: Pin) -> Self {
        pin.0
    }
}

/// Which of the two kiosk PINs an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    Registration,
    Display,
}

impl PinKind {
    fn column(self) -> &'static str {
        match self {
            PinKind::Registration => "registration_pin",
            PinKind::Display => "display_pin",
        }
    }

    /// Kiosk state in which this PIN kind is live
    fn state(self) -> &'static str {
        match self {
            PinKind::Registration => "unpaired",
            PinKind::Display => "paired",
        }
    }

    fn label(self) -> &'static str {
        match self {
            PinKind::Registration => "registration PIN",
            PinKind::Display => "display PIN",
        }
    }
}

/// Assign a fresh PIN of the given kind to a kiosk in the matching state.
///
/// Collisions with another kiosk's live PIN are retried up to
/// [`MAX_PIN_ATTEMPTS`] times.
pub async fn issue(conn: &mut SqliteConnection, kind: PinKind, kiosk_id: &str) -> Result<Pin> {
    let sql = format!(
        "UPDATE kiosks SET {} = ? WHERE id = ? AND state = ?",
        kind.column()
    );

    for attempt in 1..=MAX_PIN_ATTEMPTS {
        let pin = Pin::random();
        let result = sqlx::query(&sql)
            .bind(pin.as_str())
            .bind(kiosk_id)
            .bind(kind.state())
            .execute(&mut *conn)
            .await
            .map_err(Error::from);

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                return Err(Error::not_found(format!("{} kiosk {}", kind.state(), kiosk_id)));
            }
            Ok(_) => return Ok(pin),
            Err(Error::Conflict(_)) => {
                debug!(kiosk_id, attempt, "{} collision, redrawing", kind.label());
            }
            Err(e) => return Err(e),
        }
    }

    Err(Error::Internal(format!(
        "no free {} after {} attempts",
        kind.label(),
        MAX_PIN_ATTEMPTS
    )))
}

/// Resolve a live PIN of the given kind to its kiosk id
pub async fn resolve(conn: &mut SqliteConnection, kind: PinKind, pin: &Pin) -> Result<String> {
    let sql = format!(
        "SELECT id FROM kiosks WHERE {} = ? AND state = ?",
        kind.column()
    );
    sqlx::query_scalar::<_, String>(&sql)
        .bind(pin.as_str())
        .bind(kind.state())
        .fetch_optional(&mut *conn)
        .await?
        .ok_or_else(|| Error::not_found(kind.label()))
}

pub async fn issue_registration_pin(conn: &mut SqliteConnection, kiosk_id: &str) -> Result<Pin> {
    issue(conn, PinKind::Registration, kiosk_id).await
}

pub async fn resolve_registration_pin(conn: &mut SqliteConnection, pin: &Pin) -> Result<String> {
    resolve(conn, PinKind::Registration, pin).await
}

pub async fn issue_display_pin(conn: &mut SqliteConnection, kiosk_id: &str) -> Result<Pin> {
    issue(conn, PinKind::Display, kiosk_id).await
}

pub async fn resolve_display_pin(conn: &mut SqliteConnection, pin: &Pin) -> Result<String> {
    resolve(conn, PinKind::Display, pin).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::Database;

    async fn insert_kiosk(db: &Database, id: &str, state: &str, display_pin: Option<&str>) {
        sqlx::query(
            "INSERT INTO kiosks (id, state, display_pin, secret_hash, created_at) VALUES (?, ?, ?, 'h', 0)",
        )
        .bind(id)
        .bind(state)
        .bind(display_pin)
        .execute(db.pool())
        .await
        .unwrap();
    }

    #[test]
    fn test_pin_parsing() {
        assert_eq!(Pin::parse("012345").unwrap().as_str(), "012345");
        assert_eq!(Pin::parse("123 456").unwrap().as_str(), "123456");
        assert!(matches!(Pin::parse("12345"), Err(Error::Validation(_))));
        assert!(matches!(Pin::parse("12a456"), Err(Error::Validation(_))));
        assert!(matches!(Pin::parse(""), Err(Error::Validation(_))));
    }

    #[test]
    fn test_random_pin_shape() {
        for _ in 0..100 {
            let pin = Pin::random();
            assert_eq!(pin.as_str().len(), 6);
            assert!(pin.as_str().bytes().all(|b| b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_grouped() {
        assert_eq!(Pin::parse("012345").unwrap().grouped(), "012 345");
    }

    #[tokio::test]
    async fn test_issue_and_resolve() {
        let db = Database::open_in_memory().await.unwrap();
        insert_kiosk(&db, "k1", "unpaired", None).await;
        let mut conn = db.pool().acquire().await.unwrap();

        let pin = issue_registration_pin(&mut conn, "k1").await.unwrap();
        assert_eq!(resolve_registration_pin(&mut conn, &pin).await.unwrap(), "k1");

        // An unpaired kiosk has no live display PIN
        assert!(matches!(
            issue_display_pin(&mut conn, "k1").await,
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            resolve_display_pin(&mut conn, &pin).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_display_pin_reissue_invalidates_previous() {
        let db = Database::open_in_memory().await.unwrap();
        insert_kiosk(&db, "k1", "paired", None).await;
        let mut conn = db.pool().acquire().await.unwrap();

        let first = issue_display_pin(&mut conn, "k1").await.unwrap();
        let mut second = issue_display_pin(&mut conn, "k1").await.unwrap();
        while second == first {
            second = issue_display_pin(&mut conn, "k1").await.unwrap();
        }

        assert!(matches!(
            resolve_display_pin(&mut conn, &first).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(resolve_display_pin(&mut conn, &second).await.unwrap(), "k1");
    }

    #[tokio::test]
    async fn test_same_pin_rejected_by_store() {
        let db = Database::open_in_memory().await.unwrap();
        insert_kiosk(&db, "k1", "paired", Some("111111")).await;

        let result = sqlx::query(
            "INSERT INTO kiosks (id, state, display_pin, secret_hash, created_at) VALUES ('k2', 'paired', '111111', 'h', 0)",
        )
        .execute(db.pool())
        .await
        .map_err(Error::from);
        assert!(matches!(result, Err(Error::Conflict(_))));

        // The same value is fine for an unpaired kiosk, where display PINs are not live
        insert_kiosk(&db, "k3", "unpaired", Some("111111")).await;
    }
}
