//! Kiosk pairing lifecycle
//!
//! `Unpaired -> Paired` through an admin resolving the kiosk's registration
//! PIN; `Paired -> Unpaired` through an explicit unpair. Session operations
//! live in [`crate::session`] and check-ins in [`crate::checkin`].

use rollcall_core::{unix_timestamp, Capability, Config, Database, Error, Principal, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::kiosk::{self, KioskInfo, KioskRegistration, Location, PairedKiosk};
use crate::pin::{self, Pin};
use crate::session::ActiveSessionView;
use crate::storage;

/// Request to pair a kiosk by its registration PIN
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairRequest {
    pub registration_pin: String,
    #[serde(flatten)]
    pub location: Location,
}

/// What a kiosk polls to decide what to render
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KioskView {
    pub kiosk: KioskInfo,
    pub session: Option<ActiveSessionView>,
    /// Server clock, so the kiosk can correct drift when deriving tokens
    pub server_time: i64,
}

/// Owns the attendance store and enforces the kiosk/session state machine
#[derive(Clone)]
pub struct AttendanceManager {
    pub(crate) db: Database,
    pub(crate) rotate_seconds: u32,
    pub(crate) session_max_secs: i64,
}

impl AttendanceManager {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            db,
            rotate_seconds: config.rotate_seconds,
            session_max_secs: config.session_max_secs(),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn rotate_seconds(&self) -> u32 {
        self.rotate_seconds
    }

    /// Register a booting kiosk: unpaired, with a registration PIN and a
    /// bearer secret for its own requests
    pub async fn init_kiosk(&self) -> Result<KioskRegistration> {
        let kiosk_id = kiosk::new_kiosk_id();
        let secret = kiosk::generate_secret();

        let mut tx = self.db.begin_write().await?;
        storage::insert_kiosk(&mut tx, &kiosk_id, &kiosk::hash_secret(&secret), unix_timestamp())
            .await?;
        let registration_pin = pin::issue_registration_pin(&mut tx, &kiosk_id).await?;
        tx.commit().await?;

        info!(kiosk_id = %kiosk_id, "Kiosk registered, awaiting pairing");

        Ok(KioskRegistration {
            kiosk_id,
            registration_pin,
            kiosk_secret: secret,
        })
    }

    /// Look up the unpaired kiosk showing a registration PIN
    pub async fn resolve_registration_pin(&self, principal: &Principal, pin: &str) -> Result<KioskInfo> {
        principal.require(Capability::PairKiosk)?;
        let pin = Pin::parse(pin)?;

        let mut conn = self.db.pool().acquire().await?;
        let kiosk_id = pin::resolve_registration_pin(&mut conn, &pin).await?;
        self.kiosk_info(&mut conn, &kiosk_id).await
    }

    /// Pair the kiosk showing `registration_pin`.
    ///
    /// Consumes the registration PIN, records the location and issues the
    /// first display PIN in one transaction.
    pub async fn pair_kiosk(&self, principal: &Principal, request: PairRequest) -> Result<PairedKiosk> {
        principal.require(Capability::PairKiosk)?;
        let pin = Pin::parse(&request.registration_pin)?;

        let mut tx = self.db.begin_write().await?;
        let kiosk_id =
            storage::consume_registration_pin(&mut tx, pin.as_str(), &request.location, unix_timestamp())
                .await?
                .ok_or_else(|| Error::not_found("registration PIN"))?;
        let display_pin = pin::issue_display_pin(&mut tx, &kiosk_id).await?;
        let kiosk = self.kiosk_info(&mut tx, &kiosk_id).await?;
        tx.commit().await?;

        info!(
            kiosk_id = %kiosk_id,
            admin = %principal.subject,
            building = %request.location.building,
            room = %request.location.room,
            "Kiosk paired"
        );

        Ok(PairedKiosk { kiosk, display_pin })
    }

    /// Return a paired kiosk to the unpaired state with a fresh
    /// registration PIN. Refused while a session is running on it.
    pub async fn unpair_kiosk(&self, principal: &Principal, kiosk_id: &str) -> Result<KioskInfo> {
        principal.require(Capability::ManageKiosks)?;
        let now = unix_timestamp();

        let mut tx = self.db.begin_write().await?;
        let kiosk = storage::get_kiosk(&mut tx, kiosk_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("kiosk {kiosk_id}")))?;

        if let Some(session) = storage::active_session_for_kiosk(&mut tx, kiosk_id).await? {
            if self.expire_if_stale(&mut tx, session, now).await?.is_active() {
                return Err(Error::conflict("Kiosk has an active session, close it first"));
            }
        }

        if !kiosk.is_paired() || !storage::mark_unpaired(&mut tx, kiosk_id).await? {
            return Err(Error::conflict("Kiosk is not paired"));
        }
        pin::issue_registration_pin(&mut tx, kiosk_id).await?;
        let info = self.kiosk_info(&mut tx, kiosk_id).await?;
        tx.commit().await?;

        info!(kiosk_id, admin = %principal.subject, "Kiosk unpaired");
        Ok(info)
    }

    pub async fn list_kiosks(&self, principal: &Principal) -> Result<Vec<KioskInfo>> {
        principal.require(Capability::ManageKiosks)?;
        let mut conn = self.db.pool().acquire().await?;
        let kiosks = storage::list_kiosks(&mut conn).await?;
        Ok(kiosks.iter().map(KioskInfo::from).collect())
    }

    /// The kiosk's own polling view. Only the kiosk itself, holding its
    /// secret, receives the session secret.
    pub async fn kiosk_view(&self, kiosk_id: &str, kiosk_secret: &str) -> Result<KioskView> {
        self.kiosk_view_at(kiosk_id, kiosk_secret, unix_timestamp()).await
    }

    pub async fn kiosk_view_at(&self, kiosk_id: &str, kiosk_secret: &str, now: i64) -> Result<KioskView> {
        let mut conn = self.db.pool().acquire().await?;
        let kiosk = self.authenticate_kiosk(&mut conn, kiosk_id, kiosk_secret).await?;

        let session = match storage::active_session_for_kiosk(&mut conn, kiosk_id).await? {
            Some(session) => {
                let session = self.expire_if_stale(&mut conn, session, now).await?;
                if session.is_active() {
                    let count = storage::count_check_ins(&mut conn, &session.id).await?;
                    Some(ActiveSessionView::new(&session, count))
                } else {
                    None
                }
            }
            None => None,
        };

        // Re-read: a stale session may have just been closed
        let kiosk = storage::get_kiosk(&mut conn, &kiosk.id)
            .await?
            .unwrap_or(kiosk);

        Ok(KioskView {
            kiosk: KioskInfo::from(&kiosk),
            session,
            server_time: now,
        })
    }

    pub(crate) async fn authenticate_kiosk(
        &self,
        conn: &mut sqlx::SqliteConnection,
        kiosk_id: &str,
        kiosk_secret: &str,
    ) -> Result<kiosk::Kiosk> {
        let kiosk = storage::get_kiosk(conn, kiosk_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("kiosk {kiosk_id}")))?;
        if !kiosk.verify_secret(kiosk_secret) {
            warn!(kiosk_id, "Rejected kiosk request with wrong secret");
            return Err(Error::Unauthenticated("invalid kiosk secret".to_string()));
        }
        Ok(kiosk)
    }

    pub(crate) async fn kiosk_info(
        &self,
        conn: &mut sqlx::SqliteConnection,
        kiosk_id: &str,
    ) -> Result<KioskInfo> {
        storage::get_kiosk(conn, kiosk_id)
            .await?
            .map(|k| KioskInfo::from(&k))
            .ok_or_else(|| Error::not_found(format!("kiosk {kiosk_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{admin, manager, teacher};

    #[tokio::test]
    async fn test_pairing_flow() {
        let manager = manager().await;
        let admin = admin();

        let registration = manager.init_kiosk().await.unwrap();
        assert_eq!(registration.registration_pin.as_str().len(), 6);

        let found = manager
            .resolve_registration_pin(&admin, registration.registration_pin.as_str())
            .await
            .unwrap();
        assert_eq!(found.id, registration.kiosk_id);

        let paired = manager
            .pair_kiosk(
                &admin,
                PairRequest {
                    registration_pin: registration.registration_pin.grouped(),
                    location: Location {
                        building: "Main".into(),
                        room: "204".into(),
                    },
                },
            )
            .await
            .unwrap();
        assert_eq!(paired.kiosk.id, registration.kiosk_id);
        assert_eq!(paired.kiosk.pin.as_deref(), Some(paired.display_pin.as_str()));
        assert_eq!(paired.kiosk.room.as_deref(), Some("204"));

        // Registration PIN is single use
        let again = manager
            .resolve_registration_pin(&admin, registration.registration_pin.as_str())
            .await;
        assert!(matches!(again, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_second_pair_with_same_pin_not_found() {
        let manager = manager().await;
        let admin = admin();
        let registration = manager.init_kiosk().await.unwrap();

        let request = PairRequest {
            registration_pin: registration.registration_pin.to_string(),
            location: Location::default(),
        };
        manager.pair_kiosk(&admin, request.clone()).await.unwrap();
        let second = manager.pair_kiosk(&admin, request).await;
        assert!(matches!(second, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_pairing_requires_admin() {
        let manager = manager().await;
        let registration = manager.init_kiosk().await.unwrap();

        let result = manager
            .resolve_registration_pin(&teacher("t1"), registration.registration_pin.as_str())
            .await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_malformed_pin_is_validation_error() {
        let manager = manager().await;
        let result = manager.resolve_registration_pin(&admin(), "12-34").await;
        assert!(matches!(result, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn test_kiosk_view_requires_secret() {
        let manager = manager().await;
        let registration = manager.init_kiosk().await.unwrap();

        let view = manager
            .kiosk_view(&registration.kiosk_id, &registration.kiosk_secret)
            .await
            .unwrap();
        assert_eq!(
            view.kiosk.pin.as_deref(),
            Some(registration.registration_pin.as_str())
        );
        assert!(view.session.is_none());

        let wrong = manager.kiosk_view(&registration.kiosk_id, "nope").await;
        assert!(matches!(wrong, Err(Error::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_unpair_issues_new_registration_pin() {
        let manager = manager().await;
        let admin = admin();
        let registration = manager.init_kiosk().await.unwrap();
        manager
            .pair_kiosk(
                &admin,
                PairRequest {
                    registration_pin: registration.registration_pin.to_string(),
                    location: Location::default(),
                },
            )
            .await
            .unwrap();

        let info = manager
            .unpair_kiosk(&admin, &registration.kiosk_id)
            .await
            .unwrap();
        assert_eq!(info.state, kiosk::KioskState::Unpaired);
        let new_pin = info.pin.unwrap();
        assert_eq!(
            manager
                .resolve_registration_pin(&admin, &new_pin)
                .await
                .unwrap()
                .id,
            registration.kiosk_id
        );

        let again = manager.unpair_kiosk(&admin, &registration.kiosk_id).await;
        assert!(matches!(again, Err(Error::Conflict(_))));
        assert_eq!(manager.list_kiosks(&admin).await.unwrap().len(), 1);
    }
}
