//! Rollcall Attendance - Kiosk pairing, sessions and check-ins
//!
//! # Flow
//!
//! 1. A kiosk boots and calls [`AttendanceManager::init_kiosk`], receiving a
//!    registration PIN and its own bearer secret
//! 2. An admin types the registration PIN: [`AttendanceManager::pair_kiosk`]
//!    pairs the kiosk and issues its first display PIN
//! 3. A teacher types the display PIN: [`AttendanceManager::start_session`]
//!    opens a session and reissues the display PIN
//! 4. The kiosk renders `{session_id, token}` from the session secret
//!    ([`token`]), rotating every window
//! 5. Students scan and submit: [`AttendanceManager::check_in`] records each
//!    student once
//!
//! # Example
//!
//! ```no_run
//! use rollcall_attendance::AttendanceManager;
//! use rollcall_core::{Config, Database};
//!
//! async fn example() -> rollcall_core::Result<()> {
//!     let config = Config::default();
//!     let db = Database::open(&config.database_path).await?;
//!     let manager = AttendanceManager::new(db, &config);
//!
//!     let kiosk = manager.init_kiosk().await?;
//!     println!("Registration PIN: {}", kiosk.registration_pin.grouped());
//!     Ok(())
//! }
//! ```

pub mod checkin;
pub mod kiosk;
pub mod lesson;
pub mod manager;
pub mod pin;
pub mod session;
pub mod storage;
pub mod token;

pub use checkin::{CheckIn, CheckInInfo};
pub use kiosk::{Kiosk, KioskInfo, KioskRegistration, KioskState, Location, PairedKiosk};
pub use lesson::Lesson;
pub use manager::{AttendanceManager, KioskView, PairRequest};
pub use pin::{Pin, PinKind};
pub use session::{
    ActiveSessionView, Session, SessionInfo, SessionState, StartSessionRequest, StartedSession,
};

#[cfg(test)]
pub(crate) mod testing {
    use rollcall_core::{Config, Database, Principal, Role};

    use crate::kiosk::Location;
    use crate::manager::{AttendanceManager, PairRequest};
    use crate::pin::Pin;

    pub async fn manager() -> AttendanceManager {
        let db = Database::open_in_memory().await.unwrap();
        AttendanceManager::new(db, &Config::default())
    }

    pub fn admin() -> Principal {
        Principal::new("admin-1", Role::Admin, "Admin")
    }

    pub fn teacher(id: &str) -> Principal {
        Principal::new(id, Role::Teacher, format!("Teacher {id}"))
    }

    pub fn student(external_id: &str) -> Principal {
        Principal::new(format!("acct-{external_id}"), Role::Student, "Ann Lee")
            .with_entity_id(external_id)
    }

    /// Boot and pair a kiosk, returning its id and display PIN
    pub async fn paired_kiosk(manager: &AttendanceManager) -> (String, Pin) {
        let registration = manager.init_kiosk().await.unwrap();
        let paired = manager
            .pair_kiosk(
                &admin(),
                PairRequest {
                    registration_pin: registration.registration_pin.to_string(),
                    location: Location {
                        building: "Main".into(),
                        room: "101".into(),
                    },
                },
            )
            .await
            .unwrap();
        (registration.kiosk_id, paired.display_pin)
    }
}
