//! Session lifecycle: `None -> Active -> Closed`
//!
//! A teacher opens a session on a paired kiosk by typing the kiosk's display
//! PIN. At most one session per kiosk is active; a second start is rejected
//! with a conflict rather than superseding the running one. `Closed` is
//! terminal, and a closed session keeps its check-ins for history.
//!
//! Sessions left open longer than the configured maximum are considered
//! stale and closed the next time anything reads them.

use chrono::{DateTime, Local, NaiveTime, TimeZone, Utc};
use rand::Rng;
use rollcall_core::db::to_datetime;
use rollcall_core::{unix_timestamp, Capability, Error, Principal, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;
use tracing::{debug, info};
use uuid::Uuid;

use crate::checkin::CheckInInfo;
use crate::lesson::{self, Lesson};
use crate::manager::AttendanceManager;
use crate::pin::{self, Pin};
use crate::storage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Closed,
}

/// A session row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Session {
    pub id: String,
    pub kiosk_id: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub discipline: String,
    /// 64 hex chars; the HMAC key for this session's tokens
    pub secret: String,
    pub rotate_seconds: i64,
    pub state: SessionState,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    /// JSON of the lesson the session was started for
    pub schedule_snapshot: Option<String>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Active for longer than `max_secs`
    pub fn is_stale(&self, now: i64, max_secs: i64) -> bool {
        self.is_active() && now - self.started_at > max_secs
    }

    pub fn secret_bytes(&self) -> &[u8] {
        self.secret.as_bytes()
    }

    pub fn rotate_seconds(&self) -> u32 {
        u32::try_from(self.rotate_seconds).unwrap_or(1).max(1)
    }
}

/// Session details for teachers and admins. Never includes the secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub kiosk_id: String,
    pub teacher_id: String,
    pub teacher_name: String,
    pub discipline: String,
    pub state: SessionState,
    pub rotate_seconds: i64,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub schedule_snapshot: Option<serde_json::Value>,
    pub attendance_count: i64,
}

impl SessionInfo {
    fn new(session: &Session, attendance_count: i64) -> Self {
        Self {
            id: session.id.clone(),
            kiosk_id: session.kiosk_id.clone(),
            teacher_id: session.teacher_id.clone(),
            teacher_name: session.teacher_name.clone(),
            discipline: session.discipline.clone(),
            state: session.state,
            rotate_seconds: session.rotate_seconds,
            started_at: to_datetime(session.started_at),
            ended_at: session.ended_at.map(to_datetime),
            schedule_snapshot: session
                .schedule_snapshot
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok()),
            attendance_count,
        }
    }
}

/// The running session as the kiosk sees it, secret included
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSessionView {
    pub session_id: String,
    pub discipline: String,
    pub teacher_name: String,
    pub rotate_seconds: i64,
    pub started_at: DateTime<Utc>,
    pub attendance_count: i64,
    pub secret: String,
}

impl ActiveSessionView {
    pub(crate) fn new(session: &Session, attendance_count: i64) -> Self {
        Self {
            session_id: session.id.clone(),
            discipline: session.discipline.clone(),
            teacher_name: session.teacher_name.clone(),
            rotate_seconds: session.rotate_seconds,
            started_at: to_datetime(session.started_at),
            attendance_count,
            secret: session.secret.clone(),
        }
    }
}

/// Teacher's request to open a session on a kiosk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    pub display_pin: String,
    /// Lessons from the schedule lookup, in its order
    #[serde(default)]
    pub candidates: Vec<Lesson>,
    /// Explicit choice; otherwise the lesson running now is suggested
    #[serde(default)]
    pub selected: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedSession {
    pub session: SessionInfo,
    /// The kiosk's new display PIN; the one just typed is no longer valid
    pub display_pin: Pin,
}

/// Generate a per-session secret: 32 random bytes, hex encoded
pub fn generate_session_secret() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    hex::encode(bytes)
}

fn local_time(now: i64) -> NaiveTime {
    Local
        .timestamp_opt(now, 0)
        .single()
        .map(|dt| dt.time())
        .unwrap_or_default()
}

fn ensure_can_view(principal: &Principal, session: &Session) -> Result<()> {
    if principal.is_admin() || session.teacher_id == principal.subject {
        Ok(())
    } else {
        Err(Error::Forbidden("session belongs to another teacher".to_string()))
    }
}

impl AttendanceManager {
    /// Close `session` if it has outlived the maximum session length
    pub(crate) async fn expire_if_stale(
        &self,
        conn: &mut SqliteConnection,
        mut session: Session,
        now: i64,
    ) -> Result<Session> {
        if session.is_stale(now, self.session_max_secs) {
            if storage::close_session(conn, &session.id, now).await? {
                info!(session_id = %session.id, kiosk_id = %session.kiosk_id, "Closed stale session");
            }
            session.state = SessionState::Closed;
            session.ended_at = Some(now);
        }
        Ok(session)
    }

    /// Look up the paired kiosk showing a display PIN
    pub async fn resolve_display_pin(
        &self,
        principal: &Principal,
        pin: &str,
    ) -> Result<crate::kiosk::KioskInfo> {
        principal.require(Capability::StartSession)?;
        let pin = Pin::parse(pin)?;

        let mut conn = self.db.pool().acquire().await?;
        let kiosk_id = pin::resolve_display_pin(&mut conn, &pin).await?;
        self.kiosk_info(&mut conn, &kiosk_id).await
    }

    pub async fn start_session(
        &self,
        principal: &Principal,
        request: StartSessionRequest,
    ) -> Result<StartedSession> {
        self.start_session_at(principal, request, unix_timestamp()).await
    }

    /// Open a session on the kiosk showing `request.display_pin`.
    ///
    /// Resolving the PIN, inserting the session and reissuing the display
    /// PIN happen in one transaction: on conflict nothing changes.
    pub async fn start_session_at(
        &self,
        principal: &Principal,
        request: StartSessionRequest,
        now: i64,
    ) -> Result<StartedSession> {
        principal.require(Capability::StartSession)?;
        let display_pin = Pin::parse(&request.display_pin)?;
        let lesson = lesson::select(&request.candidates, request.selected, local_time(now))?;

        let mut tx = self.db.begin_write().await?;
        let kiosk_id = pin::resolve_display_pin(&mut tx, &display_pin).await?;

        if let Some(existing) = storage::active_session_for_kiosk(&mut tx, &kiosk_id).await? {
            self.expire_if_stale(&mut tx, existing, now).await?;
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            kiosk_id: kiosk_id.clone(),
            teacher_id: principal.subject.clone(),
            teacher_name: principal.name.clone(),
            discipline: lesson.subject.clone(),
            secret: generate_session_secret(),
            rotate_seconds: i64::from(self.rotate_seconds),
            state: SessionState::Active,
            started_at: now,
            ended_at: None,
            schedule_snapshot: serde_json::to_string(lesson).ok(),
        };

        storage::insert_session(&mut tx, &session)
            .await
            .map_err(|e| match e {
                Error::Conflict(_) => {
                    debug!(kiosk_id = %kiosk_id, "Start rejected, kiosk busy");
                    Error::conflict("Kiosk already has an active session")
                }
                other => other,
            })?;
        let new_pin = pin::issue_display_pin(&mut tx, &kiosk_id).await?;
        tx.commit().await?;

        info!(
            session_id = %session.id,
            kiosk_id = %kiosk_id,
            teacher = %principal.subject,
            discipline = %session.discipline,
            "Session started"
        );

        Ok(StartedSession {
            session: SessionInfo::new(&session, 0),
            display_pin: new_pin,
        })
    }

    /// Close a session. Closing an already closed session succeeds.
    pub async fn close_session(&self, principal: &Principal, session_id: &str) -> Result<SessionInfo> {
        self.close_session_at(principal, session_id, unix_timestamp()).await
    }

    pub async fn close_session_at(
        &self,
        principal: &Principal,
        session_id: &str,
        now: i64,
    ) -> Result<SessionInfo> {
        principal.require(Capability::CloseSession)?;

        let mut conn = self.db.pool().acquire().await?;
        let session = self.load_session(&mut conn, session_id).await?;
        ensure_can_view(principal, &session)?;

        if storage::close_session(&mut conn, session_id, now).await? {
            info!(session_id, by = %principal.subject, "Session closed");
        }

        let session = self.load_session(&mut conn, session_id).await?;
        let count = storage::count_check_ins(&mut conn, session_id).await?;
        Ok(SessionInfo::new(&session, count))
    }

    pub async fn get_session(&self, principal: &Principal, session_id: &str) -> Result<SessionInfo> {
        self.get_session_at(principal, session_id, unix_timestamp()).await
    }

    pub async fn get_session_at(
        &self,
        principal: &Principal,
        session_id: &str,
        now: i64,
    ) -> Result<SessionInfo> {
        principal.require(Capability::ViewAttendees)?;

        let mut conn = self.db.pool().acquire().await?;
        let session = self.load_session(&mut conn, session_id).await?;
        ensure_can_view(principal, &session)?;
        let session = self.expire_if_stale(&mut conn, session, now).await?;
        let count = storage::count_check_ins(&mut conn, session_id).await?;
        Ok(SessionInfo::new(&session, count))
    }

    /// Sessions visible to the principal: their own for teachers, all for
    /// admins. Optionally narrowed to one kiosk.
    pub async fn list_sessions(
        &self,
        principal: &Principal,
        kiosk_id: Option<&str>,
    ) -> Result<Vec<SessionInfo>> {
        principal.require(Capability::ViewAttendees)?;
        let now = unix_timestamp();
        let owner = (!principal.is_admin()).then_some(principal.subject.as_str());

        let mut conn = self.db.pool().acquire().await?;
        let sessions = storage::list_sessions(&mut conn, owner, kiosk_id).await?;

        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions {
            let session = self.expire_if_stale(&mut conn, session, now).await?;
            let count = storage::count_check_ins(&mut conn, &session.id).await?;
            infos.push(SessionInfo::new(&session, count));
        }
        Ok(infos)
    }

    /// Check-ins for a session in arrival order
    pub async fn attendees(&self, principal: &Principal, session_id: &str) -> Result<Vec<CheckInInfo>> {
        principal.require(Capability::ViewAttendees)?;

        let mut conn = self.db.pool().acquire().await?;
        let session = self.load_session(&mut conn, session_id).await?;
        ensure_can_view(principal, &session)?;

        let check_ins = storage::list_check_ins(&mut conn, session_id).await?;
        Ok(check_ins.iter().map(CheckInInfo::from).collect())
    }

    pub(crate) async fn load_session(
        &self,
        conn: &mut SqliteConnection,
        session_id: &str,
    ) -> Result<Session> {
        storage::get_session(conn, session_id)
            .await?
            .ok_or_else(|| Error::not_found("session"))
    }

    /// The `{session_id, token}` payload a kiosk should render right now
    pub async fn current_payload(
        &self,
        kiosk_id: &str,
        kiosk_secret: &str,
    ) -> Result<rollcall_core::protocol::QrPayload> {
        let now = unix_timestamp();
        let mut conn = self.db.pool().acquire().await?;
        self.authenticate_kiosk(&mut conn, kiosk_id, kiosk_secret).await?;

        let session = storage::active_session_for_kiosk(&mut conn, kiosk_id)
            .await?
            .ok_or(Error::SessionNotActive)?;
        let session = self.expire_if_stale(&mut conn, session, now).await?;
        if !session.is_active() {
            return Err(Error::SessionNotActive);
        }
        crate::token::current_payload(
            session.secret_bytes(),
            &session.id,
            now,
            session.rotate_seconds(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{admin, manager, paired_kiosk, teacher};

    fn algorithms() -> StartSessionRequest {
        StartSessionRequest {
            display_pin: String::new(),
            candidates: vec![Lesson::new("Algorithms", "10:00", "11:30")],
            selected: None,
        }
    }

    fn start(pin: &Pin) -> StartSessionRequest {
        StartSessionRequest {
            display_pin: pin.to_string(),
            ..algorithms()
        }
    }

    #[test]
    fn test_session_secret_shape() {
        let secret = generate_session_secret();
        assert_eq!(secret.len(), 64);
        assert!(secret.bytes().all(|b| b.is_ascii_hexdigit()));
        assert_ne!(secret, generate_session_secret());
    }

    #[test]
    fn test_stale_only_after_limit() {
        let mut session = Session {
            id: "s1".into(),
            kiosk_id: "k1".into(),
            teacher_id: "t1".into(),
            teacher_name: "Tom".into(),
            discipline: "Algorithms".into(),
            secret: generate_session_secret(),
            rotate_seconds: 30,
            state: SessionState::Active,
            started_at: 1_000,
            ended_at: None,
            schedule_snapshot: None,
        };
        let max = 90 * 60;
        assert!(!session.is_stale(1_000 + max - 1, max));
        assert!(!session.is_stale(1_000 + max, max));
        assert!(session.is_stale(1_000 + max + 1, max));

        session.state = SessionState::Closed;
        assert!(!session.is_stale(1_000 + 2 * max, max));
    }

    #[tokio::test]
    async fn test_start_session_reissues_display_pin() {
        let manager = manager().await;
        let teacher = teacher("t1");
        let (kiosk_id, pin) = paired_kiosk(&manager).await;

        let started = manager.start_session(&teacher, start(&pin)).await.unwrap();
        assert_eq!(started.session.kiosk_id, kiosk_id);
        assert_eq!(started.session.discipline, "Algorithms");
        assert_eq!(started.session.state, SessionState::Active);
        assert_eq!(started.session.rotate_seconds, 30);
        assert_eq!(
            started.session.schedule_snapshot.as_ref().unwrap()["subject"],
            "Algorithms"
        );

        let resolved = manager
            .resolve_display_pin(&teacher, started.display_pin.as_str())
            .await
            .unwrap();
        assert_eq!(resolved.id, kiosk_id);

        if started.display_pin != pin {
            let old = manager.resolve_display_pin(&teacher, pin.as_str()).await;
            assert!(matches!(old, Err(Error::NotFound(_))));
        }
    }

    #[tokio::test]
    async fn test_second_start_conflicts_and_changes_nothing() {
        let manager = manager().await;
        let teacher = teacher("t1");
        let (kiosk_id, pin) = paired_kiosk(&manager).await;

        let first = manager.start_session(&teacher, start(&pin)).await.unwrap();
        let second = manager
            .start_session(&teacher, start(&first.display_pin))
            .await;
        assert!(matches!(second, Err(Error::Conflict(_))));

        // Existing session untouched, display PIN unchanged
        let session = manager
            .get_session(&teacher, &first.session.id)
            .await
            .unwrap();
        assert_eq!(session.state, SessionState::Active);
        let resolved = manager
            .resolve_display_pin(&teacher, first.display_pin.as_str())
            .await
            .unwrap();
        assert_eq!(resolved.id, kiosk_id);
    }

    #[tokio::test]
    async fn test_start_requires_lesson() {
        let manager = manager().await;
        let (_, pin) = paired_kiosk(&manager).await;

        let request = StartSessionRequest {
            display_pin: pin.to_string(),
            candidates: vec![],
            selected: None,
        };
        let result = manager.start_session(&teacher("t1"), request).await;
        assert!(matches!(result, Err(Error::NoLessonScheduled)));
    }

    #[tokio::test]
    async fn test_start_requires_teacher() {
        let manager = manager().await;
        let (_, pin) = paired_kiosk(&manager).await;
        let result = manager.start_session(&admin(), start(&pin)).await;
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_owner_only() {
        let manager = manager().await;
        let owner = teacher("t1");
        let (_, pin) = paired_kiosk(&manager).await;
        let started = manager.start_session(&owner, start(&pin)).await.unwrap();
        let id = started.session.id;

        let other = manager.close_session(&teacher("t2"), &id).await;
        assert!(matches!(other, Err(Error::Forbidden(_))));

        let closed = manager.close_session(&owner, &id).await.unwrap();
        assert_eq!(closed.state, SessionState::Closed);
        let ended_at = closed.ended_at;
        assert!(ended_at.is_some());

        let again = manager.close_session(&admin(), &id).await.unwrap();
        assert_eq!(again.state, SessionState::Closed);
        assert_eq!(again.ended_at, ended_at);

        // Kiosk is free again
        let restarted = manager
            .start_session(&owner, start(&started.display_pin))
            .await;
        assert!(restarted.is_ok());
    }

    #[tokio::test]
    async fn test_stale_session_closed_on_read_and_before_start() {
        let manager = manager().await;
        let owner = teacher("t1");
        let (kiosk_id, pin) = paired_kiosk(&manager).await;

        let t0 = unix_timestamp() - 2 * manager.session_max_secs;
        let stale = manager
            .start_session_at(&owner, start(&pin), t0)
            .await
            .unwrap();

        // Starting again on the same kiosk closes the stale one first
        let fresh = manager
            .start_session(&owner, start(&stale.display_pin))
            .await
            .unwrap();
        assert_eq!(fresh.session.kiosk_id, kiosk_id);

        let old = manager.get_session(&owner, &stale.session.id).await.unwrap();
        assert_eq!(old.state, SessionState::Closed);
    }

    #[tokio::test]
    async fn test_list_sessions_scoped_to_owner() {
        let manager = manager().await;
        let (_, pin_a) = paired_kiosk(&manager).await;
        let (kiosk_b, pin_b) = paired_kiosk(&manager).await;

        manager.start_session(&teacher("t1"), start(&pin_a)).await.unwrap();
        manager.start_session(&teacher("t2"), start(&pin_b)).await.unwrap();

        assert_eq!(manager.list_sessions(&teacher("t1"), None).await.unwrap().len(), 1);
        assert_eq!(manager.list_sessions(&admin(), None).await.unwrap().len(), 2);
        let on_b = manager.list_sessions(&admin(), Some(&kiosk_b)).await.unwrap();
        assert_eq!(on_b.len(), 1);
        assert_eq!(on_b[0].teacher_id, "t2");
    }

    #[tokio::test]
    async fn test_kiosk_view_exposes_secret_to_kiosk_only() {
        let manager = manager().await;
        let registration = manager.init_kiosk().await.unwrap();
        let paired = manager
            .pair_kiosk(
                &admin(),
                crate::manager::PairRequest {
                    registration_pin: registration.registration_pin.to_string(),
                    location: Default::default(),
                },
            )
            .await
            .unwrap();

        let started = manager
            .start_session(&teacher("t1"), start(&paired.display_pin))
            .await
            .unwrap();

        let view = manager
            .kiosk_view(&registration.kiosk_id, &registration.kiosk_secret)
            .await
            .unwrap();
        let session = view.session.unwrap();
        assert_eq!(session.session_id, started.session.id);
        assert_eq!(session.secret.len(), 64);
        assert_eq!(view.kiosk.pin.as_deref(), Some(started.display_pin.as_str()));

        let payload = manager
            .current_payload(&registration.kiosk_id, &registration.kiosk_secret)
            .await
            .unwrap();
        assert_eq!(payload.session_id, started.session.id);
        assert!(crate::token::is_well_formed(&payload.token));

        let serialized = serde_json::to_string(&started.session).unwrap();
        assert!(!serialized.contains(&session.secret));
    }
}
