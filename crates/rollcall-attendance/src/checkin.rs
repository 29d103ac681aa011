//! Check-in handling
//!
//! A scan is validated against the active session's current and previous
//! token windows and recorded at most once per student per session. The
//! insert is a single conditional statement, so concurrent duplicate
//! submissions settle on one row and the first timestamp.

use chrono::{DateTime, Utc};
use rollcall_core::db::to_datetime;
use rollcall_core::protocol::{CheckInRequest, CheckInResponse};
use rollcall_core::{unix_timestamp, Capability, Error, Principal, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::manager::AttendanceManager;
use crate::storage;
use crate::token;

/// A check-in row
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CheckIn {
    pub id: String,
    pub session_id: String,
    pub student_external_id: String,
    pub student_name: String,
    pub student_email: String,
    pub marked_at: i64,
}

/// Attendee entry for the teacher's list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInInfo {
    pub student_external_id: String,
    pub student_name: String,
    pub student_email: String,
    pub marked_at: DateTime<Utc>,
}

impl From<&CheckIn> for CheckInInfo {
    fn from(check_in: &CheckIn) -> Self {
        Self {
            student_external_id: check_in.student_external_id.clone(),
            student_name: check_in.student_name.clone(),
            student_email: check_in.student_email.clone(),
            marked_at: to_datetime(check_in.marked_at),
        }
    }
}

impl AttendanceManager {
    pub async fn check_in(&self, principal: &Principal, request: CheckInRequest) -> Result<CheckInResponse> {
        self.check_in_at(principal, request, unix_timestamp()).await
    }

    /// Record a scan made at `now`
    pub async fn check_in_at(
        &self,
        principal: &Principal,
        request: CheckInRequest,
        now: i64,
    ) -> Result<CheckInResponse> {
        if request.session_id.trim().is_empty() || !token::is_well_formed(&request.token) {
            return Err(Error::validation("Malformed check-in code"));
        }
        if request.student_external_id.trim().is_empty() {
            return Err(Error::validation("Student id is required"));
        }

        principal.require(Capability::CheckIn)?;
        if principal.external_id() != request.student_external_id {
            return Err(Error::Forbidden(
                "students can only check in as themselves".to_string(),
            ));
        }

        let mut conn = self.db.pool().acquire().await?;
        let session = self.load_session(&mut conn, &request.session_id).await?;
        let session = self.expire_if_stale(&mut conn, session, now).await?;
        if !session.is_active() {
            return Err(Error::SessionNotActive);
        }

        let token = request.token.to_ascii_lowercase();
        if !token::verify(
            session.secret_bytes(),
            &session.id,
            &token,
            now,
            session.rotate_seconds(),
        )? {
            debug!(session_id = %session.id, student = %request.student_external_id, "Rejected check-in code");
            return Err(Error::ExpiredToken);
        }

        let check_in = CheckIn {
            id: Uuid::new_v4().to_string(),
            session_id: session.id.clone(),
            student_external_id: request.student_external_id,
            student_name: request.student_name,
            student_email: request.student_email,
            marked_at: now,
        };

        if storage::insert_check_in(&mut conn, &check_in).await? == 1 {
            info!(
                session_id = %check_in.session_id,
                student = %check_in.student_external_id,
                "Attendance marked"
            );
            return Ok(CheckInResponse::marked());
        }

        // Nothing inserted: either already recorded, or the session closed
        // between the read above and the insert
        match storage::get_check_in(&mut conn, &check_in.session_id, &check_in.student_external_id)
            .await?
        {
            Some(_) => Ok(CheckInResponse::already_marked()),
            None => Err(Error::SessionNotActive),
        }
    }
}
