//! Wire types shared by the server, kiosks and client apps

use serde::{Deserialize, Serialize};

/// Payload encoded into the kiosk's scannable code.
///
/// Kept to two short fields so it fits a low-density QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QrPayload {
    pub session_id: String,
    pub token: String,
}

/// Check-in submission from a student device
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInRequest {
    pub session_id: String,
    /// Token read from the kiosk's code
    pub token: String,
    pub student_external_id: String,
    pub student_name: String,
    #[serde(default)]
    pub student_email: String,
}

/// Outcome of an accepted check-in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckInStatus {
    /// New attendance row recorded
    Marked,
    /// Student was already recorded for this session
    AlreadyMarked,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInResponse {
    pub status: CheckInStatus,
    pub message: String,
}

impl CheckInResponse {
    pub fn marked() -> Self {
        Self {
            status: CheckInStatus::Marked,
            message: "Attendance recorded".to_string(),
        }
    }

    pub fn already_marked() -> Self {
        Self {
            status: CheckInStatus::AlreadyMarked,
            message: "You are already checked in for this session".to_string(),
        }
    }
}

/// Username/password login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Refresh token exchange (also used for logout)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

/// Access/refresh credential pair issued on login and on every refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
}

/// Error body returned by every failing endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&CheckInResponse::already_marked()).unwrap();
        assert!(json.contains("\"already_marked\""));

        let status: CheckInStatus = serde_json::from_str("\"marked\"").unwrap();
        assert_eq!(status, CheckInStatus::Marked);
    }

    #[test]
    fn test_check_in_request_email_optional() {
        let req: CheckInRequest = serde_json::from_str(
            r#"{"session_id":"s","token":"t","student_external_id":"42","student_name":"Ann"}"#,
        )
        .unwrap();
        assert_eq!(req.student_email, "");
    }
}
