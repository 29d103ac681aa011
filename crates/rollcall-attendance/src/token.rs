//! Rotating check-in tokens
//!
//! A kiosk shows `{session_id, token}` where the token is derived from the
//! session secret and the current time window:
//!
//! ```text
//! window = floor(unix_seconds / rotate_seconds)
//! token  = hex(HMAC-SHA256(secret, session_id || "|" || window))[..16]
//! ```
//!
//! The kiosk can compute tokens locally from the secret, so no polling is
//! needed to rotate the code. The verifier accepts the current window and the
//! one before it, which absorbs scans that straddle a rotation boundary.
//!
//! Truncating the MAC to 16 hex characters (64 bits) is a deliberate
//! weakening: the code has to stay small enough for a low-density QR code
//! readable from across a classroom, and a token is only useful for at most
//! two windows.

use hmac::{Hmac, Mac};
use rollcall_core::protocol::QrPayload;
use rollcall_core::{Error, Result};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Length of a token in hex characters
pub const TOKEN_HEX_LEN: usize = 16;

/// Index of the window containing `now_unix`
pub fn window_index(now_unix: i64, rotate_seconds: u32) -> i64 {
    now_unix.div_euclid(i64::from(rotate_seconds.max(1)))
}

fn mac_for(secret: &[u8], session_id: &str, window: i64) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| Error::Internal(format!("hmac init failed: {e}")))?;
    mac.update(session_id.as_bytes());
    mac.update(b"|");
    mac.update(window.to_string().as_bytes());
    Ok(mac)
}

/// Derive the token for a session and window
pub fn derive(secret: &[u8], session_id: &str, window: i64) -> Result<String> {
    let digest = mac_for(secret, session_id, window)?.finalize().into_bytes();
    Ok(hex::encode(&digest[..TOKEN_HEX_LEN / 2]))
}

/// Whether a string has the shape of a token (16 hex characters)
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_HEX_LEN && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Check a scanned token against the current and previous window.
///
/// Malformed tokens simply fail; callers that need to distinguish a bad
/// shape should check [`is_well_formed`] first.
pub fn verify(
    secret: &[u8],
    session_id: &str,
    token: &str,
    now_unix: i64,
    rotate_seconds: u32,
) -> Result<bool> {
    if !is_well_formed(token) {
        return Ok(false);
    }
    let presented = hex::decode(token).map_err(|e| Error::validation(e.to_string()))?;

    let current = window_index(now_unix, rotate_seconds);
    for window in [current, current - 1] {
        // verify_truncated_left compares in constant time
        if mac_for(secret, session_id, window)?
            .verify_truncated_left(&presented)
            .is_ok()
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Build the payload a kiosk should display right now
pub fn current_payload(
    secret: &[u8],
    session_id: &str,
    now_unix: i64,
    rotate_seconds: u32,
) -> Result<QrPayload> {
    let window = window_index(now_unix, rotate_seconds);
    Ok(QrPayload {
        session_id: session_id.to_string(),
        token: derive(secret, session_id, window)?,
    })
}
