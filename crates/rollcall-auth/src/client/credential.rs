//! The caller's credential as held on the client

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine as _};
use rollcall_core::protocol::TokenPair;
use rollcall_core::Role;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::ClientError;

/// Access/refresh pair held by a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

/// Access token claims as read on the client, for routing the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialClaims {
    pub sub: String,
    pub role: Role,
    pub name: String,
    #[serde(default)]
    pub entity_id: Option<String>,
    pub exp: i64,
}

impl Credential {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    /// Key for single-flight refresh: refreshes of the same refresh token
    /// collapse into one exchange
    pub fn identity(&self) -> String {
        hex::encode(Sha256::digest(self.refresh_token.as_bytes()))
    }

    /// Decode the access token payload without verifying it.
    ///
    /// The server verifies the signature on every request; this is only for
    /// deciding what to show locally.
    pub fn claims(&self) -> Result<CredentialClaims, ClientError> {
        let payload = self
            .access_token
            .split('.')
            .nth(1)
            .ok_or_else(|| ClientError::InvalidCredential("not a JWT".to_string()))?;
        let bytes = BASE64URL
            .decode(payload.trim_end_matches('='))
            .map_err(|e| ClientError::InvalidCredential(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| ClientError::InvalidCredential(e.to_string()))
    }
}

impl From<TokenPair> for Credential {
    fn from(pair: TokenPair) -> Self {
        Self {
            access_token: pair.access_token,
            refresh_token: pair.refresh_token,
        }
    }
}

#[cfg(test)]
pub(crate) fn fake_jwt(role: &str, sub: &str, entity_id: Option<&str>) -> String {
    let header = BASE64URL.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = serde_json::json!({
        "jti": "j",
        "sub": sub,
        "role": role,
        "name": "Ann Lee",
        "entity_id": entity_id,
        "iat": 0,
        "exp": 4_102_444_800i64,
    });
    let payload = BASE64URL.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}
