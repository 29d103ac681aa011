//! Access token claims

use rollcall_core::{Principal, Role};
use serde::{Deserialize, Serialize};

/// Claims embedded in access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Unique per token
    pub jti: String,
    /// Account id
    pub sub: String,
    pub role: Role,
    /// Display name
    pub name: String,
    /// External identity, e.g. the student id used for check-in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn principal(&self) -> Principal {
        Principal {
            subject: self.sub.clone(),
            role: self.role,
            name: self.name.clone(),
            entity_id: self.entity_id.clone(),
        }
    }
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Principal {
            subject: claims.sub,
            role: claims.role,
            name: claims.name,
            entity_id: claims.entity_id,
        }
    }
}
