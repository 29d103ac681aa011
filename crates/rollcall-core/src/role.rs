//! Roles, capabilities and authenticated principals

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Role carried in an access token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

/// An action guarded by a role check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Resolve a registration PIN and pair the kiosk
    PairKiosk,
    /// List and unpair kiosks
    ManageKiosks,
    /// Resolve a display PIN and open a session on the kiosk
    StartSession,
    /// Close a session (owner teacher, or any session for admins)
    CloseSession,
    /// Read session details and the attendee list
    ViewAttendees,
    /// Submit a scanned code
    CheckIn,
}

impl Role {
    /// Whether this role may perform the capability at all.
    ///
    /// Ownership checks (a teacher only closes their own sessions) are
    /// applied on top of this by the state machine.
    pub fn allows(self, capability: Capability) -> bool {
        use Capability::*;
        match self {
            Role::Admin => matches!(
                capability,
                PairKiosk | ManageKiosks | CloseSession | ViewAttendees
            ),
            Role::Teacher => matches!(capability, StartSession | CloseSession | ViewAttendees),
            Role::Student => matches!(capability, CheckIn),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            _ => Err(format!("Invalid role: {}. Use: admin, teacher, student", s)),
        }
    }
}

/// A verified caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Account id
    pub subject: String,
    pub role: Role,
    /// Display name
    pub name: String,
    /// External identity (student id for students)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
}

impl Principal {
    pub fn new(subject: impl Into<String>, role: Role, name: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            role,
            name: name.into(),
            entity_id: None,
        }
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Fail with `Forbidden` unless the role grants the capability
    pub fn require(&self, capability: Capability) -> Result<()> {
        if self.role.allows(capability) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "{} may not perform {:?}",
                self.role, capability
            )))
        }
    }

    /// The id students check in under: the entity id, else the account id
    pub fn external_id(&self) -> &str {
        self.entity_id.as_deref().unwrap_or(&self.subject)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
