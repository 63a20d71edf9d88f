//! Verified user identity supplied by the session provider
//!
//! The core never checks credentials. Whatever the provider hands over is
//! trusted as-is and only consulted for display and for role checks.

use serde::{Deserialize, Serialize};

/// Opaque user identifier issued by the identity provider
pub type UserId = String;

/// Account role as reported by the identity provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    User,
    Moderator,
    Admin,
}

/// An authenticated user with display profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_url: None,
            role: Role::User,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// Moderators and admins may end, cancel or pin in any room
    pub fn can_moderate(&self) -> bool {
        matches!(self.role, Role::Moderator | Role::Admin)
    }
}

/// Resolves a client session token into a verified identity
pub trait IdentityProvider: Send + Sync {
    /// Returns `None` when the token is not accepted
    fn authenticate(&self, token: &str) -> Option<Identity>;
}
