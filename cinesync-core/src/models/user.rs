use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::id::UserId;
use crate::{Error, Result};

/// Global user role.
///
/// Banned and Pending are account states that refuse every authenticated
/// operation; Guest is a shared anonymous identity rooms may allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Banned,
    Pending,
    User,
    Admin,
    Root,
    Guest,
}

impl UserRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Banned => "banned",
            Self::Pending => "pending",
            Self::User => "user",
            Self::Admin => "admin",
            Self::Root => "root",
            Self::Guest => "guest",
        }
    }

    #[must_use]
    pub const fn is_admin_or_above(&self) -> bool {
        matches!(self, Self::Admin | Self::Root)
    }
}

impl FromStr for UserRole {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "banned" => Ok(Self::Banned),
            "pending" => Ok(Self::Pending),
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "root" => Ok(Self::Root),
            "guest" => Ok(Self::Guest),
            other => Err(Error::InvalidInput(format!("unknown user role: {other}"))),
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user loaded into the runtime.
///
/// `version` is derived from the stored password hash; rotating the password
/// changes the version and invalidates every outstanding bearer token minted
/// against the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub role: UserRole,
    #[serde(skip_serializing)]
    pub hashed_password: String,
    pub version: u32,
}

impl User {
    #[must_use]
    pub fn new(id: UserId, username: String, role: UserRole, hashed_password: String) -> Self {
        let version = Self::version_of(&hashed_password);
        Self {
            id,
            username,
            role,
            hashed_password,
            version,
        }
    }

    /// Checksum of the password hash; the token-invalidating user version.
    #[must_use]
    pub fn version_of(hashed_password: &str) -> u32 {
        crc32fast::hash(hashed_password.as_bytes())
    }

    #[must_use]
    pub const fn is_guest(&self) -> bool {
        matches!(self.role, UserRole::Guest)
    }

    #[must_use]
    pub const fn is_root(&self) -> bool {
        matches!(self.role, UserRole::Root)
    }

    #[must_use]
    pub const fn is_admin_or_above(&self) -> bool {
        self.role.is_admin_or_above()
    }

    /// Reject banned / pending accounts.
    pub fn check_active(&self) -> Result<()> {
        match self.role {
            UserRole::Banned => Err(Error::UserBanned),
            UserRole::Pending => Err(Error::UserPending),
            _ => Ok(()),
        }
    }
}
