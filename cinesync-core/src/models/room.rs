use argon2::{Argon2, PasswordHash, PasswordVerifier};
use serde::{Deserialize, Serialize};

use super::id::{RoomId, UserId};
use super::permission::Permission;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Banned,
    Pending,
    Active,
}

/// Per-room settings: permission bitmasks plus coarse feature toggles.
///
/// A toggle set to `false` denies the matching operation for everyone except
/// the creator and admins, regardless of member permissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomSettings {
    pub hidden: bool,
    pub disable_guest: bool,
    pub join_need_review: bool,
    pub disable_join_new_user: bool,
    pub user_default_permissions: Permission,
    pub guest_permissions: Permission,
    pub can_add_movie: bool,
    pub can_delete_movie: bool,
    pub can_edit_movie: bool,
    pub can_set_current: bool,
    pub can_send_chat: bool,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            hidden: false,
            disable_guest: false,
            join_need_review: false,
            disable_join_new_user: false,
            user_default_permissions: Permission::member_default(),
            guest_permissions: Permission::guest_default(),
            can_add_movie: true,
            can_delete_movie: true,
            can_edit_movie: true,
            can_set_current: true,
            can_send_chat: true,
        }
    }
}

impl RoomSettings {
    /// Map a permission bit to its room-level toggle, if one exists.
    #[must_use]
    pub const fn toggle_allows(&self, permission: u64) -> bool {
        match permission {
            Permission::ADD_MOVIE => self.can_add_movie,
            Permission::DELETE_MOVIE => self.can_delete_movie,
            Permission::EDIT_MOVIE => self.can_edit_movie,
            Permission::SET_CURRENT_MOVIE | Permission::SET_CURRENT_STATUS => self.can_set_current,
            Permission::SEND_CHAT => self.can_send_chat,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub creator_id: UserId,
    #[serde(skip_serializing)]
    pub hashed_password: Option<String>,
    pub status: RoomStatus,
    pub settings: RoomSettings,
}

impl Room {
    #[must_use]
    pub fn new(id: RoomId, name: String, creator_id: UserId) -> Self {
        Self {
            id,
            name,
            creator_id,
            hashed_password: None,
            status: RoomStatus::Active,
            settings: RoomSettings::default(),
        }
    }

    #[must_use]
    pub const fn needs_password(&self) -> bool {
        self.hashed_password.is_some()
    }

    /// Verify a join password against the stored argon2 hash.
    #[must_use]
    pub fn check_password(&self, password: &str) -> bool {
        match &self.hashed_password {
            None => true,
            Some(hash) => PasswordHash::new(hash)
                .map(|parsed| {
                    Argon2::default()
                        .verify_password(password.as_bytes(), &parsed)
                        .is_ok()
                })
                .unwrap_or(false),
        }
    }

    /// Reject banned / pending rooms.
    pub fn check_active(&self) -> Result<()> {
        match self.status {
            RoomStatus::Banned => Err(Error::RoomBanned),
            RoomStatus::Pending => Err(Error::RoomPending),
            RoomStatus::Active => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Banned,
    Pending,
    Active,
}

/// Membership record, lazily created on first permission check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomMember {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub status: MemberStatus,
    pub permissions: Permission,
}

impl RoomMember {
    pub fn check_active(&self) -> Result<()> {
        match self.status {
            MemberStatus::Banned => Err(Error::MemberBanned),
            MemberStatus::Pending => Err(Error::MemberPending),
            MemberStatus::Active => Ok(()),
        }
    }
}
