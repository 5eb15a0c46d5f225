//! Runtime registries: loaded rooms and users with sliding TTLs, the
//! asynchronous current-state persistence task, and the eviction paths that
//! keep tokens, caches, and hub connections consistent.

pub mod client;
pub mod current;
pub mod entry;
pub mod hub;
pub mod movies;
pub mod room;

pub use client::Client;
pub use current::CurrentCell;
pub use entry::{Entry, SyncCache};
pub use hub::{BroadcastOpts, Hub};
pub use movies::{MoviePage, Movies, MAX_PAGE_SIZE};
pub use room::Room;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cache::VendorCaches;
use crate::models::{RoomId, User, UserId};
use crate::repository::{RoomStore, UserStore, GUEST_USER_ID};
use crate::service::TokenService;
use crate::{Error, Result};

/// Idle TTL for loaded rooms and users.
pub const ENTRY_TTL: Duration = Duration::from_secs(60 * 60);
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub type UserEntry = Arc<Entry<User>>;
pub type RoomEntry = Arc<Entry<Arc<Room>>>;

pub struct Runtime {
    users: SyncCache<UserId, User>,
    rooms: SyncCache<RoomId, Arc<Room>>,
    user_store: Arc<dyn UserStore>,
    room_store: Arc<dyn RoomStore>,
    vendors: Arc<VendorCaches>,
    persist_tx: current::PersistSender,
}

impl Runtime {
    #[must_use]
    pub fn new(
        user_store: Arc<dyn UserStore>,
        room_store: Arc<dyn RoomStore>,
        vendors: Arc<VendorCaches>,
    ) -> Arc<Self> {
        let (persist_tx, mut persist_rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(Self {
            users: SyncCache::new(ENTRY_TTL),
            rooms: SyncCache::new(ENTRY_TTL),
            user_store,
            room_store: room_store.clone(),
            vendors,
            persist_tx,
        });

        // Playback state is live data; persistence is best-effort durability
        // for reconnect and reload. Failures are logged, never surfaced.
        tokio::spawn(async move {
            while let Some((room_id, current)) = persist_rx.recv().await {
                if let Err(err) = room_store.save_current(&room_id, &current).await {
                    warn!(room_id = %room_id, error = %err, "failed to persist current");
                }
            }
        });

        Self::spawn_sweeper(&runtime);
        runtime
    }

    fn spawn_sweeper(runtime: &Arc<Self>) {
        let runtime = runtime.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                for (room_id, entry) in runtime.rooms.sweep() {
                    debug!(room_id = %room_id, "room idle-evicted, closing hub");
                    entry.value().close();
                }
                let evicted_users = runtime.users.sweep();
                for (user_id, _) in &evicted_users {
                    runtime.vendors.invalidate_user(user_id);
                }
            }
        });
    }

    #[must_use]
    pub fn vendors(&self) -> &Arc<VendorCaches> {
        &self.vendors
    }

    // ---- users ----

    pub async fn load_or_init_user(&self, id: &UserId) -> Result<UserEntry> {
        if let Some(entry) = self.users.load(id) {
            return Ok(entry);
        }
        let user = self.user_store.user(id).await?;
        let (entry, _) = self.users.load_or_store(id.clone(), user);
        Ok(entry)
    }

    pub async fn load_or_init_guest(&self) -> Result<UserEntry> {
        self.load_or_init_user(&UserId::from(GUEST_USER_ID)).await
    }

    /// Resolve a bearer token to a live user entry.
    ///
    /// A version mismatch first reloads the user from storage: if the stored
    /// version moved past the cached one, the stale entry is evicted and the
    /// user's open connections are closed; if the token still does not match,
    /// it was minted against an old password and is expired.
    pub async fn authenticate(&self, tokens: &TokenService, token: &str) -> Result<UserEntry> {
        let claims = tokens.verify_bearer(token)?;
        let user_id = UserId::from(claims.u.clone());
        let entry = self.load_or_init_user(&user_id).await?;

        if entry.value().version != claims.uv {
            let fresh = self.user_store.user(&user_id).await?;
            if fresh.version != entry.value().version {
                self.close_user(&user_id);
            }
            if fresh.version != claims.uv {
                return Err(Error::AuthExpired);
            }
            let (entry, _) = self.users.load_or_store(user_id, fresh);
            entry.value().check_active()?;
            return Ok(entry);
        }

        entry.value().check_active()?;
        Ok(entry)
    }

    /// Evict a user: drop the cache entry, drop vendor auth caches, close
    /// their connections everywhere, and close rooms they created.
    pub fn close_user(&self, id: &UserId) {
        self.users.delete(id);
        self.vendors.invalidate_user(id);
        let mut to_close: Vec<(RoomId, RoomEntry)> = Vec::new();
        self.rooms.for_each(|room_id, entry| {
            let room = entry.value();
            if &room.creator_id() == id {
                to_close.push((room_id.clone(), entry.clone()));
            } else {
                let _ = room.hub().kick_user(id);
            }
        });
        for (room_id, entry) in to_close {
            self.compare_and_close_room(&room_id, &entry);
        }
    }

    /// Evict a user only while the given handle is still current.
    pub fn compare_and_close_user(&self, id: &UserId, entry: &UserEntry) -> bool {
        if !self.users.compare_and_delete(id, entry) {
            return false;
        }
        self.close_user(id);
        true
    }

    // ---- rooms ----

    pub async fn load_or_init_room(&self, id: &RoomId) -> Result<RoomEntry> {
        if let Some(entry) = self.rooms.load(id) {
            return Ok(entry);
        }
        let info = self.room_store.room(id).await?;
        let initial_current = match self.room_store.current(id).await {
            Ok(current) => current,
            Err(err) => {
                warn!(room_id = %id, error = %err, "failed to load stored current");
                None
            }
        };
        let room = Room::new(
            info,
            initial_current,
            Some(self.persist_tx.clone()),
            self.room_store.clone(),
        );
        let (entry, loaded) = self.rooms.load_or_store(id.clone(), room.clone());
        if loaded {
            // Lost the race; drop our hub before anyone can join it.
            room.close();
        }
        Ok(entry)
    }

    /// Close and remove a room only while the given handle is still current,
    /// so a concurrent load cannot resurrect the closed value.
    pub fn compare_and_close_room(&self, id: &RoomId, entry: &RoomEntry) -> bool {
        if !self.rooms.compare_and_delete(id, entry) {
            return false;
        }
        entry.value().close();
        true
    }

    #[must_use]
    pub fn loaded_rooms(&self) -> usize {
        self.rooms.len()
    }

    /// Close every loaded room; used during shutdown.
    pub fn close_all_rooms(&self) {
        self.rooms.for_each(|_, entry| entry.value().close());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{self, UserRole};
    use crate::provider::BackendRegistry;
    use crate::repository::MemoryStore;
    use crate::service::DEFAULT_TOKEN_TTL_HOURS;

    struct Fixture {
        runtime: Arc<Runtime>,
        store: Arc<MemoryStore>,
        tokens: TokenService,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let vendors = Arc::new(VendorCaches::new(
            store.clone(),
            Arc::new(BackendRegistry::with_default()),
        ));
        Fixture {
            runtime: Runtime::new(store.clone(), store.clone(), vendors),
            store,
            tokens: TokenService::new("secret", DEFAULT_TOKEN_TTL_HOURS).unwrap(),
        }
    }

    fn seed_user(store: &MemoryStore, name: &str) -> User {
        let user = User::new(UserId::new(), name.into(), UserRole::User, "hash-1".into());
        store.insert_user(user.clone());
        user
    }

    #[tokio::test]
    async fn test_authenticate_round_trip() {
        let f = fixture();
        let user = seed_user(&f.store, "alice");
        let token = f.tokens.sign_user(&user).unwrap();

        let entry = f.runtime.authenticate(&f.tokens, &token).await.unwrap();
        assert_eq!(entry.value().id, user.id);
    }

    #[tokio::test]
    async fn test_token_invalid_after_password_rotation() {
        let f = fixture();
        let user = seed_user(&f.store, "alice");
        let token = f.tokens.sign_user(&user).unwrap();

        // Warm the cache, then rotate the password in storage.
        f.runtime.authenticate(&f.tokens, &token).await.unwrap();
        let rotated = User::new(
            user.id.clone(),
            user.username.clone(),
            UserRole::User,
            "hash-2".into(),
        );
        f.store.insert_user(rotated.clone());

        // Old token is rejected as expired, not merely invalid.
        let err = f
            .runtime
            .authenticate(&f.tokens, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthExpired));

        // A token minted at the new version works.
        let fresh_token = f.tokens.sign_user(&rotated).unwrap();
        assert!(f.runtime.authenticate(&f.tokens, &fresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn test_rotation_closes_open_connections() {
        let f = fixture();
        let creator = seed_user(&f.store, "creator");
        let viewer = seed_user(&f.store, "viewer");
        let viewer_token = f.tokens.sign_user(&viewer).unwrap();

        let info = models::Room::new(RoomId::new(), "r".into(), creator.id.clone());
        f.store.insert_room(info.clone());
        let room_entry = f.runtime.load_or_init_room(&info.id).await.unwrap();
        let room = room_entry.value().clone();
        let (client, _rx) = room.new_client(&viewer).unwrap();

        // Rotate the viewer's password: the change path evicts the cached
        // user, which closes their open connections.
        f.store.insert_user(User::new(
            viewer.id.clone(),
            viewer.username.clone(),
            UserRole::User,
            "hash-2".into(),
        ));
        f.runtime.close_user(&viewer.id);
        assert!(client.is_closed());

        // The old token now fails against the freshly loaded version.
        let err = f
            .runtime
            .authenticate(&f.tokens, &viewer_token)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthExpired));
    }

    #[tokio::test]
    async fn test_room_eviction_closes_hub() {
        let f = fixture();
        let creator = seed_user(&f.store, "creator");
        let info = models::Room::new(RoomId::new(), "r".into(), creator.id.clone());
        f.store.insert_room(info.clone());

        let entry = f.runtime.load_or_init_room(&info.id).await.unwrap();
        let room = entry.value().clone();
        assert!(f.runtime.compare_and_close_room(&info.id, &entry));
        assert!(room.hub().is_closed());

        // A second close via a stale handle is a no-op.
        assert!(!f.runtime.compare_and_close_room(&info.id, &entry));
    }

    #[tokio::test]
    async fn test_close_user_closes_created_rooms() {
        let f = fixture();
        let creator = seed_user(&f.store, "creator");
        let info = models::Room::new(RoomId::new(), "r".into(), creator.id.clone());
        f.store.insert_room(info.clone());
        let entry = f.runtime.load_or_init_room(&info.id).await.unwrap();
        let room = entry.value().clone();

        f.runtime.close_user(&creator.id);
        assert!(room.hub().is_closed());
        assert_eq!(f.runtime.loaded_rooms(), 0);
    }

    #[tokio::test]
    async fn test_compare_and_close_user_respects_handle() {
        let f = fixture();
        let user = seed_user(&f.store, "alice");
        let entry = f.runtime.load_or_init_user(&user.id).await.unwrap();

        assert!(f.runtime.compare_and_close_user(&user.id, &entry));
        // The handle is stale now; a fresh load installs a new entry that a
        // second compare-delete with the old handle must not remove.
        let fresh = f.runtime.load_or_init_user(&user.id).await.unwrap();
        assert!(!f.runtime.compare_and_close_user(&user.id, &entry));
        assert!(f.runtime.compare_and_close_user(&user.id, &fresh));
    }

    #[tokio::test]
    async fn test_guest_loads() {
        let f = fixture();
        let guest = f.runtime.load_or_init_guest().await.unwrap();
        assert!(guest.value().is_guest());
    }
}
