//! Persistence seams.
//!
//! Relational storage is an external collaborator: the runtime only needs the
//! narrow interfaces below. `MemoryStore` backs standalone deployments and
//! tests; a database-backed implementation plugs in behind the same traits.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Current, Movie, MovieId, Room, RoomId, RoomMember, User, UserId, UserRole};
use crate::{Error, Result};

/// Well-known ID of the shared guest user.
pub const GUEST_USER_ID: &str = "00000000000000000000000000000000";

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user(&self, id: &UserId) -> Result<User>;
}

#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn room(&self, id: &RoomId) -> Result<Room>;
    async fn current(&self, room: &RoomId) -> Result<Option<Current>>;
    async fn save_current(&self, room: &RoomId, current: &Current) -> Result<()>;

    async fn member(&self, room: &RoomId, user: &UserId) -> Result<Option<RoomMember>>;
    async fn save_member(&self, member: &RoomMember) -> Result<()>;

    async fn movies(&self, room: &RoomId) -> Result<Vec<Movie>>;
    async fn movie(&self, room: &RoomId, id: &MovieId) -> Result<Movie>;
    async fn save_movie(&self, movie: &Movie) -> Result<()>;
    async fn delete_movies(&self, room: &RoomId, ids: &[MovieId]) -> Result<()>;
    async fn clear_movies(&self, room: &RoomId) -> Result<()>;
    async fn swap_movie_positions(&self, room: &RoomId, a: &MovieId, b: &MovieId) -> Result<()>;
}

/// Stored third-party credentials, loaded into vendor caches on demand.
#[derive(Debug, Clone, Default)]
pub struct BilibiliCredential {
    pub backend: String,
    pub cookies: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct AlistCredential {
    pub backend: String,
    pub host: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default)]
pub struct EmbyCredential {
    pub backend: String,
    pub host: String,
    pub api_key: String,
}

#[async_trait]
pub trait VendorCredentialStore: Send + Sync {
    async fn bilibili(&self, user: &UserId) -> Result<Option<BilibiliCredential>>;
    async fn alist(&self, user: &UserId, server_id: &str) -> Result<Option<AlistCredential>>;
    async fn emby(&self, user: &UserId, server_id: &str) -> Result<Option<EmbyCredential>>;
}

/// In-memory store for standalone deployments and tests.
#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<UserId, User>,
    rooms: DashMap<RoomId, Room>,
    currents: DashMap<RoomId, Current>,
    members: DashMap<(RoomId, UserId), RoomMember>,
    movies: DashMap<RoomId, Arc<RwLock<Vec<Movie>>>>,
    bilibili_credentials: DashMap<UserId, BilibiliCredential>,
    alist_credentials: DashMap<(UserId, String), AlistCredential>,
    emby_credentials: DashMap<(UserId, String), EmbyCredential>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        let store = Self::default();
        store.insert_user(User::new(
            UserId::from(GUEST_USER_ID),
            "guest".to_string(),
            UserRole::Guest,
            String::new(),
        ));
        store
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn insert_room(&self, room: Room) {
        self.rooms.insert(room.id.clone(), room);
    }

    pub fn insert_member(&self, member: RoomMember) {
        self.members
            .insert((member.room_id.clone(), member.user_id.clone()), member);
    }

    pub fn insert_bilibili_credential(&self, user: UserId, credential: BilibiliCredential) {
        self.bilibili_credentials.insert(user, credential);
    }

    pub fn insert_alist_credential(
        &self,
        user: UserId,
        server_id: String,
        credential: AlistCredential,
    ) {
        self.alist_credentials.insert((user, server_id), credential);
    }

    pub fn insert_emby_credential(
        &self,
        user: UserId,
        server_id: String,
        credential: EmbyCredential,
    ) {
        self.emby_credentials.insert((user, server_id), credential);
    }

    fn room_movies(&self, room: &RoomId) -> Arc<RwLock<Vec<Movie>>> {
        self.movies
            .entry(room.clone())
            .or_insert_with(|| Arc::new(RwLock::new(Vec::new())))
            .clone()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn user(&self, id: &UserId) -> Result<User> {
        self.users
            .get(id)
            .map(|u| u.clone())
            .ok_or_else(|| Error::NotFound(format!("user {id}")))
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn room(&self, id: &RoomId) -> Result<Room> {
        self.rooms
            .get(id)
            .map(|r| r.clone())
            .ok_or_else(|| Error::NotFound(format!("room {id}")))
    }

    async fn current(&self, room: &RoomId) -> Result<Option<Current>> {
        Ok(self.currents.get(room).map(|c| c.clone()))
    }

    async fn save_current(&self, room: &RoomId, current: &Current) -> Result<()> {
        self.currents.insert(room.clone(), current.clone());
        Ok(())
    }

    async fn member(&self, room: &RoomId, user: &UserId) -> Result<Option<RoomMember>> {
        Ok(self
            .members
            .get(&(room.clone(), user.clone()))
            .map(|m| m.clone()))
    }

    async fn save_member(&self, member: &RoomMember) -> Result<()> {
        self.members.insert(
            (member.room_id.clone(), member.user_id.clone()),
            member.clone(),
        );
        Ok(())
    }

    async fn movies(&self, room: &RoomId) -> Result<Vec<Movie>> {
        Ok(self.room_movies(room).read().clone())
    }

    async fn movie(&self, room: &RoomId, id: &MovieId) -> Result<Movie> {
        self.room_movies(room)
            .read()
            .iter()
            .find(|m| &m.id == id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("movie {id}")))
    }

    async fn save_movie(&self, movie: &Movie) -> Result<()> {
        let list = self.room_movies(&movie.room_id);
        let mut list = list.write();
        match list.iter_mut().find(|m| m.id == movie.id) {
            Some(existing) => *existing = movie.clone(),
            None => {
                let mut movie = movie.clone();
                movie.position = list.last().map_or(0, |m| m.position + 1);
                list.push(movie);
            }
        }
        Ok(())
    }

    async fn delete_movies(&self, room: &RoomId, ids: &[MovieId]) -> Result<()> {
        let list = self.room_movies(room);
        let mut list = list.write();
        let before = list.len();
        list.retain(|m| !ids.contains(&m.id));
        if list.len() == before {
            return Err(Error::NotFound("movie".to_string()));
        }
        Ok(())
    }

    async fn clear_movies(&self, room: &RoomId) -> Result<()> {
        self.room_movies(room).write().clear();
        Ok(())
    }

    async fn swap_movie_positions(&self, room: &RoomId, a: &MovieId, b: &MovieId) -> Result<()> {
        let list = self.room_movies(room);
        let mut list = list.write();
        let ia = list
            .iter()
            .position(|m| &m.id == a)
            .ok_or_else(|| Error::NotFound(format!("movie {a}")))?;
        let ib = list
            .iter()
            .position(|m| &m.id == b)
            .ok_or_else(|| Error::NotFound(format!("movie {b}")))?;
        let pa = list[ia].position;
        list[ia].position = list[ib].position;
        list[ib].position = pa;
        list.swap(ia, ib);
        Ok(())
    }
}

#[async_trait]
impl VendorCredentialStore for MemoryStore {
    async fn bilibili(&self, user: &UserId) -> Result<Option<BilibiliCredential>> {
        Ok(self.bilibili_credentials.get(user).map(|c| c.clone()))
    }

    async fn alist(&self, user: &UserId, server_id: &str) -> Result<Option<AlistCredential>> {
        Ok(self
            .alist_credentials
            .get(&(user.clone(), server_id.to_string()))
            .map(|c| c.clone()))
    }

    async fn emby(&self, user: &UserId, server_id: &str) -> Result<Option<EmbyCredential>> {
        Ok(self
            .emby_credentials
            .get(&(user.clone(), server_id.to_string()))
            .map(|c| c.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MovieBase;

    fn test_movie(room: &RoomId, name: &str) -> Movie {
        Movie::new(
            room.clone(),
            UserId::new(),
            MovieBase {
                url: format!("https://example.com/{name}.mp4"),
                name: name.to_string(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_movie_positions_assigned_in_order() {
        let store = MemoryStore::new();
        let room = RoomId::new();

        let a = test_movie(&room, "a");
        let b = test_movie(&room, "b");
        store.save_movie(&a).await.unwrap();
        store.save_movie(&b).await.unwrap();

        let movies = store.movies(&room).await.unwrap();
        assert_eq!(movies[0].position, 0);
        assert_eq!(movies[1].position, 1);
    }

    #[tokio::test]
    async fn test_swap_positions() {
        let store = MemoryStore::new();
        let room = RoomId::new();
        let a = test_movie(&room, "a");
        let b = test_movie(&room, "b");
        store.save_movie(&a).await.unwrap();
        store.save_movie(&b).await.unwrap();

        store
            .swap_movie_positions(&room, &a.id, &b.id)
            .await
            .unwrap();
        let movies = store.movies(&room).await.unwrap();
        assert_eq!(movies[0].id, b.id);
        assert_eq!(movies[0].position, 0);
        assert_eq!(movies[1].id, a.id);
    }

    #[tokio::test]
    async fn test_delete_missing_movie_errors() {
        let store = MemoryStore::new();
        let room = RoomId::new();
        let err = store
            .delete_movies(&room, &[MovieId::new()])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_guest_user_present() {
        let store = MemoryStore::new();
        let guest = store.user(&UserId::from(GUEST_USER_ID)).await.unwrap();
        assert!(guest.is_guest());
    }

    #[tokio::test]
    async fn test_current_round_trip() {
        let store = MemoryStore::new();
        let room = RoomId::new();
        assert!(store.current(&room).await.unwrap().is_none());

        let current = Current::default();
        store.save_current(&room, &current).await.unwrap();
        assert!(store.current(&room).await.unwrap().is_some());
    }
}
