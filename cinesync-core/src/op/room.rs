//! Runtime room: hub, playback state, movie list, membership gate.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::client::Client;
use super::current::{CurrentCell, PersistSender};
use super::hub::{BroadcastOpts, Hub};
use super::movies::Movies;
use crate::message::Envelope;
use crate::models::{
    self, Current, CurrentMovie, MemberStatus, MovieId, Permission, RoomId, RoomMember,
    RoomSettings, Status, User, UserId,
};
use crate::repository::RoomStore;
use crate::{Error, Result};

pub struct Room {
    info: RwLock<models::Room>,
    hub: Arc<Hub>,
    current: CurrentCell,
    movies: Movies,
    store: Arc<dyn RoomStore>,
}

impl Room {
    #[must_use]
    pub fn new(
        info: models::Room,
        initial_current: Option<Current>,
        persist: Option<PersistSender>,
        store: Arc<dyn RoomStore>,
    ) -> Arc<Self> {
        let room_id = info.id.clone();
        Arc::new(Self {
            hub: Hub::new(room_id.clone()),
            current: CurrentCell::new(room_id.clone(), initial_current, persist),
            movies: Movies::new(room_id, store.clone()),
            info: RwLock::new(info),
            store,
        })
    }

    #[must_use]
    pub fn id(&self) -> RoomId {
        self.info.read().id.clone()
    }

    #[must_use]
    pub fn creator_id(&self) -> UserId {
        self.info.read().creator_id.clone()
    }

    #[must_use]
    pub fn settings(&self) -> RoomSettings {
        self.info.read().settings.clone()
    }

    pub fn update_settings(&self, settings: RoomSettings) {
        self.info.write().settings = settings;
    }

    pub fn check_active(&self) -> Result<()> {
        self.info.read().check_active()
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<Hub> {
        &self.hub
    }

    #[must_use]
    pub fn movies(&self) -> &Movies {
        &self.movies
    }

    #[must_use]
    pub fn current(&self) -> Current {
        self.current.current()
    }

    #[must_use]
    pub fn status(&self) -> Status {
        self.current.status()
    }

    /// Effective room permission check.
    ///
    /// Root and the room creator always pass; room toggles short-circuit
    /// deny; guests use the guest bitmask; everyone else goes through their
    /// (lazily created) member record.
    pub async fn has_permission(&self, user: &User, permission: u64) -> Result<()> {
        let info = self.info.read().clone();
        if user.is_root() || user.is_admin_or_above() || info.creator_id == user.id {
            return Ok(());
        }
        if !info.settings.toggle_allows(permission) {
            return Err(Error::NoPermission);
        }
        if user.is_guest() {
            if info.settings.disable_guest {
                return Err(Error::GuestForbidden);
            }
            return if info.settings.guest_permissions.has(permission) {
                Ok(())
            } else {
                Err(Error::NoPermission)
            };
        }

        let member = match self.store.member(&info.id, &user.id).await? {
            Some(member) => member,
            None => {
                if info.settings.disable_join_new_user {
                    return Err(Error::NoPermission);
                }
                let member = RoomMember {
                    room_id: info.id.clone(),
                    user_id: user.id.clone(),
                    status: if info.settings.join_need_review {
                        MemberStatus::Pending
                    } else {
                        MemberStatus::Active
                    },
                    permissions: info.settings.user_default_permissions,
                };
                self.store.save_member(&member).await?;
                member
            }
        };
        member.check_active()?;
        if member.permissions.has(permission) {
            Ok(())
        } else {
            Err(Error::NoPermission)
        }
    }

    /// Create and register a connection for `user`.
    pub fn new_client(
        &self,
        user: &User,
    ) -> Result<(Arc<Client>, mpsc::Receiver<Envelope>)> {
        let (client, rx) = Client::new(user.clone(), self.id());
        self.hub.register(&client)?;
        Ok((client, rx))
    }

    pub fn drop_client(&self, client: &Arc<Client>) {
        let _ = client.close();
        let _ = self.hub.unregister(client);
    }

    /// Chat message from a connection, fanned out to the whole room.
    pub async fn send_chat(&self, client: &Client, content: String) -> Result<()> {
        if content.is_empty() || content.len() > 4096 {
            return Err(Error::InvalidInput(
                "chat message must be 1..=4096 bytes".to_string(),
            ));
        }
        self.has_permission(client.user(), Permission::SEND_CHAT)
            .await?;
        self.hub
            .broadcast(
                Envelope::chat(client.user().into(), content),
                BroadcastOpts::default(),
            )
            .await
    }

    /// Status change from a connection; every *other* connection gets the
    /// resulting status.
    pub async fn set_status(
        &self,
        client: &Client,
        playing: bool,
        seek: f64,
        rate: f64,
        time_diff: f64,
    ) -> Result<Status> {
        self.has_permission(client.user(), Permission::SET_CURRENT_STATUS)
            .await?;
        let status = self.current.set_status(playing, seek, rate, time_diff)?;
        self.hub
            .broadcast(
                Envelope::status(client.user().into(), &status),
                BroadcastOpts::ignore_conn(client.conn_id()),
            )
            .await?;
        Ok(status)
    }

    /// Switch the room to another movie; seek resets and everyone is told.
    pub async fn set_current_movie(
        &self,
        user: &User,
        movie_id: &MovieId,
        sub_path: &str,
        play: bool,
    ) -> Result<Current> {
        self.has_permission(user, Permission::SET_CURRENT_MOVIE)
            .await?;
        let movie = self.movies.get(movie_id).await?;
        if movie.is_folder() && !movie.is_dynamic_folder() {
            return Err(Error::InvalidInput("cannot play a folder".to_string()));
        }
        let current = self.current.set_movie(
            Some(CurrentMovie {
                id: movie.id.clone(),
                is_live: movie.base.live,
                sub_path: sub_path.to_string(),
            }),
            play,
        );
        self.hub
            .broadcast(Envelope::current(&current), BroadcastOpts::default())
            .await?;
        Ok(current)
    }

    /// Close the hub, disconnecting every client. Idempotent.
    pub fn close(&self) {
        let _ = self.hub.close();
    }
}
