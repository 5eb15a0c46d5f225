//! Vendor-URL caches: single-flight memoization of upstream vendor calls.

pub mod alist;
pub mod bilibili;
pub mod emby;
pub mod map;
pub mod refresh;

pub use map::MapCache;
pub use refresh::{InitFn, RefreshCache};

use dashmap::DashMap;
use std::sync::Arc;

use crate::models::{Movie, MovieId, UserId};
use crate::provider::BackendRegistry;
use crate::repository::VendorCredentialStore;
use crate::{Error, Result};

use alist::{AlistAuth, AlistMovieCache, AlistUserCache, ALIST_TOKEN_TTL};
use bilibili::{BilibiliMovieCache, BilibiliUserCache};
use emby::{EmbyAuth, EmbyMovieCache, EmbyUserCache};

/// Process-wide vendor cache registry: per-user auth caches and per-movie
/// URL/manifest caches for each vendor.
pub struct VendorCaches {
    backends: Arc<BackendRegistry>,
    bilibili_users: MapCache<UserId, Option<crate::repository::BilibiliCredential>>,
    alist_users: MapCache<(UserId, String), Arc<AlistAuth>>,
    emby_users: MapCache<(UserId, String), Arc<EmbyAuth>>,
    bilibili_movies: DashMap<MovieId, Arc<BilibiliMovieCache>>,
    alist_movies: DashMap<MovieId, Arc<AlistMovieCache>>,
    emby_movies: DashMap<MovieId, Arc<EmbyMovieCache>>,
}

impl VendorCaches {
    #[must_use]
    pub fn new(
        credentials: Arc<dyn VendorCredentialStore>,
        backends: Arc<BackendRegistry>,
    ) -> Self {
        let bilibili_users = {
            let credentials = credentials.clone();
            MapCache::new(None, move |user: &UserId| {
                let credentials = credentials.clone();
                let user = user.clone();
                Arc::new(move |()| {
                    let credentials = credentials.clone();
                    let user = user.clone();
                    Box::pin(async move { credentials.bilibili(&user).await })
                })
            })
        };

        let alist_users = {
            let credentials = credentials.clone();
            let backends = backends.clone();
            MapCache::new(
                Some(ALIST_TOKEN_TTL),
                move |key: &(UserId, String)| {
                    let credentials = credentials.clone();
                    let backends = backends.clone();
                    let (user, server_id) = key.clone();
                    Arc::new(move |()| {
                        let credentials = credentials.clone();
                        let backends = backends.clone();
                        let user = user.clone();
                        let server_id = server_id.clone();
                        Box::pin(async move {
                            let credential = credentials
                                .alist(&user, &server_id)
                                .await?
                                .ok_or_else(|| {
                                    Error::NotFound(format!(
                                        "alist credential for server {server_id}"
                                    ))
                                })?;
                            let backend = backends.load(&credential.backend)?;
                            let token = backend
                                .call(backend.alist().login(
                                    &credential.host,
                                    &credential.username,
                                    &credential.password,
                                ))
                                .await?;
                            Ok(Arc::new(AlistAuth {
                                host: credential.host,
                                token,
                                backend: credential.backend,
                            }))
                        })
                    })
                },
            )
        };

        let emby_users = {
            let credentials = credentials.clone();
            MapCache::new(None, move |key: &(UserId, String)| {
                let credentials = credentials.clone();
                let (user, server_id) = key.clone();
                Arc::new(move |()| {
                    let credentials = credentials.clone();
                    let user = user.clone();
                    let server_id = server_id.clone();
                    Box::pin(async move {
                        let credential =
                            credentials.emby(&user, &server_id).await?.ok_or_else(|| {
                                Error::NotFound(format!("emby credential for server {server_id}"))
                            })?;
                        Ok(Arc::new(EmbyAuth {
                            host: credential.host,
                            api_key: credential.api_key,
                            backend: credential.backend,
                        }))
                    })
                })
            })
        };

        Self {
            backends,
            bilibili_users,
            alist_users,
            emby_users,
            bilibili_movies: DashMap::new(),
            alist_movies: DashMap::new(),
            emby_movies: DashMap::new(),
        }
    }

    #[must_use]
    pub fn bilibili_user(&self, user: &UserId) -> Arc<BilibiliUserCache> {
        self.bilibili_users.load_or_store(user.clone())
    }

    #[must_use]
    pub fn alist_user(&self, user: &UserId, server_id: &str) -> Arc<AlistUserCache> {
        self.alist_users
            .load_or_store((user.clone(), server_id.to_string()))
    }

    #[must_use]
    pub fn emby_user(&self, user: &UserId, server_id: &str) -> Arc<EmbyUserCache> {
        self.emby_users
            .load_or_store((user.clone(), server_id.to_string()))
    }

    pub fn bilibili_movie(&self, movie: &Movie) -> Result<Arc<BilibiliMovieCache>> {
        if let Some(cache) = self.bilibili_movies.get(&movie.id) {
            return Ok(cache.clone());
        }
        let cache = Arc::new(BilibiliMovieCache::new(movie, self.backends.clone())?);
        Ok(self
            .bilibili_movies
            .entry(movie.id.clone())
            .or_insert(cache)
            .clone())
    }

    pub fn alist_movie(&self, movie: &Movie) -> Result<Arc<AlistMovieCache>> {
        if let Some(cache) = self.alist_movies.get(&movie.id) {
            return Ok(cache.clone());
        }
        let cache = Arc::new(AlistMovieCache::new(movie, self.backends.clone())?);
        Ok(self
            .alist_movies
            .entry(movie.id.clone())
            .or_insert(cache)
            .clone())
    }

    pub fn emby_movie(&self, movie: &Movie) -> Result<Arc<EmbyMovieCache>> {
        if let Some(cache) = self.emby_movies.get(&movie.id) {
            return Ok(cache.clone());
        }
        let cache = Arc::new(EmbyMovieCache::new(movie, self.backends.clone())?);
        Ok(self
            .emby_movies
            .entry(movie.id.clone())
            .or_insert(cache)
            .clone())
    }

    /// Drop per-movie caches, e.g. after an edit or delete.
    pub fn invalidate_movie(&self, id: &MovieId) {
        self.bilibili_movies.remove(id);
        self.alist_movies.remove(id);
        self.emby_movies.remove(id);
    }

    /// Drop a user's auth caches, e.g. after credential rotation or logout.
    pub fn invalidate_user(&self, user: &UserId) {
        self.bilibili_users.remove(user);
        self.alist_users.retain(|(u, _)| u != user);
        self.emby_users.retain(|(u, _)| u != user);
    }

    #[must_use]
    pub fn backends(&self) -> &Arc<BackendRegistry> {
        &self.backends
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BilibiliSource, MovieBase, RoomId, VendorInfo};
    use crate::repository::MemoryStore;

    fn caches() -> VendorCaches {
        VendorCaches::new(
            Arc::new(MemoryStore::new()),
            Arc::new(BackendRegistry::with_default()),
        )
    }

    fn bilibili_movie() -> Movie {
        Movie::new(
            RoomId::new(),
            UserId::new(),
            MovieBase {
                vendor_info: Some(VendorInfo::Bilibili(BilibiliSource {
                    bvid: "BV1xx411c7mD".into(),
                    cid: 1,
                    shared: true,
                    ..Default::default()
                })),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_movie_cache_identity() {
        let caches = caches();
        let movie = bilibili_movie();

        let a = caches.bilibili_movie(&movie).unwrap();
        let b = caches.bilibili_movie(&movie).unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        caches.invalidate_movie(&movie.id);
        let c = caches.bilibili_movie(&movie).unwrap();
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[tokio::test]
    async fn test_anonymous_bilibili_user() {
        let caches = caches();
        let user = UserId::new();
        let cache = caches.bilibili_user(&user);
        // No stored credential: resolves to None, cached.
        assert!(cache.get(()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_user_drops_auth() {
        let caches = caches();
        let user = UserId::new();
        let before = caches.bilibili_user(&user);
        caches.invalidate_user(&user);
        let after = caches.bilibili_user(&user);
        assert!(!Arc::ptr_eq(&before, &after));
    }
}
