//! Per-movie Alist caches.
//!
//! Alist serves signed raw URLs that expire; each user resolves their own
//! URL through their own login token.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{MapCache, RefreshCache};
use crate::models::{AlistSource, Movie, UserId, VendorInfo};
use crate::provider::BackendRegistry;
use crate::{Error, Result};

use super::bilibili::VENDOR_TTL;

/// Login tokens are valid for 48 h upstream; refresh well before that.
pub const ALIST_TOKEN_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// A logged-in Alist session for one (user, server) pair.
#[derive(Debug, Clone)]
pub struct AlistAuth {
    pub host: String,
    pub token: String,
    pub backend: String,
}

pub type AlistUserCache = RefreshCache<Arc<AlistAuth>>;

/// Resolved playback info for one user.
#[derive(Debug, Clone, Default)]
pub struct AlistResolved {
    pub url: String,
    pub name: String,
    pub provider: String,
}

pub struct AlistMovieCache {
    pub resolved: MapCache<UserId, AlistResolved, Arc<AlistUserCache>>,
}

fn alist_source(movie: &Movie) -> Result<AlistSource> {
    match &movie.base.vendor_info {
        Some(VendorInfo::Alist(source)) => Ok(source.clone()),
        _ => Err(Error::InvalidInput(
            "movie has no alist vendor info".to_string(),
        )),
    }
}

impl AlistMovieCache {
    pub fn new(movie: &Movie, backends: Arc<BackendRegistry>) -> Result<Self> {
        let source = alist_source(movie)?;
        let resolved = MapCache::new(Some(VENDOR_TTL), move |_user: &UserId| {
            let source = source.clone();
            let backends = backends.clone();
            Arc::new(move |auth_cache: Arc<AlistUserCache>| {
                let source = source.clone();
                let backends = backends.clone();
                Box::pin(async move {
                    let auth = auth_cache.get(()).await?;
                    let backend = backends.load(&source.backend)?;
                    let entry = backend
                        .call(backend.alist().fs_get(
                            &auth.host,
                            &auth.token,
                            &source.path,
                            &source.password,
                        ))
                        .await?;
                    if entry.is_dir {
                        return Err(Error::InvalidInput(
                            "alist path is a directory".to_string(),
                        ));
                    }
                    Ok(AlistResolved {
                        url: entry.raw_url,
                        name: entry.name,
                        provider: entry.provider,
                    })
                })
            })
        });
        Ok(Self { resolved })
    }
}
