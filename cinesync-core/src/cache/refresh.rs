//! Single-flight, time-bounded memoization of expensive vendor calls.
//!
//! The mutex is held across the whole initializer call, so concurrent `get`s
//! for the same cache coalesce into one upstream request and all observe the
//! same value. A failed initializer publishes nothing; the next caller
//! retries.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use crate::Result;

pub type InitFn<T, A> = Arc<dyn Fn(A) -> BoxFuture<'static, Result<T>> + Send + Sync>;

struct Slot<T> {
    value: T,
    stored_at: Instant,
}

/// Value cache with a refresh function and a TTL.
///
/// `ttl == None` means the value never expires until [`RefreshCache::refresh`]
/// or [`RefreshCache::clear`] is called.
pub struct RefreshCache<T, A = ()> {
    init: InitFn<T, A>,
    ttl: Option<Duration>,
    slot: Mutex<Option<Slot<T>>>,
}

impl<T, A> RefreshCache<T, A>
where
    T: Clone + Send,
    A: Send + 'static,
{
    pub fn new<F, Fut>(ttl: Option<Duration>, init: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        Self::from_init(Arc::new(move |args| Box::pin(init(args))), ttl)
    }

    pub fn from_init(init: InitFn<T, A>, ttl: Option<Duration>) -> Self {
        Self {
            init,
            ttl,
            slot: Mutex::new(None),
        }
    }

    fn fresh(&self, slot: &Option<Slot<T>>) -> Option<T> {
        slot.as_ref().and_then(|s| {
            match self.ttl {
                Some(ttl) if s.stored_at.elapsed() >= ttl => None,
                _ => Some(s.value.clone()),
            }
        })
    }

    /// Return the cached value, invoking the initializer at most once across
    /// all concurrent callers when the value is missing or stale.
    pub async fn get(&self, args: A) -> Result<T> {
        let mut slot = self.slot.lock().await;
        if let Some(value) = self.fresh(&slot) {
            return Ok(value);
        }
        let value = (self.init)(args).await?;
        *slot = Some(Slot {
            value: value.clone(),
            stored_at: Instant::now(),
        });
        Ok(value)
    }

    /// Force a refresh regardless of freshness.
    pub async fn refresh(&self, args: A) -> Result<T> {
        let mut slot = self.slot.lock().await;
        let value = (self.init)(args).await?;
        *slot = Some(Slot {
            value: value.clone(),
            stored_at: Instant::now(),
        });
        Ok(value)
    }

    /// Drop the cached value without computing a new one.
    pub async fn clear(&self) {
        *self.slot.lock().await = None;
    }

    /// Peek the cached value without triggering a refresh.
    pub async fn cached(&self) -> Option<T> {
        let slot = self.slot.lock().await;
        self.fresh(&slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_get_caches_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let cache: RefreshCache<u32> = RefreshCache::new(None, move |()| {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(7)
            }
        });

        assert_eq!(cache.get(()).await.unwrap(), 7);
        assert_eq!(cache.get(()).await.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_gets_single_flight() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let cache: Arc<RefreshCache<u32>> = Arc::new(RefreshCache::new(None, move |()| {
            let c = c.clone();
            async move {
                sleep(Duration::from_millis(50)).await;
                c.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            }
        }));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.get(()).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_triggers_refresh() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let cache: RefreshCache<u32> =
            RefreshCache::new(Some(Duration::from_millis(20)), move |()| {
                let c = c.clone();
                async move { Ok(c.fetch_add(1, Ordering::SeqCst)) }
            });

        assert_eq!(cache.get(()).await.unwrap(), 0);
        sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get(()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_init_publishes_nothing() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let cache: RefreshCache<u32> = RefreshCache::new(None, move |()| {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::Upstream("first call fails".into()))
                } else {
                    Ok(5)
                }
            }
        });

        assert!(cache.get(()).await.is_err());
        assert!(cache.cached().await.is_none());
        assert_eq!(cache.get(()).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_refresh_forces_new_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let cache: RefreshCache<u32> = RefreshCache::new(None, move |()| {
            let c = c.clone();
            async move { Ok(c.fetch_add(1, Ordering::SeqCst)) }
        });

        assert_eq!(cache.get(()).await.unwrap(), 0);
        assert_eq!(cache.refresh(()).await.unwrap(), 1);
        assert_eq!(cache.get(()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_args_are_passed_through() {
        let cache: RefreshCache<String, &'static str> =
            RefreshCache::new(None, |who: &'static str| async move { Ok(format!("hi {who}")) });
        assert_eq!(cache.get("alice").await.unwrap(), "hi alice");
        // Cached now; args of later calls are ignored.
        assert_eq!(cache.get("bob").await.unwrap(), "hi alice");
    }
}
