//! Vendor backend topology.
//!
//! The set of configured backends is published as an immutable snapshot:
//! mutations take the writer lock, clone the map, and swap in a fresh `Arc`.
//! Readers clone the current `Arc` and never contend with writers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use super::breaker::SlidingWindowBreaker;
use super::{AlistBackend, BilibiliBackend, EmbyBackend};
use crate::{Error, Result};

/// One configured vendor backend: the three provider interfaces plus a
/// circuit breaker shared by all calls through it.
pub struct Backend {
    name: String,
    bilibili: Arc<dyn BilibiliBackend>,
    alist: Arc<dyn AlistBackend>,
    emby: Arc<dyn EmbyBackend>,
    breaker: SlidingWindowBreaker,
}

impl Backend {
    #[must_use]
    pub fn new(
        name: String,
        bilibili: Arc<dyn BilibiliBackend>,
        alist: Arc<dyn AlistBackend>,
        emby: Arc<dyn EmbyBackend>,
    ) -> Self {
        Self {
            name,
            bilibili,
            alist,
            emby,
            breaker: SlidingWindowBreaker::default(),
        }
    }

    /// Backend with the bundled HTTP provider implementations.
    #[must_use]
    pub fn http(name: String) -> Self {
        Self::new(
            name,
            Arc::new(super::bilibili::HttpBilibili::new()),
            Arc::new(super::alist::HttpAlist::new()),
            Arc::new(super::emby::HttpEmby::new()),
        )
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn bilibili(&self) -> &Arc<dyn BilibiliBackend> {
        &self.bilibili
    }

    #[must_use]
    pub fn alist(&self) -> &Arc<dyn AlistBackend> {
        &self.alist
    }

    #[must_use]
    pub fn emby(&self) -> &Arc<dyn EmbyBackend> {
        &self.emby
    }

    /// Run a vendor call through this backend's circuit breaker.
    pub async fn call<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if !self.breaker.allow() {
            warn!(backend = %self.name, "circuit open, fast-failing vendor call");
            return Err(Error::BackendUnavailable(self.name.clone()));
        }
        match fut.await {
            Ok(value) => {
                self.breaker.record_success();
                Ok(value)
            }
            Err(err) => {
                if matches!(err, Error::Upstream(_)) {
                    self.breaker.record_failure();
                }
                Err(err)
            }
        }
    }
}

type Snapshot = Arc<HashMap<String, Arc<Backend>>>;

/// Read-copy-update registry of vendor backends keyed by name.
pub struct BackendRegistry {
    inner: RwLock<Snapshot>,
}

impl BackendRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Arc::new(HashMap::new())),
        }
    }

    /// Registry with one default HTTP backend under the empty name.
    #[must_use]
    pub fn with_default() -> Self {
        let registry = Self::new();
        registry.insert(Backend::http(String::new()));
        registry
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.inner.read().clone()
    }

    /// Resolve a backend by name; the empty name selects the default.
    pub fn load(&self, name: &str) -> Result<Arc<Backend>> {
        let snapshot = self.snapshot();
        snapshot
            .get(name)
            .cloned()
            .ok_or_else(|| Error::BackendUnavailable(name.to_string()))
    }

    /// Publish a new snapshot containing `backend`.
    pub fn insert(&self, backend: Backend) {
        let mut guard = self.inner.write();
        let mut next: HashMap<_, _> = (**guard).clone();
        info!(backend = %backend.name, "vendor backend registered");
        next.insert(backend.name.clone(), Arc::new(backend));
        *guard = Arc::new(next);
    }

    /// Publish a new snapshot without `name`. The removed backend's
    /// connections close when the last in-flight reader drops its `Arc`,
    /// never before the replacement snapshot is visible.
    pub fn remove(&self, name: &str) -> Option<Arc<Backend>> {
        let mut guard = self.inner.write();
        let mut next: HashMap<_, _> = (**guard).clone();
        let removed = next.remove(name);
        *guard = Arc::new(next);
        if removed.is_some() {
            info!(backend = %name, "vendor backend removed");
        }
        removed
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::with_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_backend_resolvable() {
        let registry = BackendRegistry::with_default();
        assert!(registry.load("").is_ok());
        assert!(matches!(
            registry.load("missing"),
            Err(Error::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_snapshot_isolated_from_mutation() {
        let registry = BackendRegistry::with_default();
        let before = registry.snapshot();

        registry.insert(Backend::http("second".into()));
        assert_eq!(before.len(), 1);
        assert_eq!(registry.snapshot().len(), 2);

        registry.remove("second");
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_call_fast_fails_when_open() {
        let backend = Backend::http("b".into());
        for _ in 0..25 {
            backend.breaker.record_failure();
        }
        let result: Result<()> = backend.call(async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_call_records_upstream_failures() {
        let backend = Backend::http("b".into());
        let result: Result<()> = backend
            .call(async { Err(Error::Upstream("boom".into())) })
            .await;
        assert!(result.is_err());
        // Non-upstream errors do not count against the breaker.
        let result: Result<()> = backend
            .call(async { Err(Error::NotFound("x".into())) })
            .await;
        assert!(result.is_err());
        assert_eq!(backend.breaker.state(), super::super::BreakerState::Closed);
    }
}
