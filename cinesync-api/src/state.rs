use std::sync::Arc;

use cinesync_core::op::Runtime;
use cinesync_core::service::{PublishKeyService, TokenService};
use cinesync_core::Config;
use cinesync_proxy::ProxyCache;
use cinesync_stream::LiveRegistry;

/// Shared handles behind every HTTP and WebSocket handler.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<Runtime>,
    pub tokens: Arc<TokenService>,
    pub publish_keys: Arc<PublishKeyService>,
    pub live: Arc<LiveRegistry>,
    pub proxy_cache: Option<Arc<ProxyCache>>,
    pub config: Arc<Config>,
}

impl AppState {
    #[must_use]
    pub fn new(
        runtime: Arc<Runtime>,
        tokens: Arc<TokenService>,
        publish_keys: Arc<PublishKeyService>,
        live: Arc<LiveRegistry>,
        config: Arc<Config>,
    ) -> Self {
        let proxy_cache = config.proxy.cache_enabled.then(|| {
            Arc::new(ProxyCache::new(
                config.proxy.cache_max_entries,
                (config.proxy.cache_max_body_mib as usize) * 1024 * 1024,
            ))
        });
        Self {
            runtime,
            tokens,
            publish_keys,
            live,
            proxy_cache,
            config,
        }
    }
}
