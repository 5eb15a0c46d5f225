mod rtmp_auth;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use cinesync_api::AppState;
use cinesync_core::cache::VendorCaches;
use cinesync_core::op::Runtime;
use cinesync_core::provider::{Backend, BackendRegistry};
use cinesync_core::repository::MemoryStore;
use cinesync_core::service::{PublishKeyService, TokenService};
use cinesync_core::shutdown::ShutdownTasks;
use cinesync_core::{logging, Config};
use cinesync_stream::{LiveRegistry, LiveSettings};

use rtmp_auth::RuntimePublishAuth;
use server::CinesyncServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Optional config file path as the single positional argument.
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;
    let config = Arc::new(config);

    logging::init_logging(&config.logging)?;
    info!("cinesync starting");
    info!(http = %config.http_address(), rtmp = %config.rtmp_address(), "listen addresses");

    // Standalone mode runs entirely from the in-memory store; a database
    // deployment swaps in store implementations behind the same traits.
    let store = Arc::new(MemoryStore::new());

    let backends = Arc::new(BackendRegistry::with_default());
    for backend in &config.vendor.backends {
        backends.insert(Backend::http(backend.name.clone()));
    }

    let vendors = Arc::new(VendorCaches::new(store.clone(), backends));
    let runtime = Runtime::new(store.clone(), store, vendors);

    let tokens = Arc::new(TokenService::new(
        &config.jwt.secret,
        config.jwt.token_ttl_hours,
    )?);
    let publish_keys = Arc::new(PublishKeyService::new((*tokens).clone()));

    let live = Arc::new(LiveRegistry::new(LiveSettings {
        segment_seconds: config.live.segment_seconds,
        playlist_window: config.live.playlist_window,
        ts_disguised_as_png: config.live.ts_disguised_as_png,
    }));

    let state = AppState::new(
        runtime.clone(),
        tokens,
        publish_keys.clone(),
        live,
        config.clone(),
    );
    let publish_auth = Arc::new(RuntimePublishAuth::new(runtime, publish_keys));
    let shutdown = Arc::new(ShutdownTasks::new());

    CinesyncServer::new(config, state, publish_auth, shutdown)
        .run()
        .await
}
