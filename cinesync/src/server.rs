//! Server lifecycle: HTTP surface, RTMP ingest, ordered shutdown.

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};

use cinesync_api::{http, AppState};
use cinesync_core::shutdown::ShutdownTasks;
use cinesync_core::Config;
use cinesync_stream::{LiveRegistry, PublishAuth, RtmpServer};

pub struct CinesyncServer {
    config: Arc<Config>,
    state: AppState,
    publish_auth: Arc<dyn PublishAuth>,
    shutdown: Arc<ShutdownTasks>,
}

impl CinesyncServer {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        state: AppState,
        publish_auth: Arc<dyn PublishAuth>,
        shutdown: Arc<ShutdownTasks>,
    ) -> Self {
        Self {
            config,
            state,
            publish_auth,
            shutdown,
        }
    }

    /// Run until SIGINT/SIGTERM, then drain in priority order.
    pub async fn run(self) -> anyhow::Result<()> {
        let live: Arc<LiveRegistry> = self.state.live.clone();
        let runtime = self.state.runtime.clone();

        // RTMP ingest, detached; drained through the shutdown registry.
        let rtmp = RtmpServer::new(
            self.config.rtmp_address(),
            live.clone(),
            self.publish_auth.clone(),
        );
        let rtmp_task = tokio::spawn(async move {
            if let Err(err) = rtmp.serve().await {
                error!(error = %err, "rtmp server exited");
            }
        });

        // Shutdown order: stop accepting publishers, close rooms (kicking
        // every websocket), then drop live channels.
        let rtmp_abort = rtmp_task.abort_handle();
        self.shutdown
            .register(0, "rtmp-listener", move || async move {
                rtmp_abort.abort();
            });
        {
            let runtime = runtime.clone();
            self.shutdown.register(10, "room-hubs", move || async move {
                runtime.close_all_rooms();
            });
        }
        {
            let live = live.clone();
            self.shutdown
                .register(20, "live-channels", move || async move {
                    live.close_all();
                });
        }

        let app = http::router(self.state.clone());
        let listener = tokio::net::TcpListener::bind(self.config.http_address())
            .await
            .with_context(|| format!("failed to bind {}", self.config.http_address()))?;
        info!(address = %self.config.http_address(), "http server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for_signal())
            .await
            .context("http server failed")?;

        info!("signal received, draining");
        self.shutdown.run().await;
        Ok(())
    }
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(err) => {
                error!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
