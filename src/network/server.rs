//! HTTP Server
//!
//! Accepts connections and serves each one on its own task.
//!
//! ```text
//! accept ──▶ connection task (hyper http1, head deadline)
//!                 │
//!                 ▼
//!        load shed ◀── concurrency limit: worker_threads + queue_depth
//!          │ full: 503 + Connection: close, nothing read or queued
//!          ▼
//!        router ──▶ governor worker (spawn_blocking) ──▶ Engine
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::BoxError;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper_util::rt::{TokioIo, TokioTimer};
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::load_shed::error::Overloaded;
use tower::util::BoxCloneService;
use tower::ServiceBuilder;

use crate::api::{self, closing, AppState};
use crate::config::Config;
use crate::engine::Engine;
use crate::error::{Result, StrataError};
use crate::governor::Governor;

/// Waiting for the last engine handle once serving has stopped
const CLOSE_ATTEMPTS: usize = 50;
const CLOSE_RETRY: Duration = Duration::from_millis(100);

/// Stops a running [`Server`] from another task
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    /// Stop accepting; open connections finish their current request
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// HTTP server for StrataKV
pub struct Server {
    config: Config,
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
}

impl Server {
    /// Validate the config and bind the listening socket
    pub async fn bind(config: Config, engine: Arc<Engine>) -> Result<Self> {
        config.validate()?;

        let listener = TcpListener::bind(&config.listen_addr).await?;
        let governor = Arc::new(Governor::new(
            config.worker_threads,
            config.max_buffered_bytes,
        ));
        let state = AppState::new(engine, governor, &config);

        tracing::info!("Listening on {}", listener.local_addr()?);

        Ok(Self {
            config,
            listener,
            state,
            shutdown: CancellationToken::new(),
        })
    }

    /// Actual bound address (useful with port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    pub fn governor(&self) -> Arc<Governor> {
        Arc::clone(&self.state.governor)
    }

    /// Serve until `signal` resolves, then flush and close the engine
    ///
    /// The engine is closed only if the server held its last handle.
    pub async fn serve_until<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let engine = Arc::clone(&self.state.engine);
        let shutdown = self.shutdown_handle();
        let watcher = tokio::spawn(async move {
            signal.await;
            tracing::info!("Shutdown signal received");
            shutdown.shutdown();
        });

        let served = self.run().await;
        watcher.abort();
        served?;

        close_engine(engine).await
    }

    /// Serve until the shutdown handle fires
    ///
    /// On return every connection task has finished, so the router (and
    /// its engine handle) is gone.
    pub async fn run(self) -> Result<()> {
        let Self {
            config,
            listener,
            state,
            shutdown,
        } = self;
        let governor = Arc::clone(&state.governor);

        let capacity = config.worker_threads + config.queue_depth;
        let service = {
            let governor = Arc::clone(&governor);
            let service = ServiceBuilder::new()
                .layer(HandleErrorLayer::new(move |err: BoxError| {
                    let governor = Arc::clone(&governor);
                    async move { shed(&governor, err) }
                }))
                .load_shed()
                .concurrency_limit(capacity)
                .service(api::create_router(state));
            BoxCloneService::<Request<Incoming>, Response, Infallible>::new(service)
        };

        tracing::info!(
            "Serving with {} workers, {} requests admitted at most",
            config.worker_threads,
            capacity
        );

        let connections = TaskTracker::new();
        loop {
            let (stream, peer) = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        tracing::warn!("Accept failed: {}", e);
                        continue;
                    }
                },
            };

            tracing::debug!("Connection from {}", peer);
            let service = TowerToHyperService::new(service.clone());
            let header_timeout = config.idle_timeout();
            let shutdown = shutdown.clone();
            connections.spawn(async move {
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!("Could not set nodelay for {}: {}", peer, e);
                }

                // The head deadline also bounds the idle wait between
                // kept-alive requests
                let connection = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .header_read_timeout(header_timeout)
                    .keep_alive(true)
                    .serve_connection(TokioIo::new(stream), service);
                let mut connection = std::pin::pin!(connection);

                let mut stopping = false;
                let result = loop {
                    tokio::select! {
                        result = connection.as_mut() => break result,
                        _ = shutdown.cancelled(), if !stopping => {
                            connection.as_mut().graceful_shutdown();
                            stopping = true;
                        }
                    }
                };

                match result {
                    Ok(()) => tracing::debug!("Connection from {} closed", peer),
                    Err(e) => tracing::debug!("Connection from {} ended: {}", peer, e),
                }
            });
        }

        tracing::info!("Shutting down, waiting for {} connections", connections.len());
        connections.close();
        connections.wait().await;

        let stats = governor.stats();
        tracing::info!(
            "Server stopped: {} admitted, {} rejected",
            stats.admitted,
            stats.rejected
        );
        Ok(())
    }
}

/// Close `engine` once every other handle is gone
///
/// Engine calls of clients that hung up may still be finishing on a worker.
async fn close_engine(mut engine: Arc<Engine>) -> Result<()> {
    for _ in 0..CLOSE_ATTEMPTS {
        match Arc::try_unwrap(engine) {
            Ok(owned) => {
                tokio::task::spawn_blocking(move || owned.close())
                    .await
                    .map_err(|e| StrataError::Internal(format!("engine close task failed: {}", e)))??;
                tracing::info!("Engine closed");
                return Ok(());
            }
            Err(shared) => {
                engine = shared;
                tokio::time::sleep(CLOSE_RETRY).await;
            }
        }
    }

    tracing::warn!("Engine still in use at exit; unflushed writes stay in the WAL");
    Ok(())
}

/// Answer for requests the load shedder turned away
fn shed(governor: &Governor, err: BoxError) -> Response {
    if err.is::<Overloaded>() {
        governor.record_rejected();
        tracing::debug!("At capacity, shedding request");
        closing(StatusCode::SERVICE_UNAVAILABLE)
    } else {
        tracing::error!("Unhandled service error: {}", err);
        closing(StatusCode::INTERNAL_SERVER_ERROR)
    }
}
