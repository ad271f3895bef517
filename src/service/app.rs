//! Main application state and service coordination
//!
//! `AppState` builds every component from an [`AppConfig`], binds both
//! listeners, and owns the background tasks that serve them.

use crate::auth::{IdentityVerifier, JwtIdentityVerifier};
use crate::config::{validate_config, AppConfig};
use crate::game::MatchEngine;
use crate::matchmaking::MatchmakingQueue;
use crate::metrics::{HealthServer, MetricsCollector};
use crate::store::{CommandTransport, MatchStore, StoreEndpoint, TcpRespClient};
use crate::transport::{ConnectionRegistry, Dispatcher, WsServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Failed to bind {listener} listener on {address}: {message}")]
    Bind {
        listener: &'static str,
        address: String,
        message: String,
    },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Addresses the listeners actually bound to
#[derive(Debug, Clone, Copy, Default)]
struct BoundAddresses {
    http: Option<SocketAddr>,
    ws: Option<SocketAddr>,
}

/// Main application state that coordinates all service components
pub struct AppState {
    config: AppConfig,
    metrics_collector: Arc<MetricsCollector>,
    store: Arc<MatchStore>,
    engine: Arc<MatchEngine>,
    queue: Arc<MatchmakingQueue>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<Dispatcher>,
    verifier: Arc<dyn IdentityVerifier>,
    /// Holds a reference back to this state until `shutdown` takes it
    health_server: Mutex<Option<Arc<HealthServer>>>,
    shutdown_tx: watch::Sender<bool>,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    bound: std::sync::RwLock<BoundAddresses>,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl AppState {
    /// Build the service against the configured key/value store
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        validate_config(&config).map_err(|e| ServiceError::Configuration {
            message: e.to_string(),
        })?;

        let endpoint =
            StoreEndpoint::parse(&config.store.url).map_err(|e| ServiceError::Configuration {
                message: e.to_string(),
            })?;
        info!("Using match store at {}", endpoint);

        let transport: Arc<dyn CommandTransport> = Arc::new(TcpRespClient::new(
            endpoint,
            config.store_request_timeout(),
        ));
        Self::with_transport(config, transport)
    }

    /// Build the service over an arbitrary store transport
    pub fn with_transport(
        config: AppConfig,
        transport: Arc<dyn CommandTransport>,
    ) -> Result<Self, ServiceError> {
        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let store = Arc::new(MatchStore::with_metrics(
            transport,
            config.store.key_prefix.clone(),
            metrics_collector.clone(),
        ));
        let engine = Arc::new(MatchEngine::with_metrics(
            store.clone(),
            metrics_collector.clone(),
        ));
        let queue = Arc::new(MatchmakingQueue::with_metrics(
            engine.clone(),
            config.matchmaking.default_duration_minutes,
            metrics_collector.clone(),
        ));
        let registry = Arc::new(ConnectionRegistry::with_metrics(metrics_collector.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            queue.clone(),
            engine.clone(),
            config.transport.max_chat_length,
        ));
        let verifier: Arc<dyn IdentityVerifier> =
            Arc::new(JwtIdentityVerifier::new(&config.auth.jwt_secret));

        let (shutdown_tx, _) = watch::channel(false);

        debug!("Service components initialized");

        Ok(Self {
            config,
            metrics_collector,
            store,
            engine,
            queue,
            registry,
            dispatcher,
            verifier,
            health_server: Mutex::new(None),
            shutdown_tx,
            background_tasks: Mutex::new(Vec::new()),
            bound: std::sync::RwLock::new(BoundAddresses::default()),
            is_running: Arc::new(RwLock::new(false)),
            started_at: Instant::now(),
        })
    }

    /// Bind both listeners and start serving
    pub async fn start(self: &Arc<Self>) -> Result<(), ServiceError> {
        info!("Starting social arena service");

        let ws_address = self.config.ws_addr();
        let ws_listener = bind("WebSocket", &ws_address).await?;
        let http_address = self.config.http_addr();
        let http_listener = bind("HTTP", &http_address).await?;

        {
            let mut bound = self.bound.write().map_err(|_| ServiceError::Initialization {
                message: "bound address lock poisoned".to_string(),
            })?;
            bound.ws = ws_listener.local_addr().ok();
            bound.http = http_listener.local_addr().ok();
        }

        *self.is_running.write().await = true;

        let ws_server = Arc::new(WsServer::new(
            self.config.transport.path_prefix.clone(),
            self.verifier.clone(),
            self.dispatcher.clone(),
            self.metrics_collector.clone(),
        ));
        let ws_task = tokio::spawn(ws_server.run(ws_listener, self.shutdown_tx.subscribe()));

        let health_server = Arc::new(
            HealthServer::new(self.metrics_collector.clone()).with_app_state(self.clone()),
        );
        *self.health_server.lock().await = Some(health_server.clone());

        let http_task = tokio::spawn(async move {
            if let Err(e) = health_server.serve(http_listener).await {
                error!("HTTP server error: {}", e);
            }
        });

        let mut tasks = self.background_tasks.lock().await;
        tasks.push(ws_task);
        tasks.push(http_task);

        info!(
            "Social arena service started (ws: {}, http: {})",
            self.ws_addr().map_or(ws_address, |a| a.to_string()),
            self.http_addr().map_or(http_address, |a| a.to_string()),
        );
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of social arena service");

        *self.is_running.write().await = false;

        if self.shutdown_tx.send(true).is_err() {
            debug!("No WebSocket listener was waiting for shutdown");
        }

        if let Some(health_server) = self.health_server.lock().await.take() {
            if let Err(e) = health_server.stop().await {
                warn!("Failed to stop HTTP server: {}", e);
            }
        }

        let tasks: Vec<JoinHandle<()>> = self.background_tasks.lock().await.drain(..).collect();
        let timeout = self.config.shutdown_timeout();
        for task in tasks {
            let abort = task.abort_handle();
            match tokio::time::timeout(timeout, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => {
                    return Err(ServiceError::BackgroundTask {
                        message: e.to_string(),
                    })
                }
                Err(_) => {
                    warn!("Background task did not stop within {:?}, aborting", timeout);
                    abort.abort();
                }
            }
        }

        info!("✅ Social arena service shutdown completed");
        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    pub fn store(&self) -> Arc<MatchStore> {
        self.store.clone()
    }

    pub fn engine(&self) -> Arc<MatchEngine> {
        self.engine.clone()
    }

    pub fn queue(&self) -> Arc<MatchmakingQueue> {
        self.queue.clone()
    }

    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        self.registry.clone()
    }

    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        self.dispatcher.clone()
    }

    pub fn verifier(&self) -> Arc<dyn IdentityVerifier> {
        self.verifier.clone()
    }

    /// Address of the upgrade listener once started
    pub fn ws_addr(&self) -> Option<SocketAddr> {
        self.bound.read().ok().and_then(|b| b.ws)
    }

    /// Address of the HTTP listener once started
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.bound.read().ok().and_then(|b| b.http)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

async fn bind(listener: &'static str, address: &str) -> Result<TcpListener, ServiceError> {
    TcpListener::bind(address)
        .await
        .map_err(|e| ServiceError::Bind {
            listener,
            address: address.to_string(),
            message: e.to_string(),
        })
}
