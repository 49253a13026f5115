//! Lifecycle controller for the capture server.
//!
//! Owns the Stopped/Starting/Running/Stopping state machine, the listener,
//! the subscriber registry, and the tunnel manager. All state transitions
//! hold the exclusive lock for their full duration; status reads take the
//! shared lock, so no transition is ever observed partially.

use crate::capture::capture_router;
use crate::registry::SubscriberRegistry;
use crate::tunnel::{TunnelConfig, TunnelManager};
use crate::{HooktrapError, Result};
use hooktrap_types::{WebhookEvent, WebhookResponse, WebhookStatus};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Controller behavior knobs with the production defaults.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Host the listener binds to.
    pub host: String,
    /// Bounded wait for the listener to come up.
    pub ready_timeout: Duration,
    /// Grace period for in-flight connections on stop before forced close.
    pub shutdown_grace: Duration,
    /// Per-subscriber event buffer.
    pub subscriber_capacity: usize,
    pub tunnel: TunnelConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            ready_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(15),
            subscriber_capacity: 100,
            tunnel: TunnelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Handle to the spawned serve loop.
struct ServeHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct ServerState {
    phase: Phase,
    port: u16,
    public_url: String,
    serve: Option<ServeHandle>,
}

impl ServerState {
    fn reset(&mut self) {
        self.phase = Phase::Stopped;
        self.port = 0;
        self.public_url.clear();
        self.serve = None;
    }
}

/// Orchestrates start/stop/status across listener, registry, and tunnel.
///
/// This is the interface a shell UI or CLI consumes; the HTTP control routes
/// delegate here as well.
pub struct WebhookController {
    state: RwLock<ServerState>,
    registry: Arc<SubscriberRegistry>,
    tunnel: TunnelManager,
    config: ControllerConfig,
    /// Handle to ourselves for the capture router's state.
    weak_self: Weak<WebhookController>,
}

impl WebhookController {
    pub fn new(config: ControllerConfig) -> Arc<Self> {
        let tunnel = TunnelManager::new(config.tunnel.clone());
        Self::with_tunnel(config, tunnel)
    }

    /// Construct with a pre-built tunnel manager (used by tests to inject a
    /// scripted launcher).
    pub fn with_tunnel(config: ControllerConfig, tunnel: TunnelManager) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            state: RwLock::new(ServerState {
                phase: Phase::Stopped,
                port: 0,
                public_url: String::new(),
                serve: None,
            }),
            registry: Arc::new(SubscriberRegistry::with_capacity(
                config.subscriber_capacity,
            )),
            tunnel,
            config,
            weak_self: weak.clone(),
        })
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Register an event subscriber, but only while running. Serializes with
    /// `stop` through the state lock so nobody subscribes into a registry
    /// that is mid-teardown.
    pub async fn subscribe_events(&self) -> Option<(Uuid, mpsc::Receiver<WebhookEvent>)> {
        let state = self.state.read().await;
        match state.phase {
            Phase::Running => Some(self.registry.subscribe()),
            _ => None,
        }
    }

    /// Start the capture server on the given port.
    ///
    /// Unblocks as soon as the listener is bound; the serve loop runs in a
    /// spawned task until stop. Port 0 binds an ephemeral port and the
    /// response reports the actual one. A requested tunnel that fails is
    /// downgraded to a warning and a local-only URL: start still succeeds.
    pub async fn start(&self, port: u16, enable_tunnel: bool) -> Result<WebhookResponse> {
        let mut state = self.state.write().await;
        if state.phase != Phase::Stopped {
            return Err(HooktrapError::AlreadyRunning);
        }
        state.phase = Phase::Starting;

        let (actual_port, serve) = match self.bind_and_serve(port).await {
            Ok(bound) => bound,
            Err(e) => {
                state.reset();
                return Err(e);
            }
        };
        info!(target: "hooktrap::startup", "Webhook server listening on port {}", actual_port);

        let local_url = format!("http://localhost:{actual_port}");
        let public_url = if enable_tunnel {
            match self.tunnel.establish(actual_port).await {
                Ok(url) => url,
                Err(e) => {
                    warn!(
                        target: "hooktrap::startup",
                        "Tunnel failed ({}), falling back to {}", e, local_url
                    );
                    local_url.clone()
                }
            }
        } else {
            local_url
        };

        state.phase = Phase::Running;
        state.port = actual_port;
        state.public_url = public_url.clone();
        state.serve = Some(serve);

        info!(target: "hooktrap::startup", "Webhook server started: {}", public_url);
        Ok(WebhookResponse {
            public_url,
            port: actual_port,
        })
    }

    async fn bind_and_serve(&self, port: u16) -> Result<(u16, ServeHandle)> {
        let addr = format!("{}:{}", self.config.host, port);

        let listener = tokio::time::timeout(self.config.ready_timeout, TcpListener::bind(&addr))
            .await
            .map_err(|_| HooktrapError::ServerReadyTimeout(self.config.ready_timeout.as_secs()))?
            .map_err(|source| HooktrapError::BindError { port, source })?;
        let actual_port = listener.local_addr()?.port();

        let controller = self
            .weak_self
            .upgrade()
            .expect("controller is always constructed in an Arc");
        let router = capture_router(controller);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(target: "hooktrap::startup", "Serve loop ended with error: {}", e);
            }
        });

        Ok((actual_port, ServeHandle { shutdown_tx, task }))
    }

    /// Stop the capture server.
    ///
    /// Closes subscriber channels, tears down the tunnel, then shuts the
    /// listener down gracefully within the configured grace period, aborting
    /// the serve task if it overruns. Stop-path failures are logged and
    /// swallowed; state always ends up Stopped.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if state.phase != Phase::Running {
            return Err(HooktrapError::NotRunning);
        }
        state.phase = Phase::Stopping;

        self.registry.close_all();
        self.tunnel.teardown().await;

        if let Some(serve) = state.serve.take() {
            let _ = serve.shutdown_tx.send(true);
            let mut task = serve.task;
            info!(target: "hooktrap::startup", "Shutting down HTTP listener");
            match tokio::time::timeout(self.config.shutdown_grace, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(target: "hooktrap::startup", "Serve task ended abnormally: {}", e)
                }
                Err(_) => {
                    let err = HooktrapError::ShutdownError(format!(
                        "graceful shutdown exceeded {:?}, forcing close",
                        self.config.shutdown_grace
                    ));
                    warn!(target: "hooktrap::startup", "{}", err);
                    task.abort();
                    let _ = task.await;
                }
            }
        }

        state.reset();
        info!(target: "hooktrap::startup", "Webhook server stopped");
        Ok(())
    }

    /// Point-in-time snapshot under the shared lock.
    pub async fn status(&self) -> WebhookStatus {
        let state = self.state.read().await;
        WebhookStatus {
            running: state.phase == Phase::Running,
            public_url: state.public_url.clone(),
            port: state.port,
        }
    }

    /// Establish a tunnel for an already-running server.
    ///
    /// No-op returning the current URL when a tunnel is already live. Unlike
    /// during start, a failure here is returned to the caller.
    pub async fn enable_tunnel(&self) -> Result<WebhookResponse> {
        let mut state = self.state.write().await;
        if state.phase != Phase::Running {
            return Err(HooktrapError::NotRunning);
        }

        if self.tunnel.is_active().await {
            return Ok(WebhookResponse {
                public_url: state.public_url.clone(),
                port: state.port,
            });
        }

        let url = self.tunnel.establish(state.port).await?;
        state.public_url = url.clone();
        info!(target: "hooktrap::tunnel", "Tunnel enabled at runtime: {}", url);

        Ok(WebhookResponse {
            public_url: url,
            port: state.port,
        })
    }

    /// Tear down the tunnel and revert to the local URL.
    pub async fn disable_tunnel(&self) -> Result<WebhookResponse> {
        let mut state = self.state.write().await;
        if state.phase != Phase::Running {
            return Err(HooktrapError::NotRunning);
        }

        self.tunnel.teardown().await;
        state.public_url = format!("http://localhost:{}", state.port);
        info!(target: "hooktrap::tunnel", "Tunnel disabled, using {}", state.public_url);

        Ok(WebhookResponse {
            public_url: state.public_url.clone(),
            port: state.port,
        })
    }
}
