//! Startup orchestration.
//!
//! # Responsibilities
//! - Build the shared services from a validated configuration
//! - Start the background maintenance loop
//! - Bind listeners last, so traffic only arrives once everything is ready
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Every task stops on the shared shutdown signal

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::clock::{SharedClock, SystemClock};
use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics::init_metrics;
use crate::realtime::ConnectionManager;
use crate::routing::RouteError;
use crate::security::identity::{IdentityValidator, StaticTokenValidator};
use crate::upstream::{HttpUpstream, Upstream};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("route registration failed: {0}")]
    Route(#[from] RouteError),

    #[error("invalid address `{address}`: {source}")]
    Address {
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn parse_addr(address: &str) -> Result<SocketAddr, StartupError> {
    address.parse().map_err(|source| StartupError::Address {
        address: address.to_string(),
        source,
    })
}

/// The services shared by the servers and background tasks.
#[derive(Clone)]
pub struct Services {
    pub gateway: Arc<Gateway>,
    pub realtime: Arc<ConnectionManager>,
}

impl Services {
    /// Wire up services with the HTTP upstream and the static token table.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, StartupError> {
        let upstream: Arc<dyn Upstream> = Arc::new(HttpUpstream::new(&config.upstreams));
        let identity: Arc<dyn IdentityValidator> = Arc::new(StaticTokenValidator::from_config(&config.auth));
        Self::with_collaborators(config, SystemClock::shared(), upstream, identity)
    }

    pub fn with_collaborators(
        config: &GatewayConfig,
        clock: SharedClock,
        upstream: Arc<dyn Upstream>,
        identity: Arc<dyn IdentityValidator>,
    ) -> Result<Self, StartupError> {
        let gateway = Arc::new(Gateway::from_config(config, clock.clone(), upstream, identity.clone())?);
        let realtime = Arc::new(ConnectionManager::new(
            &config.realtime,
            identity,
            gateway.limiter().clone(),
            gateway.metrics_handle(),
            clock,
        ));
        Ok(Self { gateway, realtime })
    }

    /// One maintenance pass: reclaim expired cache entries and rate counters.
    pub async fn run_maintenance(&self) {
        match self.gateway.cache().sweep_expired().await {
            Ok(removed) if removed > 0 => tracing::debug!(removed, "Swept expired cache entries"),
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Cache sweep failed"),
        }
        let purged = self.gateway.limiter().purge_expired();
        if purged > 0 {
            tracing::debug!(purged, "Purged idle rate limit counters");
        }
    }
}

/// Run maintenance every `interval` until shutdown.
pub fn spawn_maintenance(
    services: Services,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => services.run_maintenance().await,
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Maintenance loop stopped");
    })
}

/// Serve the admin API until shutdown.
pub async fn run_admin(
    listener: TcpListener,
    state: AdminState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");
    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

/// Start everything described by `config` and block until shutdown.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        init_metrics(parse_addr(&config.observability.metrics_address)?);
    }

    let services = Services::from_config(&config)?;
    let shutdown = Arc::new(Shutdown::new());

    let maintenance = (config.maintenance.interval_secs > 0).then(|| {
        spawn_maintenance(
            services.clone(),
            Duration::from_secs(config.maintenance.interval_secs),
            shutdown.subscribe(),
        )
    });

    let admin = if config.admin.enabled {
        let listener = TcpListener::bind(parse_addr(&config.admin.bind_address)?).await?;
        let state = AdminState {
            gateway: services.gateway.clone(),
            realtime: services.realtime.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
            started_at: Instant::now(),
        };
        let rx = shutdown.subscribe();
        Some(tokio::spawn(async move {
            if let Err(e) = run_admin(listener, state, rx).await {
                tracing::error!(error = %e, "Admin API failed");
            }
        }))
    } else {
        None
    };

    {
        let shutdown = shutdown.clone();
        let realtime = services.realtime.clone();
        tokio::spawn(async move {
            let signal = signals::wait_for_signal().await;
            tracing::info!(signal, "Shutdown signal received");
            realtime.close_all();
            shutdown.trigger();
        });
    }

    let listener = TcpListener::bind(parse_addr(&config.listener.bind_address)?).await?;
    let server = HttpServer::new(&config, services.gateway.clone(), services.realtime.clone());
    let result = server.run(listener, shutdown.subscribe()).await;

    // The server can also stop on its own (listener error).
    shutdown.trigger();
    services.realtime.close_all();
    if let Some(handle) = admin {
        let _ = handle.await;
    }
    if let Some(handle) = maintenance {
        let _ = handle.await;
    }

    result.map_err(StartupError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::RateLimitRule;
    use crate::config::RateLimitScope;
    use crate::upstream::{UpstreamError, UpstreamRequest, UpstreamResponse};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Upstream for Echo {
        async fn invoke(&self, _: &str, request: &UpstreamRequest) -> Result<UpstreamResponse, UpstreamError> {
            Ok(UpstreamResponse::ok(request.path.clone()))
        }
    }

    #[tokio::test]
    async fn maintenance_purges_elapsed_counters() {
        let clock = ManualClock::new(0);
        let services = Services::with_collaborators(
            &GatewayConfig::default(),
            clock.clone(),
            Arc::new(Echo),
            Arc::new(StaticTokenValidator::new()),
        )
        .unwrap();

        let rule = RateLimitRule::new("/x", 1, 1, RateLimitScope::Global);
        services.gateway.limiter().allow("x|global", &rule);
        assert_eq!(services.gateway.limiter().counter_count(), 1);

        clock.advance(Duration::from_secs(2));
        services.run_maintenance().await;
        assert_eq!(services.gateway.limiter().counter_count(), 0);
    }

    #[tokio::test]
    async fn maintenance_loop_stops_on_shutdown() {
        let services = Services::with_collaborators(
            &GatewayConfig::default(),
            ManualClock::new(0),
            Arc::new(Echo),
            Arc::new(StaticTokenValidator::new()),
        )
        .unwrap();
        let shutdown = Shutdown::new();
        let handle = spawn_maintenance(services, Duration::from_millis(5), shutdown.subscribe());
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("maintenance loop did not stop")
            .unwrap();
    }

    #[test]
    fn bad_addresses_are_reported() {
        assert!(matches!(parse_addr("not-an-addr"), Err(StartupError::Address { .. })));
        assert!(parse_addr("127.0.0.1:0").is_ok());
    }
}
