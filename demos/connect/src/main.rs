//! Registers this process in the registry, opens a balanced channel to a
//! peer service and logs backend changes until Ctrl+C.
//!
//! Environment:
//! - `WAYPOST_REGISTRY`: registry driver (`consul` or `memory`), default `consul`
//! - `WAYPOST_REGISTRY_ADDR`: `host:port`, default `127.0.0.1:8500`
//! - `WAYPOST_SERVICE`: name to register under, default `demo-srv`
//! - `WAYPOST_PEER`: service to connect to, default the registered name
//! - `WAYPOST_PORT`: port of the local health endpoint, default `8085`
use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::Context;
use axum::{Router, routing::get};
use tracing::{info, warn};

use waypost_connect::ConnectionManager;
use waypost_model::{HealthCheck, Registration, RegistryConfig, ServiceConnectionConfig};
use waypost_observe::{LoggerConfig, logger_init};
use waypost_registry::{ServiceRegistry, new_registry};

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn instance_id(service: &str) -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{service}-{host}-{}", &suffix[..8])
}

async fn serve_health(addr: SocketAddr) -> anyhow::Result<()> {
    let app = Router::new().route("/health", get(|| async { "ok" }));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind health endpoint on {addr}"))?;
    info!(%addr, "health endpoint listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// Call `report` every `every` until `shutdown` resolves; returns the number of reports.
async fn report_until(shutdown: impl Future, every: Duration, mut report: impl FnMut()) -> u32 {
    let mut ticker = tokio::time::interval(every);
    let mut reports = 0;
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                report();
                reports += 1;
            }
        }
    }
    reports
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger_init(&LoggerConfig::from_env()?)?;

    let driver = env_or("WAYPOST_REGISTRY", "consul");
    let (host, port) = env_or("WAYPOST_REGISTRY_ADDR", "127.0.0.1:8500")
        .rsplit_once(':')
        .map(|(h, p)| (h.to_string(), p.to_string()))
        .context("WAYPOST_REGISTRY_ADDR must be host:port")?;
    let service = env_or("WAYPOST_SERVICE", "demo-srv");
    let peer = env_or("WAYPOST_PEER", &service);
    let health_port: u16 = env_or("WAYPOST_PORT", "8085").parse()?;

    let config = RegistryConfig::new(host, port.parse()?).with_discovery_wait(5);
    let registry = new_registry(&driver, config)?;
    info!(%driver, registry = %registry.config().address(), "registry client ready");

    let health_addr = SocketAddr::from(([0, 0, 0, 0], health_port));
    tokio::spawn(async move {
        if let Err(e) = serve_health(health_addr).await {
            warn!(error = %e, "health endpoint stopped");
        }
    });

    let id = instance_id(&service);
    let registration = Registration::new(&id, &service, "127.0.0.1", health_port)
        .with_tags(["demo"])
        .with_check(HealthCheck::http("/health").with_interval(Duration::from_secs(5)));
    registry.register(&registration).await?;

    let manager = ConnectionManager::builder()
        .registry(registry.clone())
        .policy(ServiceConnectionConfig::round_robin())
        .build()?;
    let conn = manager.connect(&peer, 10).await?;
    info!(target = %conn.target(), config = conn.service_config(), "channel opened");

    match conn.ready().await {
        Ok(()) => info!(peer = %peer, nodes = ?conn.nodes(), "peer reachable"),
        Err(e) => warn!(peer = %peer, error = %e, "peer not discovered yet"),
    }

    info!("press Ctrl+C to stop");
    report_until(tokio::signal::ctrl_c(), Duration::from_secs(15), || {
        info!(peer = %peer, nodes = ?conn.nodes(), "backends");
    })
    .await;

    info!("shutting down...");
    conn.close();
    if let Err(e) = registry.deregister(&id).await {
        warn!(%id, error = %e, "deregister failed");
    }
    Ok(())
}
