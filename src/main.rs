//! Station binary entrypoint wiring leader election, the broker transport
//! and the host command loop.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod dao;
mod dto;
mod error;
mod leader;
mod services;
mod state;
mod transport;

use config::AppConfig;
use dao::Collaborators;
use dao::local::LocalStore;
use leader::medium::FileLeaseMedium;
use leader::{LeaderElector, SystemClock};
use services::session::{self, SessionDeps};
use state::AppState;
use transport::tcp::TcpWire;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let collab =
        Collaborators::new(&config.api_base_url).context("building collaborator clients")?;
    let store = LocalStore::new(config.data_dir.clone());

    let app_state = AppState::new();

    // One elector per tab; the lease file is the shared key every tab of the
    // station polls and watches.
    let medium = Arc::new(FileLeaseMedium::new(store.lease_path()));
    let elector = LeaderElector::new(medium, Arc::new(SystemClock));
    info!(tab_id = %elector.tab_id(), "station tab starting");
    let leader = elector.start();
    let leadership = leader.leadership();

    let wire = Arc::new(TcpWire::new(config.broker_addr.clone()));
    let supervisor = tokio::spawn(session::run(
        app_state.clone(),
        leadership,
        SessionDeps {
            wire,
            collab,
            store,
        },
    ));

    shutdown_signal().await;
    info!("shutting down");

    // Releasing the lease makes failover to another tab near-instant; the
    // broker's last-will covers the presence flag.
    supervisor.abort();
    leader.resign().await;

    Ok(())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the station down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
