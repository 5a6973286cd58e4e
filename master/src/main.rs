mod barrier;
mod compiler;
mod config;
mod connection;
mod dispatcher;
mod error;
mod handlers;
mod monitor;
mod namespace;
mod pool;
mod state;
mod store;
mod tracker;

use anyhow::{Context, Result};
use tokio::{net::TcpListener, sync::mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::MasterConfig;
use crate::connection::spawn_connection;
use crate::dispatcher::CommandDispatcher;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("master=debug,common=info")),
        )
        .init();

    let config = MasterConfig::from_env()?;
    info!(
        "master con {} workers, datos en {}",
        config.workers.len(),
        config.root_dir.display()
    );

    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let state = AppState::build(&config, inbound_tx.clone())?;

    // conexiones salientes a los workers
    monitor::run_health_checks(state.pool.clone());

    // reloj de la máquina de estados
    tokio::spawn(tracker::run_tick_loop(
        state.tracker.clone(),
        config.tick_interval,
    ));

    tokio::spawn(CommandDispatcher::new(state.clone()).run(inbound_rx));

    // router HTTP de administración
    let admin = TcpListener::bind(&config.admin_addr)
        .await
        .with_context(|| format!("no se pudo abrir {}", config.admin_addr))?;
    info!("admin HTTP escuchando en {}", admin.local_addr()?);
    let app = handlers::build_router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(admin, app).await {
            error!("servidor HTTP terminó: {}", e);
        }
    });

    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("no se pudo abrir {}", config.bind_addr))?;
    info!("master escuchando en {}", listener.local_addr()?);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, remote)) => {
                    let peer = spawn_connection(stream, None, inbound_tx.clone());
                    info!("conexión {} desde {}", peer.id(), remote);
                }
                Err(e) => warn!("accept falló: {}", e),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("apagando master");
                break;
            }
        }
    }

    state.pool.shutdown();
    Ok(())
}
