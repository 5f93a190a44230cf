//! GeoDuel headless client
//!
//! With the memory backend it hosts a lobby and plays both seats itself.
//! With Supabase it hosts a lobby, or joins `JOIN_CODE`, as `PLAYER_UID`.

use geoduel::app::AppState;
use geoduel::client::{self, DuelClient};
use geoduel::config::{Config, StoreBackend};
use geoduel::model::DuelOutcome;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    init_tracing(&config.log_level);

    info!("Starting GeoDuel client");
    info!(backend = ?config.backend, uid = %config.player_uid, "Configuration loaded");

    let state = AppState::new(config.clone());

    match config.backend {
        StoreBackend::Memory => self_play(state).await?,
        StoreBackend::Supabase => play_online(state).await?,
    }

    info!("Client shutdown complete");
    Ok(())
}

/// Host a lobby and fill the second seat locally
async fn self_play(state: AppState) -> anyhow::Result<()> {
    let config = state.config.clone();
    let host = DuelClient::host(state.clone(), &config.player_uid, &config.player_username).await?;
    let rival_uid = format!("{}-rival", config.player_uid);
    let rival = DuelClient::join(state.clone(), &rival_uid, "Rival", host.join_code()).await?;
    let lobby_id = host.lobby_id().to_string();

    tokio::select! {
        (hosted, joined) = async { tokio::join!(host.play(), rival.play()) } => {
            report(hosted?);
            joined?;
        }
        _ = shutdown_signal() => {
            client::leave(&state, &lobby_id, &config.player_uid).await?;
        }
    }
    Ok(())
}

/// Play one seat against a remote opponent
async fn play_online(state: AppState) -> anyhow::Result<()> {
    let config = state.config.clone();
    let seat = match &config.join_code {
        Some(code) => {
            DuelClient::join(state.clone(), &config.player_uid, &config.player_username, code).await?
        }
        None => {
            let seat =
                DuelClient::host(state.clone(), &config.player_uid, &config.player_username).await?;
            info!("Share join code {} with your opponent", seat.join_code());
            seat
        }
    };
    let lobby_id = seat.lobby_id().to_string();

    tokio::select! {
        outcome = seat.play() => report(outcome?),
        _ = shutdown_signal() => {
            client::leave(&state, &lobby_id, &config.player_uid).await?;
        }
    }
    Ok(())
}

fn report(outcome: Option<DuelOutcome>) {
    match outcome {
        Some(outcome) => info!(
            winner = ?outcome.winner,
            loser = ?outcome.loser,
            forfeit_by = ?outcome.forfeit_by,
            "Duel over"
        ),
        None => info!("Lobby closed before the duel finished"),
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to install signal handler: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, leaving the lobby");
        }
        _ = terminate => {
            info!("Received terminate signal, leaving the lobby");
        }
    }
}
