//! note-remind-daemon: Background daemon that files spoken notes and reminders
//!
//! This daemon runs as a user service and provides:
//! - A transcript session state machine driven by an external recognizer
//! - Command detection ("note to ...", "remind me to ...") and stripping
//! - Persisted Notes and Reminders lists
//! - IPC server for UI and recognizer communication
//!
//! Audio capture and speech recognition happen in a separate recognizer
//! process that attaches over IPC.

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use note_remind::config::Config;
use note_remind::events::SessionEvent;
use note_remind::grammar::CommandGrammar;
use note_remind::ipc::Server;
use note_remind::lifecycle::ShutdownSignal;
use note_remind::recognizer::BroadcastRecognizer;
use note_remind::session::{SessionClient, SessionDriver, TranscriptSession};
use note_remind::store::JsonListStore;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "note-remind-daemon starting"
    );

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        ?config.socket_path,
        ?config.lists_path,
        timeout_ms = config.session_timeout.as_millis() as u64,
        "configuration loaded"
    );

    let store = JsonListStore::open(&config.lists_path).context("failed to open list store")?;

    // Recognizer processes attach over IPC; the session drives them through this
    let recognizer = BroadcastRecognizer::new();
    let session = TranscriptSession::with_grammar(
        recognizer.clone(),
        CommandGrammar::with_slack(config.match_slack),
    )
    .with_default_intent(config.default_intent);

    // Session driver -> IPC server (for pushing session events)
    let (event_tx, _event_rx) = broadcast::channel::<SessionEvent>(64);
    // IPC server and timers -> session driver
    let (client, command_rx) = SessionClient::channel(32);

    let mut driver = SessionDriver::new(
        session,
        store,
        config.driver_options(),
        &client,
        event_tx.clone(),
    );

    let server = Server::new(&config.socket_path, client, recognizer, event_tx.clone())?;

    let mut log_rx = event_tx.subscribe();
    let shutdown = ShutdownSignal::new();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        // Run the session driver (serializes every finalize trigger)
        _ = driver.run(command_rx) => {
            info!("session driver exited");
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Record session outcomes in the daemon log
        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(SessionEvent::EntrySaved { intent, text }) => {
                        info!(list = intent.list_name(), chars = text.chars().count(), "entry filed");
                    }
                    Ok(SessionEvent::SessionFailed { reason, error }) => {
                        info!(?reason, %error, "recording discarded");
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        } => {
            info!("session event logger exited");
        }

        // Wait for shutdown signal
        result = shutdown.wait() => {
            match result {
                Ok(()) => info!("shutdown signal received"),
                Err(e) => error!(?e, "failed to install signal handlers"),
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    server.shutdown().await;

    info!("note-remind-daemon stopped");

    Ok(())
}
