use std::error::Error;

use clap::Parser;
use dotenvy::dotenv;
use tokio::sync::mpsc;

use peer_chat::common::{SessionCommand, SessionEvent};
use peer_chat::config::{self, AppConfig};
use peer_chat::network::{Libp2pTransport, MemoryNetwork, TransportEvent};
use peer_chat::session::Session;
use peer_chat::storage::{self, ClientDatabase};
use peer_chat::ui::ChatApp;

#[derive(Parser)]
#[command(
    name = "peer_chat",
    version,
    about = "Peer-to-peer text and media chat"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    /// Register under this name instead of the stored one
    #[arg(long, value_name = "NAME")]
    username: Option<String>,
    /// Use an in-process network instead of libp2p
    #[arg(long)]
    local: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);

    let database = open_database(&app_config.database_path);
    let stored_name = database
        .as_ref()
        .and_then(|db| db.load_username().ok().flatten());
    let initial_name = cli.username.or(stored_name);

    // Session -> UI
    let (event_tx, event_rx) = mpsc::channel(100);
    // UI -> Session
    let (cmd_tx, cmd_rx) = mpsc::channel(100);

    if let Err(err) = start_session(cli.local, &app_config, event_tx, cmd_rx) {
        log::error!("Failed to start network: {err}");
        return Err(err);
    }

    let options = eframe::NativeOptions::default();
    let mut event_rx = Some(event_rx);
    let mut database = Some(database);

    eframe::run_native(
        "Peer Chat",
        options,
        Box::new(move |cc| {
            let event_receiver = event_rx
                .take()
                .expect("ChatApp should only be initialized once");
            let database = database.take().flatten();

            Ok(Box::new(ChatApp::new(
                cc,
                cmd_tx.clone(),
                event_receiver,
                database,
                initial_name.clone(),
            )))
        }),
    )?;
    Ok(())
}

/// Spawns the session loop on the chosen transport.
fn start_session(
    local: bool,
    app_config: &AppConfig,
    event_tx: mpsc::Sender<SessionEvent>,
    cmd_rx: mpsc::Receiver<SessionCommand>,
) -> Result<(), Box<dyn Error>> {
    let (transport_tx, transport_rx) = mpsc::unbounded_channel::<TransportEvent>();
    if local {
        log::info!("Using in-process network");
        let transport = MemoryNetwork::new().transport(transport_tx);
        tokio::spawn(Session::new(transport, event_tx).run(cmd_rx, transport_rx));
    } else {
        let transport = Libp2pTransport::spawn(app_config.network_settings(), transport_tx)?;
        tokio::spawn(Session::new(transport, event_tx).run(cmd_rx, transport_rx));
    }
    Ok(())
}

fn open_database(path: &str) -> Option<ClientDatabase> {
    if let Err(err) = storage::ensure_parent_dir(path) {
        log::warn!("Cannot create data directory for {path}: {err}");
    }
    match ClientDatabase::with_path(path) {
        Ok(db) => Some(db),
        Err(err) => {
            log::warn!("Username will not be remembered ({path}): {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unusable_node_key_stops_startup() {
        let (event_tx, _event_rx) = mpsc::channel(1);
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);
        // A directory cannot be read as a key file.
        let app_config = AppConfig {
            key_path: std::env::temp_dir().display().to_string(),
            ..AppConfig::default()
        };

        assert!(start_session(false, &app_config, event_tx, cmd_rx).is_err());
    }

    #[tokio::test]
    async fn local_mode_answers_commands() {
        let (event_tx, mut event_rx) = mpsc::channel(8);
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        start_session(true, &AppConfig::default(), event_tx, cmd_rx).unwrap();

        cmd_tx
            .send(SessionCommand::RegisterIdentity("alice".into()))
            .await
            .unwrap();
        assert!(matches!(
            event_rx.recv().await,
            Some(SessionEvent::IdentityChanged(Some(_)))
        ));
    }
}
