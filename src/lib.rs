pub mod arrival;
pub mod board;
pub mod commands;
pub mod db;
pub mod events;
pub mod fraud;
pub mod geo;
pub mod models;
pub mod reconciler;
pub mod settings;
pub mod store;
mod utils;

#[cfg(test)]
mod testing;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use arrival::{ArrivalDetector, DetectorConfig};
use board::SpotBoard;
use commands::Command;
use db::Database;
use events::{ArrivalEvent, EventBus};
use fraud::AutoSubmitFraudFlow;
use log::{info, warn};
use models::UserIdentity;
use reconciler::SpotStatusReconciler;
use settings::SettingsStore;
use store::SpotStore;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast::error::RecvError,
};

pub struct AppState {
    pub(crate) db: Database,
    pub(crate) board: SpotBoard,
    pub(crate) detector: ArrivalDetector,
    pub(crate) settings: SettingsStore,
    pub(crate) identity: UserIdentity,
    pub(crate) events: EventBus,
    pub(crate) verbose: bool,
}

impl AppState {
    /// Wires the detector to the database. Must be called inside a tokio
    /// runtime.
    pub fn new(
        db: Database,
        settings: SettingsStore,
        identity: UserIdentity,
        verbose: bool,
    ) -> Self {
        let events = EventBus::new();
        let store: Arc<dyn SpotStore> = Arc::new(db.clone());
        let board = SpotBoard::new(store.subscribe_active());
        let reconciler = SpotStatusReconciler::new(
            store,
            Arc::new(AutoSubmitFraudFlow),
            identity.clone(),
            events.clone(),
        );
        let config = DetectorConfig::from_settings(&settings.arrival(), verbose);
        let detector = ArrivalDetector::new(config, reconciler, events.clone());

        Self {
            db,
            board,
            detector,
            settings,
            identity,
            events,
            verbose,
        }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ArrivalEvent> {
        self.events.subscribe()
    }
}

fn data_dir() -> PathBuf {
    std::env::var_os("PARKSPOT_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("./parkspot-data"))
}

fn debug_enabled() -> bool {
    std::env::var("PARKSPOT_DEBUG")
        .map(|value| matches!(value.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

pub async fn run() -> anyhow::Result<()> {
    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    info!("ParkSpot starting up...");

    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("Failed to create data dir {}", data_dir.display()))?;

    let database = Database::new(data_dir.join("parkspot.sqlite3"))?;
    let settings = SettingsStore::new(data_dir.join("settings.json"))?;
    let identity = UserIdentity::from_env();
    info!("Acting as {} ({})", identity.name, identity.user_id);

    let state = AppState::new(database, settings, identity, debug_enabled());

    let mut events = state.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!("Failed to serialize event: {err}"),
                },
                Err(RecvError::Lagged(skipped)) => warn!("Event printer lagged by {skipped}"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                println!("{}", serde_json::json!({ "error": err }));
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        match commands::dispatch(&state, command).await {
            Ok(Some(output)) => println!("{output}"),
            Ok(None) => {}
            Err(err) => println!("{}", serde_json::json!({ "error": err })),
        }
    }

    info!("ParkSpot shutting down");
    state.detector.shutdown().await;
    printer.abort();
    Ok(())
}
