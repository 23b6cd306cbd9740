use std::{fs, path::Path};

use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    arrival::{ArrivalSnapshot, DetectorConfig, MonitorStatus},
    board::NearbySpot,
    geo::Position,
    models::{SpotDocument, SpotRecord},
    settings::ArrivalSettings,
    AppState,
};

/// One line of shell input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Report a spot at the given coordinates, or at the current position.
    Report(Option<Position>),
    Import(String),
    Spots,
    Nearby,
    Select(String),
    Clear,
    Position(Position),
    Lost,
    Confirm,
    Deny,
    Fraud,
    Status,
    Settings,
    /// Change one arrival setting by its `settings.json` key.
    Set(String, String),
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let name = parts.next().ok_or_else(|| "empty command".to_string())?;
        let args: Vec<&str> = parts.collect();

        let command = match (name, args.as_slice()) {
            ("report", []) => Command::Report(None),
            ("report", [lat, lon]) => Command::Report(Some(parse_position(lat, lon)?)),
            ("import", [path]) => Command::Import((*path).to_string()),
            ("spots", []) => Command::Spots,
            ("nearby", []) => Command::Nearby,
            ("select", [id]) => Command::Select((*id).to_string()),
            ("clear", []) => Command::Clear,
            ("pos", [lat, lon]) => Command::Position(parse_position(lat, lon)?),
            ("lost", []) => Command::Lost,
            ("yes", []) => Command::Confirm,
            ("no", []) => Command::Deny,
            ("fraud", []) => Command::Fraud,
            ("status", []) => Command::Status,
            ("settings", []) => Command::Settings,
            ("set", [key, value]) => Command::Set((*key).to_string(), (*value).to_string()),
            ("quit" | "exit", []) => Command::Quit,
            (
                "report" | "import" | "spots" | "nearby" | "select" | "clear" | "pos" | "lost"
                | "yes" | "no" | "fraud" | "status" | "settings" | "set" | "quit" | "exit",
                _,
            ) => return Err(format!("wrong arguments for `{name}`")),
            _ => return Err(format!("unknown command `{name}`")),
        };
        Ok(command)
    }
}

fn parse_position(lat: &str, lon: &str) -> Result<Position, String> {
    let latitude: f64 = lat
        .parse()
        .map_err(|_| format!("invalid latitude `{lat}`"))?;
    let longitude: f64 = lon
        .parse()
        .map_err(|_| format!("invalid longitude `{lon}`"))?;
    Ok(Position::new(latitude, longitude))
}

/// Runs a command and returns what to print, if anything.
pub async fn dispatch(state: &AppState, command: Command) -> Result<Option<Value>, String> {
    let output = match command {
        Command::Report(at) => to_json(&report_spot(state, at).await?)?,
        Command::Import(path) => json!({ "imported": import_spots(state, Path::new(&path)).await? }),
        Command::Spots => to_json(&list_spots(state))?,
        Command::Nearby => to_json(&nearby_spots(state).await?)?,
        Command::Select(spot_id) => to_json(&select_spot(state, &spot_id).await?)?,
        Command::Clear => to_json(&clear_selection(state).await?)?,
        Command::Position(position) => {
            state.detector.update_position(position).await;
            return Ok(None);
        }
        Command::Lost => {
            state.detector.clear_position().await;
            return Ok(None);
        }
        Command::Confirm => json!({ "accepted": state.detector.confirm().await }),
        Command::Deny => json!({ "accepted": state.detector.deny().await }),
        Command::Fraud => json!({ "accepted": state.detector.report_fraud().await }),
        Command::Status => to_json(&get_arrival_state(state).await)?,
        Command::Settings => to_json(&state.settings.arrival())?,
        Command::Set(key, value) => to_json(&update_setting(state, &key, &value).await?)?,
        Command::Quit => return Ok(None),
    };
    Ok(Some(output))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

pub async fn report_spot(state: &AppState, at: Option<Position>) -> Result<SpotRecord, String> {
    let location = match at {
        Some(position) => position,
        None => state
            .detector
            .position()
            .await
            .ok_or_else(|| "no current position; use `pos <lat> <lon>` first".to_string())?,
    };
    state
        .db
        .report_spot(location, &state.identity)
        .await
        .map_err(|e| e.to_string())
}

pub async fn import_spots(state: &AppState, path: &Path) -> Result<usize, String> {
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let documents: Vec<SpotDocument> =
        serde_json::from_str(&contents).map_err(|e| format!("invalid spot file: {e}"))?;
    state
        .db
        .import_documents(documents)
        .await
        .map_err(|e| e.to_string())
}

pub fn list_spots(state: &AppState) -> Vec<SpotRecord> {
    state.board.spots()
}

pub async fn nearby_spots(state: &AppState) -> Result<Vec<NearbySpot>, String> {
    let position = state
        .detector
        .position()
        .await
        .ok_or_else(|| "no current position".to_string())?;
    let radius_m = state.settings.arrival().nearby_radius_m;
    Ok(state.board.nearby(&position, radius_m))
}

pub async fn select_spot(state: &AppState, spot_id: &str) -> Result<MonitorStatus, String> {
    let spot = state
        .board
        .find(spot_id)
        .ok_or_else(|| format!("spot {spot_id} is not an active spot"))?;
    state
        .detector
        .select_spot(Some(spot))
        .await
        .map_err(|e| e.to_string())
}

pub async fn clear_selection(state: &AppState) -> Result<MonitorStatus, String> {
    state
        .detector
        .clear_selection()
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_arrival_state(state: &AppState) -> ArrivalSnapshot {
    state.detector.snapshot().await
}

/// Validates and persists the change, then hands the new tunables to the
/// detector.
pub async fn update_setting(
    state: &AppState,
    key: &str,
    value: &str,
) -> Result<ArrivalSettings, String> {
    let updated = state
        .settings
        .arrival()
        .with_value(key, value)
        .map_err(|e| format!("{e:#}"))?;
    state
        .settings
        .update_arrival(updated.clone())
        .map_err(|e| e.to_string())?;
    state
        .detector
        .reconfigure(DetectorConfig::from_settings(&updated, state.verbose))
        .await;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::Database, models::UserIdentity, settings::SettingsStore};
    use tempfile::tempdir;
    use tokio::time::{sleep, Duration};

    #[test]
    fn parses_commands_and_rejects_bad_input() {
        assert_eq!(Command::parse("yes"), Ok(Command::Confirm));
        assert_eq!(
            Command::parse("  pos -25.95  28.1 "),
            Ok(Command::Position(Position::new(-25.95, 28.1)))
        );
        assert_eq!(Command::parse("report"), Ok(Command::Report(None)));
        assert_eq!(
            Command::parse("select abc"),
            Ok(Command::Select("abc".to_string()))
        );
        assert!(Command::parse("").is_err());
        assert!(Command::parse("pos 1").is_err());
        assert!(Command::parse("pos north 1").is_err());
        assert!(Command::parse("dance").is_err());
        assert_eq!(
            Command::parse("set proximityThresholdM 30"),
            Ok(Command::Set("proximityThresholdM".into(), "30".into()))
        );
        assert!(Command::parse("set proximityThresholdM").is_err());
    }

    #[tokio::test]
    async fn report_select_and_confirm_round_trip() {
        let dir = tempdir().expect("tempdir");
        let db = Database::open_in_memory().expect("db");
        let settings = SettingsStore::new(dir.path().join("settings.json")).expect("settings");
        let state = AppState::new(db, settings, UserIdentity::anonymous_reporter(), false);

        dispatch(&state, Command::parse("pos -25.95 28.10").expect("parse"))
            .await
            .expect("pos");
        let reported = report_spot(&state, None).await.expect("report");
        assert_eq!(list_spots(&state).len(), 1);
        assert_eq!(nearby_spots(&state).await.expect("nearby").len(), 1);

        let status = select_spot(&state, &reported.id).await.expect("select");
        assert_eq!(status, MonitorStatus::Triggered);
        assert!(select_spot(&state, "missing").await.is_err());

        // Selecting "missing" failed before touching the detector.
        assert_eq!(
            get_arrival_state(&state).await.status,
            MonitorStatus::Triggered
        );
        assert!(state.detector.confirm().await);

        for _ in 0..50 {
            if list_spots(&state).is_empty() {
                break;
            }
            sleep(Duration::from_millis(20)).await;
        }
        assert!(list_spots(&state).is_empty());
        state.detector.shutdown().await;
    }

    #[tokio::test]
    async fn changed_threshold_reaches_the_detector() {
        let dir = tempdir().expect("tempdir");
        let db = Database::open_in_memory().expect("db");
        let settings = SettingsStore::new(dir.path().join("settings.json")).expect("settings");
        let state = AppState::new(db, settings, UserIdentity::anonymous_reporter(), false);

        let spot = report_spot(&state, Some(Position::new(-25.95, 28.10)))
            .await
            .expect("report");
        // Roughly 11m north of the spot.
        state
            .detector
            .update_position(Position::new(-25.9499, 28.10))
            .await;

        let updated = update_setting(&state, "proximityThresholdM", "5")
            .await
            .expect("set");
        assert_eq!(updated.proximity_threshold_m, 5.0);
        assert!(update_setting(&state, "proximityThresholdM", "0").await.is_err());
        assert_eq!(state.settings.arrival().proximity_threshold_m, 5.0);

        let status = select_spot(&state, &spot.id).await.expect("select");
        assert_eq!(status, MonitorStatus::Monitoring);

        update_setting(&state, "proximityThresholdM", "50")
            .await
            .expect("set");
        let status = select_spot(&state, &spot.id).await.expect("reselect");
        assert_eq!(status, MonitorStatus::Triggered);
        state.detector.shutdown().await;
    }
}
