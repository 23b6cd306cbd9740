use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::PathBuf,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

const ENABLE_LOGS: bool = true;

use crate::log_warn;

/// Tunables of the arrival flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArrivalSettings {
    pub proximity_threshold_m: f64,
    pub poll_interval_secs: u64,
    pub prompt_timeout_secs: u64,
    pub fade_in_ms: u64,
    pub closing_ms: u64,
    pub countdown_refresh_ms: u64,
    /// Radius for the "spots near me" listing.
    pub nearby_radius_m: f64,
}

impl Default for ArrivalSettings {
    fn default() -> Self {
        Self {
            proximity_threshold_m: 50.0,
            poll_interval_secs: 5,
            prompt_timeout_secs: 15,
            fade_in_ms: 500,
            closing_ms: 300,
            countdown_refresh_ms: 1000,
            nearby_radius_m: 500.0,
        }
    }
}

impl ArrivalSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.proximity_threshold_m.is_finite() && self.proximity_threshold_m > 0.0) {
            bail!(
                "proximityThresholdM must be a positive number, got {}",
                self.proximity_threshold_m
            );
        }
        if !(self.nearby_radius_m.is_finite() && self.nearby_radius_m > 0.0) {
            bail!(
                "nearbyRadiusM must be a positive number, got {}",
                self.nearby_radius_m
            );
        }
        if self.poll_interval_secs == 0 {
            bail!("pollIntervalSecs must be at least 1");
        }
        if self.prompt_timeout_secs == 0 {
            bail!("promptTimeoutSecs must be at least 1");
        }
        if self.countdown_refresh_ms == 0 {
            bail!("countdownRefreshMs must be at least 1");
        }
        Ok(())
    }

    /// Copy with one field changed, addressed by its camelCase key as it
    /// appears in `settings.json`. The result is not validated.
    pub fn with_value(&self, key: &str, raw: &str) -> Result<Self> {
        let mut fields = match serde_json::to_value(self)? {
            serde_json::Value::Object(fields) => fields,
            _ => bail!("arrival settings did not serialize to an object"),
        };
        if !fields.contains_key(key) {
            bail!("unknown setting `{key}`");
        }
        let value: serde_json::Value = match raw.parse::<u64>() {
            Ok(int) => int.into(),
            Err(_) => raw
                .parse::<f64>()
                .map_err(|_| anyhow!("`{raw}` is not a number"))?
                .into(),
        };
        fields.insert(key.to_string(), value);
        serde_json::from_value(serde_json::Value::Object(fields))
            .with_context(|| format!("invalid value `{raw}` for `{key}`"))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct UserSettings {
    arrival: ArrivalSettings,
}

impl UserSettings {
    fn sanitized(mut self) -> Self {
        if let Err(err) = self.arrival.validate() {
            log_warn!("Invalid arrival settings ({err}); using defaults");
            self.arrival = ArrivalSettings::default();
        }
        self
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<UserSettings>(&contents) {
                Ok(data) => data.sanitized(),
                Err(err) => {
                    log_warn!(
                        "Unreadable settings at {} ({err}); using defaults",
                        path.display()
                    );
                    UserSettings::default()
                }
            }
        } else {
            UserSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn arrival(&self) -> ArrivalSettings {
        self.read().arrival.clone()
    }

    pub fn update_arrival(&self, settings: ArrivalSettings) -> Result<()> {
        settings.validate()?;
        let mut guard = self.write();
        let mut updated = guard.clone();
        updated.arrival = settings;
        self.persist(&updated)?;
        *guard = updated;
        Ok(())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    // A writer panicking mid-update leaves plain data behind; keep serving it.
    fn read(&self) -> RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserSettings> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
