use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::models::{FraudReport, SpotRecord, SpotStatus};

/// Counters that support atomic increments on a spot record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpotCounter {
    FraudReports,
}

impl SpotCounter {
    pub fn column(&self) -> &'static str {
        match self {
            SpotCounter::FraudReports => "fraud_report_count",
        }
    }
}

/// Partial update of a spot. Unset fields are left untouched; `updated_at` is
/// always written.
#[derive(Debug, Clone, PartialEq)]
pub struct SpotUpdate {
    pub status: Option<SpotStatus>,
    pub last_reported_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl SpotUpdate {
    pub fn status(status: SpotStatus, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            last_reported_at: None,
            updated_at: at,
        }
    }

    pub fn flagged(at: DateTime<Utc>) -> Self {
        Self {
            status: Some(SpotStatus::Reported),
            last_reported_at: Some(at),
            updated_at: at,
        }
    }
}

/// The shared spot store. Many app instances write to it concurrently, so
/// implementations must apply counters atomically and treat status as
/// last-write-wins rather than reading and writing back.
#[async_trait]
pub trait SpotStore: Send + Sync {
    /// Live snapshots of every spot whose status is `active`. A new full snapshot
    /// is published after any change.
    fn subscribe_active(&self) -> watch::Receiver<Vec<SpotRecord>>;

    async fn fetch_spot(&self, spot_id: &str) -> Result<Option<SpotRecord>>;

    /// Keyed partial update. Fails when the spot does not exist.
    async fn update_spot(&self, spot_id: &str, update: SpotUpdate) -> Result<()>;

    /// Keyed atomic increment. Fails when the spot does not exist.
    async fn increment(&self, spot_id: &str, counter: SpotCounter, by: i64) -> Result<()>;

    /// Appends a fraud report and returns its id.
    async fn append_fraud_report(&self, report: &FraudReport) -> Result<String>;
}
