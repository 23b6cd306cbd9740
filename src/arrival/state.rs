use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::SpotRecord;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MonitorStatus {
    #[default]
    Idle,
    Monitoring,
    Triggered,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum SessionPhase {
    /// Created but waiting for a previous prompt to finish closing.
    Idle,
    Prompting,
    Closing,
    Resolved,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Decision {
    Confirmed,
    Denied,
    FraudReported,
    TimedOut,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Confirmed => "confirmed",
            Decision::Denied => "denied",
            Decision::FraudReported => "fraud-reported",
            Decision::TimedOut => "timed-out",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalSession {
    pub id: String,
    pub target_spot_id: String,
    pub spot: SpotRecord,
    pub created_at: DateTime<Utc>,
    /// Wall-clock auto-dismiss time; set once the prompt starts showing.
    pub deadline: Option<DateTime<Utc>>,
    pub phase: SessionPhase,
    pub decision: Option<Decision>,
    /// Monotonic twin of `deadline`, used by the countdown timer.
    #[serde(skip)]
    pub deadline_anchor: Option<Instant>,
}

impl ArrivalSession {
    pub fn new(spot: SpotRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target_spot_id: spot.id.clone(),
            spot,
            created_at: Utc::now(),
            deadline: None,
            phase: SessionPhase::Idle,
            decision: None,
            deadline_anchor: None,
        }
    }

    pub fn begin_prompt(&mut self, timeout: Duration, now: Instant) {
        self.phase = SessionPhase::Prompting;
        self.deadline_anchor = Some(now + timeout);
        self.deadline = chrono::Duration::from_std(timeout)
            .ok()
            .map(|timeout| Utc::now() + timeout);
    }

    /// Seconds until auto-dismiss, rounded up. Zero unless prompting.
    pub fn remaining_secs(&self, now: Instant) -> u64 {
        match (self.phase, self.deadline_anchor) {
            (SessionPhase::Prompting, Some(anchor)) => {
                let remaining = anchor.saturating_duration_since(now);
                let secs = remaining.as_secs();
                if remaining.subsec_nanos() > 0 {
                    secs + 1
                } else {
                    secs
                }
            }
            _ => 0,
        }
    }

    /// The UI renders a prompt for sessions in these phases.
    pub fn is_visible(&self) -> bool {
        matches!(self.phase, SessionPhase::Prompting | SessionPhase::Closing)
    }

    /// Decision buttons are only enabled while prompting.
    pub fn accepts_input(&self) -> bool {
        self.phase == SessionPhase::Prompting
    }
}

/// Read-only view of the detector for the UI.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalSnapshot {
    pub status: MonitorStatus,
    pub selected_spot_id: Option<String>,
    pub session: Option<ArrivalSession>,
    pub countdown_secs: Option<u64>,
    pub last_distance_m: Option<f64>,
    /// Distance computations since startup, from any source.
    pub proximity_checks: u64,
}
