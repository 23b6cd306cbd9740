use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Position;

use super::{SpotRecord, SpotStatus, UserIdentity};

pub const FRAUD_REASON_NOT_AVAILABLE: &str = "Parking spot not available upon arrival";

const REPORT_SOURCE: &str = "parkspot";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FraudReportStatus {
    Pending,
    Reviewed,
    Dismissed,
}

impl FraudReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FraudReportStatus::Pending => "pending",
            FraudReportStatus::Reviewed => "reviewed",
            FraudReportStatus::Dismissed => "dismissed",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum FraudSeverity {
    Low,
    Medium,
    High,
}

impl FraudSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            FraudSeverity::Low => "low",
            FraudSeverity::Medium => "medium",
            FraudSeverity::High => "high",
        }
    }
}

/// A dispute appended to the shared store when a user says a spot was never
/// really available. Reviewed by an admin outside this crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FraudReport {
    pub id: String,
    pub reported_marker_id: String,
    pub reported_user: UserIdentity,
    pub reporter_user: UserIdentity,
    pub marker_location: Position,
    pub marker_status: SpotStatus,
    pub marker_created_at: Option<DateTime<Utc>>,
    pub reason: String,
    pub status: FraudReportStatus,
    pub severity: FraudSeverity,
    pub additional_notes: String,
    pub report_source: String,
    pub created_at: DateTime<Utc>,
}

impl FraudReport {
    pub fn for_spot(
        id: String,
        spot: &SpotRecord,
        reporter: &UserIdentity,
        notes: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            reported_marker_id: spot.id.clone(),
            reported_user: spot.reporter(),
            reporter_user: reporter.clone(),
            marker_location: spot.location,
            marker_status: spot.status,
            marker_created_at: spot.created_at,
            reason: FRAUD_REASON_NOT_AVAILABLE.to_string(),
            status: FraudReportStatus::Pending,
            severity: FraudSeverity::Medium,
            additional_notes: notes.unwrap_or_default(),
            report_source: REPORT_SOURCE.to_string(),
            created_at,
        }
    }
}
