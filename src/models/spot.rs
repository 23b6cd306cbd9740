use std::{fmt, str::FromStr};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Position;

use super::UserIdentity;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SpotStatus {
    /// Visible to everyone and a candidate for navigation.
    #[default]
    Active,
    /// Flagged as fraudulent and waiting for admin review.
    Reported,
    /// Confirmed gone and hidden from listings.
    Removed,
}

impl SpotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpotStatus::Active => "active",
            SpotStatus::Reported => "reported",
            SpotStatus::Removed => "removed",
        }
    }
}

impl FromStr for SpotStatus {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "active" => Ok(SpotStatus::Active),
            "reported" => Ok(SpotStatus::Reported),
            "removed" => Ok(SpotStatus::Removed),
            other => Err(anyhow!("unknown spot status '{other}'")),
        }
    }
}

impl fmt::Display for SpotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reported parking spot with usable coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotRecord {
    pub id: String,
    pub location: Position,
    pub status: SpotStatus,
    pub title: String,
    pub description: String,
    pub reported_by: String,
    pub reported_by_email: String,
    pub reported_by_name: String,
    pub fraud_report_count: u32,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_reported_at: Option<DateTime<Utc>>,
}

impl SpotRecord {
    pub const DEFAULT_TITLE: &'static str = "Available Parking";
    pub const DEFAULT_DESCRIPTION: &'static str = "Tap for directions";

    /// A fresh `active` spot reported by `reporter` at `location`.
    pub fn reported_at(
        id: impl Into<String>,
        location: Position,
        reporter: &UserIdentity,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            location,
            status: SpotStatus::Active,
            title: Self::DEFAULT_TITLE.into(),
            description: Self::DEFAULT_DESCRIPTION.into(),
            reported_by: reporter.user_id.clone(),
            reported_by_email: reporter.email.clone(),
            reported_by_name: reporter.name.clone(),
            fraud_report_count: 0,
            created_at: Some(created_at),
            updated_at: Some(created_at),
            last_reported_at: None,
        }
    }

    /// Identity of whoever originally reported the spot.
    pub fn reporter(&self) -> UserIdentity {
        UserIdentity::new(
            self.reported_by.clone(),
            self.reported_by_email.clone(),
            self.reported_by_name.clone(),
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NestedCoordinate {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// A spot as it arrives from a store snapshot or an import file, before
/// validation. Coordinates may sit at the top level or under `coordinate`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpotDocument {
    pub id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub coordinate: Option<NestedCoordinate>,
    pub status: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub reported_by: Option<String>,
    pub reported_by_email: Option<String>,
    pub reported_by_name: Option<String>,
    pub fraud_report_count: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_reported_at: Option<DateTime<Utc>>,
}

impl SpotDocument {
    fn position(&self) -> Option<Position> {
        let nested = self.coordinate.as_ref();
        let latitude = self.latitude.or_else(|| nested.and_then(|c| c.latitude))?;
        let longitude = self
            .longitude
            .or_else(|| nested.and_then(|c| c.longitude))?;
        let position = Position::new(latitude, longitude);
        position.is_valid().then_some(position)
    }

    /// Validates the document. Returns `None` for records without usable
    /// coordinates, an empty id, or an unknown status; callers drop those.
    pub fn into_record(self) -> Option<SpotRecord> {
        if self.id.trim().is_empty() {
            return None;
        }
        let location = self.position()?;
        let status = match self.status.as_deref() {
            None | Some("") => SpotStatus::Active,
            Some(raw) => raw.parse().ok()?,
        };

        Some(SpotRecord {
            id: self.id,
            location,
            status,
            title: non_empty_or(self.title, SpotRecord::DEFAULT_TITLE),
            description: non_empty_or(self.description, SpotRecord::DEFAULT_DESCRIPTION),
            reported_by: non_empty_or(self.reported_by, "anonymous"),
            reported_by_email: non_empty_or(self.reported_by_email, "anonymous@example.com"),
            reported_by_name: non_empty_or(self.reported_by_name, "Anonymous User"),
            fraud_report_count: self
                .fraud_report_count
                .map(|count| count.clamp(0, u32::MAX as i64) as u32)
                .unwrap_or(0),
            created_at: self.created_at,
            updated_at: self.updated_at,
            last_reported_at: self.last_reported_at,
        })
    }
}

impl From<SpotRecord> for SpotDocument {
    fn from(record: SpotRecord) -> Self {
        Self {
            id: record.id,
            latitude: Some(record.location.latitude),
            longitude: Some(record.location.longitude),
            coordinate: None,
            status: Some(record.status.as_str().to_string()),
            title: Some(record.title),
            description: Some(record.description),
            reported_by: Some(record.reported_by),
            reported_by_email: Some(record.reported_by_email),
            reported_by_name: Some(record.reported_by_name),
            fraud_report_count: Some(record.fraud_report_count as i64),
            created_at: record.created_at,
            updated_at: record.updated_at,
            last_reported_at: record.last_reported_at,
        }
    }
}

fn non_empty_or(value: Option<String>, default: &str) -> String {
    value
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}
