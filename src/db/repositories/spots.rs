use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::{
    db::{connection::Database, helpers::to_rfc3339},
    geo::Position,
    models::{SpotDocument, SpotRecord, UserIdentity},
    store::{SpotCounter, SpotUpdate},
};

const SPOT_COLUMNS: &str = "id, latitude, longitude, status, title, description, reported_by, \
     reported_by_email, reported_by_name, fraud_report_count, created_at, updated_at, last_reported_at";

// Timestamps that fail to parse are dropped rather than failing the whole row.
fn lenient_datetime(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

fn row_to_document(row: &Row) -> Result<SpotDocument> {
    Ok(SpotDocument {
        id: row.get("id")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        coordinate: None,
        status: Some(row.get("status")?),
        title: row.get("title")?,
        description: row.get("description")?,
        reported_by: row.get("reported_by")?,
        reported_by_email: row.get("reported_by_email")?,
        reported_by_name: row.get("reported_by_name")?,
        fraud_report_count: Some(row.get("fraud_report_count")?),
        created_at: lenient_datetime(row.get("created_at")?),
        updated_at: lenient_datetime(row.get("updated_at")?),
        last_reported_at: lenient_datetime(row.get("last_reported_at")?),
    })
}

/// Every `active` spot with usable coordinates, newest first.
pub(crate) fn query_active_spots(conn: &Connection) -> Result<Vec<SpotRecord>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SPOT_COLUMNS} FROM spots WHERE status = 'active' ORDER BY created_at DESC"
    ))?;

    let mut rows = stmt.query([])?;
    let mut spots = Vec::new();
    while let Some(row) = rows.next()? {
        let document = row_to_document(row)?;
        let id = document.id.clone();
        match document.into_record() {
            Some(record) => spots.push(record),
            None => debug!("Skipping malformed spot {id} in active snapshot"),
        }
    }

    Ok(spots)
}

fn insert_document(conn: &Connection, document: &SpotDocument) -> Result<()> {
    let (latitude, longitude) = match (&document.latitude, &document.longitude) {
        (Some(lat), Some(lon)) => (Some(*lat), Some(*lon)),
        _ => {
            let nested = document.coordinate.as_ref();
            (
                document.latitude.or_else(|| nested.and_then(|c| c.latitude)),
                document.longitude.or_else(|| nested.and_then(|c| c.longitude)),
            )
        }
    };

    conn.execute(
        "INSERT OR REPLACE INTO spots (
            id, latitude, longitude, status, title, description, reported_by,
            reported_by_email, reported_by_name, fraud_report_count, created_at,
            updated_at, last_reported_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            document.id,
            latitude,
            longitude,
            document.status.as_deref().unwrap_or("active"),
            document.title,
            document.description,
            document.reported_by,
            document.reported_by_email,
            document.reported_by_name,
            document.fraud_report_count.unwrap_or(0),
            to_rfc3339(document.created_at),
            to_rfc3339(document.updated_at),
            to_rfc3339(document.last_reported_at),
        ],
    )
    .with_context(|| format!("failed to insert spot {}", document.id))?;
    Ok(())
}

impl Database {
    pub async fn insert_spot(&self, spot: &SpotRecord) -> Result<()> {
        let document = SpotDocument::from(spot.clone());
        self.execute_spot_write(move |conn| insert_document(conn, &document))
            .await
    }

    /// Records a new `active` spot at `location`, attributed to `reporter`.
    pub async fn report_spot(
        &self,
        location: Position,
        reporter: &UserIdentity,
    ) -> Result<SpotRecord> {
        if !location.is_valid() {
            bail!(
                "cannot report a spot at invalid position ({}, {})",
                location.latitude,
                location.longitude
            );
        }
        let spot = SpotRecord::reported_at(
            Uuid::new_v4().to_string(),
            location,
            reporter,
            Utc::now(),
        );
        self.insert_spot(&spot).await?;
        Ok(spot)
    }

    /// Bulk-loads raw documents as-is. Documents with missing coordinates are
    /// stored too; they are simply never part of the active snapshot.
    pub async fn import_documents(&self, documents: Vec<SpotDocument>) -> Result<usize> {
        self.execute_spot_write(move |conn| {
            let tx = conn
                .transaction()
                .context("failed to open import transaction")?;
            let mut imported = 0;
            for document in &documents {
                if document.id.trim().is_empty() {
                    continue;
                }
                insert_document(&tx, document)?;
                imported += 1;
            }
            tx.commit().context("failed to commit spot import")?;
            Ok(imported)
        })
        .await
    }

    pub async fn list_active_spots(&self) -> Result<Vec<SpotRecord>> {
        self.execute(|conn| query_active_spots(conn)).await
    }

    pub async fn get_spot(&self, spot_id: &str) -> Result<Option<SpotRecord>> {
        let spot_id = spot_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!("SELECT {SPOT_COLUMNS} FROM spots WHERE id = ?1"))?;
            let mut rows = stmt.query(params![spot_id])?;
            let document = match rows.next()? {
                Some(row) => Some(row_to_document(row)?),
                None => None,
            };
            Ok(document.and_then(SpotDocument::into_record))
        })
        .await
    }

    pub async fn update_spot_fields(&self, spot_id: &str, update: SpotUpdate) -> Result<()> {
        let spot_id = spot_id.to_string();
        self.execute_spot_write(move |conn| {
            let changed = conn
                .execute(
                    "UPDATE spots
                     SET status = COALESCE(?1, status),
                         last_reported_at = COALESCE(?2, last_reported_at),
                         updated_at = ?3
                     WHERE id = ?4",
                    params![
                        update.status.map(|status| status.as_str()),
                        to_rfc3339(update.last_reported_at),
                        update.updated_at.to_rfc3339(),
                        spot_id,
                    ],
                )
                .with_context(|| format!("failed to update spot {spot_id}"))?;
            if changed == 0 {
                bail!("spot {spot_id} not found");
            }
            Ok(())
        })
        .await
    }

    /// Applies the increment inside SQLite so concurrent writers never lose a
    /// count.
    pub async fn increment_counter(
        &self,
        spot_id: &str,
        counter: SpotCounter,
        by: i64,
    ) -> Result<()> {
        let spot_id = spot_id.to_string();
        self.execute_spot_write(move |conn| {
            let column = counter.column();
            let changed = conn
                .execute(
                    &format!(
                        "UPDATE spots SET {column} = {column} + ?1, updated_at = ?2 WHERE id = ?3"
                    ),
                    params![by, Utc::now().to_rfc3339(), spot_id],
                )
                .with_context(|| format!("failed to increment {column} on spot {spot_id}"))?;
            if changed == 0 {
                bail!("spot {spot_id} not found");
            }
            Ok(())
        })
        .await
    }
}
