use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Row};

use crate::{
    db::{
        connection::Database,
        helpers::{parse_datetime, parse_optional_datetime, parse_spot_status, to_rfc3339},
    },
    geo::Position,
    models::{FraudReport, FraudReportStatus, FraudSeverity, UserIdentity},
};

fn parse_report_status(value: &str) -> Result<FraudReportStatus> {
    match value {
        "pending" => Ok(FraudReportStatus::Pending),
        "reviewed" => Ok(FraudReportStatus::Reviewed),
        "dismissed" => Ok(FraudReportStatus::Dismissed),
        other => Err(anyhow!("unknown fraud report status {other}")),
    }
}

fn parse_severity(value: &str) -> Result<FraudSeverity> {
    match value {
        "low" => Ok(FraudSeverity::Low),
        "medium" => Ok(FraudSeverity::Medium),
        "high" => Ok(FraudSeverity::High),
        other => Err(anyhow!("unknown fraud severity {other}")),
    }
}

fn row_to_report(row: &Row) -> Result<FraudReport> {
    let marker_status: String = row.get("marker_status")?;
    let status: String = row.get("status")?;
    let severity: String = row.get("severity")?;
    let created_at: String = row.get("created_at")?;

    Ok(FraudReport {
        id: row.get("id")?,
        reported_marker_id: row.get("reported_marker_id")?,
        reported_user: UserIdentity::new(
            row.get::<_, String>("reported_user_id")?,
            row.get::<_, String>("reported_user_email")?,
            row.get::<_, String>("reported_user_name")?,
        ),
        reporter_user: UserIdentity::new(
            row.get::<_, String>("reporter_user_id")?,
            row.get::<_, String>("reporter_user_email")?,
            row.get::<_, String>("reporter_user_name")?,
        ),
        marker_location: Position::new(row.get("marker_latitude")?, row.get("marker_longitude")?),
        marker_status: parse_spot_status(&marker_status)?,
        marker_created_at: parse_optional_datetime(row.get("marker_created_at")?, "marker_created_at")?,
        reason: row.get("reason")?,
        status: parse_report_status(&status)?,
        severity: parse_severity(&severity)?,
        additional_notes: row.get("additional_notes")?,
        report_source: row.get("report_source")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    pub async fn insert_fraud_report(&self, report: &FraudReport) -> Result<String> {
        let record = report.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO fraud_reports (
                    id, reported_marker_id,
                    reported_user_id, reported_user_email, reported_user_name,
                    reporter_user_id, reporter_user_email, reporter_user_name,
                    marker_latitude, marker_longitude, marker_status, marker_created_at,
                    reason, status, severity, additional_notes, report_source, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    record.id,
                    record.reported_marker_id,
                    record.reported_user.user_id,
                    record.reported_user.email,
                    record.reported_user.name,
                    record.reporter_user.user_id,
                    record.reporter_user.email,
                    record.reporter_user.name,
                    record.marker_location.latitude,
                    record.marker_location.longitude,
                    record.marker_status.as_str(),
                    to_rfc3339(record.marker_created_at),
                    record.reason,
                    record.status.as_str(),
                    record.severity.as_str(),
                    record.additional_notes,
                    record.report_source,
                    record.created_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert fraud report")?;
            Ok(record.id)
        })
        .await
    }

    pub async fn list_fraud_reports_for_spot(&self, spot_id: &str) -> Result<Vec<FraudReport>> {
        let spot_id = spot_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM fraud_reports
                 WHERE reported_marker_id = ?1
                 ORDER BY created_at ASC",
            )?;

            let mut rows = stmt.query(params![spot_id])?;
            let mut reports = Vec::new();
            while let Some(row) = rows.next()? {
                reports.push(row_to_report(row)?);
            }
            Ok(reports)
        })
        .await
    }
}
