use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::{
    arrival::Decision,
    events::{EventBus, UserNotice},
    fraud::{obfuscate_email, FraudFlowOutcome, FraudHandoff, FraudReportFlow},
    models::{FraudReport, SpotRecord, SpotStatus, UserIdentity},
    store::{SpotCounter, SpotStore, SpotUpdate},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// What a resolution did to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Written,
    /// Nothing to write (timeouts).
    Skipped,
    FraudCancelled,
    /// The write failed; the user was notified and nothing is retried.
    Failed(String),
}

/// Turns arrival decisions into writes against the shared spot store.
#[derive(Clone)]
pub struct SpotStatusReconciler {
    store: Arc<dyn SpotStore>,
    fraud_flow: Arc<dyn FraudReportFlow>,
    reporter: UserIdentity,
    events: EventBus,
}

impl SpotStatusReconciler {
    pub fn new(
        store: Arc<dyn SpotStore>,
        fraud_flow: Arc<dyn FraudReportFlow>,
        reporter: UserIdentity,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            fraud_flow,
            reporter,
            events,
        }
    }

    pub async fn resolve(&self, spot: &SpotRecord, decision: Decision) -> ReconcileOutcome {
        log_info!("Reconciling spot {} as {}", spot.id, decision.as_str());
        match decision {
            Decision::Confirmed => {
                let outcome = self.write_status(spot, SpotStatus::Removed).await;
                if outcome == ReconcileOutcome::Written {
                    self.events
                        .notify(UserNotice::info("Thank you!", "Your confirmation helps others."));
                }
                outcome
            }
            Decision::Denied => self.write_status(spot, SpotStatus::Active).await,
            Decision::TimedOut => ReconcileOutcome::Skipped,
            Decision::FraudReported => self.report_fraud(spot).await,
        }
    }

    async fn write_status(&self, spot: &SpotRecord, status: SpotStatus) -> ReconcileOutcome {
        match self
            .store
            .update_spot(&spot.id, SpotUpdate::status(status, Utc::now()))
            .await
        {
            Ok(()) => ReconcileOutcome::Written,
            Err(err) => {
                log_error!("Failed to set spot {} to {}: {err:#}", spot.id, status);
                self.events
                    .notify(UserNotice::error("Error", "Failed to update status."));
                ReconcileOutcome::Failed(format!("{err:#}"))
            }
        }
    }

    async fn report_fraud(&self, spot: &SpotRecord) -> ReconcileOutcome {
        let reported = spot.reporter();
        let handoff = FraudHandoff {
            spot_id: spot.id.clone(),
            reporter: self.reporter.clone(),
            reported: reported.clone(),
        };

        let notes = match self.fraud_flow.begin(handoff).await {
            Ok(FraudFlowOutcome::Submitted { notes }) => notes,
            Ok(FraudFlowOutcome::Cancelled) => {
                log_info!("Fraud report for spot {} cancelled by user", spot.id);
                return ReconcileOutcome::FraudCancelled;
            }
            Err(err) => {
                log_error!("Fraud report flow failed for spot {}: {err:#}", spot.id);
                self.events
                    .notify(UserNotice::error("Error", "Could not start report process."));
                return ReconcileOutcome::Failed(format!("{err:#}"));
            }
        };

        let now = Utc::now();
        let report = FraudReport::for_spot(
            Uuid::new_v4().to_string(),
            spot,
            &self.reporter,
            notes,
            now,
        );
        if let Err(err) = self.store.append_fraud_report(&report).await {
            log_error!("Failed to append fraud report for spot {}: {err:#}", spot.id);
            self.events.notify(UserNotice::error(
                "Error",
                format!("Could not submit report: {err}"),
            ));
            return ReconcileOutcome::Failed(format!("{err:#}"));
        }

        // The report itself is stored; a failed flag update only leaves the
        // listing stale.
        if let Err(err) = self
            .store
            .increment(&spot.id, SpotCounter::FraudReports, 1)
            .await
        {
            log_warn!("Failed to bump fraud count on spot {}: {err:#}", spot.id);
        }
        if let Err(err) = self.store.update_spot(&spot.id, SpotUpdate::flagged(now)).await {
            log_warn!("Failed to flag spot {} as reported: {err:#}", spot.id);
        }

        self.events.notify(UserNotice::info(
            "Report Submitted",
            format!(
                "User {} has been reported for fraudulent parking spot.\n\nOur admin will review this case.",
                obfuscate_email(&reported.email)
            ),
        ));
        ReconcileOutcome::Written
    }
}
