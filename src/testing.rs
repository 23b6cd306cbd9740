//! In-memory doubles shared by unit tests.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::watch;

use crate::{
    fraud::{FraudFlowOutcome, FraudHandoff, FraudReportFlow},
    models::{FraudReport, SpotRecord, SpotStatus},
    store::{SpotCounter, SpotStore, SpotUpdate},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOp {
    SetStatus(String, SpotStatus),
    Increment(String, SpotCounter, i64),
    AppendFraudReport(String),
}

/// Records every write. With `failing()` every write errors after being
/// counted as an attempt.
pub struct RecordingStore {
    ops: Mutex<Vec<StoreOp>>,
    attempts: AtomicUsize,
    fail: bool,
    active: watch::Sender<Vec<SpotRecord>>,
}

impl Default for RecordingStore {
    fn default() -> Self {
        Self::with_failure(false)
    }
}

impl RecordingStore {
    pub fn failing() -> Self {
        Self::with_failure(true)
    }

    fn with_failure(fail: bool) -> Self {
        let (active, _) = watch::channel(Vec::new());
        Self {
            ops: Mutex::new(Vec::new()),
            attempts: AtomicUsize::new(0),
            fail,
            active,
        }
    }

    pub fn ops(&self) -> Vec<StoreOp> {
        self.ops.lock().expect("ops lock").clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn record(&self, op: StoreOp) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("store unavailable");
        }
        self.ops.lock().expect("ops lock").push(op);
        Ok(())
    }
}

#[async_trait]
impl SpotStore for RecordingStore {
    fn subscribe_active(&self) -> watch::Receiver<Vec<SpotRecord>> {
        self.active.subscribe()
    }

    async fn fetch_spot(&self, _spot_id: &str) -> Result<Option<SpotRecord>> {
        Ok(None)
    }

    async fn update_spot(&self, spot_id: &str, update: SpotUpdate) -> Result<()> {
        match update.status {
            Some(status) => self.record(StoreOp::SetStatus(spot_id.to_string(), status)),
            None => Ok(()),
        }
    }

    async fn increment(&self, spot_id: &str, counter: SpotCounter, by: i64) -> Result<()> {
        self.record(StoreOp::Increment(spot_id.to_string(), counter, by))
    }

    async fn append_fraud_report(&self, report: &FraudReport) -> Result<String> {
        self.record(StoreOp::AppendFraudReport(report.reported_marker_id.clone()))?;
        Ok(report.id.clone())
    }
}

/// Fraud flow that answers with a fixed outcome and remembers its handoffs.
pub struct ScriptedFraudFlow {
    outcome: FraudFlowOutcome,
    handoffs: Arc<Mutex<Vec<FraudHandoff>>>,
}

impl ScriptedFraudFlow {
    pub fn submit() -> Self {
        Self {
            outcome: FraudFlowOutcome::Submitted { notes: None },
            handoffs: Arc::default(),
        }
    }

    pub fn cancel() -> Self {
        Self {
            outcome: FraudFlowOutcome::Cancelled,
            handoffs: Arc::default(),
        }
    }

    pub fn handoffs(&self) -> Arc<Mutex<Vec<FraudHandoff>>> {
        Arc::clone(&self.handoffs)
    }
}

#[async_trait]
impl FraudReportFlow for ScriptedFraudFlow {
    async fn begin(&self, handoff: FraudHandoff) -> Result<FraudFlowOutcome> {
        self.handoffs.lock().expect("handoffs lock").push(handoff);
        Ok(self.outcome.clone())
    }
}
