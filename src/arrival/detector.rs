use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    events::{ArrivalEvent, EventBus},
    geo::Position,
    models::SpotRecord,
    reconciler::SpotStatusReconciler,
    settings::ArrivalSettings,
};

use super::{
    prompt::{PromptController, PromptSignal, PromptTimings},
    ArrivalSession, ArrivalSnapshot, Decision, MonitorStatus,
};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_verbose, log_warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    pub proximity_threshold_m: f64,
    pub poll_interval: Duration,
    pub prompt: PromptTimings,
    /// Log poll ticks and countdown refreshes at info instead of debug.
    pub verbose: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            proximity_threshold_m: 50.0,
            poll_interval: Duration::from_secs(5),
            prompt: PromptTimings::default(),
            verbose: false,
        }
    }
}

impl DetectorConfig {
    pub fn from_settings(settings: &ArrivalSettings, verbose: bool) -> Self {
        Self {
            proximity_threshold_m: settings.proximity_threshold_m,
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            prompt: PromptTimings {
                timeout: Duration::from_secs(settings.prompt_timeout_secs),
                fade_in: Duration::from_millis(settings.fade_in_ms),
                closing: Duration::from_millis(settings.closing_ms),
                countdown_refresh: Duration::from_millis(settings.countdown_refresh_ms),
            },
            verbose,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckSource {
    Selection,
    Position,
    Poll,
}

struct Poller {
    token: CancellationToken,
    // Detached on stop; the loop exits through the token.
    _handle: JoinHandle<()>,
}

#[derive(Default)]
struct DetectorState {
    config: DetectorConfig,
    status: MonitorStatus,
    selected: Option<SpotRecord>,
    position: Option<Position>,
    active_session_id: Option<String>,
    /// Fraud decision waiting for its prompt to be hidden before the report
    /// flow may start.
    pending_fraud: Option<ArrivalSession>,
    last_distance_m: Option<f64>,
    proximity_checks: u64,
    poll_generation: u64,
    poller: Option<Poller>,
}

/// The arrival state machine. Every input (selection, position, poll tick,
/// user decision, prompt timer signal) goes through the one state mutex, and
/// anything that completes asynchronously is matched against the active
/// session id before it may change state.
#[derive(Clone)]
pub struct ArrivalDetector {
    state: Arc<Mutex<DetectorState>>,
    prompt: PromptController,
    reconciler: SpotStatusReconciler,
    events: EventBus,
    /// Outstanding store writes; drained on shutdown.
    writes: TaskTracker,
    shutdown: CancellationToken,
}

impl ArrivalDetector {
    /// Must be called from within a tokio runtime.
    pub fn new(config: DetectorConfig, reconciler: SpotStatusReconciler, events: EventBus) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let prompt = PromptController::new(config.prompt, events.clone(), signal_tx, config.verbose);

        let detector = Self {
            state: Arc::new(Mutex::new(DetectorState {
                config,
                ..DetectorState::default()
            })),
            prompt,
            reconciler,
            events,
            writes: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        };

        tokio::spawn(signal_pump(
            detector.clone(),
            signal_rx,
            detector.shutdown.clone(),
        ));

        detector
    }

    /// Swaps in new tunables. The threshold applies to the next check, the
    /// poll period to the next selection and prompt timings to the next prompt.
    pub async fn reconfigure(&self, config: DetectorConfig) {
        let mut state = self.state.lock().await;
        state.config = config;
        self.prompt.set_timings(config.prompt).await;
        log_info!(
            "Arrival settings updated: {:.0}m threshold, {}s poll",
            config.proximity_threshold_m,
            config.poll_interval.as_secs()
        );
    }

    pub async fn snapshot(&self) -> ArrivalSnapshot {
        let state = self.state.lock().await;
        ArrivalSnapshot {
            status: state.status,
            selected_spot_id: state.selected.as_ref().map(|spot| spot.id.clone()),
            session: self.prompt.current_session().await,
            countdown_secs: self.prompt.countdown_secs().await,
            last_distance_m: state.last_distance_m,
            proximity_checks: state.proximity_checks,
        }
    }

    /// Selects a spot to navigate to, or clears the selection with `None`.
    /// Whatever was in flight for the previous selection is cancelled first,
    /// and the new spot is checked right away.
    pub async fn select_spot(&self, spot: Option<SpotRecord>) -> Result<MonitorStatus> {
        if let Some(spot) = spot.as_ref() {
            if !spot.location.is_valid() {
                bail!("spot {} has no usable coordinates", spot.id);
            }
        }

        let mut state = self.state.lock().await;
        self.stop_polling_locked(&mut state);
        if let Some(cancelled) = self.prompt.cancel().await {
            log_info!("Selection changed; prompt {cancelled} discarded");
        }
        if let Some(previous) = state.active_session_id.take() {
            log_info!("Selection changed; session {previous} dropped without a decision");
        }
        state.last_distance_m = None;
        state.selected = spot;

        match state.selected.as_ref().map(|spot| spot.id.clone()) {
            Some(spot_id) => {
                log_info!("Monitoring spot {spot_id}");
                state.status = MonitorStatus::Monitoring;
                self.start_polling_locked(&mut state);
                self.emit_state_locked(&state);
                self.evaluate_locked(&mut state, CheckSource::Selection).await;
            }
            None => {
                log_info!("Selection cleared");
                state.status = MonitorStatus::Idle;
                self.emit_state_locked(&state);
            }
        }

        Ok(state.status)
    }

    pub async fn clear_selection(&self) -> Result<MonitorStatus> {
        self.select_spot(None).await
    }

    /// Feeds a position reading. Invalid readings count as "no position".
    pub async fn update_position(&self, position: Position) {
        let mut state = self.state.lock().await;
        if !position.is_valid() {
            log_warn!(
                "Ignoring invalid position ({}, {})",
                position.latitude,
                position.longitude
            );
            state.position = None;
            return;
        }
        state.position = Some(position);
        self.evaluate_locked(&mut state, CheckSource::Position).await;
    }

    pub async fn position(&self) -> Option<Position> {
        self.state.lock().await.position
    }

    /// The position source lost its fix; checks are skipped until the next
    /// reading.
    pub async fn clear_position(&self) {
        self.state.lock().await.position = None;
    }

    pub async fn confirm(&self) -> bool {
        self.decide(Decision::Confirmed).await
    }

    pub async fn deny(&self) -> bool {
        self.decide(Decision::Denied).await
    }

    pub async fn report_fraud(&self) -> bool {
        self.decide(Decision::FraudReported).await
    }

    /// Stops timers and waits for every decision already taken to reach the
    /// store (or to fail and notify).
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            self.stop_polling_locked(&mut state);
            self.prompt.shutdown().await;
            // The closing animation was cut short, so its hide never comes.
            if let Some(session) = state.pending_fraud.take() {
                self.spawn_reconcile(session, Decision::FraudReported);
            }
            state.active_session_id = None;
            state.status = MonitorStatus::Idle;
        }
        self.shutdown.cancel();

        self.writes.close();
        if !self.writes.is_empty() {
            log_info!("Waiting for {} pending spot write(s)", self.writes.len());
        }
        self.writes.wait().await;
    }

    /// Returns `false` when there is no prompting session, which makes repeated
    /// taps no-ops.
    async fn decide(&self, decision: Decision) -> bool {
        let mut state = self.state.lock().await;
        let Some(session_id) = state.active_session_id.clone() else {
            log_debug!("{} ignored: no active session", decision.as_str());
            return false;
        };
        match self.prompt.resolve(&session_id, decision).await {
            Some(session) => {
                self.settle_locked(&mut state, session, decision);
                true
            }
            None => false,
        }
    }

    async fn evaluate_locked(&self, state: &mut DetectorState, source: CheckSource) -> bool {
        if state.status != MonitorStatus::Monitoring || state.active_session_id.is_some() {
            return false;
        }
        let config = state.config;
        let (spot, position) = match (state.selected.as_ref(), state.position) {
            (Some(spot), Some(position)) => (spot.clone(), position),
            _ => {
                log_verbose!(
                    config.verbose,
                    "Proximity check ({source:?}) skipped: no position or selection"
                );
                return false;
            }
        };

        let distance = position.distance_to(&spot.location);
        state.last_distance_m = Some(distance);
        state.proximity_checks += 1;
        log_verbose!(
            config.verbose,
            "Proximity check ({source:?}): {distance:.1}m to spot {}",
            spot.id
        );
        if distance >= config.proximity_threshold_m {
            return false;
        }

        let session = ArrivalSession::new(spot);
        let session_id = session.id.clone();
        let spot_id = session.target_spot_id.clone();
        match self.prompt.show(session).await {
            Ok(outcome) => {
                log_info!(
                    "Arrived within {distance:.1}m of spot {spot_id}; session {session_id} ({outcome:?})"
                );
                state.active_session_id = Some(session_id);
                state.status = MonitorStatus::Triggered;
                self.stop_polling_locked(state);
                self.emit_state_locked(state);
                true
            }
            Err(err) => {
                log_error!("Could not show arrival prompt for spot {spot_id}: {err:#}");
                false
            }
        }
    }

    fn settle_locked(&self, state: &mut DetectorState, session: ArrivalSession, decision: Decision) {
        if state.active_session_id.as_deref() != Some(session.id.as_str()) {
            return;
        }
        self.events.emit(ArrivalEvent::SessionResolved {
            session_id: session.id.clone(),
            spot_id: session.target_spot_id.clone(),
            decision,
        });

        if decision == Decision::FraudReported {
            // The report dialog opens once the arrival prompt is off screen.
            state.pending_fraud = Some(session);
        } else {
            self.spawn_reconcile(session, decision);
        }
    }

    fn spawn_reconcile(&self, session: ArrivalSession, decision: Decision) {
        let reconciler = self.reconciler.clone();
        self.writes.spawn(async move {
            reconciler.resolve(&session.spot, decision).await;
        });
    }

    async fn on_prompt_signal(&self, signal: PromptSignal) {
        let mut state = self.state.lock().await;
        match signal {
            PromptSignal::Expired { session } => {
                if state.active_session_id.as_deref() != Some(session.id.as_str()) {
                    log_debug!("Expiry for stale session {} discarded", session.id);
                    return;
                }
                log_info!("Session {} timed out", session.id);
                self.settle_locked(&mut state, session, Decision::TimedOut);
            }
            PromptSignal::Hidden { session_id } => {
                // Checked before the active-session guard: a fraud decision
                // stands even if the selection changed while its prompt closed.
                if state
                    .pending_fraud
                    .as_ref()
                    .is_some_and(|pending| pending.id == session_id)
                {
                    if let Some(session) = state.pending_fraud.take() {
                        self.spawn_reconcile(session, Decision::FraudReported);
                    }
                }
                if state.active_session_id.as_deref() != Some(session_id.as_str()) {
                    log_debug!("Hide for stale session {session_id} discarded");
                    return;
                }
                state.active_session_id = None;
                state.status = MonitorStatus::Idle;
                log_info!("Session {session_id} finished; detector idle");
                self.emit_state_locked(&state);
            }
        }
    }

    async fn poll(&self, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        if state.poll_generation != generation || state.status != MonitorStatus::Monitoring {
            return false;
        }
        self.evaluate_locked(&mut state, CheckSource::Poll).await;
        state.status == MonitorStatus::Monitoring
    }

    fn start_polling_locked(&self, state: &mut DetectorState) {
        self.stop_polling_locked(state);
        state.poll_generation = state.poll_generation.wrapping_add(1);

        let token = CancellationToken::new();
        let handle = tokio::spawn(poll_loop(
            self.clone(),
            state.poll_generation,
            state.config.poll_interval,
            token.clone(),
        ));
        state.poller = Some(Poller {
            token,
            _handle: handle,
        });
    }

    fn stop_polling_locked(&self, state: &mut DetectorState) {
        if let Some(poller) = state.poller.take() {
            poller.token.cancel();
        }
    }

    fn emit_state_locked(&self, state: &DetectorState) {
        self.events.emit(ArrivalEvent::StateChanged {
            status: state.status,
            selected_spot_id: state.selected.as_ref().map(|spot| spot.id.clone()),
        });
    }
}

async fn poll_loop(
    detector: ArrivalDetector,
    generation: u64,
    period: Duration,
    token: CancellationToken,
) {
    // The selection itself already ran the first check.
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !detector.poll(generation).await {
                    break;
                }
            }
            _ = token.cancelled() => break,
        }
    }
    log_debug!("Poll loop {generation} stopped");
}

async fn signal_pump(
    detector: ArrivalDetector,
    mut signals: mpsc::UnboundedReceiver<PromptSignal>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(signal) => detector.on_prompt_signal(signal).await,
                None => break,
            },
        }
    }
}
