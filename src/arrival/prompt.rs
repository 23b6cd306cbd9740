use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::{self, Duration, Instant, MissedTickBehavior},
};

use crate::events::{ArrivalEvent, EventBus};

use super::{ArrivalSession, Decision, SessionPhase};

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_verbose};

/// Presentation timings of the confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PromptTimings {
    /// Auto-dismiss deadline measured from when the prompt starts showing.
    pub timeout: Duration,
    pub fade_in: Duration,
    /// Exit animation; show requests arriving meanwhile are queued.
    pub closing: Duration,
    pub countdown_refresh: Duration,
}

impl Default for PromptTimings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            fade_in: Duration::from_millis(500),
            closing: Duration::from_millis(300),
            countdown_refresh: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShowOutcome {
    Shown,
    /// Another prompt is still closing; this one starts when it is hidden.
    Queued,
}

/// Notifications from the prompt's own timers back to the detector.
#[derive(Debug)]
pub(crate) enum PromptSignal {
    /// The countdown ran out; the session is now closing as `timed-out`.
    Expired { session: ArrivalSession },
    /// The exit animation finished and the session was discarded.
    Hidden { session_id: String },
}

#[derive(Default)]
struct PromptState {
    timings: PromptTimings,
    current: Option<ArrivalSession>,
    queued: Option<ArrivalSession>,
    countdown: Option<JoinHandle<()>>,
    closer: Option<JoinHandle<()>>,
}

/// Owns visibility and timing of the arrival prompt. It knows nothing about
/// spots or the store; it reports timer outcomes as [`PromptSignal`]s.
#[derive(Clone)]
pub struct PromptController {
    state: Arc<Mutex<PromptState>>,
    events: EventBus,
    signals: mpsc::UnboundedSender<PromptSignal>,
    verbose: bool,
}

impl PromptController {
    pub(crate) fn new(
        timings: PromptTimings,
        events: EventBus,
        signals: mpsc::UnboundedSender<PromptSignal>,
        verbose: bool,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(PromptState {
                timings,
                ..PromptState::default()
            })),
            events,
            signals,
            verbose,
        }
    }

    /// Takes effect from the next prompt shown.
    pub async fn set_timings(&self, timings: PromptTimings) {
        self.state.lock().await.timings = timings;
    }

    pub async fn show(&self, session: ArrivalSession) -> Result<ShowOutcome> {
        let mut state = self.state.lock().await;
        match state.current.as_ref().map(|current| (current.phase, current.id.clone())) {
            Some((SessionPhase::Prompting, current_id)) => {
                bail!(
                    "prompt for session {} is still showing; refusing session {}",
                    current_id,
                    session.id
                );
            }
            Some((_, current_id)) => {
                log_info!(
                    "Prompt {} is closing; queued session {} for spot {}",
                    current_id,
                    session.id,
                    session.target_spot_id
                );
                if let Some(replaced) = state.queued.replace(session) {
                    log_debug!("Dropped queued session {}", replaced.id);
                }
                Ok(ShowOutcome::Queued)
            }
            None => {
                self.start_locked(&mut state, session);
                Ok(ShowOutcome::Shown)
            }
        }
    }

    /// Ends a prompting session with a user decision. Returns the closing
    /// session, or `None` if `session_id` is not prompting anymore, which makes
    /// repeated calls no-ops.
    pub async fn resolve(&self, session_id: &str, decision: Decision) -> Option<ArrivalSession> {
        let mut state = self.state.lock().await;
        if !is_prompting(&state, session_id) {
            log_debug!("Ignoring {} for session {session_id}: not prompting", decision.as_str());
            return None;
        }
        if let Some(countdown) = state.countdown.take() {
            countdown.abort();
        }
        self.close_locked(&mut state, decision)
    }

    /// Drops whatever belongs to the previous selection: a prompting session is
    /// discarded without a decision, the countdown stops and the queue is
    /// cleared. A close already in progress finishes on its own.
    pub async fn cancel(&self) -> Option<String> {
        let mut state = self.state.lock().await;
        if let Some(countdown) = state.countdown.take() {
            countdown.abort();
        }
        if let Some(queued) = state.queued.take() {
            log_debug!("Dropped queued session {} on cancel", queued.id);
        }

        let prompting = state
            .current
            .as_ref()
            .map(|current| current.phase == SessionPhase::Prompting)
            .unwrap_or(false);
        if !prompting {
            return None;
        }

        let session = state.current.take()?;
        log_info!("Prompt for session {} cancelled", session.id);
        self.events.emit(ArrivalEvent::PromptHidden {
            session_id: session.id.clone(),
            decision: None,
        });
        Some(session.id)
    }

    pub async fn current_session(&self) -> Option<ArrivalSession> {
        self.state.lock().await.current.clone()
    }

    pub async fn countdown_secs(&self) -> Option<u64> {
        let state = self.state.lock().await;
        state
            .current
            .as_ref()
            .filter(|current| current.accepts_input())
            .map(|current| current.remaining_secs(Instant::now()))
    }

    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Some(countdown) = state.countdown.take() {
            countdown.abort();
        }
        if let Some(closer) = state.closer.take() {
            closer.abort();
        }
        state.current = None;
        state.queued = None;
    }

    fn start_locked(&self, state: &mut PromptState, mut session: ArrivalSession) {
        let timings = state.timings;
        let now = Instant::now();
        session.begin_prompt(timings.timeout, now);
        let deadline = session.deadline_anchor.unwrap_or(now + timings.timeout);
        let session_id = session.id.clone();

        log_info!(
            "Showing arrival prompt {} for spot {} ({}s to answer)",
            session_id,
            session.target_spot_id,
            timings.timeout.as_secs()
        );
        self.events.emit(ArrivalEvent::PromptShown {
            session: session.clone(),
            fade_in_ms: timings.fade_in.as_millis() as u64,
        });
        state.current = Some(session);

        if let Some(previous) = state.countdown.take() {
            previous.abort();
        }
        state.countdown = Some(tokio::spawn(countdown_loop(
            self.clone(),
            session_id,
            deadline,
            timings.countdown_refresh,
        )));
    }

    fn close_locked(&self, state: &mut PromptState, decision: Decision) -> Option<ArrivalSession> {
        let closing = state.timings.closing;
        let closing_ms = closing.as_millis() as u64;
        let session = state.current.as_mut()?;
        session.phase = SessionPhase::Closing;
        session.decision = Some(decision);
        let snapshot = session.clone();

        log_info!(
            "Closing prompt {} with decision {}",
            snapshot.id,
            decision.as_str()
        );
        self.events.emit(ArrivalEvent::PromptClosing {
            session_id: snapshot.id.clone(),
            decision,
            closing_ms,
        });

        let controller = self.clone();
        let session_id = snapshot.id.clone();
        state.closer = Some(tokio::spawn(async move {
            time::sleep(closing).await;
            controller.finish_close(&session_id).await;
        }));

        Some(snapshot)
    }

    async fn publish_countdown(&self, session_id: &str) -> bool {
        let state = self.state.lock().await;
        if !is_prompting(&state, session_id) {
            return false;
        }
        let remaining_secs = state
            .current
            .as_ref()
            .map(|current| current.remaining_secs(Instant::now()))
            .unwrap_or(0);
        log_verbose!(self.verbose, "Prompt {session_id}: {remaining_secs}s left");
        self.events.emit(ArrivalEvent::Countdown {
            session_id: session_id.to_string(),
            remaining_secs,
        });
        true
    }

    async fn expire(&self, session_id: &str) {
        let mut state = self.state.lock().await;
        if !is_prompting(&state, session_id) {
            log_debug!("Late expiry for session {session_id} discarded");
            return;
        }
        // Called from the countdown task itself, so detach instead of aborting.
        drop(state.countdown.take());
        if let Some(session) = self.close_locked(&mut state, Decision::TimedOut) {
            let _ = self.signals.send(PromptSignal::Expired { session });
        }
    }

    async fn finish_close(&self, session_id: &str) {
        let mut state = self.state.lock().await;
        let closing = state
            .current
            .as_ref()
            .map(|current| current.id == session_id && current.phase == SessionPhase::Closing)
            .unwrap_or(false);
        if !closing {
            log_debug!("Late close completion for session {session_id} discarded");
            return;
        }

        drop(state.closer.take());
        let decision = state.current.take().and_then(|mut session| {
            session.phase = SessionPhase::Resolved;
            session.decision
        });

        log_info!("Prompt {session_id} hidden");
        self.events.emit(ArrivalEvent::PromptHidden {
            session_id: session_id.to_string(),
            decision,
        });
        let _ = self.signals.send(PromptSignal::Hidden {
            session_id: session_id.to_string(),
        });

        if let Some(next) = state.queued.take() {
            self.start_locked(&mut state, next);
        }
    }
}

fn is_prompting(state: &PromptState, session_id: &str) -> bool {
    state
        .current
        .as_ref()
        .map(|current| current.id == session_id && current.phase == SessionPhase::Prompting)
        .unwrap_or(false)
}

async fn countdown_loop(
    controller: PromptController,
    session_id: String,
    deadline: Instant,
    refresh_every: Duration,
) {
    let mut refresh = time::interval(refresh_every);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let expiry = time::sleep_until(deadline);
    tokio::pin!(expiry);

    loop {
        tokio::select! {
            biased;
            _ = &mut expiry => {
                controller.expire(&session_id).await;
                break;
            }
            _ = refresh.tick() => {
                if !controller.publish_countdown(&session_id).await {
                    break;
                }
            }
        }
    }
}
