use std::{f64::consts::PI, sync::Arc};

use chrono::Utc;
use tokio::{
    sync::broadcast,
    time::{self, Duration},
};

use super::*;
use crate::{
    events::{ArrivalEvent, EventBus, NoticeLevel, UserNotice},
    fraud::FraudHandoff,
    geo::{Position, EARTH_RADIUS_M},
    models::{SpotRecord, SpotStatus, UserIdentity},
    reconciler::SpotStatusReconciler,
    testing::{RecordingStore, ScriptedFraudFlow, StoreOp},
};

struct Harness {
    detector: ArrivalDetector,
    store: Arc<RecordingStore>,
    handoffs: Arc<std::sync::Mutex<Vec<FraudHandoff>>>,
    events: broadcast::Receiver<ArrivalEvent>,
}

fn harness() -> Harness {
    harness_with(RecordingStore::default())
}

fn harness_with(store: RecordingStore) -> Harness {
    let store = Arc::new(store);
    let flow = ScriptedFraudFlow::submit();
    let handoffs = flow.handoffs();
    let bus = EventBus::new();
    let events = bus.subscribe();
    let reconciler = SpotStatusReconciler::new(
        store.clone(),
        Arc::new(flow),
        UserIdentity::new("me", "me@example.com", "Me"),
        bus.clone(),
    );
    let detector = ArrivalDetector::new(DetectorConfig::default(), reconciler, bus);
    Harness {
        detector,
        store,
        handoffs,
        events,
    }
}

fn handoff_count(h: &Harness) -> usize {
    h.handoffs.lock().expect("handoffs lock").len()
}

fn notices(events: &[ArrivalEvent]) -> Vec<UserNotice> {
    events
        .iter()
        .filter_map(|event| match event {
            ArrivalEvent::Notice(notice) => Some(notice.clone()),
            _ => None,
        })
        .collect()
}

fn spot(id: &str, latitude: f64, longitude: f64) -> SpotRecord {
    SpotRecord::reported_at(
        id,
        Position::new(latitude, longitude),
        &UserIdentity::new("owner", "owner@example.com", "Owner"),
        Utc::now(),
    )
}

/// A point `meters` due north of the spot.
fn north_of(spot: &SpotRecord, meters: f64) -> Position {
    let degrees = meters / EARTH_RADIUS_M * 180.0 / PI;
    Position::new(spot.location.latitude + degrees, spot.location.longitude)
}

/// Lets spawned tasks (reconcile, signal pump) run.
async fn settle() {
    time::sleep(Duration::from_millis(10)).await;
}

fn drain(rx: &mut broadcast::Receiver<ArrivalEvent>) -> Vec<ArrivalEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn resolved(events: &[ArrivalEvent]) -> Vec<Decision> {
    events
        .iter()
        .filter_map(|event| match event {
            ArrivalEvent::SessionResolved { decision, .. } => Some(*decision),
            _ => None,
        })
        .collect()
}

fn prompts_shown(events: &[ArrivalEvent]) -> usize {
    events
        .iter()
        .filter(|event| matches!(event, ArrivalEvent::PromptShown { .. }))
        .count()
}

#[tokio::test(start_paused = true)]
async fn approaching_and_confirming_removes_the_spot() {
    let mut h = harness();
    let target = spot("spot-s", -25.95, 28.10);
    assert_eq!(h.detector.snapshot().await.status, MonitorStatus::Idle);

    let status = h.detector.select_spot(Some(target.clone())).await.expect("select");
    assert_eq!(status, MonitorStatus::Monitoring);

    h.detector.update_position(north_of(&target, 60.0)).await;
    let snapshot = h.detector.snapshot().await;
    assert_eq!(snapshot.status, MonitorStatus::Monitoring);
    let distance = snapshot.last_distance_m.expect("distance");
    assert!((distance - 60.0).abs() < 0.5, "distance {distance}");

    h.detector.update_position(north_of(&target, 40.0)).await;
    let snapshot = h.detector.snapshot().await;
    assert_eq!(snapshot.status, MonitorStatus::Triggered);
    let session = snapshot.session.expect("session");
    assert_eq!(session.target_spot_id, "spot-s");
    assert_eq!(session.phase, SessionPhase::Prompting);
    assert!(session.deadline.is_some());
    assert_eq!(snapshot.countdown_secs, Some(15));

    time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.detector.snapshot().await.countdown_secs, Some(12));
    assert!(h.detector.confirm().await);
    settle().await;

    assert_eq!(
        h.store.ops(),
        vec![StoreOp::SetStatus("spot-s".into(), SpotStatus::Removed)]
    );

    time::sleep(Duration::from_millis(400)).await;
    let snapshot = h.detector.snapshot().await;
    assert_eq!(snapshot.status, MonitorStatus::Idle);
    assert!(snapshot.session.is_none());

    let events = drain(&mut h.events);
    assert_eq!(resolved(&events), vec![Decision::Confirmed]);
    assert!(events.iter().any(|event| matches!(
        event,
        ArrivalEvent::PromptHidden { decision: Some(Decision::Confirmed), .. }
    )));
}

#[tokio::test(start_paused = true)]
async fn unanswered_prompt_times_out_without_writing() {
    let mut h = harness();
    let target = spot("spot-s", -25.95, 28.10);
    h.detector.update_position(north_of(&target, 10.0)).await;
    h.detector.select_spot(Some(target)).await.expect("select");

    time::sleep(Duration::from_secs(16)).await;
    settle().await;

    assert!(h.store.ops().is_empty());
    assert_eq!(h.detector.snapshot().await.status, MonitorStatus::Idle);
    assert_eq!(resolved(&drain(&mut h.events)), vec![Decision::TimedOut]);

    // Too late to answer.
    assert!(!h.detector.confirm().await);
}

#[tokio::test(start_paused = true)]
async fn denying_rewrites_the_spot_as_active() {
    let h = harness();
    let target = spot("spot-s", -25.95, 28.10);
    h.detector.update_position(north_of(&target, 5.0)).await;
    h.detector.select_spot(Some(target)).await.expect("select");

    assert!(h.detector.deny().await);
    settle().await;
    assert_eq!(
        h.store.ops(),
        vec![StoreOp::SetStatus("spot-s".into(), SpotStatus::Active)]
    );
}

#[tokio::test(start_paused = true)]
async fn selecting_within_range_triggers_immediately() {
    let h = harness();
    let target = spot("spot-s", -25.95, 28.10);
    h.detector.update_position(north_of(&target, 20.0)).await;

    let status = h.detector.select_spot(Some(target)).await.expect("select");
    assert_eq!(status, MonitorStatus::Triggered);
}

#[tokio::test(start_paused = true)]
async fn reselecting_mid_prompt_drops_the_old_session() {
    let mut h = harness();
    let first = spot("spot-s", -25.95, 28.10);
    let second = spot("spot-t", -25.90, 28.20);
    h.detector.update_position(north_of(&first, 10.0)).await;
    h.detector.select_spot(Some(first)).await.expect("select s");

    let status = h.detector.select_spot(Some(second)).await.expect("select t");
    assert_eq!(status, MonitorStatus::Monitoring);
    let snapshot = h.detector.snapshot().await;
    assert_eq!(snapshot.selected_spot_id.as_deref(), Some("spot-t"));
    assert!(snapshot.session.is_none());

    // The old countdown must not fire.
    time::sleep(Duration::from_secs(20)).await;
    settle().await;
    assert!(h.store.ops().is_empty());
    assert!(resolved(&drain(&mut h.events)).is_empty());
    assert!(!h.detector.confirm().await);
    assert_eq!(h.detector.snapshot().await.status, MonitorStatus::Monitoring);
}

#[tokio::test(start_paused = true)]
async fn clearing_the_selection_cancels_everything() {
    let mut h = harness();
    let target = spot("spot-s", -25.95, 28.10);
    h.detector.update_position(north_of(&target, 10.0)).await;
    h.detector.select_spot(Some(target)).await.expect("select");

    let status = h.detector.clear_selection().await.expect("clear");
    assert_eq!(status, MonitorStatus::Idle);

    time::sleep(Duration::from_secs(20)).await;
    settle().await;
    let events = drain(&mut h.events);
    assert!(resolved(&events).is_empty());
    assert!(h.store.ops().is_empty());
    let snapshot = h.detector.snapshot().await;
    assert_eq!(snapshot.status, MonitorStatus::Idle);
    assert!(snapshot.selected_spot_id.is_none());
}

#[tokio::test(start_paused = true)]
async fn only_one_session_while_triggered() {
    let mut h = harness();
    let target = spot("spot-s", -25.95, 28.10);
    h.detector.select_spot(Some(target.clone())).await.expect("select");

    for meters in [30.0, 20.0, 10.0, 5.0] {
        h.detector.update_position(north_of(&target, meters)).await;
    }
    time::sleep(Duration::from_secs(12)).await;

    assert_eq!(prompts_shown(&drain(&mut h.events)), 1);
}

#[tokio::test(start_paused = true)]
async fn repeated_decisions_write_once() {
    let h = harness();
    let target = spot("spot-s", -25.95, 28.10);
    h.detector.update_position(north_of(&target, 10.0)).await;
    h.detector.select_spot(Some(target)).await.expect("select");

    assert!(h.detector.confirm().await);
    assert!(!h.detector.confirm().await);
    assert!(!h.detector.deny().await);
    assert!(!h.detector.report_fraud().await);
    settle().await;

    assert_eq!(h.store.ops().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn fraud_flow_starts_only_after_the_prompt_is_hidden() {
    let mut h = harness();
    let target = spot("spot-s", -25.95, 28.10);
    h.detector.update_position(north_of(&target, 10.0)).await;
    h.detector.select_spot(Some(target)).await.expect("select");

    assert!(h.detector.report_fraud().await);
    settle().await;

    // Still closing: the report dialog must not be up yet.
    let session = h.detector.snapshot().await.session.expect("closing session");
    assert_eq!(session.phase, SessionPhase::Closing);
    assert_eq!(handoff_count(&h), 0);
    assert!(h.store.ops().is_empty());

    time::sleep(Duration::from_millis(400)).await;
    settle().await;
    assert!(h.detector.snapshot().await.session.is_none());
    assert_eq!(handoff_count(&h), 1);

    let events = drain(&mut h.events);
    let hidden_at = events
        .iter()
        .position(|event| matches!(event, ArrivalEvent::PromptHidden { .. }))
        .expect("hidden event");
    let submitted_at = events
        .iter()
        .position(|event| {
            matches!(event, ArrivalEvent::Notice(notice) if notice.title == "Report Submitted")
        })
        .expect("submitted notice");
    assert!(hidden_at < submitted_at);

    let ops = h.store.ops();
    assert_eq!(ops.first(), Some(&StoreOp::AppendFraudReport("spot-s".into())));
    assert_eq!(
        ops.last(),
        Some(&StoreOp::SetStatus("spot-s".into(), SpotStatus::Reported))
    );
}

#[tokio::test(start_paused = true)]
async fn missing_or_invalid_position_skips_the_check() {
    let h = harness();
    let target = spot("spot-s", -25.95, 28.10);
    h.detector.select_spot(Some(target.clone())).await.expect("select");
    assert_eq!(h.detector.snapshot().await.proximity_checks, 0);

    h.detector
        .update_position(Position::new(f64::NAN, 28.10))
        .await;
    h.detector.update_position(Position::new(95.0, 28.10)).await;
    let snapshot = h.detector.snapshot().await;
    assert_eq!(snapshot.status, MonitorStatus::Monitoring);
    assert_eq!(snapshot.proximity_checks, 0);

    // Poll ticks without a fix do nothing either.
    time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.detector.snapshot().await.proximity_checks, 0);

    h.detector.update_position(north_of(&target, 500.0)).await;
    h.detector.clear_position().await;
    time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.detector.snapshot().await.proximity_checks, 1);
}

#[tokio::test(start_paused = true)]
async fn invalid_spot_coordinates_are_rejected() {
    let h = harness();
    let broken = spot("spot-x", f64::NAN, 28.10);
    assert!(h.detector.select_spot(Some(broken)).await.is_err());
    assert_eq!(h.detector.snapshot().await.status, MonitorStatus::Idle);
}

#[tokio::test(start_paused = true)]
async fn poll_ticks_recheck_on_a_single_timer() {
    let h = harness();
    let first = spot("spot-s", -25.95, 28.10);
    let second = spot("spot-t", -25.90, 28.20);
    h.detector.update_position(north_of(&first, 800.0)).await;

    // Three selections in a row must leave exactly one live poller.
    h.detector.select_spot(Some(first.clone())).await.expect("select");
    h.detector.select_spot(Some(second)).await.expect("select");
    h.detector.select_spot(Some(first)).await.expect("select");
    let baseline = h.detector.snapshot().await.proximity_checks;

    time::sleep(Duration::from_millis(5_100)).await;
    assert_eq!(h.detector.snapshot().await.proximity_checks, baseline + 1);

    time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.detector.snapshot().await.proximity_checks, baseline + 3);
}

#[tokio::test(start_paused = true)]
async fn resolved_selection_stays_idle_until_reselected() {
    let h = harness();
    let target = spot("spot-s", -25.95, 28.10);
    h.detector.update_position(north_of(&target, 10.0)).await;
    h.detector.select_spot(Some(target.clone())).await.expect("select");
    h.detector.deny().await;
    time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.detector.snapshot().await.status, MonitorStatus::Idle);

    // Still in range, but no new prompt until the user selects again.
    h.detector.update_position(north_of(&target, 5.0)).await;
    time::sleep(Duration::from_secs(6)).await;
    assert_eq!(h.detector.snapshot().await.status, MonitorStatus::Idle);

    let status = h.detector.select_spot(Some(target)).await.expect("reselect");
    assert_eq!(status, MonitorStatus::Triggered);
}

#[tokio::test(start_paused = true)]
async fn fraud_decision_survives_reselection_while_closing() {
    let h = harness();
    let first = spot("spot-s", -25.95, 28.10);
    let second = spot("spot-t", -25.90, 28.20);
    h.detector.update_position(north_of(&first, 10.0)).await;
    h.detector.select_spot(Some(first)).await.expect("select s");
    assert!(h.detector.report_fraud().await);

    h.detector.select_spot(Some(second)).await.expect("select t");
    time::sleep(Duration::from_millis(400)).await;
    settle().await;

    assert_eq!(handoff_count(&h), 1);
    assert_eq!(
        h.store.ops().first(),
        Some(&StoreOp::AppendFraudReport("spot-s".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_decided_writes() {
    let h = harness();
    let target = spot("spot-s", -25.95, 28.10);
    h.detector.update_position(north_of(&target, 10.0)).await;
    h.detector.select_spot(Some(target)).await.expect("select");

    assert!(h.detector.confirm().await);
    h.detector.shutdown().await;

    assert_eq!(
        h.store.ops(),
        vec![StoreOp::SetStatus("spot-s".into(), SpotStatus::Removed)]
    );
}

#[tokio::test(start_paused = true)]
async fn shutdown_flushes_a_fraud_report_still_closing() {
    let h = harness();
    let target = spot("spot-s", -25.95, 28.10);
    h.detector.update_position(north_of(&target, 10.0)).await;
    h.detector.select_spot(Some(target)).await.expect("select");

    assert!(h.detector.report_fraud().await);
    h.detector.shutdown().await;

    assert_eq!(handoff_count(&h), 1);
    assert_eq!(
        h.store.ops().first(),
        Some(&StoreOp::AppendFraudReport("spot-s".into()))
    );
}

#[tokio::test(start_paused = true)]
async fn selecting_while_closing_queues_the_new_prompt() {
    let mut h = harness();
    let first = spot("spot-s", -25.95, 28.10);
    let second = SpotRecord {
        id: "spot-t".into(),
        location: north_of(&first, 20.0),
        ..first.clone()
    };
    // Within range of both spots.
    h.detector.update_position(north_of(&first, 10.0)).await;
    h.detector.select_spot(Some(first)).await.expect("select s");
    assert!(h.detector.confirm().await);
    let first_session = h.detector.snapshot().await.session.expect("closing");
    assert_eq!(first_session.phase, SessionPhase::Closing);

    let status = h.detector.select_spot(Some(second)).await.expect("select t");
    assert_eq!(status, MonitorStatus::Triggered);
    // S still owns the screen until its exit animation ends.
    let snapshot = h.detector.snapshot().await;
    assert_eq!(snapshot.session.map(|s| s.id), Some(first_session.id.clone()));

    time::sleep(Duration::from_millis(400)).await;
    settle().await;

    // The late hide for S did not reset the detector; T is now prompting.
    let snapshot = h.detector.snapshot().await;
    assert_eq!(snapshot.status, MonitorStatus::Triggered);
    let current = snapshot.session.expect("t prompting");
    assert_eq!(current.target_spot_id, "spot-t");
    assert_eq!(current.phase, SessionPhase::Prompting);

    assert!(h.detector.deny().await);
    settle().await;
    assert_eq!(
        h.store.ops(),
        vec![
            StoreOp::SetStatus("spot-s".into(), SpotStatus::Removed),
            StoreOp::SetStatus("spot-t".into(), SpotStatus::Active),
        ]
    );
    let shown = prompts_shown(&drain(&mut h.events));
    assert_eq!(shown, 2);
}

#[tokio::test(start_paused = true)]
async fn failed_write_notifies_and_returns_to_idle() {
    let mut h = harness_with(RecordingStore::failing());
    let target = spot("spot-s", -25.95, 28.10);
    h.detector.update_position(north_of(&target, 10.0)).await;
    h.detector.select_spot(Some(target)).await.expect("select");

    assert!(h.detector.confirm().await);
    time::sleep(Duration::from_millis(400)).await;
    settle().await;

    assert_eq!(h.store.attempts(), 1);
    assert_eq!(h.detector.snapshot().await.status, MonitorStatus::Idle);
    let notices = notices(&drain(&mut h.events));
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].level, NoticeLevel::Error);
    assert_eq!(notices[0].message, "Failed to update status.");
}
