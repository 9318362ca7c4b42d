use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use uuid::Uuid;

use focustrack::protocol::dispatch_client_message;
use focustrack::{
    ActivityKind, ClientMessage, CycleCompletion, CycleKind, ErrorKind, InterruptionSource,
    MemoryStore, ServerMessage, SessionEnd, SessionPatch, SessionPolicy, SessionSpec,
    SessionState, SessionStore, SessionSupervisor, TimerConfig,
};

fn test_config() -> TimerConfig {
    TimerConfig {
        tick_interval: Duration::from_millis(20),
        persist_every_ticks: 2,
        ..TimerConfig::default()
    }
}

fn engine_with(config: TimerConfig) -> (SessionSupervisor, Arc<MemoryStore>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = Arc::new(MemoryStore::new());
    let supervisor = SessionSupervisor::new(store.clone(), config);
    (supervisor, store)
}

fn engine() -> (SessionSupervisor, Arc<MemoryStore>) {
    engine_with(test_config())
}

#[tokio::test]
async fn exclusive_policy_rejects_second_start() {
    let (supervisor, store) = engine();

    let first = supervisor.start(SessionSpec::default()).await.unwrap();
    let err = supervisor.start(SessionSpec::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(store.session(first.id).is_some());

    // A paused session still blocks new starts.
    supervisor.pause(first.id).await.unwrap();
    let err = supervisor.start(SessionSpec::default()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    // Ending frees the slot.
    supervisor.end(first.id, SessionEnd::default()).await.unwrap();
    supervisor.start(SessionSpec::default()).await.unwrap();
}

#[tokio::test]
async fn unlimited_policy_runs_sessions_side_by_side() {
    let config = TimerConfig {
        policy: SessionPolicy::Unlimited,
        ..test_config()
    };
    let (supervisor, _store) = engine_with(config);

    let first = supervisor.start(SessionSpec::default()).await.unwrap();
    let second = supervisor.start(SessionSpec::default()).await.unwrap();
    assert_ne!(first.id, second.id);
    assert_eq!(supervisor.active_count().await, 2);

    // Each session is independent: ending one leaves the other ticking.
    supervisor.end(first.id, SessionEnd::default()).await.unwrap();
    assert_eq!(supervisor.active_count().await, 1);
    assert!(supervisor.timer_state(second.id).await.is_ok());
}

#[tokio::test]
async fn lifecycle_finalizes_and_persists() {
    let (supervisor, store) = engine();

    let spec = SessionSpec {
        document_id: Some(Uuid::new_v4()),
        planned_minutes: 60,
        starting_page: Some(1),
        goals_set: vec!["finish chapter".into()],
        ..SessionSpec::default()
    };
    let session = supervisor.start(spec).await.unwrap();
    let document_id = session.document_id.unwrap();

    for _ in 0..3 {
        assert!(
            supervisor
                .register_activity(session.id, ActivityKind::Interaction)
                .await
        );
        sleep(Duration::from_millis(30)).await;
    }

    supervisor.pause(session.id).await.unwrap();
    sleep(Duration::from_millis(60)).await;
    let resumed = supervisor.resume(session.id).await.unwrap();
    assert_eq!(resumed.state, SessionState::Active);

    let end = SessionEnd {
        ending_page: Some(10),
        goals_achieved: Some(vec!["finish chapter".into()]),
        ..SessionEnd::default()
    };
    let outcome = supervisor.end(session.id, end).await.unwrap();
    assert!(outcome.persist_error.is_none());

    let stored = store.session(session.id).unwrap();
    assert_eq!(stored.state, SessionState::Ended);
    assert!(stored.end_time.is_some());
    assert_eq!(stored.ending_page, Some(10));
    assert!(stored.break_ms >= 40);
    assert!(stored.focus_score >= 0.0 && stored.focus_score <= 100.0);
    assert!(stored.productivity_score >= 0.0 && stored.productivity_score <= 100.0);

    let wall_ms = (stored.end_time.unwrap() - stored.start_time).num_milliseconds() as u64;
    assert!(stored.active_ms + stored.idle_ms + stored.break_ms <= wall_ms);

    // The pause left exactly one closed break behind.
    let breaks = store.breaks_for(session.id);
    assert_eq!(breaks.len(), 1);
    assert!(!breaks[0].is_open());

    // Reading position followed the ending page.
    assert_eq!(store.document_page(document_id), Some(10));
}

#[tokio::test]
async fn ending_twice_reports_invalid_state_without_rewriting() {
    let (supervisor, store) = engine();
    let session = supervisor.start(SessionSpec::default()).await.unwrap();

    supervisor
        .end(session.id, SessionEnd::default())
        .await
        .unwrap();
    let first_write = store.session(session.id).unwrap();

    let err = supervisor
        .end(session.id, SessionEnd::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);

    let second_read = store.session(session.id).unwrap();
    assert_eq!(first_write.end_time, second_read.end_time);
    assert_eq!(first_write.xp_earned, second_read.xp_earned);
    assert_eq!(first_write.updated_at, second_read.updated_at);
}

#[tokio::test]
async fn signals_after_end_are_noops() {
    let (supervisor, _store) = engine();
    let session = supervisor.start(SessionSpec::default()).await.unwrap();

    assert!(
        supervisor
            .register_interruption(session.id, InterruptionSource::PhoneCall)
            .await
    );
    supervisor
        .end(session.id, SessionEnd::default())
        .await
        .unwrap();

    assert!(
        !supervisor
            .register_activity(session.id, ActivityKind::Interaction)
            .await
    );
    let err = supervisor.timer_state(session.id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn unknown_ids_report_not_found() {
    let (supervisor, _store) = engine();
    let bogus = Uuid::new_v4();

    assert_eq!(
        supervisor.timer_state(bogus).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        supervisor.pause(bogus).await.unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        supervisor
            .update(bogus, SessionPatch::default())
            .await
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert!(!supervisor.register_activity(bogus, ActivityKind::Note).await);
}

#[tokio::test]
async fn pomodoro_cycle_completes_once_and_persists() {
    let (supervisor, store) = engine();
    let session = supervisor.start(SessionSpec::default()).await.unwrap();

    let cycle = supervisor
        .start_pomodoro(session.id, 1, CycleKind::Work, 25)
        .await
        .unwrap();

    let completion = CycleCompletion {
        effectiveness_rating: Some(5),
        task_completed: Some(true),
        ..CycleCompletion::default()
    };
    let done = supervisor
        .complete_pomodoro(session.id, cycle.id, completion)
        .await
        .unwrap();
    assert!(done.completed);
    assert_eq!(done.xp_earned, 17);

    let err = supervisor
        .complete_pomodoro(session.id, cycle.id, CycleCompletion::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let cycles = store.cycles_for(session.id);
    assert_eq!(cycles.len(), 1);
    assert!(cycles[0].completed);
    assert!(cycles[0].task_completed);

    let stored = store.session(session.id).unwrap();
    assert_eq!(stored.pomodoro_cycles, 1);
}

#[tokio::test]
async fn observers_see_transitions_immediately() {
    let (supervisor, _store) = engine();
    let session = supervisor.start(SessionSpec::default()).await.unwrap();

    let (_handle, mut rx) = supervisor.subscribe(session.id);
    supervisor.pause(session.id).await.unwrap();

    // The pause snapshot arrives without waiting out a tick; skim messages
    // until it shows (a tick may have landed first).
    let mut saw_paused = false;
    for _ in 0..5 {
        let message = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("observer starved")
            .expect("stream closed");
        if let ServerMessage::TimerUpdate { state, .. } = message {
            if state.is_paused {
                saw_paused = true;
                break;
            }
        }
    }
    assert!(saw_paused);
}

#[tokio::test]
async fn session_completed_notice_reaches_observers() {
    let (supervisor, _store) = engine();
    let session = supervisor.start(SessionSpec::default()).await.unwrap();
    let (_handle, mut rx) = supervisor.subscribe(session.id);

    supervisor
        .end(session.id, SessionEnd::default())
        .await
        .unwrap();

    let mut completed = None;
    while let Ok(Some(message)) = timeout(Duration::from_secs(1), rx.recv()).await {
        if let ServerMessage::SessionCompleted { session, .. } = message {
            completed = Some(session);
            break;
        }
    }
    let completed = completed.expect("no completion notice");
    assert_eq!(completed.state, SessionState::Ended);
}

#[tokio::test]
async fn stalled_observer_never_blocks_the_rest() {
    let config = TimerConfig {
        observer_capacity: 1,
        ..test_config()
    };
    let (supervisor, _store) = engine_with(config);
    let session = supervisor.start(SessionSpec::default()).await.unwrap();

    let (_stalled, _rx_never_read) = supervisor.subscribe(session.id);
    let (_healthy, mut rx) = supervisor.subscribe(session.id);

    // Let several ticks pass; the stalled buffer overflows and is dropped,
    // while the healthy observer keeps draining.
    let mut received = 0;
    for _ in 0..5 {
        if timeout(Duration::from_secs(1), rx.recv()).await.is_ok() {
            received += 1;
        }
    }
    assert!(received >= 5);
    assert_eq!(supervisor.hub().observer_count(session.id), 1);
}

#[tokio::test]
async fn storage_failure_at_end_still_returns_final_metrics() {
    let (supervisor, store) = engine();
    let session = supervisor.start(SessionSpec::default()).await.unwrap();

    store.set_fail_updates(true);
    let outcome = supervisor
        .end(session.id, SessionEnd::default())
        .await
        .unwrap();
    store.set_fail_updates(false);

    assert!(outcome.persist_error.is_some());
    assert_eq!(outcome.session.state, SessionState::Ended);
    assert!(outcome.session.end_time.is_some());

    // The finalized record is in the caller's hands; retrying the persist
    // with it succeeds once storage recovers.
    store.create_session(&outcome.session).await.unwrap();
    assert_eq!(
        store.session(session.id).unwrap().state,
        SessionState::Ended
    );
}

#[tokio::test]
async fn shutdown_finalizes_every_live_session() {
    let config = TimerConfig {
        policy: SessionPolicy::Unlimited,
        ..test_config()
    };
    let (supervisor, store) = engine_with(config);

    let first = supervisor.start(SessionSpec::default()).await.unwrap();
    let second = supervisor.start(SessionSpec::default()).await.unwrap();
    supervisor.pause(second.id).await.unwrap();

    supervisor.shutdown().await;

    assert_eq!(supervisor.active_count().await, 0);
    for id in [first.id, second.id] {
        let stored = store.session(id).unwrap();
        assert_eq!(stored.state, SessionState::Ended);
        assert!(stored.end_time.is_some());
    }
}

#[tokio::test]
async fn progress_is_flushed_periodically_while_live() {
    let (supervisor, store) = engine();
    let session = supervisor.start(SessionSpec::default()).await.unwrap();

    supervisor
        .register_activity(session.id, ActivityKind::Interaction)
        .await;

    // persist_every_ticks = 2 at a 20ms tick; well within a second the
    // store should see attributed time without any transition happening.
    let mut flushed = false;
    for _ in 0..50 {
        sleep(Duration::from_millis(20)).await;
        if store.session(session.id).unwrap().active_ms > 0 {
            flushed = true;
            break;
        }
    }
    assert!(flushed, "progress never reached the store");

    supervisor
        .end(session.id, SessionEnd::default())
        .await
        .unwrap();
}

#[tokio::test]
async fn client_messages_drive_the_engine() {
    let (supervisor, _store) = engine();
    let session = supervisor.start(SessionSpec::default()).await.unwrap();

    let activity: ClientMessage =
        serde_json::from_str(r#"{"type": "activity", "activity_type": "note"}"#).unwrap();
    assert!(dispatch_client_message(&supervisor, session.id, activity).await);

    let interruption: ClientMessage =
        serde_json::from_str(r#"{"type": "interruption", "interruption_type": "phone_call"}"#)
            .unwrap();
    assert!(dispatch_client_message(&supervisor, session.id, interruption).await);

    let state = supervisor.timer_state(session.id).await.unwrap();
    assert_eq!(state.activity_count, 1);
    assert_eq!(state.interruptions, 1);

    supervisor
        .end(session.id, SessionEnd::default())
        .await
        .unwrap();
    let activity: ClientMessage = serde_json::from_str(r#"{"type": "activity"}"#).unwrap();
    assert!(!dispatch_client_message(&supervisor, session.id, activity).await);
}

#[tokio::test]
async fn pausing_accumulates_break_time_not_active_time() {
    let (supervisor, _store) = engine();
    let session = supervisor.start(SessionSpec::default()).await.unwrap();

    supervisor.pause(session.id).await.unwrap();
    let before = supervisor.timer_state(session.id).await.unwrap();

    sleep(Duration::from_millis(120)).await;
    supervisor.resume(session.id).await.unwrap();
    let after = supervisor.timer_state(session.id).await.unwrap();

    assert!(after.break_seconds >= before.break_seconds);
    // Active time may only have moved by tick granularity around the pause.
    assert!(after.active_seconds <= before.active_seconds + 1);

    supervisor
        .end(session.id, SessionEnd::default())
        .await
        .unwrap();
}
