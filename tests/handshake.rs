//! Full handshake across page loads: viewer emitter -> page loop -> SQLite
//! tracking store, then restore and retry on the following loads.

use std::sync::Arc;

use segscore_lib::{
    bridge::{
        run_page, BridgePhase, ChannelSink, LaunchContext, Outcome, PageEvent, PageExit, Screen,
        SessionBridge, ViewEvent,
    },
    emitter::{ChannelParent, EmitterState, GradingEmitter},
    score::LessonStatus,
    tracking::{Frame, SqliteLms},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn new_bridge(
    store: &Arc<SqliteLms>,
) -> (SessionBridge, mpsc::UnboundedReceiver<ViewEvent>) {
    let (view_tx, view_rx) = mpsc::unbounded_channel();
    let host = Frame::child_of(Frame::child_of(Frame::with_api(store.clone())));
    let bridge = SessionBridge::new(
        host,
        LaunchContext::new("http://viewer.test/case").with_patient("P-001"),
        Arc::new(ChannelSink::new(view_tx)),
    );
    (bridge, view_rx)
}

async fn wait_for<F>(views: &mut mpsc::UnboundedReceiver<ViewEvent>, mut matches: F) -> ViewEvent
where
    F: FnMut(&ViewEvent) -> bool,
{
    loop {
        let event = views.recv().await.expect("view channel closed early");
        if matches(&event) {
            return event;
        }
    }
}

#[tokio::test]
async fn graded_attempt_survives_reload_and_retry_clears_it() {
    let store = Arc::new(SqliteLms::open_in_memory("learner-1").unwrap());

    // first load: fresh attempt, learner passes
    let (mut bridge, mut views) = new_bridge(&store);
    assert!(bridge.initialize_session());
    assert_eq!(bridge.phase(), BridgePhase::Connected(LessonStatus::Incomplete));
    assert_eq!(bridge.screen(), Screen::Instructions);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    let page = tokio::spawn(run_page(
        bridge,
        event_rx,
        message_rx,
        CancellationToken::new(),
    ));

    event_tx.send(PageEvent::StartClicked).unwrap();
    match wait_for(&mut views, |e| matches!(e, ViewEvent::ViewerLaunched { .. })).await {
        ViewEvent::ViewerLaunched { url } => {
            assert_eq!(url, "http://viewer.test/case?patientId=P-001")
        }
        other => panic!("unexpected event {other:?}"),
    }

    let mut emitter = GradingEmitter::embedded(Arc::new(ChannelParent::new(message_tx)));
    let record = emitter.compute_and_store(0.75);
    assert_eq!(record.raw_score, 75.0);
    emitter.submit().unwrap();
    assert!(matches!(emitter.state(), EmitterState::Submitted { sends: 1, .. }));

    match wait_for(&mut views, |e| matches!(e, ViewEvent::ResultsUpdated(_))).await {
        ViewEvent::ResultsUpdated(results) => {
            assert_eq!(results.score_text, "75%");
            assert_eq!(results.outcome, Outcome::Success);
        }
        other => panic!("unexpected event {other:?}"),
    }

    event_tx.send(PageEvent::Unload).unwrap();
    let (bridge, exit) = page.await.unwrap();
    assert_eq!(exit, PageExit::Unloaded);
    assert_eq!(bridge.phase(), BridgePhase::Terminated);

    let attempt = store.attempt().unwrap().expect("learner row");
    assert_eq!(attempt.lesson_status, "passed");
    assert_eq!(attempt.score_raw, "75");
    assert_eq!(attempt.score_min, "0");
    assert_eq!(attempt.score_max, "100");

    // second load: finished attempt is restored without writing a score
    let (mut bridge, mut views) = new_bridge(&store);
    assert!(bridge.initialize_session());
    assert_eq!(bridge.screen(), Screen::Results);
    assert_eq!(bridge.phase(), BridgePhase::Connected(LessonStatus::Passed));
    assert_eq!(bridge.session_state().persisted_score, Some(75.0));
    match wait_for(&mut views, |e| matches!(e, ViewEvent::ResultsUpdated(_))).await {
        ViewEvent::ResultsUpdated(results) => assert_eq!(results.outcome, Outcome::Success),
        other => panic!("unexpected event {other:?}"),
    }

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (_message_tx, message_rx) = mpsc::unbounded_channel();
    event_tx.send(PageEvent::TryAgainClicked).unwrap();
    let (bridge, exit) = run_page(bridge, event_rx, message_rx, CancellationToken::new()).await;
    assert_eq!(exit, PageExit::Reload);
    assert_eq!(bridge.phase(), BridgePhase::Terminated);
    wait_for(&mut views, |e| matches!(e, ViewEvent::ReloadRequested)).await;

    let attempt = store.attempt().unwrap().expect("learner row");
    assert_eq!(attempt.lesson_status, "incomplete");
    assert_eq!(attempt.score_raw, "0");

    // third load: nothing to restore
    let (mut bridge, _views) = new_bridge(&store);
    assert!(bridge.initialize_session());
    assert_eq!(bridge.screen(), Screen::Instructions);
    assert_eq!(bridge.phase(), BridgePhase::Connected(LessonStatus::Incomplete));
    bridge.unload();

    let history = store.session_history().unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|session| session.finished_at.is_some()));
    assert_eq!(history[0].final_status.as_deref(), Some("passed"));
    assert_eq!(history[1].final_status.as_deref(), Some("incomplete"));
}

#[tokio::test]
async fn standalone_viewer_never_reaches_the_page() {
    let mut emitter = GradingEmitter::standalone();
    emitter.compute_and_store(0.9);
    assert!(emitter.submit().is_err());
    assert!(matches!(emitter.state(), EmitterState::Stored { .. }));
}

#[tokio::test]
async fn page_without_lms_still_shows_results() {
    let (view_tx, mut views) = mpsc::unbounded_channel();
    let mut bridge = SessionBridge::new(
        Frame::child_of(Frame::detached()),
        LaunchContext::new("http://viewer.test/case"),
        Arc::new(ChannelSink::new(view_tx)),
    );
    assert!(!bridge.initialize_session());
    assert_eq!(bridge.phase(), BridgePhase::Disconnected);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    let page = tokio::spawn(run_page(
        bridge,
        event_rx,
        message_rx,
        CancellationToken::new(),
    ));

    let mut emitter = GradingEmitter::embedded(Arc::new(ChannelParent::new(message_tx)));
    emitter.compute_and_store(0.5);
    emitter.submit().unwrap();

    match wait_for(&mut views, |e| matches!(e, ViewEvent::ResultsUpdated(_))).await {
        ViewEvent::ResultsUpdated(results) => {
            assert_eq!(results.score_text, "50%");
            assert_eq!(results.outcome, Outcome::Failure);
        }
        other => panic!("unexpected event {other:?}"),
    }

    event_tx.send(PageEvent::Unload).unwrap();
    let (bridge, exit) = page.await.unwrap();
    assert_eq!(exit, PageExit::Unloaded);
    assert_eq!(bridge.session_state().status, LessonStatus::Failed);
    assert!(!bridge.session_state().connected);
}
