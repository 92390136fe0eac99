use std::sync::Arc;

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::Value;

use crate::{
    config::BridgeConfig,
    protocol::{parse_message, SubmissionDetails},
    score::LessonStatus,
    tracking::{HostWindow, TrackingSession},
};

use super::{
    launch::LaunchContext,
    state::{BridgePhase, Screen, SessionState},
    view::{ResultsView, ViewEvent, ViewSink},
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSnapshot {
    pub phase: BridgePhase,
    pub screen: Screen,
    pub session: SessionState,
    pub results: Option<ResultsView>,
    pub config_loaded: bool,
}

/// Host-page side of the handshake. Owns the tracking session for the
/// lifetime of one page load.
pub struct SessionBridge {
    tracking: TrackingSession,
    config: BridgeConfig,
    config_loaded: bool,
    launch: LaunchContext,
    view: Arc<dyn ViewSink>,
    phase: BridgePhase,
    screen: Screen,
    state: SessionState,
    results: Option<ResultsView>,
}

impl SessionBridge {
    pub fn new(host: Arc<dyn HostWindow>, launch: LaunchContext, view: Arc<dyn ViewSink>) -> Self {
        Self::with_tracking(TrackingSession::new(host), launch, view)
    }

    pub fn with_tracking(
        tracking: TrackingSession,
        launch: LaunchContext,
        view: Arc<dyn ViewSink>,
    ) -> Self {
        Self {
            tracking,
            config: BridgeConfig::default(),
            config_loaded: false,
            launch,
            view,
            phase: BridgePhase::Uninitialized,
            screen: Screen::Instructions,
            state: SessionState::new(),
            results: None,
        }
    }

    pub fn phase(&self) -> BridgePhase {
        self.phase
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn session_state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        BridgeSnapshot {
            phase: self.phase,
            screen: self.screen,
            session: self.state.clone(),
            results: self.results.clone(),
            config_loaded: self.config_loaded,
        }
    }

    /// Opens the LMS session and restores a finished attempt if one exists.
    pub fn initialize_session(&mut self) -> bool {
        if !self.connect() {
            return false;
        }
        self.check_previous_status();
        true
    }

    fn connect(&mut self) -> bool {
        if self.phase == BridgePhase::Terminated {
            warn!("Bridge: session already terminated, not reconnecting");
            return false;
        }
        self.phase = BridgePhase::Connecting;
        if self.tracking.initialize() {
            self.state.connected = true;
            self.phase = BridgePhase::Connected(self.state.status);
            true
        } else {
            warn!("Bridge: tracking unavailable, continuing in standalone mode");
            self.state.connected = false;
            self.phase = BridgePhase::Disconnected;
            false
        }
    }

    fn check_previous_status(&mut self) {
        let attempt = match self.tracking.score_and_status() {
            Some(attempt) => attempt,
            None => return,
        };
        debug!(
            "Bridge: persisted status {:?}, score {:?}",
            attempt.status, attempt.raw_score
        );

        match attempt.status {
            Some(status) if status.is_terminal() => {
                info!("Bridge: found previous completion, restoring results");
                let score = attempt.score();
                self.state.record(status, score);
                self.phase = BridgePhase::Connected(status);
                self.handle_score_received(score, None, true);
            }
            _ => {
                self.state.status = LessonStatus::Incomplete;
                self.phase = BridgePhase::Connected(LessonStatus::Incomplete);
            }
        }
    }

    /// Configuration arrives asynchronously; texts are re-rendered on arrival.
    pub fn apply_config(&mut self, config: BridgeConfig) {
        self.config = config;
        self.config_loaded = true;
        self.view.emit(ViewEvent::config_applied(&self.config));
    }

    /// The page's single message listener. Returns whether the payload was
    /// a score submission that got handled.
    pub fn handle_message(&mut self, data: &Value) -> bool {
        match parse_message(data) {
            Ok(Some(submission)) => {
                info!("Bridge: score received from viewer: {}", submission.score);
                self.handle_score_received(submission.score, submission.details, false);
                true
            }
            Ok(None) => {
                debug!("Bridge: ignoring unrelated message");
                false
            }
            Err(err) => {
                warn!("Bridge: ignoring message: {err}");
                false
            }
        }
    }

    /// Records the score (unless restoring) and shows the results screen.
    pub fn handle_score_received(
        &mut self,
        score: f64,
        details: Option<SubmissionDetails>,
        is_restore: bool,
    ) {
        let passing_score = self.config.passing_score();

        if !is_restore {
            if let Some(details) = &details {
                debug!(
                    "Bridge: similarity {:?} graded at {:?}",
                    details.dice, details.timestamp
                );
            }
            let status = LessonStatus::from_score(score, passing_score);
            if !self.tracking.set_score(score, passing_score) {
                info!("Bridge: score not persisted (no active LMS session)");
            }
            self.state.record(status, score);
            if let BridgePhase::Connected(_) = self.phase {
                self.phase = BridgePhase::Connected(status);
            }
        }

        let results = ResultsView::build(score, &self.config);
        self.results = Some(results.clone());
        self.view.emit(ViewEvent::ResultsUpdated(results));
        self.show_screen(Screen::Results);
    }

    /// Start button: connect if needed, then load the case in the viewer.
    pub fn start_assessment(&mut self) {
        info!("Bridge: starting assessment...");
        if !self.tracking.is_initialized() && !self.connect() {
            warn!("Bridge: tracking failed to initialize (expected when running locally)");
        }

        let url = self.launch.viewer_url();
        info!("Bridge: viewer URL: {}", url);
        self.view.emit(ViewEvent::ViewerLaunched { url });
        self.show_screen(Screen::Viewer);
    }

    /// Try-again button. Resets the attempt, closes the LMS session and asks
    /// for a reload; the bridge is finished afterwards.
    pub fn try_again(&mut self) {
        info!("Bridge: try again requested");
        self.tracking.reset_for_retry();
        self.state.reset();
        self.state.connected = false;
        self.phase = BridgePhase::Terminated;
        self.view.emit(ViewEvent::ReloadRequested);
    }

    /// Page teardown.
    pub fn unload(&mut self) {
        if self.tracking.is_initialized() {
            self.tracking.terminate();
        }
        self.state.connected = false;
        self.phase = BridgePhase::Terminated;
    }

    fn show_screen(&mut self, screen: Screen) {
        self.screen = screen;
        self.view.emit(ViewEvent::ScreenChanged { screen });
    }
}
