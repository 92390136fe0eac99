use serde::{Deserialize, Serialize};

use crate::score::LessonStatus;

/// Lifecycle of the host page's tracking session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "phase", content = "status")]
pub enum BridgePhase {
    Uninitialized,
    Connecting,
    Connected(LessonStatus),
    /// No LMS reachable; the page keeps working without persistence.
    Disconnected,
    Terminated,
}

impl Default for BridgePhase {
    fn default() -> Self {
        BridgePhase::Uninitialized
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Screen {
    Instructions,
    Viewer,
    Results,
}

impl Default for Screen {
    fn default() -> Self {
        Screen::Instructions
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub connected: bool,
    pub status: LessonStatus,
    pub persisted_score: Option<f64>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, status: LessonStatus, score: f64) {
        self.status = status;
        self.persisted_score = Some(score);
    }

    pub fn reset(&mut self) {
        self.status = LessonStatus::Incomplete;
        self.persisted_score = Some(0.0);
    }
}
