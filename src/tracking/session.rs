use std::sync::Arc;

use log::{error, info, warn};
use serde::Serialize;

use crate::score::{format_raw, LessonStatus};

use super::{
    find_host_api, HostWindow, TrackingApi, TrackingError, LESSON_STATUS, MAX_HOST_HOPS,
    SCORE_MAX, SCORE_MIN, SCORE_RAW,
};

/// Status and score read back from the LMS on load.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAttempt {
    pub status: Option<LessonStatus>,
    pub raw_score: String,
}

impl PersistedAttempt {
    /// Unparseable or empty scores restore as zero.
    pub fn score(&self) -> f64 {
        self.raw_score
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|score| score.is_finite())
            .unwrap_or(0.0)
    }
}

/// Owns the located API handle and guards every call behind `initialized`.
pub struct TrackingSession {
    host: Arc<dyn HostWindow>,
    max_hops: usize,
    api: Option<Arc<dyn TrackingApi>>,
    initialized: bool,
}

impl TrackingSession {
    pub fn new(host: Arc<dyn HostWindow>) -> Self {
        Self::with_max_hops(host, MAX_HOST_HOPS)
    }

    pub fn with_max_hops(host: Arc<dyn HostWindow>, max_hops: usize) -> Self {
        Self {
            host,
            max_hops,
            api: None,
            initialized: false,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Locates the API (once) and opens the LMS session. A fresh attempt is
    /// marked `incomplete` and committed; a finished one is left as is.
    pub fn connect(&mut self) -> Result<(), TrackingError> {
        info!("Tracking: attempting initialization...");
        let api = match &self.api {
            Some(api) => api.clone(),
            None => {
                let api = find_host_api(self.host.clone(), self.max_hops)?;
                self.api = Some(api.clone());
                api
            }
        };

        if !api.initialize() {
            return Err(TrackingError::InitializeFailed(api.last_error_string()));
        }
        self.initialized = true;
        info!("Tracking: initialized successfully");

        let status = LessonStatus::parse(&self.get_value(LESSON_STATUS));
        if !status.map(|s| s.is_terminal()).unwrap_or(false) {
            self.set_value(LESSON_STATUS, LessonStatus::Incomplete.as_str());
            self.commit();
        }
        Ok(())
    }

    /// `connect` with failures logged; false means standalone mode.
    pub fn initialize(&mut self) -> bool {
        match self.connect() {
            Ok(()) => true,
            Err(TrackingError::ApiNotFound(hops)) => {
                error!(
                    "Tracking: API not found after {} hops, running in standalone mode",
                    hops
                );
                false
            }
            Err(err) => {
                error!("Tracking: {}", err);
                false
            }
        }
    }

    pub fn set_value(&self, key: &str, value: &str) -> bool {
        match self.live_api() {
            Some(api) => api.set_value(key, value),
            None => false,
        }
    }

    pub fn get_value(&self, key: &str) -> String {
        match self.live_api() {
            Some(api) => api.get_value(key),
            None => String::new(),
        }
    }

    pub fn commit(&self) -> bool {
        match self.live_api() {
            Some(api) => api.commit(),
            None => false,
        }
    }

    /// Writes raw/min/max and the pass/fail status, then commits.
    /// Returns whether the commit went through.
    pub fn set_score(&self, score: f64, passing_score: f64) -> bool {
        if !self.initialized {
            warn!("Tracking: cannot set score - not initialized");
            return false;
        }

        info!(
            "Tracking: setting score to {} (pass threshold: {})",
            score, passing_score
        );
        self.set_value(SCORE_RAW, &format_raw(score));
        self.set_value(SCORE_MIN, "0");
        self.set_value(SCORE_MAX, "100");

        let status = LessonStatus::from_score(score, passing_score);
        self.set_value(LESSON_STATUS, status.as_str());

        let committed = self.commit();
        info!("Tracking: score saved, status set to {}", status.as_str());
        committed
    }

    pub fn score_and_status(&self) -> Option<PersistedAttempt> {
        if !self.initialized {
            return None;
        }
        Some(PersistedAttempt {
            status: LessonStatus::parse(&self.get_value(LESSON_STATUS)),
            raw_score: self.get_value(SCORE_RAW),
        })
    }

    /// Clears the attempt so the LMS treats the next launch as a retry,
    /// then closes the session. Tries to connect first if never connected.
    pub fn reset_for_retry(&mut self) {
        if !self.initialized {
            self.initialize();
        }

        info!("Tracking: resetting for retry...");
        self.set_value(LESSON_STATUS, LessonStatus::Incomplete.as_str());
        self.set_value(SCORE_RAW, "0");
        self.commit();
        self.terminate();
    }

    /// Calls the API's finish at most once per successful initialize.
    pub fn terminate(&mut self) {
        if !self.initialized {
            return;
        }
        info!("Tracking: terminating session...");
        if let Some(api) = &self.api {
            api.terminate();
        }
        self.initialized = false;
    }

    pub fn error_string(&self) -> String {
        match &self.api {
            Some(api) => api.last_error_string(),
            None => "No API".to_string(),
        }
    }

    fn live_api(&self) -> Option<&Arc<dyn TrackingApi>> {
        if self.initialized {
            self.api.as_ref()
        } else {
            None
        }
    }
}
