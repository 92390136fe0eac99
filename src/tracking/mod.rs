//! SCORM 1.2 style tracking: the API surface, host discovery, and the
//! session adapter the bridge talks through.

pub mod session;
pub mod store;

mod migrations;

use std::sync::Arc;

use log::error;

pub use session::{PersistedAttempt, TrackingSession};
pub use store::SqliteLms;

pub const LESSON_STATUS: &str = "cmi.core.lesson_status";
pub const SCORE_RAW: &str = "cmi.core.score.raw";
pub const SCORE_MIN: &str = "cmi.core.score.min";
pub const SCORE_MAX: &str = "cmi.core.score.max";
pub const STUDENT_ID: &str = "cmi.core.student_id";

/// Hops walked up the host chain before giving up.
pub const MAX_HOST_HOPS: usize = 500;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TrackingError {
    #[error("tracking API not found within {0} parent hops")]
    ApiNotFound(usize),
    #[error("LMSInitialize failed: {0}")]
    InitializeFailed(String),
}

/// SCORM 1.2 error codes reported through `last_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    NoError = 0,
    General = 101,
    InvalidArgument = 201,
    NotInitialized = 301,
    NotImplemented = 401,
    ReadOnly = 403,
    IncorrectDataType = 405,
}

impl ErrorCode {
    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(ErrorCode::NoError),
            101 => Some(ErrorCode::General),
            201 => Some(ErrorCode::InvalidArgument),
            301 => Some(ErrorCode::NotInitialized),
            401 => Some(ErrorCode::NotImplemented),
            403 => Some(ErrorCode::ReadOnly),
            405 => Some(ErrorCode::IncorrectDataType),
            _ => None,
        }
    }

    pub fn code(&self) -> u16 {
        *self as u16
    }

    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::NoError => "No error",
            ErrorCode::General => "General exception",
            ErrorCode::InvalidArgument => "Invalid argument error",
            ErrorCode::NotInitialized => "Not initialized",
            ErrorCode::NotImplemented => "Not implemented error",
            ErrorCode::ReadOnly => "Element is read only",
            ErrorCode::IncorrectDataType => "Incorrect data type",
        }
    }
}

/// The LMS-provided runtime API. Calls are synchronous, as in SCORM 1.2.
pub trait TrackingApi: Send + Sync {
    fn initialize(&self) -> bool;
    fn get_value(&self, key: &str) -> String;
    fn set_value(&self, key: &str, value: &str) -> bool;
    fn commit(&self) -> bool;
    fn terminate(&self);
    fn last_error(&self) -> u16;
    fn error_string(&self, code: u16) -> String;

    fn last_error_string(&self) -> String {
        self.error_string(self.last_error())
    }
}

/// A window in the embedding chain, as seen from the content page.
pub trait HostWindow: Send + Sync {
    fn api(&self) -> Option<Arc<dyn TrackingApi>>;
    fn parent(&self) -> Option<Arc<dyn HostWindow>>;
}

/// A statically configured host chain.
pub struct Frame {
    api: Option<Arc<dyn TrackingApi>>,
    parent: Option<Arc<dyn HostWindow>>,
}

impl Frame {
    /// A top-level window with no API.
    pub fn detached() -> Arc<Self> {
        Arc::new(Self {
            api: None,
            parent: None,
        })
    }

    /// A window that exposes `api` directly.
    pub fn with_api(api: Arc<dyn TrackingApi>) -> Arc<Self> {
        Arc::new(Self {
            api: Some(api),
            parent: None,
        })
    }

    /// A window nested inside `parent`.
    pub fn child_of(parent: Arc<dyn HostWindow>) -> Arc<Self> {
        Arc::new(Self {
            api: None,
            parent: Some(parent),
        })
    }
}

impl HostWindow for Frame {
    fn api(&self) -> Option<Arc<dyn TrackingApi>> {
        self.api.clone()
    }

    fn parent(&self) -> Option<Arc<dyn HostWindow>> {
        self.parent.clone()
    }
}

/// Walks up from `start` until a window exposes the API. The walk stops at
/// a window without a parent, at a window that is its own parent, or after
/// `max_hops` steps.
pub fn find_host_api(
    start: Arc<dyn HostWindow>,
    max_hops: usize,
) -> Result<Arc<dyn TrackingApi>, TrackingError> {
    let mut window = start;
    let mut hops = 0usize;

    loop {
        if let Some(api) = window.api() {
            return Ok(api);
        }
        let parent = match window.parent() {
            Some(parent) if !Arc::ptr_eq(&parent, &window) => parent,
            _ => return Err(TrackingError::ApiNotFound(hops)),
        };
        hops += 1;
        if hops > max_hops {
            error!("Error finding tracking API - too deep ({} hops)", hops);
            return Err(TrackingError::ApiNotFound(max_hops));
        }
        window = parent;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct NullApi;

    impl TrackingApi for NullApi {
        fn initialize(&self) -> bool {
            true
        }
        fn get_value(&self, _key: &str) -> String {
            String::new()
        }
        fn set_value(&self, _key: &str, _value: &str) -> bool {
            true
        }
        fn commit(&self) -> bool {
            true
        }
        fn terminate(&self) {}
        fn last_error(&self) -> u16 {
            0
        }
        fn error_string(&self, code: u16) -> String {
            format!("code {code}")
        }
    }

    /// A window that claims to be its own parent.
    struct SelfParented {
        me: Mutex<Option<Arc<dyn HostWindow>>>,
    }

    impl HostWindow for SelfParented {
        fn api(&self) -> Option<Arc<dyn TrackingApi>> {
            None
        }
        fn parent(&self) -> Option<Arc<dyn HostWindow>> {
            self.me.lock().unwrap().clone()
        }
    }

    fn chain(depth: usize, api_at_top: bool) -> Arc<dyn HostWindow> {
        let mut window: Arc<dyn HostWindow> = if api_at_top {
            Frame::with_api(Arc::new(NullApi))
        } else {
            Frame::detached()
        };
        for _ in 0..depth {
            window = Frame::child_of(window);
        }
        window
    }

    #[test]
    fn finds_api_on_start_window() {
        assert!(find_host_api(chain(0, true), MAX_HOST_HOPS).is_ok());
    }

    #[test]
    fn finds_api_several_parents_up() {
        assert!(find_host_api(chain(3, true), MAX_HOST_HOPS).is_ok());
    }

    #[test]
    fn missing_api_is_reported() {
        assert_eq!(
            find_host_api(chain(2, false), MAX_HOST_HOPS).err(),
            Some(TrackingError::ApiNotFound(2))
        );
    }

    #[test]
    fn hop_limit_is_enforced() {
        assert!(find_host_api(chain(3, true), 3).is_ok());
        assert_eq!(
            find_host_api(chain(4, true), 3).err(),
            Some(TrackingError::ApiNotFound(3))
        );
    }

    #[test]
    fn self_parented_window_terminates() {
        let window = Arc::new(SelfParented {
            me: Mutex::new(None),
        });
        let as_host: Arc<dyn HostWindow> = window.clone();
        *window.me.lock().unwrap() = Some(as_host.clone());
        assert!(find_host_api(as_host, MAX_HOST_HOPS).is_err());
        // break the cycle
        window.me.lock().unwrap().take();
    }

    #[test]
    fn error_codes_round_trip_descriptions() {
        assert_eq!(ErrorCode::from_code(301), Some(ErrorCode::NotInitialized));
        assert_eq!(ErrorCode::NotInitialized.code(), 301);
        assert_eq!(ErrorCode::from_code(999), None);
        assert_eq!(NullApi.last_error_string(), "code 0");
    }
}
