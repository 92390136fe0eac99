//! Score records and lesson status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;
pub const DEFAULT_PASSING_SCORE: f64 = 70.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreDetail {
    /// Overlap ratio in `0.0..=1.0`.
    pub similarity: f64,
    pub timestamp: DateTime<Utc>,
}

/// One grading attempt. `raw_score` is the percentage before truncation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRecord {
    pub raw_score: f64,
    pub detail: ScoreDetail,
}

impl ScoreRecord {
    pub fn from_similarity(similarity: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            raw_score: similarity * 100.0,
            detail: ScoreDetail {
                similarity,
                timestamp,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum LessonStatus {
    Incomplete,
    Passed,
    Failed,
    Completed,
}

impl Default for LessonStatus {
    fn default() -> Self {
        LessonStatus::Incomplete
    }
}

impl LessonStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LessonStatus::Incomplete => "incomplete",
            LessonStatus::Passed => "passed",
            LessonStatus::Failed => "failed",
            LessonStatus::Completed => "completed",
        }
    }

    /// Parses the CMI vocabulary. SCORM also defines `browsed` and
    /// `not attempted`; both are treated as an unfinished attempt.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "incomplete" | "browsed" | "not attempted" => Some(LessonStatus::Incomplete),
            "passed" => Some(LessonStatus::Passed),
            "failed" => Some(LessonStatus::Failed),
            "completed" => Some(LessonStatus::Completed),
            _ => None,
        }
    }

    /// Terminal statuses trigger a restore on the next load.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, LessonStatus::Incomplete)
    }

    pub fn from_score(score: f64, passing_score: f64) -> Self {
        if passes(score, passing_score) {
            LessonStatus::Passed
        } else {
            LessonStatus::Failed
        }
    }
}

/// Pass/fail always compares the untruncated score.
pub fn passes(score: f64, passing_score: f64) -> bool {
    score >= passing_score
}

/// Whole percentage shown to the learner: truncated toward zero, never rounded.
pub fn display_percent(score: f64) -> String {
    format!("{}%", score.trunc() as i64)
}

/// Formats a score the way it is written into `cmi.core.score.raw`.
pub fn format_raw(score: f64) -> String {
    if score.fract() == 0.0 {
        format!("{}", score as i64)
    } else {
        format!("{score}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_boundary_passes() {
        assert_eq!(LessonStatus::from_score(70.0, 70.0), LessonStatus::Passed);
        assert_eq!(LessonStatus::from_score(69.0, 70.0), LessonStatus::Failed);
        assert_eq!(LessonStatus::from_score(100.0, 70.0), LessonStatus::Passed);
        assert_eq!(LessonStatus::from_score(0.0, 70.0), LessonStatus::Failed);
    }

    #[test]
    fn display_truncates_independently_of_grading() {
        assert_eq!(display_percent(76.987), "76%");
        assert_eq!(display_percent(69.999), "69%");
        assert!(!passes(69.999, 70.0));
        assert_eq!(display_percent(70.5), "70%");
        assert!(passes(70.5, 70.0));
        assert!(passes(69.5, 69.5));
        assert_eq!(display_percent(69.5), "69%");
    }

    #[test]
    fn similarity_becomes_percentage() {
        let record = ScoreRecord::from_similarity(0.85, Utc::now());
        assert!((record.raw_score - 85.0).abs() < 1e-9);
        assert_eq!(record.detail.similarity, 0.85);
    }

    #[test]
    fn raw_format_drops_integral_fraction() {
        assert_eq!(format_raw(85.0), "85");
        assert_eq!(format_raw(0.0), "0");
        assert_eq!(format_raw(70.5), "70.5");
    }

    #[test]
    fn status_vocabulary() {
        for status in [
            LessonStatus::Incomplete,
            LessonStatus::Passed,
            LessonStatus::Failed,
            LessonStatus::Completed,
        ] {
            assert_eq!(LessonStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(LessonStatus::parse("not attempted"), Some(LessonStatus::Incomplete));
        assert_eq!(LessonStatus::parse(""), None);
        assert!(!LessonStatus::Incomplete.is_terminal());
        assert!(LessonStatus::Completed.is_terminal());
    }
}
