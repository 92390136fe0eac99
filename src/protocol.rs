//! Cross-window envelope exchanged between the viewer frame and the host page.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::score::{ScoreRecord, SCORE_MAX, SCORE_MIN};

/// Envelope tag carried in the `type` field.
pub const SCORE_SUBMITTED: &str = "SCORE_SUBMITTED";

/// Target origin used when posting. No origin restriction is applied.
pub const WILDCARD_ORIGIN: &str = "*";

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed SCORE_SUBMITTED payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("score {0} outside 0..=100")]
    ScoreOutOfRange(f64),
}

/// Grading context attached to a submission. Senders vary in what they
/// include, so every field is optional and only `score` gates acceptance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubmissionDetails {
    /// Raw overlap ratio.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dice: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl SubmissionDetails {
    /// Best-effort read of whatever the sender put under `details`.
    fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let timestamp = object.get("timestamp").and_then(Value::as_str).and_then(|raw| {
            match DateTime::parse_from_rfc3339(raw) {
                Ok(parsed) => Some(parsed.with_timezone(&Utc)),
                Err(err) => {
                    debug!("Ignoring submission timestamp {raw:?}: {err}");
                    None
                }
            }
        });
        Some(Self {
            dice: object.get("dice").and_then(Value::as_f64),
            timestamp,
        })
    }
}

fn lenient_details<'de, D>(deserializer: D) -> Result<Option<SubmissionDetails>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(SubmissionDetails::from_value))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreSubmission {
    pub score: f64,
    #[serde(
        default,
        deserialize_with = "lenient_details",
        skip_serializing_if = "Option::is_none"
    )]
    pub details: Option<SubmissionDetails>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "SCORE_SUBMITTED")]
    ScoreSubmitted(ScoreSubmission),
}

impl Envelope {
    pub fn from_record(record: &ScoreRecord) -> Self {
        Envelope::ScoreSubmitted(ScoreSubmission {
            score: record.raw_score,
            details: Some(SubmissionDetails {
                dice: Some(record.detail.similarity),
                timestamp: Some(record.detail.timestamp),
            }),
        })
    }

    pub fn to_value(&self) -> Value {
        // An enum of plain numbers and strings always serializes.
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A message as it crosses the window boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostedMessage {
    pub data: Value,
    pub target_origin: String,
}

/// Recognizes a score submission.
///
/// `Ok(None)` means the payload is not addressed to the scoring handshake
/// (missing, not an object, or no `SCORE_SUBMITTED` marker) and should be
/// dropped silently. A payload that carries the marker but cannot be read
/// is an error so the listener can log it.
pub fn parse_message(data: &Value) -> Result<Option<ScoreSubmission>, ProtocolError> {
    let marked = data
        .get("type")
        .and_then(Value::as_str)
        .map(|tag| tag == SCORE_SUBMITTED)
        .unwrap_or(false);
    if !marked {
        return Ok(None);
    }

    let Envelope::ScoreSubmitted(submission) = serde_json::from_value::<Envelope>(data.clone())?;
    if !submission.score.is_finite()
        || submission.score < SCORE_MIN
        || submission.score > SCORE_MAX
    {
        return Err(ProtocolError::ScoreOutOfRange(submission.score));
    }
    Ok(Some(submission))
}
