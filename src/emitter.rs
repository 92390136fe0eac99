//! Viewer-side half of the handshake: grade now, submit on a second action.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    protocol::{Envelope, PostedMessage, WILDCARD_ORIGIN},
    score::ScoreRecord,
    similarity::{dice_score, Mask, SimilarityError},
};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EmitError {
    #[error("no score has been computed yet")]
    NoScore,
    #[error("no LMS parent window detected")]
    NoParentWindow,
    #[error("parent window is no longer listening")]
    ChannelClosed,
}

/// The frame that hosts the viewer.
pub trait ParentWindow: Send + Sync {
    fn post_message(&self, message: PostedMessage) -> Result<(), EmitError>;
}

/// Parent reached through an in-process channel.
#[derive(Clone)]
pub struct ChannelParent {
    sender: mpsc::UnboundedSender<PostedMessage>,
}

impl ChannelParent {
    pub fn new(sender: mpsc::UnboundedSender<PostedMessage>) -> Self {
        Self { sender }
    }
}

impl ParentWindow for ChannelParent {
    fn post_message(&self, message: PostedMessage) -> Result<(), EmitError> {
        self.sender
            .send(message)
            .map_err(|_| EmitError::ChannelClosed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "state")]
pub enum EmitterState {
    Unsubmitted,
    Stored { record: ScoreRecord },
    Submitted { record: ScoreRecord, sends: u32 },
}

pub struct GradingEmitter {
    parent: Option<Arc<dyn ParentWindow>>,
    state: EmitterState,
}

impl GradingEmitter {
    /// Emitter inside a frame whose parent is a different window.
    pub fn embedded(parent: Arc<dyn ParentWindow>) -> Self {
        Self {
            parent: Some(parent),
            state: EmitterState::Unsubmitted,
        }
    }

    /// Emitter running as the top-level window.
    pub fn standalone() -> Self {
        Self {
            parent: None,
            state: EmitterState::Unsubmitted,
        }
    }

    pub fn state(&self) -> &EmitterState {
        &self.state
    }

    pub fn is_embedded(&self) -> bool {
        self.parent.is_some()
    }

    /// The held record, sent or not.
    pub fn pending(&self) -> Option<&ScoreRecord> {
        match &self.state {
            EmitterState::Unsubmitted => None,
            EmitterState::Stored { record } | EmitterState::Submitted { record, .. } => Some(record),
        }
    }

    pub fn compute_and_store(&mut self, similarity: f64) -> ScoreRecord {
        self.compute_and_store_at(similarity, Utc::now())
    }

    /// Replaces any held record. Nothing is transmitted.
    pub fn compute_and_store_at(&mut self, similarity: f64, timestamp: DateTime<Utc>) -> ScoreRecord {
        let similarity = if similarity.is_nan() {
            warn!("Similarity is NaN, storing 0");
            0.0
        } else if !(0.0..=1.0).contains(&similarity) {
            warn!("Similarity {} outside 0..=1, clamping", similarity);
            similarity.clamp(0.0, 1.0)
        } else {
            similarity
        };

        let record = ScoreRecord::from_similarity(similarity, timestamp);
        info!(
            "Stored score {:.2} (similarity {:.4}), waiting for submission",
            record.raw_score, similarity
        );
        self.state = EmitterState::Stored {
            record: record.clone(),
        };
        record
    }

    /// Grades a user mask against the reference and stores the result.
    pub fn grade(&mut self, reference: &Mask, user: &Mask) -> Result<ScoreRecord, SimilarityError> {
        let similarity = dice_score(reference, user)?;
        Ok(self.compute_and_store(similarity))
    }

    /// Posts the held record to the parent window. The record stays held,
    /// so calling again resends the same payload.
    pub fn submit(&mut self) -> Result<(), EmitError> {
        let (record, sends) = match &self.state {
            EmitterState::Unsubmitted => return Err(EmitError::NoScore),
            EmitterState::Stored { record } => (record.clone(), 0),
            EmitterState::Submitted { record, sends } => (record.clone(), *sends),
        };

        let parent = match &self.parent {
            Some(parent) => parent,
            None => {
                warn!("Submit requested but the viewer is not embedded in an LMS page");
                return Err(EmitError::NoParentWindow);
            }
        };

        parent.post_message(PostedMessage {
            data: Envelope::from_record(&record).to_value(),
            target_origin: WILDCARD_ORIGIN.to_string(),
        })?;

        info!("Submitted score {:.2} to parent window", record.raw_score);
        self.state = EmitterState::Submitted {
            record,
            sends: sends + 1,
        };
        Ok(())
    }
}
