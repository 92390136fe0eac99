use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{error, info};
use serde::{Deserialize, Serialize};

use crate::score::DEFAULT_PASSING_SCORE;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Titles {
    pub instruction: String,
    pub results: String,
}

impl Default for Titles {
    fn default() -> Self {
        Self {
            instruction: "Segmentation Exercise".into(),
            results: "Exercise Complete".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Texts {
    pub welcome: String,
    pub description: String,
    pub instructions_header: String,
    pub instructions_list: Vec<String>,
    pub score_label: String,
}

impl Default for Texts {
    fn default() -> Self {
        Self {
            welcome: "Welcome to the Segmentation Exercise.".into(),
            description: "You will be asked to contour a specific anatomical structure.".into(),
            instructions_header: "Instructions:".into(),
            instructions_list: vec![
                "Draw your contour".into(),
                "Click Submit".into(),
                "Score is automatic".into(),
            ],
            score_label: "Your Final Score:".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Buttons {
    pub start: String,
    pub try_again: String,
}

impl Default for Buttons {
    fn default() -> Self {
        Self {
            start: "Start Exercise".into(),
            try_again: "Try Again".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingSettings {
    pub passing_score: f64,
}

impl Default for GradingSettings {
    fn default() -> Self {
        Self {
            passing_score: DEFAULT_PASSING_SCORE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    pub success: String,
    pub failure: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            success: "Congratulations! You have passed.".into(),
            failure: "You did not pass. Please try again.".into(),
        }
    }
}

/// Texts and grading threshold for the exercise page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub titles: Titles,
    pub text: Texts,
    pub buttons: Buttons,
    pub settings: GradingSettings,
    pub messages: Messages,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigFetchError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed configuration in {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
}

impl BridgeConfig {
    pub fn passing_score(&self) -> f64 {
        self.settings.passing_score
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(contents).context("failed to parse configuration")?;
        Ok(config)
    }

    pub async fn fetch(path: &Path) -> Result<Self, ConfigFetchError> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigFetchError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_str(&contents).map_err(|source| ConfigFetchError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Never fails: any fetch error falls back to the built-in defaults.
    pub async fn load_or_default(path: &Path) -> Self {
        match Self::fetch(path).await {
            Ok(config) => {
                info!("Config loaded from {}", path.display());
                config
            }
            Err(err) => {
                error!("Failed to load config, using defaults: {err}");
                Self::default()
            }
        }
    }
}
