//! Output side of the host page. The bridge never touches a DOM; it emits
//! serializable events and whatever renders the page applies them.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::config::{BridgeConfig, Buttons, Texts, Titles};
use crate::score::{display_percent, passes};

use super::state::Screen;

pub const PASS_COLOR: &str = "#4ade80";
pub const FAIL_COLOR: &str = "#f87171";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultsView {
    /// Truncated whole percentage, e.g. `"76%"`.
    pub score_text: String,
    pub color: &'static str,
    pub feedback: String,
    pub outcome: Outcome,
}

impl ResultsView {
    /// Display truncates; pass/fail compares the raw score.
    pub fn build(score: f64, config: &BridgeConfig) -> Self {
        let passed = passes(score, config.passing_score());
        Self {
            score_text: display_percent(score),
            color: if passed { PASS_COLOR } else { FAIL_COLOR },
            feedback: if passed {
                config.messages.success.clone()
            } else {
                config.messages.failure.clone()
            },
            outcome: if passed {
                Outcome::Success
            } else {
                Outcome::Failure
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum ViewEvent {
    ConfigApplied {
        titles: Titles,
        text: Texts,
        buttons: Buttons,
    },
    ScreenChanged {
        screen: Screen,
    },
    ResultsUpdated(ResultsView),
    ViewerLaunched {
        url: String,
    },
    ReloadRequested,
}

impl ViewEvent {
    pub fn config_applied(config: &BridgeConfig) -> Self {
        ViewEvent::ConfigApplied {
            titles: config.titles.clone(),
            text: config.text.clone(),
            buttons: config.buttons.clone(),
        }
    }
}

pub trait ViewSink: Send + Sync {
    fn emit(&self, event: ViewEvent);
}

/// Forwards view events to whoever renders the page.
#[derive(Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ViewEvent>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::UnboundedSender<ViewEvent>) -> Self {
        Self { sender }
    }
}

impl ViewSink for ChannelSink {
    fn emit(&self, event: ViewEvent) {
        // A closed renderer means the page is gone.
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn results_use_raw_score_for_outcome() {
        let config = BridgeConfig::default();

        let view = ResultsView::build(70.5, &config);
        assert_eq!(view.score_text, "70%");
        assert_eq!(view.outcome, Outcome::Success);
        assert_eq!(view.color, PASS_COLOR);
        assert_eq!(view.feedback, config.messages.success);

        let view = ResultsView::build(69.999, &config);
        assert_eq!(view.score_text, "69%");
        assert_eq!(view.outcome, Outcome::Failure);
        assert_eq!(view.color, FAIL_COLOR);
        assert_eq!(view.feedback, config.messages.failure);
    }

    #[test]
    fn fractional_threshold_can_pass_below_displayed_integer() {
        let mut config = BridgeConfig::default();
        config.settings.passing_score = 69.5;
        let view = ResultsView::build(69.7, &config);
        assert_eq!(view.score_text, "69%");
        assert_eq!(view.outcome, Outcome::Success);
    }

    #[test]
    fn events_serialize_with_tag() {
        let value = serde_json::to_value(ViewEvent::ScreenChanged {
            screen: Screen::Results,
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({ "event": "screenChanged", "screen": "results" })
        );
        let value = serde_json::to_value(ViewEvent::ReloadRequested).unwrap();
        assert_eq!(value, serde_json::json!({ "event": "reloadRequested" }));
    }
}
