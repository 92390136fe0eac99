use std::path::PathBuf;

use log::{debug, info};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::{config::BridgeConfig, protocol::PostedMessage};

use super::controller::SessionBridge;

/// User and lifecycle events delivered to the host page.
#[derive(Debug, Clone)]
pub enum PageEvent {
    StartClicked,
    TryAgainClicked,
    ConfigLoaded(BridgeConfig),
    Unload,
}

/// Why the page loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageExit {
    Unloaded,
    Reload,
}

/// Loads the configuration off the loop and hands it back as an event.
pub fn spawn_config_load(path: PathBuf, events: mpsc::UnboundedSender<PageEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let config = BridgeConfig::load_or_default(&path).await;
        if events.send(PageEvent::ConfigLoaded(config)).is_err() {
            debug!("Page closed before configuration arrived");
        }
    })
}

/// Runs one page load: every handler completes before the next event is
/// taken, so clicks and messages never interleave.
pub async fn run_page(
    mut bridge: SessionBridge,
    mut events: mpsc::UnboundedReceiver<PageEvent>,
    mut messages: mpsc::UnboundedReceiver<PostedMessage>,
    cancel_token: CancellationToken,
) -> (SessionBridge, PageExit) {
    let mut listening = true;

    let exit = loop {
        tokio::select! {
            // teardown first, then clicks, then posted messages
            biased;

            _ = cancel_token.cancelled() => {
                info!("Page torn down");
                bridge.unload();
                break PageExit::Unloaded;
            }
            event = events.recv() => {
                match event {
                    Some(PageEvent::StartClicked) => bridge.start_assessment(),
                    Some(PageEvent::TryAgainClicked) => {
                        bridge.try_again();
                        break PageExit::Reload;
                    }
                    Some(PageEvent::ConfigLoaded(config)) => bridge.apply_config(config),
                    Some(PageEvent::Unload) | None => {
                        bridge.unload();
                        break PageExit::Unloaded;
                    }
                }
            }
            message = messages.recv(), if listening => {
                match message {
                    Some(message) => {
                        bridge.handle_message(&message.data);
                    }
                    None => {
                        debug!("Message channel closed");
                        listening = false;
                    }
                }
            }
        }
    };

    (bridge, exit)
}
