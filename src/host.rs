//! Command-line host: one process plays both windows. The bridge runs
//! against the SQLite tracking store, an embedded emitter plays the viewer,
//! stdin carries page actions and stdout receives view events as JSON lines.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use log::{info, warn};
use serde_json::{json, Value};
use tokio::{
    io::{AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::mpsc,
};
use tokio_util::sync::CancellationToken;

use crate::{
    bridge::{
        run_page, spawn_config_load, ChannelSink, LaunchContext, PageEvent, PageExit,
        SessionBridge, ViewEvent,
    },
    emitter::{ChannelParent, EmitError, GradingEmitter},
    protocol::{PostedMessage, WILDCARD_ORIGIN},
    tracking::{Frame, SqliteLms},
};

const DEFAULT_CASE_URL: &str = "http://localhost:3000/seg-scorer";

#[derive(Debug, Clone)]
pub struct HostOptions {
    pub config_path: PathBuf,
    pub db_path: PathBuf,
    pub learner_id: String,
    pub launch: LaunchContext,
}

impl HostOptions {
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|value| !value.is_empty());

        let mut launch =
            LaunchContext::new(var("SEGSCORE_CASE_URL").unwrap_or_else(|| DEFAULT_CASE_URL.into()));
        launch.patient_id = var("SEGSCORE_PATIENT_ID");
        launch.structure_name = var("SEGSCORE_STRUCTURE");

        Self {
            config_path: var("SEGSCORE_CONFIG")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("config.json")),
            db_path: var("SEGSCORE_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("segscore.sqlite3")),
            learner_id: var("SEGSCORE_LEARNER").unwrap_or_else(|| "local-learner".into()),
            launch,
        }
    }
}

/// A parsed stdin line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Grade(f64),
    Submit,
    TryAgain,
    Quit,
    /// A raw payload posted to the page as if from another frame.
    Post(Value),
}

pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.starts_with('{') {
        return serde_json::from_str(line).ok().map(Command::Post);
    }
    let mut parts = line.split_whitespace();
    match (parts.next()?, parts.next()) {
        ("start", None) => Some(Command::Start),
        ("grade", Some(value)) => value.parse().ok().map(Command::Grade),
        ("submit", None) => Some(Command::Submit),
        ("try-again", None) => Some(Command::TryAgain),
        ("quit", None) | ("exit", None) => Some(Command::Quit),
        _ => None,
    }
}

fn print_json(value: &Value) {
    println!("{value}");
}

fn spawn_printer(mut views: mpsc::UnboundedReceiver<ViewEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = views.recv().await {
            match serde_json::to_value(&event) {
                Ok(value) => print_json(&value),
                Err(err) => warn!("failed to serialize view event: {err}"),
            }
        }
    })
}

pub async fn run_host(options: HostOptions) -> Result<()> {
    let store = Arc::new(
        SqliteLms::open(options.db_path.clone(), options.learner_id.clone())
            .context("failed to open tracking store")?,
    );
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    let mut page_loads = 0u32;
    loop {
        page_loads += 1;
        info!("Page load #{page_loads}");
        match run_page_load(&options, store.clone(), &mut lines, shutdown.clone()).await? {
            PageExit::Reload => continue,
            PageExit::Unloaded => break,
        }
    }
    Ok(())
}

async fn run_page_load(
    options: &HostOptions,
    store: Arc<SqliteLms>,
    lines: &mut Lines<BufReader<Stdin>>,
    shutdown: CancellationToken,
) -> Result<PageExit> {
    let (view_tx, view_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (message_tx, message_rx) = mpsc::unbounded_channel();
    let printer = spawn_printer(view_rx);

    let host = Frame::child_of(Frame::with_api(store));
    let mut bridge = SessionBridge::new(
        host,
        options.launch.clone(),
        Arc::new(ChannelSink::new(view_tx)),
    );
    let _ = spawn_config_load(options.config_path.clone(), event_tx.clone());
    bridge.initialize_session();

    let mut emitter = GradingEmitter::embedded(Arc::new(ChannelParent::new(message_tx.clone())));
    let mut page = tokio::spawn(run_page(bridge, event_rx, message_rx, shutdown.child_token()));
    let mut stdin_open = true;

    let exit = loop {
        tokio::select! {
            joined = &mut page => {
                let (_, exit) = joined.context("page task failed")?;
                break exit;
            }
            line = lines.next_line(), if stdin_open => {
                let line = match line.context("failed to read stdin")? {
                    Some(line) => line,
                    None => {
                        stdin_open = false;
                        let _ = event_tx.send(PageEvent::Unload);
                        continue;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match parse_command(&line) {
                    Some(Command::Start) => {
                        let _ = event_tx.send(PageEvent::StartClicked);
                    }
                    Some(Command::Grade(similarity)) => {
                        let record = emitter.compute_and_store(similarity);
                        print_json(&json!({ "event": "scoreStored", "record": record }));
                    }
                    Some(Command::Submit) => match emitter.submit() {
                        Ok(()) => {}
                        Err(err @ EmitError::NoParentWindow) | Err(err @ EmitError::NoScore) => {
                            print_json(&json!({ "event": "notice", "message": err.to_string() }));
                        }
                        Err(err) => warn!("submit failed: {err}"),
                    },
                    Some(Command::TryAgain) => {
                        let _ = event_tx.send(PageEvent::TryAgainClicked);
                    }
                    Some(Command::Quit) => {
                        let _ = event_tx.send(PageEvent::Unload);
                    }
                    Some(Command::Post(data)) => {
                        let _ = message_tx.send(PostedMessage {
                            data,
                            target_origin: WILDCARD_ORIGIN.to_string(),
                        });
                    }
                    None => warn!("unrecognized command: {}", line.trim()),
                }
            }
        }
    };

    // Dropping the senders lets the printer drain and stop.
    drop(emitter);
    drop(message_tx);
    drop(event_tx);
    let _ = printer.await;
    Ok(exit)
}
