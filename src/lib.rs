pub mod bridge;
pub mod config;
pub mod emitter;
pub mod host;
pub mod protocol;
pub mod score;
pub mod similarity;
pub mod tracking;

use anyhow::Context;
use host::{run_host, HostOptions};

pub fn run() -> anyhow::Result<()> {
    let debug_mode = std::env::var("SEGSCORE_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    // Initialize logging (reads RUST_LOG env var)
    env_logger::Builder::from_default_env()
        .filter_level(if debug_mode {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    log::info!("segscore starting up...");

    // One cooperative event loop, as in the browser page this stands in for.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build async runtime")?;

    runtime.block_on(run_host(HostOptions::from_env()))
}
