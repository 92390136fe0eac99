pub mod controller;
pub mod launch;
pub mod page;
pub mod state;
pub mod view;

pub use controller::{BridgeSnapshot, SessionBridge};
pub use launch::LaunchContext;
pub use page::{run_page, spawn_config_load, PageEvent, PageExit};
pub use state::{BridgePhase, Screen, SessionState};
pub use view::{ChannelSink, Outcome, ResultsView, ViewEvent, ViewSink};
