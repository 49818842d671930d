pub mod bootstrap;
pub mod config;
pub mod core;
pub mod monitor;
pub mod network;
pub mod ui;
pub mod update;

pub use bootstrap::{BootstrapPhase, BootstrapSequencer, BootstrapStatus, Pacing};
pub use config::ShellConfig;
pub use crate::core::shared::state::AppContext;
pub use monitor::{MonitorHandle, UpdateMonitor};
pub use ui::{AppShell, ShellView};
