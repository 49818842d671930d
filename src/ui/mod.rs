//! Client-side consumers of the update state and the host shell that swaps
//! from the loading view to the authenticated view.

pub mod dialog;
pub mod header;
pub mod shell;

pub use dialog::UpdateDialog;
pub use header::HeaderNotification;
pub use shell::{AppShell, ShellView};
