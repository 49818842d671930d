use crate::core::shared::state::AppContext;
use crate::update::UpdateFacility;
use log::{error, info};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Confirmation dialog offered from the header bell.
pub struct UpdateDialog {
    context: Arc<AppContext>,
    facility: Arc<dyn UpdateFacility>,
    open: bool,
}

impl UpdateDialog {
    pub fn new(context: Arc<AppContext>, facility: Arc<dyn UpdateFacility>) -> Self {
        Self {
            context,
            facility,
            open: false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn open(&mut self) {
        self.open = true;
    }

    /// "Later": close and keep the update pending.
    pub fn defer(&mut self) {
        self.open = false;
    }

    /// "Update now": activation runs detached. It normally reloads the client,
    /// so nothing waits on the handle; it is returned for callers that care.
    pub fn install_now(&self) -> JoinHandle<()> {
        let facility = Arc::clone(&self.facility);
        let context = Arc::clone(&self.context);
        tokio::spawn(async move {
            match facility.activate_waiting().await {
                Ok(()) => {
                    info!("Update activated");
                    context.set_update_available(false);
                }
                Err(e) => error!("Error updating app: {}", e),
            }
        })
    }
}
