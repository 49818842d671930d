use super::dialog::UpdateDialog;
use crate::core::shared::state::AppContext;
use crate::update::UpdateFacility;
use std::sync::Arc;

/// Bell shown in the header while an update is available.
pub struct HeaderNotification {
    context: Arc<AppContext>,
    dialog: UpdateDialog,
}

impl HeaderNotification {
    pub fn new(context: Arc<AppContext>, facility: Arc<dyn UpdateFacility>) -> Self {
        let dialog = UpdateDialog::new(Arc::clone(&context), facility);
        Self { context, dialog }
    }

    pub fn is_visible(&self) -> bool {
        self.context.update_available()
    }

    /// Opens the dialog. A hidden bell cannot be clicked.
    pub fn click(&mut self) -> bool {
        if !self.is_visible() {
            return false;
        }
        self.dialog.open();
        true
    }

    pub fn dialog(&self) -> &UpdateDialog {
        &self.dialog
    }

    pub fn dialog_mut(&mut self) -> &mut UpdateDialog {
        &mut self.dialog
    }
}
