//! Process-wide application context shared by the header, the update dialog
//! and the update monitor.

use tokio::sync::watch;

/// Shared client state that outlives a single bootstrap run.
///
/// Constructed once per page load and handed around as `Arc<AppContext>`.
/// The update flag lives in a `watch` channel so writes are serialized and
/// readers can await a change instead of polling.
#[derive(Debug)]
pub struct AppContext {
    update_available: watch::Sender<bool>,
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AppContext {
    pub fn new() -> Self {
        let (update_available, _) = watch::channel(false);
        Self { update_available }
    }

    pub fn update_available(&self) -> bool {
        *self.update_available.borrow()
    }

    /// Store the flag. Returns `true` only when the stored value changed;
    /// writing the current value wakes no subscriber.
    pub fn set_update_available(&self, available: bool) -> bool {
        self.update_available.send_if_modified(|current| {
            if *current == available {
                false
            } else {
                *current = available;
                true
            }
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.update_available.subscribe()
    }
}
