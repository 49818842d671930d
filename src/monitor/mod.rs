//! Background watcher that surfaces newly installable bundles during the
//! session.

use crate::core::shared::state::AppContext;
use crate::update::{SubscriptionId, UpdateError, UpdateFacility, UpdateListener};
use log::{debug, error, info, trace, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Flips the shared availability flag on detection. Repeated detections are
/// no-ops.
pub struct AvailabilityListener {
    context: Arc<AppContext>,
}

impl AvailabilityListener {
    pub fn new(context: Arc<AppContext>) -> Self {
        Self { context }
    }
}

impl UpdateListener for AvailabilityListener {
    fn on_waiting_changed(&self, waiting: bool) {
        if !waiting {
            return;
        }
        if self.context.set_update_available(true) {
            info!("Update available - showing notification");
        } else {
            trace!("Update already flagged as available");
        }
    }
}

pub struct UpdateMonitor {
    context: Arc<AppContext>,
    facility: Arc<dyn UpdateFacility>,
    poll_interval: Duration,
    check_timeout: Option<Duration>,
}

impl UpdateMonitor {
    pub fn new(context: Arc<AppContext>, facility: Arc<dyn UpdateFacility>) -> Self {
        Self {
            context,
            facility,
            poll_interval: DEFAULT_POLL_INTERVAL,
            check_timeout: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        if poll_interval.is_zero() {
            warn!("Ignoring zero poll interval, keeping {:?}", self.poll_interval);
        } else {
            self.poll_interval = poll_interval;
        }
        self
    }

    /// Bound on a single check. Defaults to the poll interval.
    pub fn with_check_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = Some(check_timeout);
        self
    }

    /// Subscribe to the facility, register it and start polling.
    ///
    /// Registration failures are logged and leave the subscription active
    /// without periodic checks.
    pub async fn mount(self) -> MonitorHandle {
        info!("Update monitoring started");

        let listener = Arc::new(AvailabilityListener::new(Arc::clone(&self.context)));
        let subscription = self.facility.subscribe(listener.clone());
        if self.facility.is_update_waiting() {
            listener.on_waiting_changed(true);
        }

        let poll_task = match self.facility.register().await {
            Ok(()) => {
                info!(
                    "Update facility registered, checking every {:?}",
                    self.poll_interval
                );
                Some(spawn_poll_loop(
                    Arc::clone(&self.facility),
                    self.poll_interval,
                    self.check_timeout.unwrap_or(self.poll_interval),
                ))
            }
            Err(e) => {
                error!("Update facility registration error: {}", e);
                None
            }
        };

        MonitorHandle {
            facility: self.facility,
            subscription: Some(subscription),
            poll_task,
        }
    }
}

struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn spawn_poll_loop(
    facility: Arc<dyn UpdateFacility>,
    period: Duration,
    check_timeout: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let busy = Arc::new(AtomicBool::new(false));
        let mut tick = interval_at(Instant::now() + period, period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if busy.swap(true, Ordering::AcqRel) {
                debug!("Previous update check still running, skipping tick");
                continue;
            }
            let guard = InFlight(Arc::clone(&busy));
            let facility = Arc::clone(&facility);
            tokio::spawn(async move {
                let _guard = guard;
                debug!("Checking for updates...");
                let result = tokio::time::timeout(check_timeout, facility.check_for_update())
                    .await
                    .unwrap_or(Err(UpdateError::Timeout(check_timeout)));
                match result {
                    Ok(true) => debug!("Update check done, bundle waiting"),
                    Ok(false) => trace!("Update check done, nothing new"),
                    Err(e) => error!("Error checking for updates: {}", e),
                }
            });
        }
    })
}

/// Live monitor. Unmounting (or dropping) removes the subscription and stops
/// polling; a check already in flight is left to finish.
pub struct MonitorHandle {
    facility: Arc<dyn UpdateFacility>,
    subscription: Option<SubscriptionId>,
    poll_task: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    pub fn is_polling(&self) -> bool {
        self.poll_task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.subscription
    }

    pub fn unmount(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(task) = self.poll_task.take() {
            task.abort();
        }
        if let Some(id) = self.subscription.take() {
            self.facility.unsubscribe(id);
            info!("Update monitor unmounted");
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.teardown();
    }
}
