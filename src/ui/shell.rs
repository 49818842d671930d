use super::header::HeaderNotification;
use crate::bootstrap::{BootstrapSequencer, BootstrapStatus, Pacing};
use crate::core::clock::{Clock, TokioClock};
use crate::core::shared::state::AppContext;
use crate::monitor::{MonitorHandle, UpdateMonitor, DEFAULT_POLL_INTERVAL};
use crate::network::Reachability;
use crate::update::{UpdateFacility, DEFAULT_CHECK_TIMEOUT};
use log::info;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone)]
pub enum ShellView {
    Loading(BootstrapStatus),
    Authenticated,
}

impl ShellView {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated)
    }
}

/// Host application: shows the loading view until the sequencer signals
/// readiness, then mounts the update monitor and the header bell.
pub struct AppShell {
    context: Arc<AppContext>,
    reachability: Arc<dyn Reachability>,
    facility: Arc<dyn UpdateFacility>,
    clock: Arc<dyn Clock>,
    pacing: Pacing,
    poll_interval: Duration,
    check_timeout: Duration,
    view: ShellView,
    monitor: Option<MonitorHandle>,
    header: Option<HeaderNotification>,
}

impl AppShell {
    pub fn new(
        context: Arc<AppContext>,
        reachability: Arc<dyn Reachability>,
        facility: Arc<dyn UpdateFacility>,
    ) -> Self {
        Self {
            context,
            reachability,
            facility,
            clock: Arc::new(TokioClock),
            pacing: Pacing::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            view: ShellView::Loading(BootstrapStatus::new()),
            monitor: None,
            header: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_check_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.context
    }

    pub fn view(&self) -> &ShellView {
        &self.view
    }

    pub fn header(&self) -> Option<&HeaderNotification> {
        self.header.as_ref()
    }

    pub fn header_mut(&mut self) -> Option<&mut HeaderNotification> {
        self.header.as_mut()
    }

    pub fn monitor(&self) -> Option<&MonitorHandle> {
        self.monitor.as_ref()
    }

    /// Run the bootstrap sequence, feeding each status to `on_status`, then
    /// swap to the authenticated view.
    pub async fn launch<F>(&mut self, mut on_status: F) -> BootstrapStatus
    where
        F: FnMut(&BootstrapStatus),
    {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel::<()>();

        let sequencer = BootstrapSequencer::new(
            Arc::clone(&self.reachability),
            Arc::clone(&self.facility),
        )
        .with_clock(Arc::clone(&self.clock))
        .with_pacing(self.pacing)
        .with_check_timeout(self.check_timeout)
        .with_progress_channel(progress_tx);

        let run = sequencer.run(move || {
            ready_tx.send(()).ok();
        });
        let view = &mut self.view;
        let render = async {
            while let Some(status) = progress_rx.recv().await {
                on_status(&status);
                *view = ShellView::Loading(status);
            }
        };
        let (final_status, ()) = tokio::join!(run, render);

        if ready_rx.await.is_ok() {
            self.mount_authenticated().await;
        }
        final_status
    }

    async fn mount_authenticated(&mut self) {
        info!("Application ready, mounting authenticated view");
        self.view = ShellView::Authenticated;
        let monitor = UpdateMonitor::new(Arc::clone(&self.context), Arc::clone(&self.facility))
            .with_poll_interval(self.poll_interval)
            .with_check_timeout(self.check_timeout.min(self.poll_interval))
            .mount()
            .await;
        self.monitor = Some(monitor);
        self.header = Some(HeaderNotification::new(
            Arc::clone(&self.context),
            Arc::clone(&self.facility),
        ));
    }

    pub fn shutdown(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.unmount();
        }
        self.header = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bootstrap::BootstrapPhase;
    use crate::core::clock::RecordingClock;
    use crate::tests::fakes::{FakeFacility, FakeReachability};
    use crate::tests::test_util;

    fn shell(reachability: FakeReachability, facility: &Arc<FakeFacility>) -> AppShell {
        AppShell::new(
            Arc::new(AppContext::new()),
            Arc::new(reachability),
            facility.clone(),
        )
        .with_clock(Arc::new(RecordingClock::new()))
    }

    #[tokio::test]
    async fn test_loading_view_before_launch() {
        let facility = Arc::new(FakeFacility::new());
        let shell = shell(FakeReachability::online(), &facility);

        assert!(!shell.view().is_authenticated());
        assert!(shell.header().is_none());
        assert!(shell.monitor().is_none());
    }

    #[tokio::test]
    async fn test_launch_swaps_to_authenticated() {
        test_util::setup();
        let facility = Arc::new(FakeFacility::new());
        let mut shell = shell(FakeReachability::online(), &facility);

        let mut seen = Vec::new();
        let status = shell.launch(|s| seen.push(s.phase)).await;

        assert_eq!(status.phase, BootstrapPhase::Ready);
        assert_eq!(seen.first(), Some(&BootstrapPhase::CheckingNetwork));
        assert_eq!(seen.last(), Some(&BootstrapPhase::Ready));
        assert!(shell.view().is_authenticated());
        assert!(shell.monitor().is_some());
        assert_eq!(facility.registration_count(), 1);
        assert_eq!(facility.listener_count(), 1);
        assert!(!shell.header().unwrap().is_visible());
    }

    #[tokio::test]
    async fn test_offline_launch_still_mounts() {
        test_util::setup();
        let facility = Arc::new(FakeFacility::new());
        let mut shell = shell(FakeReachability::offline(), &facility);

        let status = shell.launch(|_| {}).await;

        assert_eq!(status.phase, BootstrapPhase::Offline);
        assert!(shell.view().is_authenticated());
        assert!(shell.monitor().is_some());
    }

    #[tokio::test]
    async fn test_shutdown_unmounts_monitor() {
        test_util::setup();
        let facility = Arc::new(FakeFacility::new());
        let mut shell = shell(FakeReachability::online(), &facility);
        shell.launch(|_| {}).await;

        shell.shutdown();

        assert!(shell.monitor().is_none());
        assert!(shell.header().is_none());
        assert_eq!(facility.listener_count(), 0);
    }
}
