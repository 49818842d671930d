//! One-shot startup sequence gating the first render of the authenticated UI.
//!
//! The sequence always ends by calling `on_ready`, whatever the network or
//! the update facility do. Failures degrade the status text, never block.

use crate::config::PacingConfig;
use crate::core::clock::{Clock, TokioClock};
use crate::network::Reachability;
use crate::update::{UpdateError, UpdateFacility, DEFAULT_CHECK_TIMEOUT};
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    CheckingNetwork,
    UpdatingBundle,
    Ready,
    Offline,
}

impl BootstrapPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Offline)
    }
}

impl std::fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CheckingNetwork => write!(f, "checking network"),
            Self::UpdatingBundle => write!(f, "updating"),
            Self::Ready => write!(f, "ready"),
            Self::Offline => write!(f, "offline"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BootstrapStatus {
    pub phase: BootstrapPhase,
    pub progress_percent: u8,
    pub message: String,
    pub updated_at: DateTime<Utc>,
}

impl Default for BootstrapStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl BootstrapStatus {
    pub fn new() -> Self {
        Self {
            phase: BootstrapPhase::CheckingNetwork,
            progress_percent: 0,
            message: String::new(),
            updated_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for BootstrapStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:>3}%] {}", self.progress_percent, self.message)
    }
}

/// UX pacing between steps. Only relative ordering matters for correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub step_pause: Duration,
    pub ready_pause: Duration,
    pub offline_pause: Duration,
    pub failure_pause: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self::from(&PacingConfig::default())
    }
}

impl From<&PacingConfig> for Pacing {
    fn from(config: &PacingConfig) -> Self {
        Self {
            step_pause: Duration::from_millis(config.step_pause_ms),
            ready_pause: Duration::from_millis(config.ready_pause_ms),
            offline_pause: Duration::from_millis(config.offline_pause_ms),
            failure_pause: Duration::from_millis(config.failure_pause_ms),
        }
    }
}

impl Pacing {
    pub fn none() -> Self {
        Self {
            step_pause: Duration::ZERO,
            ready_pause: Duration::ZERO,
            offline_pause: Duration::ZERO,
            failure_pause: Duration::ZERO,
        }
    }
}

pub struct BootstrapSequencer {
    reachability: Arc<dyn Reachability>,
    facility: Arc<dyn UpdateFacility>,
    clock: Arc<dyn Clock>,
    pacing: Pacing,
    check_timeout: Duration,
    status: BootstrapStatus,
    progress_tx: Option<UnboundedSender<BootstrapStatus>>,
}

impl BootstrapSequencer {
    pub fn new(reachability: Arc<dyn Reachability>, facility: Arc<dyn UpdateFacility>) -> Self {
        Self {
            reachability,
            facility,
            clock: Arc::new(TokioClock),
            pacing: Pacing::default(),
            check_timeout: DEFAULT_CHECK_TIMEOUT,
            status: BootstrapStatus::new(),
            progress_tx: None,
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

    /// Upper bound on the update check. Past it the sequence takes the
    /// failure path.
    pub fn with_check_timeout(mut self, check_timeout: Duration) -> Self {
        self.check_timeout = check_timeout;
        self
    }

    /// Every status change is sent here, in order.
    pub fn with_progress_channel(mut self, tx: UnboundedSender<BootstrapStatus>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn status(&self) -> &BootstrapStatus {
        &self.status
    }

    /// Run the sequence to a terminal state and call `on_ready` exactly once.
    /// Returns the last published status.
    pub async fn run<F>(mut self, on_ready: F) -> BootstrapStatus
    where
        F: FnOnce(),
    {
        self.publish(
            BootstrapPhase::CheckingNetwork,
            10,
            "Checking network connection...",
        );

        if !self.reachability.is_reachable().await {
            info!("Network unreachable, starting in offline mode");
            self.publish(BootstrapPhase::Offline, 100, "Running in offline mode");
            self.clock.sleep(self.pacing.offline_pause).await;
            on_ready();
            return self.status;
        }

        self.publish(BootstrapPhase::CheckingNetwork, 40, "Network connected");
        self.clock.sleep(self.pacing.step_pause).await;

        if let Err(e) = self.update_bundle().await {
            error!("Error during app initialization: {}", e);
            let phase = self.status.phase;
            self.publish(phase, 100, "Loading application...");
            self.clock.sleep(self.pacing.failure_pause).await;
            on_ready();
            return self.status;
        }

        self.publish(BootstrapPhase::Ready, 100, "Starting application...");
        self.clock.sleep(self.pacing.ready_pause).await;
        on_ready();
        self.status
    }

    async fn update_bundle(&mut self) -> Result<(), UpdateError> {
        self.publish(BootstrapPhase::UpdatingBundle, 60, "Checking for updates...");

        let waiting = tokio::time::timeout(self.check_timeout, self.facility.check_for_update())
            .await
            .map_err(|_| UpdateError::Timeout(self.check_timeout))??;
        if waiting {
            self.publish(BootstrapPhase::UpdatingBundle, 75, "Installing updates...");
            self.facility.activate_waiting().await?;
            self.publish(BootstrapPhase::UpdatingBundle, 90, "Update complete");
        } else {
            self.publish(BootstrapPhase::UpdatingBundle, 90, "App is up to date");
        }
        self.clock.sleep(self.pacing.step_pause).await;
        Ok(())
    }

    fn publish(&mut self, phase: BootstrapPhase, progress: u8, message: &str) {
        self.status.phase = phase;
        self.status.progress_percent = self.status.progress_percent.max(progress.min(100));
        self.status.message = message.to_string();
        self.status.updated_at = Utc::now();
        debug!("Bootstrap [{}] {}", phase, self.status);
        if let Some(tx) = &self.progress_tx {
            tx.send(self.status.clone()).ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::RecordingClock;
    use crate::tests::fakes::{FakeFacility, FakeReachability};
    use crate::tests::test_util;
    use tokio::sync::mpsc;

    struct Outcome {
        statuses: Vec<BootstrapStatus>,
        final_status: BootstrapStatus,
        ready_calls: usize,
    }

    async fn run_with(
        reachability: Arc<FakeReachability>,
        facility: Arc<FakeFacility>,
        clock: Arc<RecordingClock>,
    ) -> Outcome {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sequencer = BootstrapSequencer::new(reachability, facility)
            .with_clock(clock)
            .with_progress_channel(tx);

        let mut ready_calls = 0;
        let final_status = sequencer.run(|| ready_calls += 1).await;

        let mut statuses = Vec::new();
        while let Ok(status) = rx.try_recv() {
            statuses.push(status);
        }
        Outcome {
            statuses,
            final_status,
            ready_calls,
        }
    }

    fn messages(outcome: &Outcome) -> Vec<&str> {
        outcome.statuses.iter().map(|s| s.message.as_str()).collect()
    }

    fn assert_progress_non_decreasing(outcome: &Outcome) {
        let progress: Vec<u8> = outcome
            .statuses
            .iter()
            .map(|s| s.progress_percent)
            .collect();
        assert!(
            progress.windows(2).all(|w| w[0] <= w[1]),
            "progress went backwards: {:?}",
            progress
        );
    }

    #[test]
    fn test_new_status_starts_checking_network() {
        let status = BootstrapStatus::new();
        assert_eq!(status.phase, BootstrapPhase::CheckingNetwork);
        assert_eq!(status.progress_percent, 0);
        assert!(!status.phase.is_terminal());
        assert!(BootstrapPhase::Ready.is_terminal());
        assert!(BootstrapPhase::Offline.is_terminal());
    }

    #[tokio::test]
    async fn test_online_without_update() {
        test_util::setup();
        let clock = Arc::new(RecordingClock::new());
        let facility = Arc::new(FakeFacility::new());
        let outcome = run_with(
            Arc::new(FakeReachability::online()),
            Arc::clone(&facility),
            Arc::clone(&clock),
        )
        .await;

        assert_eq!(outcome.ready_calls, 1);
        assert_eq!(
            messages(&outcome),
            vec![
                "Checking network connection...",
                "Network connected",
                "Checking for updates...",
                "App is up to date",
                "Starting application...",
            ]
        );
        assert_eq!(outcome.final_status.phase, BootstrapPhase::Ready);
        assert_eq!(outcome.final_status.progress_percent, 100);
        assert_eq!(facility.activation_count(), 0);
        assert_eq!(
            clock.pauses(),
            vec![
                Duration::from_millis(300),
                Duration::from_millis(300),
                Duration::from_millis(500),
            ]
        );
        assert_progress_non_decreasing(&outcome);
    }

    #[tokio::test]
    async fn test_offline_skips_update_step() {
        test_util::setup();
        let clock = Arc::new(RecordingClock::new());
        let facility = Arc::new(FakeFacility::new().with_waiting(true));
        let outcome = run_with(
            Arc::new(FakeReachability::offline()),
            Arc::clone(&facility),
            Arc::clone(&clock),
        )
        .await;

        let phases: Vec<BootstrapPhase> = outcome.statuses.iter().map(|s| s.phase).collect();
        assert_eq!(
            phases,
            vec![BootstrapPhase::CheckingNetwork, BootstrapPhase::Offline]
        );
        assert_eq!(outcome.final_status.message, "Running in offline mode");
        assert_eq!(outcome.final_status.progress_percent, 100);
        assert_eq!(outcome.ready_calls, 1);
        assert_eq!(facility.check_count(), 0);
        assert_eq!(facility.activation_count(), 0);
        assert_eq!(clock.pauses(), vec![Duration::from_millis(1500)]);
    }

    #[tokio::test]
    async fn test_waiting_update_is_installed() {
        test_util::setup();
        let clock = Arc::new(RecordingClock::new());
        let facility = Arc::new(FakeFacility::new().with_waiting(true));
        let outcome = run_with(
            Arc::new(FakeReachability::online()),
            Arc::clone(&facility),
            clock,
        )
        .await;

        assert_eq!(facility.activation_count(), 1);
        assert_eq!(
            messages(&outcome)[2..],
            [
                "Checking for updates...",
                "Installing updates...",
                "Update complete",
                "Starting application...",
            ]
        );
        let install = &outcome.statuses[3];
        assert_eq!(install.phase, BootstrapPhase::UpdatingBundle);
        assert_eq!(install.progress_percent, 75);
        assert_eq!(outcome.ready_calls, 1);
        assert_progress_non_decreasing(&outcome);
    }

    #[tokio::test]
    async fn test_install_failure_still_reaches_ready() {
        test_util::setup();
        let clock = Arc::new(RecordingClock::new());
        let facility = Arc::new(FakeFacility::new().with_waiting(true).failing_activation());
        let outcome = run_with(
            Arc::new(FakeReachability::online()),
            Arc::clone(&facility),
            Arc::clone(&clock),
        )
        .await;

        assert_eq!(outcome.ready_calls, 1);
        assert_eq!(outcome.final_status.message, "Loading application...");
        assert_eq!(outcome.final_status.progress_percent, 100);
        assert_eq!(outcome.final_status.phase, BootstrapPhase::UpdatingBundle);
        assert!(!messages(&outcome).contains(&"Update complete"));
        assert_eq!(
            clock.pauses(),
            vec![Duration::from_millis(300), Duration::from_millis(500)]
        );
        assert_progress_non_decreasing(&outcome);
    }

    #[tokio::test]
    async fn test_check_failure_is_absorbed() {
        test_util::setup();
        let facility = Arc::new(FakeFacility::new().failing_check(1));
        let outcome = run_with(
            Arc::new(FakeReachability::online()),
            Arc::clone(&facility),
            Arc::new(RecordingClock::new()),
        )
        .await;

        assert_eq!(outcome.ready_calls, 1);
        assert_eq!(outcome.final_status.message, "Loading application...");
        assert_eq!(facility.activation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_check_takes_failure_path() {
        test_util::setup();
        let clock = Arc::new(RecordingClock::new());
        let facility = Arc::new(FakeFacility::new().stalling_check(1));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sequencer = BootstrapSequencer::new(Arc::new(FakeReachability::online()), facility)
            .with_clock(clock.clone())
            .with_check_timeout(Duration::from_secs(2))
            .with_progress_channel(tx);

        let start = tokio::time::Instant::now();
        let mut ready_calls = 0;
        let status = sequencer.run(|| ready_calls += 1).await;

        assert_eq!(ready_calls, 1);
        assert_eq!(status.message, "Loading application...");
        assert_eq!(status.progress_percent, 100);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
        assert_eq!(
            clock.pauses(),
            vec![Duration::from_millis(300), Duration::from_millis(500)]
        );
        let mut last = None;
        while let Ok(s) = rx.try_recv() {
            last = Some(s.message);
        }
        assert_eq!(last.as_deref(), Some("Loading application..."));
    }

    #[tokio::test]
    async fn test_reachability_checked_once_per_launch() {
        test_util::setup();
        let reachability = Arc::new(FakeReachability::offline());
        reachability.set_reachable(true);
        let outcome = run_with(
            Arc::clone(&reachability),
            Arc::new(FakeFacility::new()),
            Arc::new(RecordingClock::new()),
        )
        .await;

        assert_eq!(reachability.calls(), 1);
        assert_eq!(outcome.final_status.phase, BootstrapPhase::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_pacing_on_tokio_clock() {
        test_util::setup();
        let pacing = Pacing {
            step_pause: Duration::from_millis(10),
            ready_pause: Duration::from_millis(20),
            offline_pause: Duration::from_millis(30),
            failure_pause: Duration::from_millis(40),
        };
        let sequencer = BootstrapSequencer::new(
            Arc::new(FakeReachability::online()),
            Arc::new(FakeFacility::new()),
        )
        .with_pacing(pacing);
        assert_eq!(sequencer.status().progress_percent, 0);

        let start = tokio::time::Instant::now();
        let status = sequencer.run(|| {}).await;
        assert_eq!(status.phase, BootstrapPhase::Ready);
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(start.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_pacing_from_config() {
        let pacing = Pacing::from(&PacingConfig {
            step_pause_ms: 1,
            ready_pause_ms: 2,
            offline_pause_ms: 3,
            failure_pause_ms: 4,
        });
        assert_eq!(pacing.offline_pause, Duration::from_millis(3));
        assert_eq!(Pacing::default().offline_pause, Duration::from_millis(1500));
        assert_eq!(Pacing::none().ready_pause, Duration::ZERO);
    }

    #[test]
    fn test_status_display() {
        let mut status = BootstrapStatus::new();
        status.progress_percent = 60;
        status.message = "Checking for updates...".to_string();
        assert_eq!(status.to_string(), "[ 60%] Checking for updates...");
    }
}
