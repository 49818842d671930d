use super::{ListenerRegistry, SubscriptionId, UpdateError, UpdateFacility, UpdateListener};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info, trace};
use reqwest::header::CACHE_CONTROL;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Called with the activated version. The host is expected to reload.
pub type ReloadHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Document served next to the bundle describing the deployed version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    pub version: String,
    #[serde(default)]
    pub released_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct VersionState {
    installed: String,
    waiting: Option<String>,
    last_checked: Option<DateTime<Utc>>,
}

/// Update facility backed by a JSON version manifest on the origin.
pub struct HttpUpdateFacility {
    client: reqwest::Client,
    manifest_url: Url,
    state: RwLock<VersionState>,
    listeners: ListenerRegistry,
    reload: ReloadHook,
}

impl std::fmt::Debug for HttpUpdateFacility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpUpdateFacility")
            .field("manifest_url", &self.manifest_url.as_str())
            .field("installed", &self.installed_version())
            .field("waiting", &self.waiting_version())
            .finish()
    }
}

impl HttpUpdateFacility {
    /// `timeout` bounds each manifest request, connection included.
    pub fn new(
        manifest_url: Url,
        installed_version: impl Into<String>,
        timeout: Duration,
        reload: ReloadHook,
    ) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            manifest_url,
            state: RwLock::new(VersionState {
                installed: installed_version.into(),
                waiting: None,
                last_checked: None,
            }),
            listeners: ListenerRegistry::new(),
            reload,
        })
    }

    pub fn installed_version(&self) -> String {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .installed
            .clone()
    }

    pub fn waiting_version(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .waiting
            .clone()
    }

    pub fn last_checked(&self) -> Option<DateTime<Utc>> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last_checked
    }

    async fn fetch_manifest(&self) -> Result<VersionManifest, UpdateError> {
        trace!("Fetching version manifest from {}", self.manifest_url);
        let manifest = self
            .client
            .get(self.manifest_url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?
            .error_for_status()?
            .json::<VersionManifest>()
            .await?;
        Ok(manifest)
    }

    /// Returns `Some(waiting)` when the waiting flag changed.
    fn apply_manifest(&self, manifest: &VersionManifest) -> Option<bool> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.last_checked = Some(Utc::now());

        if manifest.version == state.installed {
            return state.waiting.take().map(|_| false);
        }
        if state.waiting.as_deref() == Some(manifest.version.as_str()) {
            return None;
        }
        // a newer deploy replaces a bundle that was already waiting
        state.waiting = Some(manifest.version.clone());
        info!(
            "New bundle {} is waiting (installed {})",
            manifest.version, state.installed
        );
        Some(true)
    }
}

#[async_trait]
impl UpdateFacility for HttpUpdateFacility {
    async fn register(&self) -> Result<(), UpdateError> {
        match self.manifest_url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(UpdateError::Registration(format!(
                    "unsupported manifest scheme {}",
                    other
                )))
            }
        }
        info!("Update facility registered: {}", self.manifest_url);
        Ok(())
    }

    fn is_update_waiting(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .waiting
            .is_some()
    }

    async fn activate_waiting(&self) -> Result<(), UpdateError> {
        let version = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let Some(version) = state.waiting.take() else {
                return Err(UpdateError::NothingWaiting);
            };
            state.installed = version.clone();
            version
        };
        info!("Activating bundle {}", version);
        self.listeners.notify(false);
        (self.reload)(&version);
        Ok(())
    }

    async fn check_for_update(&self) -> Result<bool, UpdateError> {
        let manifest = self
            .fetch_manifest()
            .await
            .map_err(|e| UpdateError::Check(e.to_string()))?;
        match self.apply_manifest(&manifest) {
            Some(waiting) => self.listeners.notify(waiting),
            None => debug!("Bundle state unchanged ({})", manifest.version),
        }
        Ok(self.is_update_waiting())
    }

    fn subscribe(&self, listener: Arc<dyn UpdateListener>) -> SubscriptionId {
        self.listeners.insert(listener)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.remove(id)
    }
}
