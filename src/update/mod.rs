//! Installable-update facility.
//!
//! The facility knows whether a newer client bundle is waiting, can activate
//! it (which reloads the client) and can be asked to re-check. Interested
//! parties register an [`UpdateListener`] and get an explicit
//! [`SubscriptionId`] back so they can deregister on teardown.

mod http;

pub use http::{HttpUpdateFacility, ReloadHook, VersionManifest, DEFAULT_CHECK_TIMEOUT};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("Registration failed: {0}")]
    Registration(String),
    #[error("Update check failed: {0}")]
    Check(String),
    #[error("Activation failed: {0}")]
    Activation(String),
    #[error("Update check timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("No update is waiting to be activated")]
    NothingWaiting,
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub trait UpdateListener: Send + Sync {
    fn on_waiting_changed(&self, waiting: bool);
}

impl<F> UpdateListener for F
where
    F: Fn(bool) + Send + Sync,
{
    fn on_waiting_changed(&self, waiting: bool) {
        self(waiting)
    }
}

#[async_trait]
pub trait UpdateFacility: Send + Sync {
    /// Prepare the facility for periodic checks. Must not wait on the
    /// network: an unreachable origin at mount time is a poll failure, not a
    /// registration failure.
    async fn register(&self) -> Result<(), UpdateError>;

    fn is_update_waiting(&self) -> bool;

    /// Install the waiting bundle. Success is expected to reload the client.
    async fn activate_waiting(&self) -> Result<(), UpdateError>;

    /// Force a re-check. Returns whether a bundle is waiting afterwards.
    async fn check_for_update(&self) -> Result<bool, UpdateError>;

    fn subscribe(&self, listener: Arc<dyn UpdateListener>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Listener bookkeeping shared by facility implementations.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: RwLock<HashMap<SubscriptionId, Arc<dyn UpdateListener>>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, listener: Arc<dyn UpdateListener>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, listener);
        id
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Listeners are called outside the lock so they may (un)subscribe.
    pub fn notify(&self, waiting: bool) {
        let snapshot: Vec<Arc<dyn UpdateListener>> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        for listener in snapshot {
            listener.on_waiting_changed(waiting);
        }
    }
}
