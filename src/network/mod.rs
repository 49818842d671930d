//! Network reachability probe.
//!
//! A cheap local connectivity flag is consulted first; only when it reports
//! a usable route is a `HEAD` request sent to a small same-origin resource.

use async_trait::async_trait;
use log::{debug, trace, warn};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use reqwest::{StatusCode, Url};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("Device reports no network connection")]
    Offline,
    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("Probe request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Probe returned status {0}")]
    Status(StatusCode),
}

/// Local "is the network interface up" signal. Must not block on I/O.
pub trait ConnectivityFlag: Send + Sync {
    fn is_online(&self) -> bool;
}

impl<F> ConnectivityFlag for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_online(&self) -> bool {
        self()
    }
}

/// Reports online when the OS has a route to the target address.
///
/// Connecting a UDP socket only selects a route; no datagram is sent.
/// Without a resolved target the flag stays optimistic and leaves the
/// decision to the HTTP probe.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteConnectivity {
    target: Option<SocketAddr>,
}

impl RouteConnectivity {
    pub fn new(target: SocketAddr) -> Self {
        Self {
            target: Some(target),
        }
    }

    pub async fn for_url(url: &Url) -> Self {
        let Some(host) = url.host_str() else {
            return Self::default();
        };
        let port = url.port_or_known_default().unwrap_or(80);
        match tokio::net::lookup_host((host, port)).await {
            Ok(mut addrs) => match addrs.next() {
                Some(addr) => Self::new(addr),
                None => Self::default(),
            },
            Err(e) => {
                warn!("Failed to resolve {}: {}", host, e);
                Self::default()
            }
        }
    }
}

impl ConnectivityFlag for RouteConnectivity {
    fn is_online(&self) -> bool {
        let Some(target) = self.target else {
            return true;
        };
        let bind_addr = if target.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        match UdpSocket::bind(bind_addr) {
            Ok(socket) => socket.connect(target).is_ok(),
            Err(e) => {
                debug!("Route check unavailable: {}", e);
                true
            }
        }
    }
}

#[async_trait]
pub trait Reachability: Send + Sync {
    async fn is_reachable(&self) -> bool;
}

pub struct ReachabilityProbe {
    client: reqwest::Client,
    url: Url,
    timeout: Duration,
    connectivity: Arc<dyn ConnectivityFlag>,
}

impl std::fmt::Debug for ReachabilityProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReachabilityProbe")
            .field("url", &self.url.as_str())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl ReachabilityProbe {
    pub fn new(
        url: Url,
        timeout: Duration,
        connectivity: Arc<dyn ConnectivityFlag>,
    ) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            url,
            timeout,
            connectivity,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Run the check and report why it failed.
    pub async fn probe(&self) -> Result<(), ProbeError> {
        if !self.connectivity.is_online() {
            return Err(ProbeError::Offline);
        }

        let token = CancellationToken::new();
        let timer = {
            let token = token.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        };

        trace!("Probing {}", self.url);
        let request = self
            .client
            .head(self.url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .header(PRAGMA, "no-cache")
            .send();

        let result = tokio::select! {
            _ = token.cancelled() => Err(ProbeError::Timeout(self.timeout)),
            response = request => response.map_err(ProbeError::from),
        };
        timer.abort();

        let response = result?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::Status(response.status()))
        }
    }
}

#[async_trait]
impl Reachability for ReachabilityProbe {
    async fn is_reachable(&self) -> bool {
        match self.probe().await {
            Ok(()) => true,
            Err(ProbeError::Offline) => {
                debug!("Skipping probe, device is offline");
                false
            }
            Err(e) => {
                warn!("Network check failed: {}", e);
                false
            }
        }
    }
}
