//! Control-point data model: remote device cache entries and the
//! events surfaced to API consumers.

use std::sync::Arc;
use std::time::Instant;

use url::Url;

use domoupnp::types::{ProductTokens, Udn};
use domoupnp::Device;

/// What the façade reports about the remote network.
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// A root device became usable (descriptions fetched and parsed).
    RootDeviceOnline(Arc<RemoteDevice>),
    /// A root device left (byebye or cache expiry).
    RootDeviceOffline(Udn),
    /// A known root device changed configuration (configId bump).
    RootDeviceUpdated(Arc<RemoteDevice>),
    /// Description fetch or parse failed; the entry was evicted.
    DeviceInvalidated(Udn),
}

/// A fully resolved remote device.
#[derive(Debug)]
pub struct RemoteDevice {
    pub udn: Udn,
    pub root: Device,
    pub locations: Vec<Url>,
}

impl RemoteDevice {
    pub fn friendly_name(&self) -> &str {
        self.root.friendly_name()
    }
}

/// One advertisement as seen on the wire (alive or search response).
#[derive(Debug, Clone)]
pub struct AdvertisementSeen {
    pub udn: Udn,
    pub usn: domoupnp::DiscoveryType,
    pub location: Url,
    pub server: ProductTokens,
    pub max_age: u32,
    pub boot_id: Option<u32>,
    pub config_id: Option<u32>,
    pub search_port: Option<u16>,
}

/// Cache entry for a resolved remote root device.
#[derive(Debug)]
pub struct CacheEntry {
    pub device: Arc<RemoteDevice>,
    /// Observed LOCATION URLs, first is the most recent.
    pub locations: Vec<LocationState>,
    pub server: ProductTokens,
    pub max_age: u32,
    pub expires_at: Instant,
    pub boot_id: Option<u32>,
    pub config_id: Option<u32>,
    pub next_boot_id: Option<u32>,
    pub search_port: Option<u16>,
}

/// A LOCATION with its reachability mark (set by control failover).
#[derive(Debug, Clone)]
pub struct LocationState {
    pub url: Url,
    pub reachable: bool,
}

impl CacheEntry {
    /// Known locations, reachable ones first.
    pub fn candidate_locations(&self) -> Vec<Url> {
        let mut out: Vec<Url> = self
            .locations
            .iter()
            .filter(|l| l.reachable)
            .map(|l| l.url.clone())
            .collect();
        out.extend(
            self.locations
                .iter()
                .filter(|l| !l.reachable)
                .map(|l| l.url.clone()),
        );
        out
    }
}
