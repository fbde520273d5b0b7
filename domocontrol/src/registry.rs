//! Remote-device cache: the state machine behind the discovery façade.
//!
//! The registry is pure bookkeeping — no sockets, no clocks of its own.
//! The discovery manager feeds it decoded SSDP sightings and fetch
//! results; it answers with the events to broadcast and the fetches to
//! schedule. That keeps every lifecycle rule unit-testable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::debug;
use url::Url;

use domoupnp::types::Udn;
use domoupnp::Device;

use crate::model::{AdvertisementSeen, CacheEntry, DeviceEvent, LocationState, RemoteDevice};

/// A description fetch the manager must schedule.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub udn: Udn,
    pub location: Url,
}

/// Why the fetch was scheduled; decides Online vs Updated on arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchKind {
    NewDevice,
    ConfigChanged,
}

#[derive(Debug)]
struct PendingFetch {
    seen: AdvertisementSeen,
    kind: FetchKind,
}

/// The remote-device cache.
#[derive(Default)]
pub struct DeviceRegistry {
    entries: HashMap<Udn, CacheEntry>,
    pending: HashMap<Udn, PendingFetch>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, udn: &Udn) -> Option<&CacheEntry> {
        self.entries.get(udn)
    }

    pub fn devices(&self) -> Vec<Arc<RemoteDevice>> {
        self.entries.values().map(|e| Arc::clone(&e.device)).collect()
    }

    pub fn contains(&self, udn: &Udn) -> bool {
        self.entries.contains_key(udn)
    }

    /// An ssdp:alive or search response was seen.
    ///
    /// Duplicate suppression: a sighting whose (bootId, configId,
    /// location) matches the cache entry only refreshes the expiry.
    /// A configId change triggers a re-fetch; an unknown UDN starts a
    /// first fetch. Fetch failures are not retried here — the next
    /// alive will try again.
    pub fn on_advertisement(
        &mut self,
        seen: AdvertisementSeen,
        now: Instant,
    ) -> Option<FetchRequest> {
        if let Some(entry) = self.entries.get_mut(&seen.udn) {
            let config_changed = match (entry.config_id, seen.config_id) {
                (Some(old), Some(new)) => old != new,
                _ => false,
            };

            if config_changed {
                debug!("configId changed for {}, re-fetching description", seen.udn);
                let request = FetchRequest {
                    udn: seen.udn.clone(),
                    location: seen.location.clone(),
                };
                self.pending.insert(
                    seen.udn.clone(),
                    PendingFetch {
                        seen,
                        kind: FetchKind::ConfigChanged,
                    },
                );
                return Some(request);
            }

            // Keep-alive: refresh expiry, track new locations and a
            // possible bootId bump (device rebooted).
            entry.expires_at = now + Duration::from_secs(u64::from(seen.max_age));
            entry.max_age = seen.max_age;
            entry.boot_id = seen.boot_id.or(entry.boot_id);
            entry.search_port = seen.search_port.or(entry.search_port);
            if !entry.locations.iter().any(|l| l.url == seen.location) {
                entry.locations.insert(
                    0,
                    LocationState {
                        url: seen.location,
                        reachable: true,
                    },
                );
            }
            return None;
        }

        if self.pending.contains_key(&seen.udn) {
            // Fetch already in flight; latest metadata wins.
            if let Some(pending) = self.pending.get_mut(&seen.udn) {
                pending.seen = seen;
            }
            return None;
        }

        let request = FetchRequest {
            udn: seen.udn.clone(),
            location: seen.location.clone(),
        };
        self.pending.insert(
            seen.udn.clone(),
            PendingFetch {
                seen,
                kind: FetchKind::NewDevice,
            },
        );
        Some(request)
    }

    /// An ssdp:update was seen: the device announces its next boot
    /// epoch; apply it and keep the entry alive.
    pub fn on_update(&mut self, udn: &Udn, location: &Url, next_boot_id: u32) {
        if let Some(entry) = self.entries.get_mut(udn) {
            entry.next_boot_id = Some(next_boot_id);
            entry.boot_id = Some(next_boot_id);
            if !entry.locations.iter().any(|l| &l.url == location) {
                entry.locations.insert(
                    0,
                    LocationState {
                        url: location.clone(),
                        reachable: true,
                    },
                );
            }
        }
    }

    /// An ssdp:byebye was seen: evict the tree containing that UDN.
    pub fn on_byebye(&mut self, udn: &Udn) -> Vec<DeviceEvent> {
        self.pending.remove(udn);

        let root_udn = self
            .entries
            .iter()
            .find(|(_, entry)| entry.device.root.find_device(udn).is_some())
            .map(|(root, _)| root.clone());

        match root_udn {
            Some(root) => {
                self.entries.remove(&root);
                vec![DeviceEvent::RootDeviceOffline(root)]
            }
            None => Vec::new(),
        }
    }

    /// A description fetch completed and parsed.
    pub fn resolve(&mut self, udn: &Udn, root: Device, now: Instant) -> Vec<DeviceEvent> {
        let Some(pending) = self.pending.remove(udn) else {
            return Vec::new();
        };
        let seen = pending.seen;

        let device = Arc::new(RemoteDevice {
            udn: udn.clone(),
            root,
            locations: vec![seen.location.clone()],
        });

        let entry = CacheEntry {
            device: Arc::clone(&device),
            locations: vec![LocationState {
                url: seen.location,
                reachable: true,
            }],
            server: seen.server,
            max_age: seen.max_age,
            expires_at: now + Duration::from_secs(u64::from(seen.max_age)),
            boot_id: seen.boot_id,
            config_id: seen.config_id,
            next_boot_id: None,
            search_port: seen.search_port,
        };
        self.entries.insert(udn.clone(), entry);

        match pending.kind {
            FetchKind::NewDevice => vec![DeviceEvent::RootDeviceOnline(device)],
            FetchKind::ConfigChanged => vec![DeviceEvent::RootDeviceUpdated(device)],
        }
    }

    /// A description fetch failed: evict, no retry.
    pub fn invalidate(&mut self, udn: &Udn) -> Vec<DeviceEvent> {
        self.pending.remove(udn);
        self.entries.remove(udn);
        vec![DeviceEvent::DeviceInvalidated(udn.clone())]
    }

    /// Removes entries whose cache-control lifetime lapsed.
    pub fn sweep_expired(&mut self, now: Instant) -> Vec<DeviceEvent> {
        let expired: Vec<Udn> = self
            .entries
            .iter()
            .filter(|(_, entry)| now >= entry.expires_at)
            .map(|(udn, _)| udn.clone())
            .collect();

        expired
            .into_iter()
            .map(|udn| {
                self.entries.remove(&udn);
                DeviceEvent::RootDeviceOffline(udn)
            })
            .collect()
    }

    /// Control failover feedback: remember that a LOCATION refused.
    pub fn mark_unreachable(&mut self, udn: &Udn, location: &Url) {
        if let Some(entry) = self.entries.get_mut(udn) {
            for slot in entry.locations.iter_mut() {
                if &slot.url == location {
                    slot.reachable = false;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domoupnp::types::{DiscoveryType, ResourceType, Udn};

    fn udn() -> Udn {
        "uuid:aaaaaaaa-1111-2222-3333-444444444444".parse().unwrap()
    }

    fn seen(config_id: u32, location: &str) -> AdvertisementSeen {
        AdvertisementSeen {
            udn: udn(),
            usn: DiscoveryType::RootDevice(Some(udn())),
            location: Url::parse(location).unwrap(),
            server: "Linux/6.5 UPnP/1.1 DomoCore/0.1".parse().unwrap(),
            max_age: 1800,
            boot_id: Some(1),
            config_id: Some(config_id),
            search_port: None,
        }
    }

    fn tree() -> Device {
        Device::new(
            udn(),
            ResourceType::standard(domoupnp::types::ResourceKind::Device, "BinaryLight", 1),
            "Light",
        )
    }

    #[test]
    fn first_sighting_schedules_a_fetch_then_online() {
        let mut registry = DeviceRegistry::new();
        let now = Instant::now();

        let fetch = registry.on_advertisement(seen(7, "http://192.0.2.10/d.xml"), now);
        assert!(fetch.is_some());
        // Second alive while the fetch is pending: no second fetch.
        assert!(registry
            .on_advertisement(seen(7, "http://192.0.2.10/d.xml"), now)
            .is_none());

        let events = registry.resolve(&udn(), tree(), now);
        assert!(matches!(events[0], DeviceEvent::RootDeviceOnline(_)));
        assert!(registry.contains(&udn()));
    }

    #[test]
    fn duplicate_alive_is_a_keep_alive() {
        let mut registry = DeviceRegistry::new();
        let now = Instant::now();
        registry.on_advertisement(seen(7, "http://192.0.2.10/d.xml"), now);
        registry.resolve(&udn(), tree(), now);

        let before = registry.get(&udn()).unwrap().expires_at;
        let later = now + Duration::from_secs(60);
        assert!(registry
            .on_advertisement(seen(7, "http://192.0.2.10/d.xml"), later)
            .is_none());
        assert!(registry.get(&udn()).unwrap().expires_at > before);
    }

    #[test]
    fn config_change_triggers_refetch_and_updated() {
        let mut registry = DeviceRegistry::new();
        let now = Instant::now();
        registry.on_advertisement(seen(7, "http://192.0.2.10/d.xml"), now);
        registry.resolve(&udn(), tree(), now);

        let fetch = registry.on_advertisement(seen(8, "http://192.0.2.10/d.xml"), now);
        assert!(fetch.is_some());
        let events = registry.resolve(&udn(), tree(), now);
        assert!(matches!(events[0], DeviceEvent::RootDeviceUpdated(_)));
    }

    #[test]
    fn byebye_evicts_the_root() {
        let mut registry = DeviceRegistry::new();
        let now = Instant::now();
        registry.on_advertisement(seen(7, "http://192.0.2.10/d.xml"), now);
        registry.resolve(&udn(), tree(), now);

        let events = registry.on_byebye(&udn());
        assert!(matches!(events[0], DeviceEvent::RootDeviceOffline(_)));
        assert!(!registry.contains(&udn()));
    }

    #[test]
    fn byebye_then_realive_is_online_not_updated() {
        let mut registry = DeviceRegistry::new();
        let now = Instant::now();
        registry.on_advertisement(seen(7, "http://192.0.2.10/d.xml"), now);
        registry.resolve(&udn(), tree(), now);

        registry.on_byebye(&udn());

        // Re-alive with a bumped configId: the entry was evicted, so
        // this is a brand new device, not an update.
        let fetch = registry.on_advertisement(seen(8, "http://192.0.2.10/d.xml"), now);
        assert!(fetch.is_some());
        let events = registry.resolve(&udn(), tree(), now);
        assert!(matches!(events[0], DeviceEvent::RootDeviceOnline(_)));
    }

    #[test]
    fn failed_fetch_invalidates_and_evicts() {
        let mut registry = DeviceRegistry::new();
        let now = Instant::now();
        registry.on_advertisement(seen(7, "http://192.0.2.10/d.xml"), now);

        let events = registry.invalidate(&udn());
        assert!(matches!(events[0], DeviceEvent::DeviceInvalidated(_)));
        // The next alive may try again.
        assert!(registry
            .on_advertisement(seen(7, "http://192.0.2.10/d.xml"), now)
            .is_some());
    }

    #[test]
    fn expiry_takes_the_device_offline() {
        let mut registry = DeviceRegistry::new();
        let now = Instant::now();
        registry.on_advertisement(seen(7, "http://192.0.2.10/d.xml"), now);
        registry.resolve(&udn(), tree(), now);

        assert!(registry.sweep_expired(now).is_empty());
        let events = registry.sweep_expired(now + Duration::from_secs(1801));
        assert!(matches!(events[0], DeviceEvent::RootDeviceOffline(_)));
        assert!(!registry.contains(&udn()));
    }

    #[test]
    fn unreachable_locations_sort_last() {
        let mut registry = DeviceRegistry::new();
        let now = Instant::now();
        registry.on_advertisement(seen(7, "http://192.0.2.10/d.xml"), now);
        registry.resolve(&udn(), tree(), now);
        // A second location appears via keep-alive.
        registry.on_advertisement(seen(7, "http://192.0.2.11/d.xml"), now);

        let l1 = Url::parse("http://192.0.2.11/d.xml").unwrap();
        registry.mark_unreachable(&udn(), &l1);

        let candidates = registry.get(&udn()).unwrap().candidate_locations();
        assert_eq!(candidates.last().unwrap(), &l1);
    }
}
