//! Discovery manager: joins SSDP sightings to the registry and runs
//! the description-fetch worker pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, info, warn};
use url::Url;

use domoupnp::http::{endpoint_of, request_for, HttpClient, DEFAULT_DEADLINE};
use domoupnp::ssdp::message::SsdpMessage;
use domoupnp::ssdp::ReceivedSsdp;
use domoupnp::types::DiscoveryType;
use domoupnp::{Device, UpnpError};

use crate::description::Descriptions;
use crate::events::EventBus;
use crate::model::{AdvertisementSeen, DeviceEvent};
use crate::registry::{DeviceRegistry, FetchRequest};

/// Pending fetch queue depth and worker count.
const FETCH_QUEUE: usize = 10;
const FETCH_WORKERS: usize = 3;

/// Cadence of the expiry sweep.
const SWEEP_TICK: Duration = Duration::from_secs(1);

struct FetchTask {
    request: FetchRequest,
}

/// Turns SSDP events into registry mutations and API events.
pub struct DiscoveryManager {
    registry: Arc<RwLock<DeviceRegistry>>,
    bus: EventBus<DeviceEvent>,
    fetch_tx: Sender<FetchTask>,
    /// Device/service type families worth fetching; empty = all.
    interesting: Vec<String>,
    running: Arc<AtomicBool>,
}

impl DiscoveryManager {
    pub fn start(
        registry: Arc<RwLock<DeviceRegistry>>,
        bus: EventBus<DeviceEvent>,
        client: HttpClient,
        descriptions: Arc<dyn Descriptions>,
        interesting: Vec<String>,
    ) -> Self {
        let (fetch_tx, fetch_rx) = bounded::<FetchTask>(FETCH_QUEUE);

        // Fetch worker pool: description + SCPDs, then resolve or
        // invalidate. Workers never touch the registry lock while doing
        // network I/O.
        for index in 0..FETCH_WORKERS {
            let fetch_rx = fetch_rx.clone();
            let registry = Arc::clone(&registry);
            let bus = bus.clone();
            let client = client.clone();
            let descriptions = Arc::clone(&descriptions);
            let result = thread::Builder::new()
                .name(format!("desc-fetch-{index}"))
                .spawn(move || {
                    while let Ok(task) = fetch_rx.recv() {
                        let udn = task.request.udn.clone();
                        let events = match fetch_tree(&client, descriptions.as_ref(), &task.request)
                        {
                            Ok(device) => registry
                                .write()
                                .unwrap()
                                .resolve(&udn, device, Instant::now()),
                            Err(e) => {
                                warn!("❌ Description fetch failed for {}: {}", udn, e);
                                registry.write().unwrap().invalidate(&udn)
                            }
                        };
                        bus.broadcast_all(events);
                    }
                });
            if let Err(e) = result {
                warn!("❌ Cannot spawn description fetch worker: {}", e);
            }
        }

        let running = Arc::new(AtomicBool::new(true));

        // Expiry sweep; the flag releases the thread (and the registry
        // and bus handles it holds) at shutdown.
        {
            let registry = Arc::clone(&registry);
            let bus = bus.clone();
            let running = Arc::clone(&running);
            let result = thread::Builder::new().name("cache-sweep".into()).spawn(move || {
                while running.load(Ordering::SeqCst) {
                    thread::sleep(SWEEP_TICK);
                    if !running.load(Ordering::SeqCst) {
                        break;
                    }
                    let events = registry.write().unwrap().sweep_expired(Instant::now());
                    bus.broadcast_all(events);
                }
            });
            if let Err(e) = result {
                warn!("❌ Cannot spawn cache sweep thread: {}", e);
            }
        }

        Self {
            registry,
            bus,
            fetch_tx,
            interesting,
            running,
        }
    }

    /// Stops the sweep loop; in-flight description fetches finish, the
    /// fetch workers exit once the manager is dropped.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Feeds one decoded SSDP datagram into the registry.
    pub fn handle_ssdp(&self, received: ReceivedSsdp) {
        match received.message {
            SsdpMessage::Alive(alive) => {
                self.handle_sighting(AdvertisementSeen {
                    udn: match alive.usn.udn() {
                        Some(udn) => udn.clone(),
                        None => return,
                    },
                    usn: alive.usn,
                    location: alive.location,
                    server: alive.server,
                    max_age: alive.max_age,
                    boot_id: alive.boot_id,
                    config_id: alive.config_id,
                    search_port: alive.search_port,
                });
            }
            SsdpMessage::Response(response) => {
                self.handle_sighting(AdvertisementSeen {
                    udn: match response.usn.udn() {
                        Some(udn) => udn.clone(),
                        None => return,
                    },
                    usn: response.usn,
                    location: response.location,
                    server: response.server,
                    max_age: response.max_age,
                    boot_id: response.boot_id,
                    config_id: response.config_id,
                    search_port: response.search_port,
                });
            }
            SsdpMessage::ByeBye(byebye) => {
                if let Some(udn) = byebye.usn.udn() {
                    let events = self.registry.write().unwrap().on_byebye(udn);
                    self.bus.broadcast_all(events);
                }
            }
            SsdpMessage::Update(update) => {
                if let Some(udn) = update.usn.udn() {
                    self.registry.write().unwrap().on_update(
                        udn,
                        &update.location,
                        update.next_boot_id,
                    );
                }
            }
            SsdpMessage::Search(_) => {
                // Another control point probing; nothing for us.
            }
        }
    }

    fn handle_sighting(&self, seen: AdvertisementSeen) {
        if !seen.server.is_supported() {
            debug!(
                "Ignoring {}: unsupported UPnP version in '{}'",
                seen.udn, seen.server
            );
            return;
        }
        if !self.is_interesting(&seen.usn) {
            return;
        }

        let fetch = self
            .registry
            .write()
            .unwrap()
            .on_advertisement(seen, Instant::now());

        if let Some(request) = fetch {
            debug!("📥 New device {} at {}", request.udn, request.location);
            // Full queue: drop the fetch, the next alive will retry.
            if self.fetch_tx.try_send(FetchTask { request }).is_err() {
                warn!("❌ Fetch queue full, dropping description fetch");
            }
        }
    }

    /// Filtered discovery: with a configured type list, only devices
    /// advertising one of those families are fetched.
    fn is_interesting(&self, usn: &DiscoveryType) -> bool {
        if self.interesting.is_empty() {
            return true;
        }
        match usn.resource_type() {
            Some(rt) => self
                .interesting
                .iter()
                .any(|wanted| match wanted.parse::<domoupnp::ResourceType>() {
                    Ok(wanted_rt) => rt.is_same_family(&wanted_rt),
                    Err(_) => false,
                }),
            // Root/uuid announcements pass; the type-bearing ones decide.
            None => true,
        }
    }
}

/// Fetches and parses the description document plus every SCPD.
fn fetch_tree(
    client: &HttpClient,
    descriptions: &dyn Descriptions,
    request: &FetchRequest,
) -> Result<Device, UpnpError> {
    let body = http_get(client, &request.location)?;
    let mut device = descriptions.parse_device(&body, &request.location)?;

    fill_services(client, descriptions, &mut device)?;

    device.validate()?;
    info!("✅ Device {} resolved ({})", device.udn(), device.friendly_name());
    Ok(device)
}

/// Fetches the SCPD of every service in the tree, parents first.
fn fill_services(
    client: &HttpClient,
    descriptions: &dyn Descriptions,
    device: &mut Device,
) -> Result<(), UpnpError> {
    for service in device.services_mut() {
        let scpd_url = Url::parse(service.scpd_url()).map_err(|e| {
            UpnpError::MalformedMessage(format!("invalid SCPD URL {}: {e}", service.scpd_url()))
        })?;
        let scpd = http_get(client, &scpd_url)?;
        descriptions.parse_scpd(&scpd, service)?;
    }
    for child in device.embedded_mut() {
        fill_services(client, descriptions, child)?;
    }
    Ok(())
}

fn http_get(client: &HttpClient, url: &Url) -> Result<Vec<u8>, UpnpError> {
    let endpoint = endpoint_of(url)
        .ok_or_else(|| UpnpError::TransportError(format!("cannot resolve {url}")))?;
    let response = client.send(endpoint, request_for("GET", url), DEFAULT_DEADLINE)?;
    if !response.is_success() {
        return Err(UpnpError::ResourceNotFound(format!(
            "{url} answered {}",
            response.status
        )));
    }
    Ok(response.body)
}

/// Shared handle used by the control point to read the registry.
pub type SharedRegistry = Arc<RwLock<DeviceRegistry>>;
