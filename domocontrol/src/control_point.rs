//! The control-point façade: wires SSDP discovery, the registry, the
//! subscription proxy and the action proxy together.

use std::sync::{Arc, RwLock};
use std::thread;

use crossbeam_channel::Receiver;
use tracing::info;
use url::Url;

use domoupnp::http::HttpClient;
use domoupnp::ssdp::SsdpClient;
use domoupnp::types::{ProductTokens, SearchTarget, Udn};
use domoupnp::UpnpError;

use crate::action::{ActionProxy, InvokeResult};
use crate::description::XmlDescriptions;
use crate::discovery::DiscoveryManager;
use crate::events::EventBus;
use crate::model::{DeviceEvent, RemoteDevice};
use crate::registry::DeviceRegistry;
use crate::subscription::{EventProxy, SubscriptionEvent};

/// A running control point.
pub struct ControlPoint {
    ssdp: SsdpClient,
    registry: Arc<RwLock<DeviceRegistry>>,
    device_bus: EventBus<DeviceEvent>,
    subscription_bus: EventBus<SubscriptionEvent>,
    discovery: Arc<DiscoveryManager>,
    actions: ActionProxy,
    events: Arc<EventProxy>,
    mx: u32,
}

impl ControlPoint {
    /// Starts a control point from the global configuration.
    pub fn start() -> Result<Self, UpnpError> {
        let config = domoconfig::get_config();
        Self::start_with(config.get_interesting_types(), config.get_mx(), &config.get_server_name())
    }

    /// Starts a control point with explicit parameters.
    pub fn start_with(
        interesting: Vec<String>,
        mx: u32,
        product_name: &str,
    ) -> Result<Self, UpnpError> {
        let user_agent =
            ProductTokens::local(product_name, env!("CARGO_PKG_VERSION"), 1);
        let (ssdp, ssdp_rx) = SsdpClient::start(user_agent)
            .map_err(|e| UpnpError::TransportError(format!("cannot start SSDP client: {e}")))?;

        let client = HttpClient::new(4);
        let registry = Arc::new(RwLock::new(DeviceRegistry::new()));
        let device_bus: EventBus<DeviceEvent> = EventBus::new();
        let subscription_bus: EventBus<SubscriptionEvent> = EventBus::new();

        let discovery = Arc::new(DiscoveryManager::start(
            Arc::clone(&registry),
            device_bus.clone(),
            client.clone(),
            Arc::new(XmlDescriptions),
            interesting,
        ));

        // SSDP event loop: every decoded datagram goes to discovery.
        // It ends when the SSDP client stops.
        {
            let discovery = Arc::clone(&discovery);
            thread::Builder::new()
                .name("cp-ssdp-loop".into())
                .spawn(move || {
                    while let Ok(received) = ssdp_rx.recv() {
                        discovery.handle_ssdp(received);
                    }
                })
                .map_err(|e| UpnpError::Internal(format!("cannot spawn ssdp loop: {e}")))?;
        }

        let events = EventProxy::start(client.clone(), subscription_bus.clone())?;
        let actions = ActionProxy::new(client);

        info!("✅ Control point started");

        Ok(Self {
            ssdp,
            registry,
            device_bus,
            subscription_bus,
            discovery,
            actions,
            events,
            mx,
        })
    }

    /// Multicasts an M-SEARCH; responses feed the registry as they
    /// arrive over the next MX+1 seconds.
    pub fn search(&self, target: &SearchTarget) -> Result<(), UpnpError> {
        self.ssdp
            .search(target, self.mx)
            .map_err(|e| UpnpError::TransportError(format!("cannot send M-SEARCH: {e}")))
    }

    /// Snapshot of the resolved remote devices.
    pub fn devices(&self) -> Vec<Arc<RemoteDevice>> {
        self.registry.read().unwrap().devices()
    }

    /// Stream of registry lifecycle events.
    pub fn device_events(&self) -> Receiver<DeviceEvent> {
        self.device_bus.subscribe()
    }

    /// Stream of eventing notifications.
    pub fn notifications(&self) -> Receiver<SubscriptionEvent> {
        self.subscription_bus.subscribe()
    }

    /// Invokes an action on a remote service; transport failover walks
    /// the device's alternate locations and feeds the outcome back into
    /// the cache.
    pub fn invoke(
        &self,
        udn: &Udn,
        service_id: &str,
        action: &str,
        args: &[(&str, &str)],
    ) -> Result<Vec<(String, String)>, UpnpError> {
        let (device, locations) = self.device_and_locations(udn)?;
        let service = device
            .root
            .iter_tree()
            .into_iter()
            .find_map(|d| d.service(service_id))
            .ok_or_else(|| {
                UpnpError::ResourceNotFound(format!("{udn} has no service {service_id}"))
            })?;

        let InvokeResult {
            outputs,
            unreachable,
        } = self.actions.invoke(service, &locations, action, args)?;

        if !unreachable.is_empty() {
            let mut registry = self.registry.write().unwrap();
            for location in &unreachable {
                registry.mark_unreachable(udn, location);
            }
        }
        Ok(outputs)
    }

    /// Subscribes to a remote service's events; notifications surface
    /// on [`ControlPoint::notifications`].
    pub fn subscribe(&self, udn: &Udn, service_id: &str) -> Result<(), UpnpError> {
        let (device, _) = self.device_and_locations(udn)?;
        let service = device
            .root
            .iter_tree()
            .into_iter()
            .find_map(|d| d.service(service_id))
            .ok_or_else(|| {
                UpnpError::ResourceNotFound(format!("{udn} has no service {service_id}"))
            })?;
        let event_url = Url::parse(service.event_sub_url()).map_err(|e| {
            UpnpError::MalformedMessage(format!(
                "invalid eventSub URL {}: {e}",
                service.event_sub_url()
            ))
        })?;
        self.events.subscribe(udn, service_id, &event_url)
    }

    /// Stops everything; pending subscriptions are cancelled.
    pub fn shutdown(&self) {
        self.events.shutdown();
        self.discovery.stop();
        self.ssdp.stop();
    }

    fn device_and_locations(&self, udn: &Udn) -> Result<(Arc<RemoteDevice>, Vec<Url>), UpnpError> {
        let registry = self.registry.read().unwrap();
        let entry = registry
            .get(udn)
            .ok_or_else(|| UpnpError::ResourceNotFound(format!("unknown device {udn}")))?;
        Ok((Arc::clone(&entry.device), entry.candidate_locations()))
    }
}

impl Drop for ControlPoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}
