//! # Device host : la façade qui relie HTTP, SSDP, SOAP et GENA
//!
//! [`DeviceHost`] héberge des arbres de devices : il sert leurs
//! descriptions et SCPDs, répond au contrôle SOAP, tient les
//! souscriptions GENA et annonce l'ensemble en SSDP.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};
use url::Url;

use crate::control;
use crate::devices::description::{device_description_xml, scpd_xml};
use crate::devices::Device;
use crate::errors::UpnpError;
use crate::gena::{EventEngine, SubscribeRequest};
use crate::http::{HttpClient, HttpHandler, HttpRequest, HttpResponse, HttpServer};
use crate::services::Service;
use crate::soap::{parse_soap_action, parse_soap_action_header, CONTENT_TYPE_XML};
use crate::ssdp::{Advertisement, SsdpServer};
use crate::state_variables::StateVarInstance;
use crate::types::{ProductTokens, Udn};
use crate::variable_types::StateValue;

/// Cadence de la purge des variables modérées.
const MODERATION_TICK: Duration = Duration::from_millis(250);

/// L'objet métier derrière un device hébergé : il reçoit les appels
/// d'action et pilote les variables via [`ServiceContext`].
pub trait DeviceBackend: Send + Sync {
    fn invoke(
        &self,
        ctx: &ServiceContext<'_>,
        action: &str,
        args: &HashMap<String, StateValue>,
    ) -> Result<Vec<(String, StateValue)>, UpnpError>;
}

/// Fabrique l'objet métier d'un device au moment de l'annonce.
pub trait DeviceFactory {
    fn create(&self, device: &Device) -> Result<Arc<dyn DeviceBackend>, UpnpError>;
}

/// Accès aux variables d'un service pendant un appel d'action.
pub struct ServiceContext<'a> {
    instance: &'a ServiceInstance,
}

impl ServiceContext<'_> {
    pub fn get(&self, variable: &str) -> Option<StateValue> {
        self.instance.get_variable(variable)
    }

    pub fn set(&self, variable: &str, value: StateValue) -> Result<(), UpnpError> {
        self.instance.set_variable(variable, value)
    }
}

/// Un service instancié : définition + valeurs courantes + événements.
pub struct ServiceInstance {
    device_udn: Udn,
    service: Service,
    values: RwLock<HashMap<String, StateVarInstance>>,
    engine: Arc<EventEngine>,
}

impl ServiceInstance {
    fn new(device_udn: Udn, service: Service, engine: Arc<EventEngine>) -> Self {
        let values = service
            .variables()
            .iter()
            .map(|v| {
                (
                    v.name().to_string(),
                    StateVarInstance::new(Arc::new(v.clone())),
                )
            })
            .collect();
        Self {
            device_udn,
            service,
            values: RwLock::new(values),
            engine,
        }
    }

    pub fn device_udn(&self) -> &Udn {
        &self.device_udn
    }

    pub fn service(&self) -> &Service {
        &self.service
    }

    pub fn get_variable(&self, name: &str) -> Option<StateValue> {
        self.values.read().unwrap().get(name).map(|i| i.value().clone())
    }

    /// Pose une valeur validée ; la notification part immédiatement ou
    /// est retenue par la modération.
    pub fn set_variable(&self, name: &str, value: StateValue) -> Result<(), UpnpError> {
        let fire = {
            let mut values = self.values.write().unwrap();
            let instance = values.get_mut(name).ok_or_else(|| {
                UpnpError::ResourceNotFound(format!(
                    "no state variable '{name}' in {}",
                    self.service.service_id()
                ))
            })?;
            instance
                .set_value(value.clone(), Instant::now())
                .map_err(|e| UpnpError::InvalidArgument(e.to_string()))?
        };

        if fire {
            self.engine.publish(
                self.service.event_sub_url(),
                &[(name.to_string(), value.to_string())],
            );
        }
        Ok(())
    }

    /// Instantané de toutes les variables événementielles.
    pub fn evented_snapshot(&self) -> Vec<(String, String)> {
        let values = self.values.read().unwrap();
        self.service
            .evented_variables()
            .filter_map(|v| {
                values
                    .get(v.name())
                    .map(|i| (v.name().to_string(), i.value().to_string()))
            })
            .collect()
    }

    /// Pousse les changements modérés devenus éligibles.
    fn flush_moderated(&self) {
        let due: Vec<(String, String)> = {
            let mut values = self.values.write().unwrap();
            let now = Instant::now();
            values
                .iter_mut()
                .filter_map(|(name, instance)| {
                    instance.take_due(now).map(|v| (name.clone(), v.to_string()))
                })
                .collect()
        };
        if !due.is_empty() {
            self.engine.publish(self.service.event_sub_url(), &due);
        }
    }
}

/// Un arbre de devices hébergé.
pub struct HostedDevice {
    root: Device,
    backend: Arc<dyn DeviceBackend>,
    services: Vec<Arc<ServiceInstance>>,
}

impl HostedDevice {
    pub fn root(&self) -> &Device {
        &self.root
    }

    pub fn udn(&self) -> &Udn {
        self.root.udn()
    }

    /// Instance de service par identifiant (premier arbre trouvé).
    pub fn service_instance(&self, service_id: &str) -> Option<&Arc<ServiceInstance>> {
        self.services
            .iter()
            .find(|s| s.service().service_id() == service_id)
    }
}

/// Ce que sert une route donnée.
enum Route {
    Description(Vec<u8>),
    Scpd(Vec<u8>),
    Control(Arc<ServiceInstance>, Arc<dyn DeviceBackend>),
    Event(Arc<ServiceInstance>),
}

/// Routeur HTTP du host : résolution stricte méthode + chemin.
struct HostRouter {
    routes: RwLock<HashMap<String, Route>>,
    engine: Arc<EventEngine>,
}

impl HttpHandler for HostRouter {
    fn handle(&self, peer: SocketAddr, request: &HttpRequest) -> Result<HttpResponse, UpnpError> {
        debug!("{} {} from {}", request.method, request.target, peer);
        match request.method.as_str() {
            // HEAD est un GET sans corps ; le routage est strictement
            // par égalité de méthode.
            "GET" => self.serve_document(&request.target, false),
            "HEAD" => self.serve_document(&request.target, true),
            "POST" => self.serve_control(request),
            "SUBSCRIBE" => self.serve_subscribe(request),
            "UNSUBSCRIBE" => self.serve_unsubscribe(request),
            // NOTIFY relève du rôle control point, pas du host.
            _ => Ok(HttpResponse::new(405)),
        }
    }
}

impl HostRouter {
    fn serve_document(&self, target: &str, head: bool) -> Result<HttpResponse, UpnpError> {
        let routes = self.routes.read().unwrap();
        let body = match routes.get(target) {
            Some(Route::Description(body)) | Some(Route::Scpd(body)) => body.clone(),
            _ => return Ok(HttpResponse::new(404)),
        };

        let mut response = HttpResponse::ok();
        response.headers.set("CONTENT-TYPE", CONTENT_TYPE_XML);
        response.headers.set("CONTENT-LENGTH", body.len().to_string());
        if !head {
            response.body = body;
        }
        Ok(response)
    }

    fn serve_control(&self, request: &HttpRequest) -> Result<HttpResponse, UpnpError> {
        let (instance, backend) = {
            let routes = self.routes.read().unwrap();
            match routes.get(&request.target) {
                Some(Route::Control(instance, backend)) => {
                    (Arc::clone(instance), Arc::clone(backend))
                }
                _ => return Ok(HttpResponse::new(404)),
            }
        };

        let soapaction = request
            .headers
            .get("SOAPACTION")
            .ok_or_else(|| UpnpError::MalformedMessage("POST without SOAPACTION".to_string()))?;
        let (header_type, header_action) = parse_soap_action_header(soapaction)?;

        let action_call = parse_soap_action(&request.body)?;
        if action_call.name != header_action {
            return Err(UpnpError::MalformedMessage(format!(
                "SOAPACTION '{header_action}' does not match body action '{}'",
                action_call.name
            )));
        }

        let service = instance.service();
        if header_type != service.service_type().to_string() {
            return Ok(control::fault_response(&UpnpError::InvalidArgument(
                format!("service type mismatch: {header_type}"),
            )));
        }

        let Some(action) = service.action(&action_call.name) else {
            return Ok(control::fault_response(&UpnpError::ActionNotAuthorized(
                format!("no such action: {}", action_call.name),
            )));
        };

        let values = match control::validate_inputs(service, action, &action_call.args) {
            Ok(values) => values,
            Err(e) => return Ok(control::fault_response(&e)),
        };

        let ctx = ServiceContext {
            instance: instance.as_ref(),
        };
        match backend.invoke(&ctx, action.name(), &values) {
            Ok(outputs) => {
                // Sorties dans l'ordre du SCPD.
                let mut ordered: Vec<(String, String)> = Vec::new();
                for argument in action.outputs() {
                    if let Some((_, value)) =
                        outputs.iter().find(|(name, _)| name == &argument.name)
                    {
                        ordered.push((argument.name.clone(), value.to_string()));
                    }
                }
                control::success_response(
                    &service.service_type().to_string(),
                    action.name(),
                    &ordered,
                )
            }
            // Erreur du handler : fault 501 sur le fil, connexion intacte.
            Err(e) => Ok(control::fault_response(&e)),
        }
    }

    fn serve_subscribe(&self, request: &HttpRequest) -> Result<HttpResponse, UpnpError> {
        let instance = match self.event_instance(&request.target) {
            Some(instance) => instance,
            None => return Ok(HttpResponse::new(404)),
        };

        let subscribe = match SubscribeRequest::from_headers(&request.headers) {
            Ok(subscribe) => subscribe,
            Err(e) => return Ok(status_response(&e)),
        };
        let initial = instance.evented_snapshot();

        match self
            .engine
            .subscribe(&request.target, &subscribe, &initial)
        {
            Ok(ack) => Ok(HttpResponse::ok()
                .with_header("SID", ack.sid)
                .with_header("TIMEOUT", format!("Second-{}", ack.timeout_secs))),
            Err(e) => Ok(status_response(&e)),
        }
    }

    fn serve_unsubscribe(&self, request: &HttpRequest) -> Result<HttpResponse, UpnpError> {
        if self.event_instance(&request.target).is_none() {
            return Ok(HttpResponse::new(404));
        }
        let Some(sid) = request.headers.get("SID") else {
            return Ok(HttpResponse::new(412));
        };
        match self.engine.unsubscribe(&request.target, sid) {
            Ok(()) => Ok(HttpResponse::ok()),
            Err(e) => Ok(status_response(&e)),
        }
    }

    fn event_instance(&self, target: &str) -> Option<Arc<ServiceInstance>> {
        let routes = self.routes.read().unwrap();
        match routes.get(target) {
            Some(Route::Event(instance)) => Some(Arc::clone(instance)),
            _ => None,
        }
    }
}

/// Projette une erreur GENA sur une réponse à statut nu.
fn status_response(error: &UpnpError) -> HttpResponse {
    HttpResponse::new(error.http_status())
}

/// Le host : serveurs HTTP + SSDP, moteur d'événements, devices.
pub struct DeviceHost {
    http: HttpServer,
    ssdp: SsdpServer,
    engine: Arc<EventEngine>,
    router: Arc<HostRouter>,
    devices: Arc<RwLock<HashMap<Udn, Arc<HostedDevice>>>>,
    server_tokens: ProductTokens,
    location_ip: IpAddr,
    max_age: u32,
    boot_id: u32,
    config_id: AtomicU32,
    running: Arc<AtomicBool>,
}

impl DeviceHost {
    /// Démarre un host d'après la configuration globale.
    pub fn start() -> Result<Self, UpnpError> {
        let config = domoconfig::get_config();
        let bind: SocketAddr = format!(
            "{}:{}",
            config.get_bind_address(),
            config.get_http_port()
        )
        .parse()
        .map_err(|e| UpnpError::Internal(format!("invalid bind address: {e}")))?;

        Self::start_with(
            bind,
            config.get_worker_count(),
            Duration::from_secs(config.get_keep_alive_secs()),
            config.get_max_age(),
            &config.get_server_name(),
        )
    }

    /// Démarre un host avec des paramètres explicites.
    pub fn start_with(
        bind: SocketAddr,
        workers: usize,
        keep_alive: Duration,
        max_age: u32,
        product_name: &str,
    ) -> Result<Self, UpnpError> {
        let client = HttpClient::new(workers.min(8).max(2));
        let engine = EventEngine::start(client);

        let router = Arc::new(HostRouter {
            routes: RwLock::new(HashMap::new()),
            engine: Arc::clone(&engine),
        });

        let http = HttpServer::start(bind, Arc::clone(&router) as Arc<dyn HttpHandler>, workers, keep_alive)
            .map_err(|e| UpnpError::TransportError(format!("cannot bind HTTP server: {e}")))?;
        let ssdp = SsdpServer::start()
            .map_err(|e| UpnpError::TransportError(format!("cannot start SSDP: {e}")))?;

        // bootId : époque de démarrage du processus (UDA 1.1).
        let boot_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| (d.as_secs() & 0x7fff_ffff) as u32)
            .unwrap_or(1);

        let devices: Arc<RwLock<HashMap<Udn, Arc<HostedDevice>>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let running = Arc::new(AtomicBool::new(true));

        // Purge périodique des variables modérées.
        {
            let devices = Arc::clone(&devices);
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("host-moderation".into())
                .spawn(move || {
                    while running.load(Ordering::SeqCst) {
                        let snapshot: Vec<Arc<HostedDevice>> =
                            devices.read().unwrap().values().cloned().collect();
                        for hosted in snapshot {
                            for instance in &hosted.services {
                                instance.flush_moderated();
                            }
                        }
                        thread::sleep(MODERATION_TICK);
                    }
                })
                .map_err(|e| UpnpError::Internal(format!("cannot spawn moderation loop: {e}")))?;
        }

        info!("✅ Device host ready on {}", http.local_addr());

        Ok(Self {
            http,
            ssdp,
            engine,
            router,
            devices,
            server_tokens: ProductTokens::local(product_name, env!("CARGO_PKG_VERSION"), 1),
            location_ip: IpAddr::V4(domoutils::guess_local_ip()),
            max_age,
            boot_id,
            config_id: AtomicU32::new(1),
            running,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.http.local_addr()
    }

    pub fn boot_id(&self) -> u32 {
        self.boot_id
    }

    /// Annonce un arbre de devices : validation, routes, instances,
    /// description, puis rafale SSDP.
    pub fn announce(
        &self,
        mut device: Device,
        factory: &dyn DeviceFactory,
    ) -> Result<Arc<HostedDevice>, UpnpError> {
        device.validate()?;
        device.assign_host_routes();
        let config_id = self.config_id.load(Ordering::SeqCst);
        device.set_config_id(config_id);

        let backend = factory.create(&device)?;

        // Une instance par service de l'arbre.
        let mut instances = Vec::new();
        for node in device.iter_tree() {
            for service in node.services() {
                let instance = Arc::new(ServiceInstance::new(
                    node.udn().clone(),
                    service.clone(),
                    Arc::clone(&self.engine),
                ));
                self.engine.register_service(service.event_sub_url());
                instances.push(instance);
            }
        }

        let hosted = Arc::new(HostedDevice {
            root: device,
            backend: Arc::clone(&backend),
            services: instances,
        });

        self.register_routes(&hosted)?;
        self.devices
            .write()
            .unwrap()
            .insert(hosted.udn().clone(), Arc::clone(&hosted));

        let location = self.location_for(hosted.root());
        self.ssdp.announce(Advertisement {
            root_udn: hosted.udn().clone(),
            usns: hosted.root().usn_set(),
            location,
            server: self.server_tokens.clone(),
            max_age: self.max_age,
            boot_id: self.boot_id,
            config_id,
        });

        info!("✅ Announced {} ({})", hosted.root().friendly_name(), hosted.udn());
        Ok(hosted)
    }

    /// Retire un arbre : byebye, routes et souscriptions comprises.
    pub fn withdraw(&self, udn: &Udn) {
        let removed = self.devices.write().unwrap().remove(udn);
        let Some(hosted) = removed else { return };

        self.ssdp.withdraw(udn);
        let mut routes = self.router.routes.write().unwrap();
        routes.remove(&hosted.root().description_path());
        for instance in &hosted.services {
            let service = instance.service();
            routes.remove(service.scpd_url());
            routes.remove(service.control_url());
            routes.remove(service.event_sub_url());
            self.engine.unregister_service(service.event_sub_url());
        }
    }

    /// Signale un changement de configuration : `configId` est
    /// incrémenté et les arbres encore annoncés sont ré-annoncés.
    pub fn bump_config(&self) -> u32 {
        self.config_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Annonce un redémarrage imminent (`ssdp:update`, nextBootId).
    pub fn announce_update(&self, udn: &Udn, next_boot_id: u32) {
        self.ssdp.send_update(udn, next_boot_id);
    }

    /// Arrêt propre : byebye pour tout, puis extinction des moteurs.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        let udns: Vec<Udn> = self.devices.read().unwrap().keys().cloned().collect();
        for udn in &udns {
            self.withdraw(udn);
        }
        self.ssdp.shutdown();
        self.engine.shutdown();
        self.http.stop();
    }

    fn register_routes(&self, hosted: &Arc<HostedDevice>) -> Result<(), UpnpError> {
        let description = device_description_xml(hosted.root())
            .map_err(|e| UpnpError::Internal(format!("cannot build description: {e}")))?;

        let mut routes = self.router.routes.write().unwrap();
        routes.insert(
            hosted.root().description_path(),
            Route::Description(description.into_bytes()),
        );

        for instance in &hosted.services {
            let service = instance.service();
            let scpd = scpd_xml(service)
                .map_err(|e| UpnpError::Internal(format!("cannot build SCPD: {e}")))?;
            routes.insert(service.scpd_url().to_string(), Route::Scpd(scpd.into_bytes()));
            routes.insert(
                service.control_url().to_string(),
                Route::Control(Arc::clone(instance), Arc::clone(&hosted.backend)),
            );
            routes.insert(
                service.event_sub_url().to_string(),
                Route::Event(Arc::clone(instance)),
            );
        }
        Ok(())
    }

    fn location_for(&self, root: &Device) -> Url {
        let location = format!(
            "http://{}:{}{}",
            self.location_ip,
            self.http.local_addr().port(),
            root.description_path()
        );
        Url::parse(&location).unwrap_or_else(|_| {
            warn!("❌ Invalid LOCATION {}, falling back to loopback", location);
            Url::parse("http://127.0.0.1/").expect("static URL parses")
        })
    }
}

impl Drop for DeviceHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{Action, Argument};
    use crate::http::DEFAULT_KEEP_ALIVE;
    use crate::state_variables::{Evented, StateVariable};
    use crate::variable_types::StateVarType;
    use std::io::{BufReader, Write};
    use std::net::TcpStream;

    struct SwitchBackend;

    impl DeviceBackend for SwitchBackend {
        fn invoke(
            &self,
            ctx: &ServiceContext<'_>,
            action: &str,
            args: &HashMap<String, StateValue>,
        ) -> Result<Vec<(String, StateValue)>, UpnpError> {
            match action {
                "SetTarget" => {
                    let value = args["newTargetValue"].clone();
                    ctx.set("Target", value.clone())?;
                    ctx.set("Status", value)?;
                    Ok(vec![])
                }
                "GetStatus" => Ok(vec![(
                    "ResultStatus".to_string(),
                    ctx.get("Status").unwrap_or(StateValue::Boolean(false)),
                )]),
                other => Err(UpnpError::ActionFailed(format!("unhandled action {other}"))),
            }
        }
    }

    struct SwitchFactory;

    impl DeviceFactory for SwitchFactory {
        fn create(&self, _device: &Device) -> Result<Arc<dyn DeviceBackend>, UpnpError> {
            Ok(Arc::new(SwitchBackend))
        }
    }

    fn binary_light() -> Device {
        let mut device = Device::new(
            "uuid:aaaaaaaa-1111-2222-3333-444444444444".parse().unwrap(),
            "urn:schemas-upnp-org:device:BinaryLight:1".parse().unwrap(),
            "Test Light",
        );
        let mut service = Service::new(
            "urn:upnp-org:serviceId:SwitchPower",
            "urn:schemas-upnp-org:service:SwitchPower:1".parse().unwrap(),
        );
        service
            .add_variable(
                StateVariable::new("Target", StateVarType::Boolean).set_evented(Evented::No),
            )
            .unwrap();
        service
            .add_variable(
                StateVariable::new("Status", StateVarType::Boolean).set_evented(Evented::Yes),
            )
            .unwrap();
        service
            .add_action(
                Action::new("SetTarget")
                    .add_argument(Argument::input("newTargetValue", "Target")),
            )
            .unwrap();
        service
            .add_action(Action::new("GetStatus").add_argument({
                let mut arg = Argument::output("ResultStatus", "Status");
                arg.retval = true;
                arg
            }))
            .unwrap();
        device.add_service(service).unwrap();
        device
    }

    fn start_host() -> DeviceHost {
        DeviceHost::start_with(
            "127.0.0.1:0".parse().unwrap(),
            8,
            DEFAULT_KEEP_ALIVE,
            1800,
            "DomoCoreTest",
        )
        .unwrap()
    }

    fn http_exchange(addr: SocketAddr, raw: &str) -> HttpResponse {
        let mut stream = TcpStream::connect(addr).unwrap();
        stream.write_all(raw.as_bytes()).unwrap();
        let mut reader = BufReader::new(stream);
        crate::http::message::read_response(&mut reader, raw.starts_with("HEAD")).unwrap()
    }

    #[test]
    fn serves_description_and_scpd() {
        let host = start_host();
        let hosted = host.announce(binary_light(), &SwitchFactory).unwrap();
        let addr = host.local_addr();

        let path = hosted.root().description_path();
        let response = http_exchange(addr, &format!("GET {path} HTTP/1.1\r\nHOST: {addr}\r\n\r\n"));
        assert_eq!(response.status, 200);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains("<friendlyName>Test Light</friendlyName>"));

        // HEAD : mêmes en-têtes, pas de corps.
        let head = http_exchange(addr, &format!("HEAD {path} HTTP/1.1\r\nHOST: {addr}\r\n\r\n"));
        assert_eq!(head.status, 200);
        assert!(head.body.is_empty());
        assert!(head.headers.get("CONTENT-LENGTH").unwrap().parse::<usize>().unwrap() > 0);

        // SCPD du service.
        let scpd_path = hosted.root().services()[0].scpd_url().to_string();
        let scpd = http_exchange(addr, &format!("GET {scpd_path} HTTP/1.1\r\nHOST: {addr}\r\n\r\n"));
        assert_eq!(scpd.status, 200);

        // Chemin inconnu → 404.
        let missing = http_exchange(addr, &format!("GET /nope HTTP/1.1\r\nHOST: {addr}\r\n\r\n"));
        assert_eq!(missing.status, 404);

        host.shutdown();
    }

    #[test]
    fn soap_control_round_trip() {
        let host = start_host();
        let hosted = host.announce(binary_light(), &SwitchFactory).unwrap();
        let addr = host.local_addr();
        let control_path = hosted.root().services()[0].control_url().to_string();

        let body = crate::soap::build_action_request(
            "urn:schemas-upnp-org:service:SwitchPower:1",
            "SetTarget",
            &[("newTargetValue", "1")],
        )
        .unwrap();
        let request = format!(
            "POST {control_path} HTTP/1.1\r\nHOST: {addr}\r\n\
             CONTENT-TYPE: text/xml; charset=\"utf-8\"\r\n\
             SOAPACTION: \"urn:schemas-upnp-org:service:SwitchPower:1#SetTarget\"\r\n\
             CONTENT-LENGTH: {}\r\n\r\n{body}",
            body.len()
        );
        let response = http_exchange(addr, &request);
        assert_eq!(response.status, 200);
        assert!(String::from_utf8(response.body)
            .unwrap()
            .contains("SetTargetResponse"));

        // L'état a bien changé.
        let instance = hosted
            .service_instance("urn:upnp-org:serviceId:SwitchPower")
            .unwrap();
        assert_eq!(instance.get_variable("Status"), Some(StateValue::Boolean(true)));

        host.shutdown();
    }

    #[test]
    fn invalid_argument_yields_a_402_fault() {
        let host = start_host();
        let hosted = host.announce(binary_light(), &SwitchFactory).unwrap();
        let addr = host.local_addr();
        let control_path = hosted.root().services()[0].control_url().to_string();

        let body = crate::soap::build_action_request(
            "urn:schemas-upnp-org:service:SwitchPower:1",
            "SetTarget",
            &[("newTargetValue", "sideways")],
        )
        .unwrap();
        let request = format!(
            "POST {control_path} HTTP/1.1\r\nHOST: {addr}\r\n\
             SOAPACTION: \"urn:schemas-upnp-org:service:SwitchPower:1#SetTarget\"\r\n\
             CONTENT-LENGTH: {}\r\n\r\n{body}",
            body.len()
        );
        let response = http_exchange(addr, &request);
        assert_eq!(response.status, 500);
        let body = String::from_utf8(response.body).unwrap();
        assert!(body.contains("<errorCode>402</errorCode>"));

        host.shutdown();
    }

    #[test]
    fn subscribe_renew_unsubscribe_over_http() {
        let host = start_host();
        let hosted = host.announce(binary_light(), &SwitchFactory).unwrap();
        let addr = host.local_addr();
        let event_path = hosted.root().services()[0].event_sub_url().to_string();

        // Un récepteur de NOTIFY minimal.
        let sink = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let sink_addr = sink.local_addr().unwrap();
        thread::spawn(move || {
            for stream in sink.incoming().flatten() {
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                if crate::http::message::read_request(&mut reader).is_ok() {
                    let mut s = stream;
                    let _ = s.write_all(b"HTTP/1.1 200 OK\r\nCONTENT-LENGTH: 0\r\n\r\n");
                }
            }
        });

        let response = http_exchange(
            addr,
            &format!(
                "SUBSCRIBE {event_path} HTTP/1.1\r\nHOST: {addr}\r\n\
                 NT: upnp:event\r\nCALLBACK: <http://{sink_addr}/evt>\r\n\
                 TIMEOUT: Second-1800\r\n\r\n"
            ),
        );
        assert_eq!(response.status, 200);
        let sid = response.headers.get("SID").unwrap().to_string();
        assert!(sid.starts_with("uuid:"));
        assert_eq!(response.headers.get("TIMEOUT"), Some("Second-1800"));

        // Renouvellement.
        let renew = http_exchange(
            addr,
            &format!(
                "SUBSCRIBE {event_path} HTTP/1.1\r\nHOST: {addr}\r\nSID: {sid}\r\n\r\n"
            ),
        );
        assert_eq!(renew.status, 200);

        // UNSUBSCRIBE, puis SID inconnu → 412.
        let bye = http_exchange(
            addr,
            &format!(
                "UNSUBSCRIBE {event_path} HTTP/1.1\r\nHOST: {addr}\r\nSID: {sid}\r\n\r\n"
            ),
        );
        assert_eq!(bye.status, 200);
        let stale = http_exchange(
            addr,
            &format!(
                "UNSUBSCRIBE {event_path} HTTP/1.1\r\nHOST: {addr}\r\nSID: {sid}\r\n\r\n"
            ),
        );
        assert_eq!(stale.status, 412);

        host.shutdown();
    }
}
