//! Action invocation proxy (control-point side).
//!
//! Validates arguments against the SCPD, frames the SOAP call, and
//! serialises invocations per control URL: at most one request is in
//! flight against a given service's control endpoint, while calls to
//! different endpoints run concurrently. On transport failure the
//! proxy walks the device's alternate LOCATION bases.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};
use url::Url;

use domoupnp::control::validate_inputs;
use domoupnp::errors::UpnpError;
use domoupnp::http::{endpoint_of, request_for, HttpClient, DEFAULT_DEADLINE};
use domoupnp::services::Service;
use domoupnp::soap::{
    build_action_request, format_soap_action, parse_fault, parse_soap_envelope, CONTENT_TYPE_XML,
};

/// Result of an invocation, with the failover bookkeeping the caller
/// feeds back into the registry.
#[derive(Debug)]
pub struct InvokeResult {
    /// Output arguments in SCPD order.
    pub outputs: Vec<(String, String)>,
    /// LOCATION bases that refused the connection during failover.
    pub unreachable: Vec<Url>,
}

/// The per-control-URL serialising proxy.
pub struct ActionProxy {
    client: HttpClient,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ActionProxy {
    pub fn new(client: HttpClient) -> Self {
        Self {
            client,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Invokes `action_name` on `service`.
    ///
    /// `locations` are the device's known LOCATION URLs, preferred
    /// first; the control URL is re-based onto the next one when the
    /// current base is unreachable. Transport errors only trigger
    /// failover — SOAP faults and HTTP errors surface immediately.
    pub fn invoke(
        &self,
        service: &Service,
        locations: &[Url],
        action_name: &str,
        args: &[(&str, &str)],
    ) -> Result<InvokeResult, UpnpError> {
        let action = service.action(action_name).ok_or_else(|| {
            UpnpError::InvalidArgument(format!(
                "service {} has no action {action_name}",
                service.service_id()
            ))
        })?;

        // Validation et coercition : mêmes règles que côté host.
        let raw_args: HashMap<String, String> = args
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        validate_inputs(service, action, &raw_args)?;

        // Arguments émis dans l'ordre du SCPD, pas celui de l'appelant.
        let ordered_args: Vec<(&str, &str)> = action
            .inputs()
            .filter_map(|argument| {
                raw_args
                    .get(&argument.name)
                    .map(|value| (argument.name.as_str(), value.as_str()))
            })
            .collect();

        let service_type = service.service_type().to_string();
        let body = build_action_request(&service_type, action_name, &ordered_args)
            .map_err(|e| UpnpError::Internal(format!("cannot build SOAP request: {e}")))?;

        let control_url = Url::parse(service.control_url()).map_err(|e| {
            UpnpError::MalformedMessage(format!(
                "invalid control URL {}: {e}",
                service.control_url()
            ))
        })?;

        // Sérialisation par control URL.
        let lock = self.lock_for(control_url.as_str());
        let _guard = lock.lock().unwrap();

        let mut unreachable = Vec::new();
        let mut last_error =
            UpnpError::TransportError(format!("no usable location for {control_url}"));

        for candidate in candidate_urls(&control_url, locations) {
            let request = request_for("POST", &candidate)
                .with_header("CONTENT-TYPE", CONTENT_TYPE_XML)
                .with_header("SOAPACTION", format_soap_action(&service_type, action_name))
                .with_body(body.clone().into_bytes());

            let Some(endpoint) = endpoint_of(&candidate) else {
                warn!("❌ Cannot resolve control endpoint {}", candidate);
                continue;
            };

            match self.client.send(endpoint, request, DEFAULT_DEADLINE) {
                Ok(response) => {
                    let outputs = decode_response(action_name, &response.body, response.status)?;
                    let mut ordered = Vec::new();
                    for argument in action.outputs() {
                        if let Some((_, value)) =
                            outputs.iter().find(|(name, _)| name == &argument.name)
                        {
                            ordered.push((argument.name.clone(), value.clone()));
                        }
                    }
                    return Ok(InvokeResult {
                        outputs: ordered,
                        unreachable,
                    });
                }
                Err(UpnpError::TransportError(e)) => {
                    debug!("Control endpoint {} unreachable: {}", candidate, e);
                    if let Some(base) = base_of(&candidate, &control_url, locations) {
                        unreachable.push(base);
                    }
                    last_error = UpnpError::TransportError(e);
                }
                Err(other) => return Err(other),
            }
        }

        Err(last_error)
    }

    fn lock_for(&self, control_url: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(
            locks
                .entry(control_url.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// The control URL re-based onto every known LOCATION, primary first,
/// without duplicates.
fn candidate_urls(control_url: &Url, locations: &[Url]) -> Vec<Url> {
    let mut out = vec![control_url.clone()];
    for location in locations {
        let mut candidate = control_url.clone();
        if candidate.set_host(location.host_str()).is_ok() {
            let _ = candidate.set_port(location.port_or_known_default());
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }
    }
    out
}

/// Which LOCATION base produced `candidate` (for unreachable marking).
fn base_of(candidate: &Url, control_url: &Url, locations: &[Url]) -> Option<Url> {
    if candidate == control_url {
        return locations
            .iter()
            .find(|l| l.host_str() == control_url.host_str() && l.port_or_known_default() == control_url.port_or_known_default())
            .cloned();
    }
    locations
        .iter()
        .find(|l| {
            l.host_str() == candidate.host_str()
                && l.port_or_known_default() == candidate.port_or_known_default()
        })
        .cloned()
}

/// Decodes a control response: outputs on 200, taxonomy error on fault.
fn decode_response(
    action_name: &str,
    body: &[u8],
    status: u16,
) -> Result<Vec<(String, String)>, UpnpError> {
    let envelope = parse_soap_envelope(body)?;

    if let Some(fault) = parse_fault(&envelope) {
        return Err(fault.to_upnp_error());
    }
    if status != 200 {
        return Err(UpnpError::ActionFailed(format!(
            "control endpoint answered {status} without a fault"
        )));
    }

    // <u:ActionResponse> : ses enfants sont les arguments de sortie.
    let response_elem = envelope
        .body
        .content
        .children
        .iter()
        .find_map(|n| n.as_element())
        .ok_or_else(|| {
            UpnpError::MalformedMessage("control response without body element".to_string())
        })?;
    if !response_elem.name.ends_with("Response") || !response_elem.name.starts_with(action_name) {
        return Err(UpnpError::MalformedMessage(format!(
            "unexpected control response element {}",
            response_elem.name
        )));
    }

    Ok(response_elem
        .children
        .iter()
        .filter_map(|n| n.as_element())
        .map(|e| {
            (
                e.name.clone(),
                e.get_text().unwrap_or_default().to_string(),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use domoupnp::actions::{Action, Argument};
    use domoupnp::soap::{build_action_response, build_soap_fault};
    use domoupnp::state_variables::{Evented, StateVariable};
    use domoupnp::variable_types::StateVarType;

    fn switch_service(control_url: &str) -> Service {
        let mut service = Service::new(
            "urn:upnp-org:serviceId:SwitchPower",
            "urn:schemas-upnp-org:service:SwitchPower:1".parse().unwrap(),
        );
        service.set_urls("/scpd.xml", control_url, "/event");
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
            .add_action(
                Action::new("GetStatus").add_argument(Argument::output("ResultStatus", "Status")),
            )
            .unwrap();
        service
    }

    #[test]
    fn invalid_argument_fails_before_any_network_io() {
        let proxy = ActionProxy::new(HttpClient::new(1));
        let service = switch_service("http://127.0.0.1:1/control");
        let result = proxy.invoke(&service, &[], "SetTarget", &[("newTargetValue", "banana")]);
        assert!(matches!(result, Err(UpnpError::InvalidArgument(_))));
    }

    #[test]
    fn fault_body_maps_to_taxonomy() {
        let fault = build_soap_fault(402, "Invalid Args").unwrap();
        let error = decode_response("SetTarget", fault.as_bytes(), 500).unwrap_err();
        assert!(matches!(error, UpnpError::InvalidArgument(_)));
    }

    #[test]
    fn success_body_yields_outputs() {
        let body = build_action_response(
            "urn:schemas-upnp-org:service:SwitchPower:1",
            "GetStatus",
            &[("ResultStatus".to_string(), "1".to_string())],
        )
        .unwrap();
        let outputs = decode_response("GetStatus", body.as_bytes(), 200).unwrap();
        assert_eq!(outputs, vec![("ResultStatus".to_string(), "1".to_string())]);
    }

    #[test]
    fn unreachable_primary_fails_over_to_alternate_location() {
        // Un faux device sur loopback : il répond à toute action par
        // une réponse GetStatus valide.
        use domoupnp::http::{HttpHandler, HttpRequest, HttpResponse, HttpServer};
        use std::net::SocketAddr;
        use std::time::Duration;

        struct FakeControl;
        impl HttpHandler for FakeControl {
            fn handle(
                &self,
                _peer: SocketAddr,
                _request: &HttpRequest,
            ) -> Result<HttpResponse, UpnpError> {
                let body = build_action_response(
                    "urn:schemas-upnp-org:service:SwitchPower:1",
                    "GetStatus",
                    &[("ResultStatus".to_string(), "1".to_string())],
                )
                .unwrap();
                Ok(HttpResponse::ok().with_body(body.into_bytes(), CONTENT_TYPE_XML))
            }
        }

        let server = HttpServer::start(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(FakeControl),
            2,
            Duration::from_secs(5),
        )
        .unwrap();
        let good = server.local_addr();

        // Le control URL primaire pointe vers un port fermé ; la
        // LOCATION alternative pointe vers le serveur vivant.
        let service = switch_service("http://127.0.0.1:1/control");
        let locations = vec![
            Url::parse("http://127.0.0.1:1/desc.xml").unwrap(),
            Url::parse(&format!("http://{good}/desc.xml")).unwrap(),
        ];

        let proxy = ActionProxy::new(HttpClient::new(2));
        let result = proxy
            .invoke(&service, &locations, "GetStatus", &[])
            .unwrap();

        assert_eq!(result.outputs, vec![("ResultStatus".to_string(), "1".to_string())]);
        // La LOCATION morte a été marquée injoignable.
        assert_eq!(result.unreachable.len(), 1);
        assert!(result.unreachable[0].as_str().contains(":1/"));

        server.stop();
    }
}
