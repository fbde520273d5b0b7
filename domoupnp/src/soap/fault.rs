//! SOAP Faults et détail UPnPError.

use xmltree::{Element, XMLNode};

use crate::errors::UpnpError;

use super::{builder::wrap_in_envelope, SoapEnvelope, CONTROL_NS};

/// Erreur SOAP décodée.
#[derive(Debug, Clone)]
pub struct SoapFault {
    /// Code du fault ("s:Client" pour toutes les erreurs UPnP).
    pub fault_code: String,

    /// Chaîne du fault ("UPnPError").
    pub fault_string: String,

    /// Détail UPnP, si présent.
    pub detail: Option<UpnpFaultDetail>,
}

/// Détail `<UPnPError>` d'un fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnpFaultDetail {
    pub error_code: u32,
    pub error_description: String,
}

impl SoapFault {
    /// Traduit le fault vers la taxonomie d'erreurs publique.
    pub fn to_upnp_error(&self) -> UpnpError {
        match &self.detail {
            Some(detail) => UpnpError::from_upnp_code(detail.error_code, &detail.error_description),
            None => UpnpError::ActionFailed(self.fault_string.clone()),
        }
    }
}

/// Construit l'enveloppe XML d'un SOAP Fault UPnP.
///
/// UDA impose `faultcode s:Client` et `faultstring UPnPError`, le code
/// réel vit dans le détail.
pub fn build_soap_fault(error_code: u32, description: &str) -> Result<String, xmltree::Error> {
    let mut fault = Element::new("s:Fault");

    let mut faultcode = Element::new("faultcode");
    faultcode
        .children
        .push(XMLNode::Text("s:Client".to_string()));
    fault.children.push(XMLNode::Element(faultcode));

    let mut faultstring = Element::new("faultstring");
    faultstring
        .children
        .push(XMLNode::Text("UPnPError".to_string()));
    fault.children.push(XMLNode::Element(faultstring));

    let mut detail = Element::new("detail");
    let mut upnp_error = Element::new("UPnPError");
    upnp_error
        .attributes
        .insert("xmlns".to_string(), CONTROL_NS.to_string());

    let mut code_elem = Element::new("errorCode");
    code_elem
        .children
        .push(XMLNode::Text(error_code.to_string()));
    upnp_error.children.push(XMLNode::Element(code_elem));

    let mut desc_elem = Element::new("errorDescription");
    desc_elem
        .children
        .push(XMLNode::Text(description.to_string()));
    upnp_error.children.push(XMLNode::Element(desc_elem));

    detail.children.push(XMLNode::Element(upnp_error));
    fault.children.push(XMLNode::Element(detail));

    wrap_in_envelope(fault)
}

/// Extrait le fault d'une enveloppe décodée, s'il y en a un.
pub fn parse_fault(envelope: &SoapEnvelope) -> Option<SoapFault> {
    let fault = child_by_local_name(&envelope.body.content, "Fault")?;

    let fault_code = child_text(fault, "faultcode").unwrap_or_default();
    let fault_string = child_text(fault, "faultstring").unwrap_or_default();

    let detail = child_by_local_name(fault, "detail")
        .and_then(|d| child_by_local_name(d, "UPnPError"))
        .and_then(|upnp_error| {
            let error_code = child_text(upnp_error, "errorCode")?.trim().parse().ok()?;
            let error_description = child_text(upnp_error, "errorDescription")
                .unwrap_or_default()
                .trim()
                .to_string();
            Some(UpnpFaultDetail {
                error_code,
                error_description,
            })
        });

    Some(SoapFault {
        fault_code,
        fault_string,
        detail,
    })
}

fn child_by_local_name<'a>(parent: &'a Element, local: &str) -> Option<&'a Element> {
    parent.children.iter().find_map(|node| match node {
        XMLNode::Element(elem) if elem.name.ends_with(local) => Some(elem),
        _ => None,
    })
}

fn child_text(parent: &Element, local: &str) -> Option<String> {
    child_by_local_name(parent, local).and_then(|e| e.get_text().map(|t| t.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soap::parse_soap_envelope;

    #[test]
    fn fault_round_trip() {
        let xml = build_soap_fault(402, "Invalid Args").unwrap();
        assert!(xml.contains("<faultcode>s:Client</faultcode>"));
        assert!(xml.contains("<errorCode>402</errorCode>"));

        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let fault = parse_fault(&envelope).unwrap();
        assert_eq!(
            fault.detail,
            Some(UpnpFaultDetail {
                error_code: 402,
                error_description: "Invalid Args".to_string()
            })
        );
    }

    #[test]
    fn fault_maps_to_taxonomy() {
        let xml = build_soap_fault(402, "bad type").unwrap();
        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let fault = parse_fault(&envelope).unwrap();
        assert!(matches!(
            fault.to_upnp_error(),
            UpnpError::InvalidArgument(_)
        ));

        let xml = build_soap_fault(501, "boom").unwrap();
        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        let fault = parse_fault(&envelope).unwrap();
        assert!(matches!(fault.to_upnp_error(), UpnpError::ActionFailed(_)));
    }

    #[test]
    fn success_envelope_has_no_fault() {
        let xml = crate::soap::build_action_response(
            "urn:schemas-upnp-org:service:SwitchPower:1",
            "GetStatus",
            &[],
        )
        .unwrap();
        let envelope = parse_soap_envelope(xml.as_bytes()).unwrap();
        assert!(parse_fault(&envelope).is_none());
    }
}
