//! Parsing des enveloppes SOAP et extraction des actions UPnP.

use std::collections::HashMap;
use std::io::BufReader;

use xmltree::Element;

use super::{SoapBody, SoapEnvelope, SoapHeader};

/// Action UPnP extraite d'un corps SOAP.
#[derive(Debug, Clone)]
pub struct SoapAction {
    /// Nom local de l'action ("Play", "SetTarget", …).
    pub name: String,

    /// Namespace (URN du service), si présent.
    pub namespace: Option<String>,

    /// Arguments de l'action.
    pub args: HashMap<String, String>,
}

/// Erreur de parsing SOAP.
#[derive(Debug, thiserror::Error)]
pub enum SoapParseError {
    #[error("XML parse error: {0}")]
    XmlError(#[from] xmltree::ParseError),

    #[error("missing SOAP Envelope")]
    MissingEnvelope,

    #[error("missing SOAP Body")]
    MissingBody,

    #[error("no action found in SOAP Body")]
    NoAction,
}

impl From<SoapParseError> for crate::errors::UpnpError {
    fn from(err: SoapParseError) -> Self {
        crate::errors::UpnpError::MalformedMessage(err.to_string())
    }
}

/// Parse une action SOAP à partir des octets d'une requête de contrôle.
pub fn parse_soap_action(xml: &[u8]) -> Result<SoapAction, SoapParseError> {
    let envelope = parse_soap_envelope(xml)?;
    extract_action(&envelope.body)
}

/// Parse une enveloppe SOAP complète.
pub fn parse_soap_envelope(xml: &[u8]) -> Result<SoapEnvelope, SoapParseError> {
    let reader = BufReader::new(xml);
    let root = Element::parse(reader)?;

    if !root.name.ends_with("Envelope") {
        return Err(SoapParseError::MissingEnvelope);
    }

    // Le préfixe de namespace varie selon l'émetteur (s:, SOAP-ENV:, …),
    // on compare donc sur le nom local.
    let header = root
        .children
        .iter()
        .find_map(|n| n.as_element())
        .filter(|e| e.name.ends_with("Header"))
        .map(|e| SoapHeader { content: e.clone() });

    let body = root
        .children
        .iter()
        .filter_map(|n| n.as_element())
        .find(|e| e.name.ends_with("Body"))
        .ok_or(SoapParseError::MissingBody)?;

    Ok(SoapEnvelope {
        header,
        body: SoapBody {
            content: body.clone(),
        },
    })
}

/// Extrait l'action UPnP du corps : le premier élément enfant.
fn extract_action(body: &SoapBody) -> Result<SoapAction, SoapParseError> {
    let action_elem = body
        .content
        .children
        .iter()
        .find_map(|n| n.as_element())
        .ok_or(SoapParseError::NoAction)?;

    let mut args = HashMap::new();
    for child in &action_elem.children {
        if let Some(elem) = child.as_element() {
            let value = elem.get_text().unwrap_or_default().to_string();
            args.insert(elem.name.clone(), value);
        }
    }

    Ok(SoapAction {
        name: action_elem.name.clone(),
        namespace: action_elem.namespace.clone(),
        args,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_action_with_args() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:SetTarget xmlns:u="urn:schemas-upnp-org:service:SwitchPower:1">
      <newTargetValue>1</newTargetValue>
    </u:SetTarget>
  </s:Body>
</s:Envelope>"#;

        let action = parse_soap_action(xml.as_bytes()).unwrap();
        assert_eq!(action.name, "SetTarget");
        assert_eq!(
            action.namespace.as_deref(),
            Some("urn:schemas-upnp-org:service:SwitchPower:1")
        );
        assert_eq!(action.args.get("newTargetValue"), Some(&"1".to_string()));
    }

    #[test]
    fn parse_action_without_args() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:GetStatus xmlns:u="urn:schemas-upnp-org:service:SwitchPower:1"/>
  </s:Body>
</s:Envelope>"#;

        let action = parse_soap_action(xml.as_bytes()).unwrap();
        assert_eq!(action.name, "GetStatus");
        assert!(action.args.is_empty());
    }

    #[test]
    fn missing_body_is_an_error() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"/>"#;
        assert!(matches!(
            parse_soap_envelope(xml.as_bytes()),
            Err(SoapParseError::MissingBody)
        ));
    }

    #[test]
    fn alternate_namespace_prefix_is_accepted() {
        let xml = r#"<?xml version="1.0"?>
<SOAP-ENV:Envelope xmlns:SOAP-ENV="http://schemas.xmlsoap.org/soap/envelope/">
  <SOAP-ENV:Body>
    <m:GetStatus xmlns:m="urn:schemas-upnp-org:service:SwitchPower:1"/>
  </SOAP-ENV:Body>
</SOAP-ENV:Envelope>"#;
        let action = parse_soap_action(xml.as_bytes()).unwrap();
        assert_eq!(action.name, "GetStatus");
    }
}
