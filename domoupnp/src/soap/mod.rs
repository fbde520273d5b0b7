//! # Module SOAP - canal de contrôle UPnP
//!
//! Ce module implémente le codec SOAP 1.1 utilisé par le contrôle UPnP :
//! enveloppes d'invocation et de réponse, faults avec `UPnPError`, et
//! en-tête `SOAPACTION`.
//!
//! ## Architecture
//!
//! - [`SoapEnvelope`] : enveloppe décodée (header optionnel + body) ;
//! - [`SoapAction`] : action UPnP extraite d'un body ;
//! - [`SoapFault`] : erreur SOAP, avec le détail `UPnPError` ;
//! - [`builder`] : construction des enveloppes de requête/réponse.

mod builder;
mod envelope;
mod fault;
mod parser;

pub use builder::{build_action_request, build_action_response};
pub use envelope::{SoapBody, SoapEnvelope, SoapHeader};
pub use fault::{build_soap_fault, parse_fault, SoapFault, UpnpFaultDetail};
pub use parser::{parse_soap_action, parse_soap_envelope, SoapAction, SoapParseError};

use crate::errors::UpnpError;

/// Content-Type des requêtes et réponses de contrôle.
pub const CONTENT_TYPE_XML: &str = "text/xml; charset=\"utf-8\"";

/// Namespace de l'enveloppe SOAP 1.1.
pub const ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";

/// Namespace du détail UPnPError.
pub const CONTROL_NS: &str = "urn:schemas-upnp-org:control-1-0";

/// Codes UPnPError standards.
pub mod error_codes {
    /// Action inconnue du service.
    pub const INVALID_ACTION: u32 = 401;

    /// Nombre, nom ou type d'argument invalide.
    pub const INVALID_ARGS: u32 = 402;

    /// L'action a échoué côté device.
    pub const ACTION_FAILED: u32 = 501;

    /// Valeur d'argument invalide.
    pub const ARGUMENT_VALUE_INVALID: u32 = 600;

    /// Valeur d'argument hors plage.
    pub const ARGUMENT_VALUE_OUT_OF_RANGE: u32 = 601;
}

/// Forme l'en-tête `SOAPACTION: "<serviceType>#<actionName>"`.
pub fn format_soap_action(service_type: &str, action: &str) -> String {
    format!("\"{service_type}#{action}\"")
}

/// Décompose un en-tête SOAPACTION en (serviceType, actionName).
pub fn parse_soap_action_header(raw: &str) -> Result<(String, String), UpnpError> {
    let inner = raw.trim().trim_matches('"');
    let (service_type, action) = inner.split_once('#').ok_or_else(|| {
        UpnpError::MalformedMessage(format!("invalid SOAPACTION header: {raw}"))
    })?;
    if service_type.is_empty() || action.is_empty() {
        return Err(UpnpError::MalformedMessage(format!(
            "invalid SOAPACTION header: {raw}"
        )));
    }
    Ok((service_type.to_string(), action.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn soap_action_header_round_trip() {
        let header =
            format_soap_action("urn:schemas-upnp-org:service:SwitchPower:1", "SetTarget");
        assert_eq!(
            header,
            "\"urn:schemas-upnp-org:service:SwitchPower:1#SetTarget\""
        );
        let (st, action) = parse_soap_action_header(&header).unwrap();
        assert_eq!(st, "urn:schemas-upnp-org:service:SwitchPower:1");
        assert_eq!(action, "SetTarget");
    }

    #[test]
    fn soap_action_header_rejects_missing_hash() {
        assert!(parse_soap_action_header("\"not-an-action\"").is_err());
    }
}
