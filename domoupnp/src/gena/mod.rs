//! # Module GENA - General Event Notification Architecture
//!
//! Ce module implémente l'événementiel UPnP côté host :
//!
//! - codec des en-têtes GENA (`TIMEOUT`, `CALLBACK`, `SID`, `SEQ`) et du
//!   corps `propertyset` ;
//! - [`SubscriptionTable`] : cycle de vie des souscriptions d'un service ;
//! - [`EventEngine`] : files de notifications par SID, livraison FIFO,
//!   expiration, modération.
//!
//! Le côté control point (proxy de souscription, validation des SEQ
//! reçus) vit dans le crate de control point ; il réutilise ce codec.

mod notifier;
pub mod subscriptions;

pub use notifier::EventEngine;
pub use subscriptions::{SubscribeAck, SubscribeRequest, Subscription, SubscriptionTable};

use std::fmt;
use std::str::FromStr;

use url::Url;
use xmltree::{Element, EmitterConfig, XMLNode};

use crate::errors::UpnpError;

/// `NT` des messages d'événement.
pub const NT_EVENT: &str = "upnp:event";

/// `NTS` des notifications de changement d'état.
pub const NTS_PROPCHANGE: &str = "upnp:propchange";

/// Namespace du corps `propertyset`.
pub const EVENT_NS: &str = "urn:schemas-upnp-org:event-1-0";

/// Bornes du timeout de souscription, en secondes.
pub const TIMEOUT_MIN: u32 = 1_800;
pub const TIMEOUT_MAX: u32 = 604_800;
pub const TIMEOUT_DEFAULT: u32 = 1_800;

/// Borne le timeout demandé dans [1800, 604800] secondes.
pub fn clamp_timeout(seconds: u32) -> u32 {
    seconds.clamp(TIMEOUT_MIN, TIMEOUT_MAX)
}

/// En-tête `TIMEOUT: Second-<n>` / `Second-infinite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenaTimeout {
    Seconds(u32),
    Infinite,
}

impl fmt::Display for GenaTimeout {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            GenaTimeout::Seconds(n) => write!(f, "Second-{n}"),
            GenaTimeout::Infinite => write!(f, "Second-infinite"),
        }
    }
}

impl FromStr for GenaTimeout {
    type Err = UpnpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let value = raw
            .strip_prefix("Second-")
            .or_else(|| raw.strip_prefix("second-"))
            .ok_or_else(|| UpnpError::MalformedMessage(format!("invalid TIMEOUT header: {raw}")))?;
        if value.eq_ignore_ascii_case("infinite") {
            return Ok(GenaTimeout::Infinite);
        }
        value
            .parse()
            .map(GenaTimeout::Seconds)
            .map_err(|_| UpnpError::MalformedMessage(format!("invalid TIMEOUT header: {raw}")))
    }
}

/// Décompose `CALLBACK: <url1><url2>…` en liste ordonnée d'URLs HTTP.
pub fn parse_callback(raw: &str) -> Result<Vec<Url>, UpnpError> {
    let mut urls = Vec::new();
    let mut rest = raw.trim();
    while !rest.is_empty() {
        let start = rest
            .find('<')
            .ok_or_else(|| UpnpError::MalformedMessage(format!("invalid CALLBACK: {raw}")))?;
        let end = rest[start..]
            .find('>')
            .map(|i| start + i)
            .ok_or_else(|| UpnpError::MalformedMessage(format!("invalid CALLBACK: {raw}")))?;
        let url = Url::parse(&rest[start + 1..end])
            .map_err(|e| UpnpError::MalformedMessage(format!("invalid CALLBACK url: {e}")))?;
        if url.scheme() != "http" {
            return Err(UpnpError::MalformedMessage(format!(
                "CALLBACK must be http: {url}"
            )));
        }
        urls.push(url);
        rest = rest[end + 1..].trim_start();
    }
    if urls.is_empty() {
        return Err(UpnpError::MalformedMessage(format!(
            "CALLBACK without URL: {raw}"
        )));
    }
    Ok(urls)
}

/// Projette une liste d'URLs vers la forme `<url1><url2>…`.
pub fn format_callback(urls: &[Url]) -> String {
    urls.iter().map(|u| format!("<{u}>")).collect()
}

/// Clé d'événement d'une souscription : part de 0, puis boucle sur
/// [1, 2³²−1] (le 0 est réservé à l'événement initial).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventKey(u32);

impl EventKey {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn current(&self) -> u32 {
        self.0
    }

    /// Consomme la clé courante et avance.
    pub fn take(&mut self) -> u32 {
        let current = self.0;
        self.0 = if self.0 == u32::MAX { 1 } else { self.0 + 1 };
        current
    }
}

impl Default for EventKey {
    fn default() -> Self {
        Self::new()
    }
}

/// Construit le corps `<e:propertyset>` d'une notification.
pub fn property_set_xml(changes: &[(String, String)]) -> Result<String, xmltree::Error> {
    let mut propertyset = Element::new("e:propertyset");
    propertyset
        .attributes
        .insert("xmlns:e".to_string(), EVENT_NS.to_string());

    for (name, value) in changes {
        let mut property = Element::new("e:property");
        let mut variable = Element::new(name);
        variable.children.push(XMLNode::Text(value.clone()));
        property.children.push(XMLNode::Element(variable));
        propertyset.children.push(XMLNode::Element(property));
    }

    let mut buf = Vec::new();
    let config = EmitterConfig::new().perform_indent(true).indent_string("  ");
    propertyset.write_with_config(&mut buf, config)?;
    Ok(String::from_utf8(buf).expect("xmltree emits valid UTF-8"))
}

/// Décode un corps `propertyset` en paires (variable, valeur).
pub fn parse_property_set(xml: &[u8]) -> Result<Vec<(String, String)>, UpnpError> {
    let root = Element::parse(std::io::BufReader::new(xml))
        .map_err(|e| UpnpError::MalformedMessage(format!("invalid propertyset: {e}")))?;
    if !root.name.ends_with("propertyset") {
        return Err(UpnpError::MalformedMessage(format!(
            "unexpected event body root: {}",
            root.name
        )));
    }

    let mut out = Vec::new();
    for property in root.children.iter().filter_map(|n| n.as_element()) {
        if !property.name.ends_with("property") {
            continue;
        }
        for variable in property.children.iter().filter_map(|n| n.as_element()) {
            let value = variable.get_text().unwrap_or_default().to_string();
            out.push((variable.name.clone(), value));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_header_round_trip() {
        let timeout: GenaTimeout = "Second-1800".parse().unwrap();
        assert_eq!(timeout, GenaTimeout::Seconds(1800));
        assert_eq!(timeout.to_string(), "Second-1800");

        let infinite: GenaTimeout = "Second-infinite".parse().unwrap();
        assert_eq!(infinite, GenaTimeout::Infinite);
        assert_eq!(infinite.to_string(), "Second-infinite");

        assert!("1800".parse::<GenaTimeout>().is_err());
    }

    #[test]
    fn timeout_clamp_bounds() {
        assert_eq!(clamp_timeout(60), 1_800);
        assert_eq!(clamp_timeout(3_600), 3_600);
        assert_eq!(clamp_timeout(10_000_000), 604_800);
    }

    #[test]
    fn callback_list_round_trip() {
        let raw = "<http://192.0.2.20:5000/evt><http://192.0.2.21:5000/evt>";
        let urls = parse_callback(raw).unwrap();
        assert_eq!(urls.len(), 2);
        assert_eq!(urls[0].as_str(), "http://192.0.2.20:5000/evt");
        assert_eq!(format_callback(&urls), raw);
    }

    #[test]
    fn callback_rejects_non_http() {
        assert!(parse_callback("<ftp://192.0.2.20/evt>").is_err());
        assert!(parse_callback("").is_err());
        assert!(parse_callback("http://192.0.2.20/evt").is_err());
    }

    #[test]
    fn event_key_wraps_to_one() {
        let mut key = EventKey::new();
        assert_eq!(key.take(), 0);
        assert_eq!(key.take(), 1);

        let mut key = EventKey(u32::MAX);
        assert_eq!(key.take(), u32::MAX);
        // Après 2³²−1, la clé reboucle sur 1 (0 reste réservé).
        assert_eq!(key.take(), 1);
    }

    #[test]
    fn property_set_round_trip() {
        let changes = vec![("Status".to_string(), "1".to_string())];
        let xml = property_set_xml(&changes).unwrap();
        assert!(xml.contains("<Status>1</Status>"));
        assert!(xml.contains("urn:schemas-upnp-org:event-1-0"));

        let parsed = parse_property_set(xml.as_bytes()).unwrap();
        assert_eq!(parsed, changes);
    }
}
