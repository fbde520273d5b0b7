//! Codec des datagrammes SSDP.
//!
//! Les cinq variantes du protocole (alive, byebye, update, recherche,
//! réponse de recherche) sont des messages HTTP/1.1 autonomes plafonnés
//! à 2048 octets. Le décodage valide les en-têtes obligatoires de
//! chaque variante ; l'encodage borne `max-age` et `MX`.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::str::FromStr;

use thiserror::Error;
use url::Url;

use crate::errors::UpnpError;
use crate::types::{DiscoveryType, ProductTokens, SearchTarget};

use super::{clamp_max_age, clamp_mx, SSDP_MAX_DATAGRAM, SSDP_MULTICAST_ADDR, SSDP_PORT};

/// Plage de ports valide pour SEARCHPORT.UPNP.ORG.
const SEARCH_PORT_MIN: u16 = 49_152;

/// Erreurs du codec SSDP.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum SsdpError {
    /// Datagramme au-delà de 2048 octets.
    #[error("SSDP datagram of {0} bytes exceeds the 2048 byte cap")]
    Oversize(usize),

    /// En-tête obligatoire absent ou invalide.
    #[error("malformed or missing SSDP header: {0}")]
    MalformedHeader(String),

    /// NTS ou ligne de départ inconnus.
    #[error("unknown SSDP variant: {0}")]
    UnknownVariant(String),

    /// UPnP/1.1 annoncé sans BOOTID/CONFIGID.
    #[error("UPnP/1.1 message without bootId/configId")]
    MissingVersionIds,
}

impl From<SsdpError> for UpnpError {
    fn from(err: SsdpError) -> Self {
        match err {
            SsdpError::MissingVersionIds => UpnpError::UnsupportedVersion(err.to_string()),
            other => UpnpError::MalformedMessage(other.to_string()),
        }
    }
}

/// NOTIFY ssdp:alive.
#[derive(Debug, Clone, PartialEq)]
pub struct Alive {
    pub usn: DiscoveryType,
    pub location: Url,
    pub server: ProductTokens,
    pub max_age: u32,
    pub boot_id: Option<u32>,
    pub config_id: Option<u32>,
    pub search_port: Option<u16>,
}

impl Alive {
    pub fn new(
        usn: DiscoveryType,
        location: Url,
        server: ProductTokens,
        max_age: u32,
        boot_id: Option<u32>,
        config_id: Option<u32>,
        search_port: Option<u16>,
    ) -> Result<Self, SsdpError> {
        check_version_ids(&server, boot_id, config_id)?;
        Ok(Self {
            usn,
            location,
            server,
            max_age: clamp_max_age(max_age),
            boot_id,
            config_id,
            search_port: search_port.filter(|p| *p >= SEARCH_PORT_MIN),
        })
    }
}

/// NOTIFY ssdp:byebye.
#[derive(Debug, Clone, PartialEq)]
pub struct ByeBye {
    pub usn: DiscoveryType,
    pub boot_id: Option<u32>,
    pub config_id: Option<u32>,
}

/// NOTIFY ssdp:update (annonce d'un nextBootId en attente).
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub usn: DiscoveryType,
    pub location: Url,
    pub boot_id: u32,
    pub config_id: u32,
    pub next_boot_id: u32,
    pub search_port: Option<u16>,
}

/// M-SEARCH.
#[derive(Debug, Clone, PartialEq)]
pub struct Search {
    pub target: SearchTarget,
    pub mx: u32,
    pub user_agent: Option<ProductTokens>,
}

impl Search {
    /// `mx` est borné dans [1, 5] dès la construction.
    pub fn new(target: SearchTarget, mx: u32, user_agent: Option<ProductTokens>) -> Self {
        Self {
            target,
            mx: clamp_mx(mx),
            user_agent,
        }
    }
}

/// Réponse unicast 200 OK à un M-SEARCH.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub st: SearchTarget,
    pub usn: DiscoveryType,
    pub location: Url,
    pub server: ProductTokens,
    pub max_age: u32,
    pub date: String,
    pub boot_id: Option<u32>,
    pub config_id: Option<u32>,
    pub search_port: Option<u16>,
}

impl SearchResponse {
    pub fn new(
        st: SearchTarget,
        usn: DiscoveryType,
        location: Url,
        server: ProductTokens,
        max_age: u32,
        boot_id: Option<u32>,
        config_id: Option<u32>,
    ) -> Result<Self, SsdpError> {
        check_version_ids(&server, boot_id, config_id)?;
        Ok(Self {
            st,
            usn,
            location,
            server,
            max_age: clamp_max_age(max_age),
            date: http_date(),
            boot_id,
            config_id,
            search_port: None,
        })
    }
}

/// Un datagramme SSDP décodé.
#[derive(Debug, Clone, PartialEq)]
pub enum SsdpMessage {
    Alive(Alive),
    ByeBye(ByeBye),
    Update(Update),
    Search(Search),
    Response(SearchResponse),
}

impl SsdpMessage {
    /// Encode le datagramme, en-têtes dans l'ordre d'UDA.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(512);
        match self {
            SsdpMessage::Alive(m) => {
                out.push_str("NOTIFY * HTTP/1.1\r\n");
                header(&mut out, "HOST", format_args!("{SSDP_MULTICAST_ADDR}:{SSDP_PORT}"));
                header(&mut out, "CACHE-CONTROL", format_args!("max-age={}", m.max_age));
                header(&mut out, "LOCATION", format_args!("{}", m.location));
                header(&mut out, "NT", format_args!("{}", m.usn.without_udn()));
                header(&mut out, "NTS", format_args!("ssdp:alive"));
                header(&mut out, "SERVER", format_args!("{}", m.server));
                header(&mut out, "USN", format_args!("{}", m.usn));
                version_headers(&mut out, m.boot_id, m.config_id, None, m.search_port);
            }
            SsdpMessage::ByeBye(m) => {
                out.push_str("NOTIFY * HTTP/1.1\r\n");
                header(&mut out, "HOST", format_args!("{SSDP_MULTICAST_ADDR}:{SSDP_PORT}"));
                header(&mut out, "NT", format_args!("{}", m.usn.without_udn()));
                header(&mut out, "NTS", format_args!("ssdp:byebye"));
                header(&mut out, "USN", format_args!("{}", m.usn));
                version_headers(&mut out, m.boot_id, m.config_id, None, None);
            }
            SsdpMessage::Update(m) => {
                out.push_str("NOTIFY * HTTP/1.1\r\n");
                header(&mut out, "HOST", format_args!("{SSDP_MULTICAST_ADDR}:{SSDP_PORT}"));
                header(&mut out, "LOCATION", format_args!("{}", m.location));
                header(&mut out, "NT", format_args!("{}", m.usn.without_udn()));
                header(&mut out, "NTS", format_args!("ssdp:update"));
                header(&mut out, "USN", format_args!("{}", m.usn));
                version_headers(
                    &mut out,
                    Some(m.boot_id),
                    Some(m.config_id),
                    Some(m.next_boot_id),
                    m.search_port,
                );
            }
            SsdpMessage::Search(m) => {
                out.push_str("M-SEARCH * HTTP/1.1\r\n");
                header(&mut out, "HOST", format_args!("{SSDP_MULTICAST_ADDR}:{SSDP_PORT}"));
                header(&mut out, "MAN", format_args!("\"ssdp:discover\""));
                header(&mut out, "MX", format_args!("{}", clamp_mx(m.mx)));
                header(&mut out, "ST", format_args!("{}", m.target));
                if let Some(agent) = &m.user_agent {
                    header(&mut out, "USER-AGENT", format_args!("{agent}"));
                }
            }
            SsdpMessage::Response(m) => {
                out.push_str("HTTP/1.1 200 OK\r\n");
                header(&mut out, "CACHE-CONTROL", format_args!("max-age={}", m.max_age));
                header(&mut out, "DATE", format_args!("{}", m.date));
                header(&mut out, "EXT", format_args!(""));
                header(&mut out, "LOCATION", format_args!("{}", m.location));
                header(&mut out, "SERVER", format_args!("{}", m.server));
                header(&mut out, "ST", format_args!("{}", m.st));
                header(&mut out, "USN", format_args!("{}", m.usn));
                version_headers(&mut out, m.boot_id, m.config_id, None, m.search_port);
            }
        }
        out.push_str("\r\n");
        out
    }

    /// Décode un datagramme brut.
    pub fn decode(data: &[u8]) -> Result<SsdpMessage, SsdpError> {
        if data.len() > SSDP_MAX_DATAGRAM {
            return Err(SsdpError::Oversize(data.len()));
        }
        let text = std::str::from_utf8(data)
            .map_err(|_| SsdpError::MalformedHeader("datagram is not UTF-8".to_string()))?;

        let mut lines = text.lines();
        let start = lines
            .next()
            .ok_or_else(|| SsdpError::MalformedHeader("empty datagram".to_string()))?
            .trim();
        let headers = parse_headers(lines);

        match start {
            "NOTIFY * HTTP/1.1" => decode_notify(&headers),
            "M-SEARCH * HTTP/1.1" => decode_search(&headers),
            "HTTP/1.1 200 OK" => decode_response(&headers),
            other => Err(SsdpError::UnknownVariant(other.to_string())),
        }
    }
}

fn header(out: &mut String, name: &str, value: std::fmt::Arguments) {
    let _ = write!(out, "{name}: {value}\r\n");
}

fn version_headers(
    out: &mut String,
    boot_id: Option<u32>,
    config_id: Option<u32>,
    next_boot_id: Option<u32>,
    search_port: Option<u16>,
) {
    if let Some(id) = boot_id {
        header(out, "BOOTID.UPNP.ORG", format_args!("{id}"));
    }
    if let Some(id) = config_id {
        header(out, "CONFIGID.UPNP.ORG", format_args!("{id}"));
    }
    if let Some(id) = next_boot_id {
        header(out, "NEXTBOOTID.UPNP.ORG", format_args!("{id}"));
    }
    if let Some(port) = search_port {
        header(out, "SEARCHPORT.UPNP.ORG", format_args!("{port}"));
    }
}

fn parse_headers<'a, I>(lines: I) -> HashMap<String, String>
where
    I: Iterator<Item = &'a str>,
{
    let mut headers = HashMap::new();
    for line in lines {
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        // Découpe sur le premier ':' seulement, les valeurs peuvent en
        // contenir (URLs, USN).
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_uppercase(), value.trim().to_string());
        }
    }
    headers
}

fn required<'a>(
    headers: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, SsdpError> {
    headers
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| SsdpError::MalformedHeader(name.to_string()))
}

fn parse_field<T: FromStr>(raw: &str, name: &str) -> Result<T, SsdpError> {
    raw.parse::<T>()
        .map_err(|_| SsdpError::MalformedHeader(name.to_string()))
}

fn parse_max_age(raw: &str) -> Result<u32, SsdpError> {
    let lower = raw.to_ascii_lowercase();
    let idx = lower
        .find("max-age")
        .ok_or_else(|| SsdpError::MalformedHeader("CACHE-CONTROL".to_string()))?;
    let after = lower[idx + "max-age".len()..]
        .trim_start()
        .trim_start_matches('=')
        .trim_start();
    let digits: String = after.chars().take_while(char::is_ascii_digit).collect();
    let value: u32 = digits
        .parse()
        .map_err(|_| SsdpError::MalformedHeader("CACHE-CONTROL".to_string()))?;
    Ok(clamp_max_age(value))
}

fn opt_u32(headers: &HashMap<String, String>, name: &str) -> Result<Option<u32>, SsdpError> {
    match headers.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u32>()
            .map(Some)
            .map_err(|_| SsdpError::MalformedHeader(name.to_string())),
    }
}

fn opt_search_port(headers: &HashMap<String, String>) -> Option<u16> {
    headers
        .get("SEARCHPORT.UPNP.ORG")
        .and_then(|raw| raw.trim().parse::<u16>().ok())
        .filter(|p| *p >= SEARCH_PORT_MIN)
}

fn check_version_ids(
    server: &ProductTokens,
    boot_id: Option<u32>,
    config_id: Option<u32>,
) -> Result<(), SsdpError> {
    if server.upnp_minor_version() > 0 && (boot_id.is_none() || config_id.is_none()) {
        return Err(SsdpError::MissingVersionIds);
    }
    Ok(())
}

fn decode_notify(headers: &HashMap<String, String>) -> Result<SsdpMessage, SsdpError> {
    required(headers, "HOST")?;
    let nts = required(headers, "NTS")?;
    let usn: DiscoveryType = parse_field(required(headers, "USN")?, "USN")?;
    required(headers, "NT")?;

    match nts {
        "ssdp:alive" => {
            let location: Url = parse_field(required(headers, "LOCATION")?, "LOCATION")?;
            let server: ProductTokens = parse_field(required(headers, "SERVER")?, "SERVER")?;
            let max_age = parse_max_age(required(headers, "CACHE-CONTROL")?)?;
            let boot_id = opt_u32(headers, "BOOTID.UPNP.ORG")?;
            let config_id = opt_u32(headers, "CONFIGID.UPNP.ORG")?;
            check_version_ids(&server, boot_id, config_id)?;
            Ok(SsdpMessage::Alive(Alive {
                usn,
                location,
                server,
                max_age,
                boot_id,
                config_id,
                search_port: opt_search_port(headers),
            }))
        }
        "ssdp:byebye" => Ok(SsdpMessage::ByeBye(ByeBye {
            usn,
            boot_id: opt_u32(headers, "BOOTID.UPNP.ORG")?,
            config_id: opt_u32(headers, "CONFIGID.UPNP.ORG")?,
        })),
        "ssdp:update" => {
            let location: Url = parse_field(required(headers, "LOCATION")?, "LOCATION")?;
            let boot_id: u32 =
                parse_field(required(headers, "BOOTID.UPNP.ORG")?, "BOOTID.UPNP.ORG")?;
            let config_id: u32 =
                parse_field(required(headers, "CONFIGID.UPNP.ORG")?, "CONFIGID.UPNP.ORG")?;
            let next_boot_id: u32 = parse_field(
                required(headers, "NEXTBOOTID.UPNP.ORG")?,
                "NEXTBOOTID.UPNP.ORG",
            )?;
            Ok(SsdpMessage::Update(Update {
                usn,
                location,
                boot_id,
                config_id,
                next_boot_id,
                search_port: opt_search_port(headers),
            }))
        }
        other => Err(SsdpError::UnknownVariant(other.to_string())),
    }
}

fn decode_search(headers: &HashMap<String, String>) -> Result<SsdpMessage, SsdpError> {
    required(headers, "HOST")?;
    let man = required(headers, "MAN")?;
    if man.trim_matches('"') != "ssdp:discover" {
        return Err(SsdpError::MalformedHeader("MAN".to_string()));
    }
    let mx: u32 = parse_field(required(headers, "MX")?, "MX")?;
    let target: SearchTarget = parse_field(required(headers, "ST")?, "ST")?;
    let user_agent = match headers.get("USER-AGENT") {
        Some(raw) => Some(parse_field(raw, "USER-AGENT")?),
        None => None,
    };
    Ok(SsdpMessage::Search(Search::new(target, mx, user_agent)))
}

fn decode_response(headers: &HashMap<String, String>) -> Result<SsdpMessage, SsdpError> {
    if !headers.contains_key("EXT") {
        return Err(SsdpError::MalformedHeader("EXT".to_string()));
    }
    let max_age = parse_max_age(required(headers, "CACHE-CONTROL")?)?;
    let date = required(headers, "DATE")?.to_string();
    let location: Url = parse_field(required(headers, "LOCATION")?, "LOCATION")?;
    let server: ProductTokens = parse_field(required(headers, "SERVER")?, "SERVER")?;
    let st: SearchTarget = parse_field(required(headers, "ST")?, "ST")?;
    let usn: DiscoveryType = parse_field(required(headers, "USN")?, "USN")?;
    let boot_id = opt_u32(headers, "BOOTID.UPNP.ORG")?;
    let config_id = opt_u32(headers, "CONFIGID.UPNP.ORG")?;
    check_version_ids(&server, boot_id, config_id)?;
    Ok(SsdpMessage::Response(SearchResponse {
        st,
        usn,
        location,
        server,
        max_age,
        date,
        boot_id,
        config_id,
        search_port: opt_search_port(headers),
    }))
}

/// Date HTTP courante (RFC 1123).
pub fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const UDN: &str = "uuid:aaaaaaaa-1111-2222-3333-444444444444";

    fn usn_root() -> DiscoveryType {
        format!("{UDN}::upnp:rootdevice").parse().unwrap()
    }

    fn location() -> Url {
        Url::parse("http://192.0.2.10:4932/device/desc.xml").unwrap()
    }

    fn tokens_11() -> ProductTokens {
        "Linux/6.5 UPnP/1.1 DomoCore/0.1".parse().unwrap()
    }

    fn tokens_10() -> ProductTokens {
        "Linux/6.5 UPnP/1.0 DomoCore/0.1".parse().unwrap()
    }

    #[test]
    fn alive_round_trip() {
        let msg = SsdpMessage::Alive(
            Alive::new(
                usn_root(),
                location(),
                tokens_11(),
                1800,
                Some(1),
                Some(7),
                Some(50_000),
            )
            .unwrap(),
        );
        let encoded = msg.encode();
        assert!(encoded.contains("NTS: ssdp:alive\r\n"));
        assert!(encoded.contains("BOOTID.UPNP.ORG: 1\r\n"));
        assert_eq!(SsdpMessage::decode(encoded.as_bytes()).unwrap(), msg);
    }

    #[test]
    fn byebye_round_trip() {
        let msg = SsdpMessage::ByeBye(ByeBye {
            usn: usn_root(),
            boot_id: Some(1),
            config_id: Some(7),
        });
        let encoded = msg.encode();
        assert!(encoded.contains("NTS: ssdp:byebye\r\n"));
        assert!(!encoded.contains("LOCATION"));
        assert_eq!(SsdpMessage::decode(encoded.as_bytes()).unwrap(), msg);
    }

    #[test]
    fn update_round_trip() {
        let msg = SsdpMessage::Update(Update {
            usn: usn_root(),
            location: location(),
            boot_id: 1,
            config_id: 7,
            next_boot_id: 2,
            search_port: None,
        });
        let encoded = msg.encode();
        assert!(encoded.contains("NEXTBOOTID.UPNP.ORG: 2\r\n"));
        assert_eq!(SsdpMessage::decode(encoded.as_bytes()).unwrap(), msg);
    }

    #[test]
    fn search_round_trip_and_mx_clamp() {
        let msg = SsdpMessage::Search(Search::new(
            "urn:schemas-upnp-org:device:BinaryLight:1".parse().unwrap(),
            120,
            Some(tokens_11()),
        ));
        let encoded = msg.encode();
        assert!(encoded.contains("MX: 5\r\n"));
        assert!(encoded.contains("MAN: \"ssdp:discover\"\r\n"));
        assert_eq!(SsdpMessage::decode(encoded.as_bytes()).unwrap(), msg);
    }

    #[test]
    fn response_round_trip() {
        let msg = SsdpMessage::Response(
            SearchResponse::new(
                "ssdp:all".parse().unwrap(),
                usn_root(),
                location(),
                tokens_11(),
                1800,
                Some(1),
                Some(7),
            )
            .unwrap(),
        );
        let encoded = msg.encode();
        assert!(encoded.contains("EXT: \r\n"));
        assert_eq!(SsdpMessage::decode(encoded.as_bytes()).unwrap(), msg);
    }

    #[test]
    fn oversize_datagram_is_rejected() {
        let data = vec![b'x'; SSDP_MAX_DATAGRAM + 1];
        assert_eq!(
            SsdpMessage::decode(&data),
            Err(SsdpError::Oversize(SSDP_MAX_DATAGRAM + 1))
        );
    }

    #[test]
    fn missing_mandatory_header_is_rejected() {
        let raw = "NOTIFY * HTTP/1.1\r\n\
                   HOST: 239.255.255.250:1900\r\n\
                   NT: upnp:rootdevice\r\n\
                   NTS: ssdp:alive\r\n\
                   USN: uuid:aaaaaaaa-1111-2222-3333-444444444444::upnp:rootdevice\r\n\
                   \r\n";
        assert_eq!(
            SsdpMessage::decode(raw.as_bytes()),
            Err(SsdpError::MalformedHeader("LOCATION".to_string()))
        );
    }

    #[test]
    fn unknown_nts_is_rejected() {
        let raw = "NOTIFY * HTTP/1.1\r\n\
                   HOST: 239.255.255.250:1900\r\n\
                   NT: upnp:rootdevice\r\n\
                   NTS: ssdp:gone\r\n\
                   USN: uuid:aaaaaaaa-1111-2222-3333-444444444444::upnp:rootdevice\r\n\
                   \r\n";
        assert_eq!(
            SsdpMessage::decode(raw.as_bytes()),
            Err(SsdpError::UnknownVariant("ssdp:gone".to_string()))
        );
    }

    #[test]
    fn upnp_11_without_version_ids_is_rejected() {
        let alive = Alive::new(usn_root(), location(), tokens_11(), 1800, None, None, None);
        assert_eq!(alive.unwrap_err(), SsdpError::MissingVersionIds);

        // UPnP/1.0 : les identifiants de version ne sont pas exigés.
        assert!(Alive::new(usn_root(), location(), tokens_10(), 1800, None, None, None).is_ok());
    }

    #[test]
    fn max_age_is_clamped_on_build() {
        let alive = Alive::new(usn_root(), location(), tokens_10(), 2, None, None, None).unwrap();
        assert_eq!(alive.max_age, 5);
        let alive =
            Alive::new(usn_root(), location(), tokens_10(), 999_999, None, None, None).unwrap();
        assert_eq!(alive.max_age, 86_400);
    }

    #[test]
    fn search_port_out_of_range_is_dropped() {
        let alive = Alive::new(
            usn_root(),
            location(),
            tokens_11(),
            1800,
            Some(1),
            Some(1),
            Some(80),
        )
        .unwrap();
        assert_eq!(alive.search_port, None);
    }

    #[test]
    fn inbound_mx_above_five_is_clamped() {
        let raw = "M-SEARCH * HTTP/1.1\r\n\
                   HOST: 239.255.255.250:1900\r\n\
                   MAN: \"ssdp:discover\"\r\n\
                   MX: 30\r\n\
                   ST: ssdp:all\r\n\
                   \r\n";
        match SsdpMessage::decode(raw.as_bytes()).unwrap() {
            SsdpMessage::Search(s) => assert_eq!(s.mx, 5),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
