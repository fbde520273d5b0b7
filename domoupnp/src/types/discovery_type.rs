//! Variante taguée projetée en USN / NT / ST sur le fil SSDP.

use std::fmt;
use std::str::FromStr;

use crate::errors::UpnpError;

use super::{ResourceType, Udn};

/// Type de découverte UPnP.
///
/// Sur le fil, un USN est la projection `uuid:<udn>[::<suffixe>]` d'une
/// de ces variantes ; un NT/ST peut porter la même variante sans UDN
/// (`upnp:rootdevice`, `urn:…`). Le code interne transporte la variante
/// plus l'UDN optionnel plutôt que des chaînes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DiscoveryType {
    /// `upnp:rootdevice`, éventuellement rattaché à un UDN.
    RootDevice(Option<Udn>),
    /// `uuid:<udn>` : un device précis.
    SpecificDevice(Udn),
    /// Type de device, éventuellement rattaché à un UDN.
    DeviceType(Option<Udn>, ResourceType),
    /// Type de service, éventuellement rattaché à un UDN.
    ServiceType(Option<Udn>, ResourceType),
    /// Valeur inconnue, conservée pour le diagnostic.
    Undefined(String),
}

impl DiscoveryType {
    pub fn udn(&self) -> Option<&Udn> {
        match self {
            DiscoveryType::RootDevice(udn) => udn.as_ref(),
            DiscoveryType::SpecificDevice(udn) => Some(udn),
            DiscoveryType::DeviceType(udn, _) => udn.as_ref(),
            DiscoveryType::ServiceType(udn, _) => udn.as_ref(),
            DiscoveryType::Undefined(_) => None,
        }
    }

    pub fn resource_type(&self) -> Option<&ResourceType> {
        match self {
            DiscoveryType::DeviceType(_, rt) | DiscoveryType::ServiceType(_, rt) => Some(rt),
            _ => None,
        }
    }

    /// La même variante, détachée de son UDN (forme NT/ST).
    pub fn without_udn(&self) -> DiscoveryType {
        match self {
            DiscoveryType::RootDevice(_) => DiscoveryType::RootDevice(None),
            DiscoveryType::SpecificDevice(udn) => DiscoveryType::SpecificDevice(udn.clone()),
            DiscoveryType::DeviceType(_, rt) => DiscoveryType::DeviceType(None, rt.clone()),
            DiscoveryType::ServiceType(_, rt) => DiscoveryType::ServiceType(None, rt.clone()),
            DiscoveryType::Undefined(s) => DiscoveryType::Undefined(s.clone()),
        }
    }
}

impl fmt::Display for DiscoveryType {
    /// Projection fil : USN si un UDN est attaché, NT/ST sinon.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DiscoveryType::RootDevice(Some(udn)) => write!(f, "{udn}::upnp:rootdevice"),
            DiscoveryType::RootDevice(None) => write!(f, "upnp:rootdevice"),
            DiscoveryType::SpecificDevice(udn) => write!(f, "{udn}"),
            DiscoveryType::DeviceType(Some(udn), rt) => write!(f, "{udn}::{rt}"),
            DiscoveryType::DeviceType(None, rt) => write!(f, "{rt}"),
            DiscoveryType::ServiceType(Some(udn), rt) => write!(f, "{udn}::{rt}"),
            DiscoveryType::ServiceType(None, rt) => write!(f, "{rt}"),
            DiscoveryType::Undefined(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for DiscoveryType {
    type Err = UpnpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(UpnpError::MalformedMessage("empty discovery type".into()));
        }

        if s == "upnp:rootdevice" {
            return Ok(DiscoveryType::RootDevice(None));
        }

        if let Some(rest) = s.strip_prefix("uuid:") {
            return match rest.split_once("::") {
                None => Ok(DiscoveryType::SpecificDevice(s.parse()?)),
                Some((udn, suffix)) => {
                    let udn: Udn = udn.parse()?;
                    if suffix == "upnp:rootdevice" {
                        Ok(DiscoveryType::RootDevice(Some(udn)))
                    } else {
                        Ok(attach(suffix.parse()?, udn))
                    }
                }
            };
        }

        if s.starts_with("urn:") {
            let rt: ResourceType = s.parse()?;
            return Ok(match rt.kind() {
                super::ResourceKind::Device => DiscoveryType::DeviceType(None, rt),
                super::ResourceKind::Service => DiscoveryType::ServiceType(None, rt),
            });
        }

        Ok(DiscoveryType::Undefined(s.to_string()))
    }
}

fn attach(ty: DiscoveryType, udn: Udn) -> DiscoveryType {
    match ty {
        DiscoveryType::DeviceType(_, rt) => DiscoveryType::DeviceType(Some(udn), rt),
        DiscoveryType::ServiceType(_, rt) => DiscoveryType::ServiceType(Some(udn), rt),
        other => other,
    }
}

/// Cible ST d'un M-SEARCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchTarget {
    /// `ssdp:all` : toutes les ressources.
    All,
    /// Une cible précise.
    Single(DiscoveryType),
}

impl SearchTarget {
    /// La cible couvre-t-elle l'USN annoncé `usn` ?
    ///
    /// Les types de device/service s'apparient avec compatibilité
    /// descendante : un ST en version v matche un USN en version w ≥ v.
    pub fn covers(&self, usn: &DiscoveryType) -> bool {
        let wanted = match self {
            SearchTarget::All => return !matches!(usn, DiscoveryType::Undefined(_)),
            SearchTarget::Single(t) => t,
        };

        match (wanted, usn) {
            (DiscoveryType::RootDevice(_), DiscoveryType::RootDevice(_)) => true,
            (DiscoveryType::SpecificDevice(a), DiscoveryType::SpecificDevice(b)) => a == b,
            (DiscoveryType::DeviceType(_, want), DiscoveryType::DeviceType(_, have)) => {
                have.matches(want)
            }
            (DiscoveryType::ServiceType(_, want), DiscoveryType::ServiceType(_, have)) => {
                have.matches(want)
            }
            _ => false,
        }
    }
}

impl fmt::Display for SearchTarget {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SearchTarget::All => write!(f, "ssdp:all"),
            SearchTarget::Single(t) => write!(f, "{t}"),
        }
    }
}

impl FromStr for SearchTarget {
    type Err = UpnpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim() == "ssdp:all" {
            Ok(SearchTarget::All)
        } else {
            Ok(SearchTarget::Single(s.parse()?))
        }
    }
}
