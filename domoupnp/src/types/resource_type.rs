//! Type de ressource UPnP (`urn:domaine:kind:nom:version`).

use std::fmt;
use std::str::FromStr;

use crate::errors::UpnpError;

/// Nature d'un type de ressource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Device,
    Service,
}

impl ResourceKind {
    fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Device => "device",
            ResourceKind::Service => "service",
        }
    }
}

/// Type de device ou de service UPnP.
///
/// Forme textuelle : `urn:schemas-upnp-org:device:BinaryLight:1`.
/// L'égalité est sensible à la casse sur scheme/domaine/kind/nom ; la
/// version se compare numériquement.
///
/// Un device de version *v* est compatible avec les requêtes visant une
/// version *v′ ≤ v* du même type (« version downgrade ») : voir
/// [`ResourceType::matches`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceType {
    scheme: String,
    domain: String,
    kind: ResourceKind,
    name: String,
    version: u32,
}

impl ResourceType {
    /// Construit un type ; `version` doit être strictement positive.
    pub fn new(
        domain: impl Into<String>,
        kind: ResourceKind,
        name: impl Into<String>,
        version: u32,
    ) -> Result<Self, UpnpError> {
        if version == 0 {
            return Err(UpnpError::MalformedMessage(
                "resource type version must be >= 1".to_string(),
            ));
        }
        Ok(Self {
            scheme: "urn".to_string(),
            domain: domain.into(),
            kind,
            name: name.into(),
            version,
        })
    }

    /// Raccourci pour les types standards `schemas-upnp-org`.
    pub fn standard(kind: ResourceKind, name: impl Into<String>, version: u32) -> Self {
        Self {
            scheme: "urn".to_string(),
            domain: "schemas-upnp-org".to_string(),
            kind,
            name: name.into(),
            version,
        }
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Même type à la version près.
    pub fn is_same_family(&self, other: &ResourceType) -> bool {
        self.scheme == other.scheme
            && self.domain == other.domain
            && self.kind == other.kind
            && self.name == other.name
    }

    /// `self` (annoncé) satisfait-il une requête pour `requested` ?
    ///
    /// Vrai ssi même famille et `requested.version <= self.version`.
    pub fn matches(&self, requested: &ResourceType) -> bool {
        self.is_same_family(requested) && requested.version <= self.version
    }

    /// Copie du type avec une autre version.
    pub fn with_version(&self, version: u32) -> Self {
        let mut out = self.clone();
        out.version = version;
        out
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}",
            self.scheme,
            self.domain,
            self.kind.as_str(),
            self.name,
            self.version
        )
    }
}

impl FromStr for ResourceType {
    type Err = UpnpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || UpnpError::MalformedMessage(format!("invalid resource type: {s}"));

        // urn:domaine:kind:nom:version — le nom peut contenir des ':'
        // (rare mais permis), on découpe donc depuis les deux extrémités.
        let rest = s.strip_prefix("urn:").ok_or_else(malformed)?;
        let (domain, rest) = rest.split_once(':').ok_or_else(malformed)?;
        let (middle, version) = rest.rsplit_once(':').ok_or_else(malformed)?;
        let (kind, name) = middle.split_once(':').ok_or_else(malformed)?;

        let kind = match kind {
            "device" => ResourceKind::Device,
            "service" => ResourceKind::Service,
            _ => return Err(malformed()),
        };

        let version: u32 = version.parse().map_err(|_| malformed())?;
        if version == 0 || domain.is_empty() || name.is_empty() {
            return Err(malformed());
        }

        Ok(Self {
            scheme: "urn".to_string(),
            domain: domain.to_string(),
            kind,
            name: name.to_string(),
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display_round_trip() {
        let raw = "urn:schemas-upnp-org:device:BinaryLight:1";
        let rt: ResourceType = raw.parse().unwrap();
        assert_eq!(rt.kind(), ResourceKind::Device);
        assert_eq!(rt.name(), "BinaryLight");
        assert_eq!(rt.version(), 1);
        assert_eq!(rt.to_string(), raw);
    }

    #[test]
    fn rejects_bad_forms() {
        assert!("urn:schemas-upnp-org:device:BinaryLight:0"
            .parse::<ResourceType>()
            .is_err());
        assert!("urn:schemas-upnp-org:widget:BinaryLight:1"
            .parse::<ResourceType>()
            .is_err());
        assert!("uuid:schemas-upnp-org:device:BinaryLight:1"
            .parse::<ResourceType>()
            .is_err());
        assert!("urn:device:BinaryLight:1".parse::<ResourceType>().is_err());
    }

    #[test]
    fn version_downgrade_matching() {
        let v2: ResourceType = "urn:schemas-upnp-org:device:BinaryLight:2"
            .parse()
            .unwrap();
        let v1 = v2.with_version(1);
        let v3 = v2.with_version(3);

        // annoncé v2 : satisfait v1 et v2, pas v3
        assert!(v2.matches(&v1));
        assert!(v2.matches(&v2));
        assert!(!v2.matches(&v3));
    }

    #[test]
    fn matching_is_case_sensitive() {
        let a: ResourceType = "urn:schemas-upnp-org:device:BinaryLight:1"
            .parse()
            .unwrap();
        let b: ResourceType = "urn:schemas-upnp-org:device:binarylight:1"
            .parse()
            .unwrap();
        assert!(!a.matches(&b));
    }
}
