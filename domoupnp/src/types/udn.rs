//! Unique Device Name (`uuid:…`).

use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use crate::errors::UpnpError;

/// UDN : identité persistante d'un device à travers les redémarrages.
///
/// Forme canonique sur le fil : `uuid:xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Udn(Uuid);

impl Udn {
    /// Génère un UDN aléatoire (v4).
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    /// Forme sans le préfixe `uuid:` (pour les chemins d'URL).
    pub fn simple(&self) -> String {
        self.0.to_string()
    }
}

impl From<Uuid> for Udn {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for Udn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "uuid:{}", self.0)
    }
}

impl FromStr for Udn {
    type Err = UpnpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix("uuid:").unwrap_or(s);
        let uuid = Uuid::parse_str(raw)
            .map_err(|e| UpnpError::MalformedMessage(format!("invalid UDN {s}: {e}")))?;
        Ok(Self(uuid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_with_and_without_prefix() {
        let a: Udn = "uuid:5f9a5c29-8c5d-4c2b-9a4e-7d1f1fbd1001".parse().unwrap();
        let b: Udn = "5f9a5c29-8c5d-4c2b-9a4e-7d1f1fbd1001".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "uuid:5f9a5c29-8c5d-4c2b-9a4e-7d1f1fbd1001");
    }

    #[test]
    fn rejects_garbage() {
        assert!("uuid:not-a-uuid".parse::<Udn>().is_err());
        assert!("".parse::<Udn>().is_err());
    }
}
