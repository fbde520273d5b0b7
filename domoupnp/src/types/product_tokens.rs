//! Jetons produit des en-têtes SERVER / USER-AGENT.
//!
//! UDA impose trois jetons ordonnés : jeton OS, jeton UPnP (`UPnP/1.x`)
//! et jeton produit. Certains équipements n'en envoient qu'une partie ;
//! la validité « stricte » exige les trois, la validité « souple »
//! seulement le jeton UPnP.

use std::fmt;
use std::str::FromStr;

use crate::errors::UpnpError;

/// Un jeton `nom/version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductToken {
    pub name: String,
    pub version: String,
}

impl ProductToken {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ProductToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}/{}", self.name, self.version)
        }
    }
}

/// Les trois jetons ordonnés d'un en-tête SERVER / USER-AGENT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductTokens {
    os: Option<ProductToken>,
    upnp: Option<ProductToken>,
    product: Option<ProductToken>,
}

impl ProductTokens {
    /// Jetons complets pour nos propres annonces.
    pub fn local(product_name: &str, product_version: &str, minor: u32) -> Self {
        let os = domoutils::os_token();
        let (os_name, os_version) = os.split_once('/').unwrap_or((os.as_str(), ""));
        Self {
            os: Some(ProductToken::new(os_name, os_version)),
            upnp: Some(ProductToken::new("UPnP", format!("1.{minor}"))),
            product: Some(ProductToken::new(product_name, product_version)),
        }
    }

    pub fn os(&self) -> Option<&ProductToken> {
        self.os.as_ref()
    }

    pub fn upnp(&self) -> Option<&ProductToken> {
        self.upnp.as_ref()
    }

    pub fn product(&self) -> Option<&ProductToken> {
        self.product.as_ref()
    }

    /// Validité : stricte = les trois jetons, souple = le jeton UPnP seul.
    pub fn is_valid(&self, strict: bool) -> bool {
        if strict {
            self.os.is_some() && self.upnp.is_some() && self.product.is_some()
        } else {
            self.upnp.is_some()
        }
    }

    /// Version mineure du jeton UPnP (`UPnP/1.1` → 1) ; 0 si absent ou
    /// illisible.
    pub fn upnp_minor_version(&self) -> u32 {
        self.upnp
            .as_ref()
            .and_then(|t| t.version.split_once('.'))
            .and_then(|(major, minor)| {
                if major == "1" {
                    minor.parse().ok()
                } else {
                    None
                }
            })
            .unwrap_or(0)
    }

    /// Le jeton UPnP annonce-t-il une version majeure que nous parlons ?
    pub fn is_supported(&self) -> bool {
        match &self.upnp {
            Some(token) => token.version.starts_with("1."),
            None => true, // jeton absent : on reste souple
        }
    }
}

impl fmt::Display for ProductTokens {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for token in [&self.os, &self.upnp, &self.product].into_iter().flatten() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{token}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for ProductTokens {
    type Err = UpnpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // On découpe sur les espaces ; le jeton UPnP sert d'ancre, tout
        // ce qui précède est le jeton OS, tout ce qui suit le produit.
        // Les jetons OS du style "Linux/5.0 (x86_64)" gardent leurs
        // fragments collés au jeton adjacent.
        let tokens: Vec<&str> = s.split_whitespace().collect();
        if tokens.is_empty() {
            return Err(UpnpError::MalformedMessage(
                "empty product tokens".to_string(),
            ));
        }

        let upnp_pos = tokens.iter().position(|t| {
            let lower = t.to_ascii_lowercase();
            lower.starts_with("upnp/")
        });

        let split_token = |raw: &str| -> ProductToken {
            match raw.split_once('/') {
                Some((name, version)) => ProductToken::new(name, version),
                None => ProductToken::new(raw, ""),
            }
        };

        match upnp_pos {
            Some(pos) => {
                let os = (pos > 0).then(|| split_token(&tokens[..pos].join(" ")));
                let upnp = Some(split_token(tokens[pos]));
                let product =
                    (pos + 1 < tokens.len()).then(|| split_token(&tokens[pos + 1..].join(" ")));
                Ok(Self { os, upnp, product })
            }
            None => Ok(Self {
                os: None,
                upnp: None,
                product: Some(split_token(&tokens.join(" "))),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_tokens() {
        let tokens: ProductTokens = "Linux/6.5 UPnP/1.1 DomoCore/0.1".parse().unwrap();
        assert!(tokens.is_valid(true));
        assert_eq!(tokens.upnp_minor_version(), 1);
        assert_eq!(tokens.os().unwrap().name, "Linux");
        assert_eq!(tokens.product().unwrap().name, "DomoCore");
        assert_eq!(tokens.to_string(), "Linux/6.5 UPnP/1.1 DomoCore/0.1");
    }

    #[test]
    fn lax_validity_requires_only_upnp_token() {
        let tokens: ProductTokens = "UPnP/1.0".parse().unwrap();
        assert!(tokens.is_valid(false));
        assert!(!tokens.is_valid(true));
        assert_eq!(tokens.upnp_minor_version(), 0);
    }

    #[test]
    fn missing_upnp_token_is_lax_invalid() {
        let tokens: ProductTokens = "SomeVendor/2.0".parse().unwrap();
        assert!(!tokens.is_valid(false));
        assert!(tokens.is_supported());
    }

    #[test]
    fn upnp_2_is_unsupported() {
        let tokens: ProductTokens = "Linux/6.5 UPnP/2.0 Thing/1.0".parse().unwrap();
        assert!(!tokens.is_supported());
    }
}
