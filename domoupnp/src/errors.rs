//! Taxonomie d'erreurs publique du runtime UPnP.
//!
//! Tous les transports (SSDP, HTTP, SOAP, GENA) convergent vers
//! [`UpnpError`] à la frontière de l'API. Les erreurs internes de chaque
//! sous-système (`SsdpError`, `HttpError`, …) vivent dans leurs modules
//! et se convertissent ici.

use std::time::Duration;

use thiserror::Error;

/// Erreur UPnP telle qu'exposée aux consommateurs de l'API.
#[derive(Error, Debug)]
pub enum UpnpError {
    /// En-tête ou enveloppe invalide.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Version UPnP annoncée inconnue.
    #[error("unsupported UPnP version: {0}")]
    UnsupportedVersion(String),

    /// Nom ou type d'argument SOAP invalide (UPnPError 402/600).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// L'action a échoué côté device (UPnPError 501).
    #[error("action failed: {0}")]
    ActionFailed(String),

    /// Action refusée (UPnPError 401).
    #[error("action not authorized: {0}")]
    ActionNotAuthorized(String),

    /// SID inconnu, CALLBACK manquant, … (GENA 412).
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// URL sans device/service correspondant (HTTP 404).
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Échec TCP/UDP avant qu'une réponse n'ait pu être décodée.
    #[error("transport error: {0}")]
    TransportError(String),

    /// Délai dépassé.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Erreur interne (mappée en 501 sur le fil).
    #[error("internal error: {0}")]
    Internal(String),
}

impl UpnpError {
    /// Mappe un code UPnPError du fil vers la taxonomie.
    pub fn from_upnp_code(code: u32, description: &str) -> Self {
        let text = format!("{code}: {description}");
        match code {
            401 => UpnpError::ActionNotAuthorized(text),
            402 | 600 | 601 | 605 => UpnpError::InvalidArgument(text),
            _ => UpnpError::ActionFailed(text),
        }
    }

    /// Code UPnPError à émettre pour cette erreur dans un SOAP Fault.
    pub fn upnp_code(&self) -> u32 {
        match self {
            UpnpError::ActionNotAuthorized(_) => 401,
            UpnpError::InvalidArgument(_) => 402,
            _ => 501,
        }
    }

    /// Statut HTTP à émettre pour cette erreur.
    pub fn http_status(&self) -> u16 {
        match self {
            UpnpError::MalformedMessage(_) => 400,
            UpnpError::ResourceNotFound(_) => 404,
            UpnpError::PreconditionFailed(_) => 412,
            UpnpError::InvalidArgument(_)
            | UpnpError::ActionFailed(_)
            | UpnpError::ActionNotAuthorized(_)
            | UpnpError::Internal(_) => 500,
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upnp_code_mapping_round() {
        assert!(matches!(
            UpnpError::from_upnp_code(401, "x"),
            UpnpError::ActionNotAuthorized(_)
        ));
        assert!(matches!(
            UpnpError::from_upnp_code(402, "x"),
            UpnpError::InvalidArgument(_)
        ));
        assert!(matches!(
            UpnpError::from_upnp_code(600, "x"),
            UpnpError::InvalidArgument(_)
        ));
        assert!(matches!(
            UpnpError::from_upnp_code(501, "x"),
            UpnpError::ActionFailed(_)
        ));
        assert!(matches!(
            UpnpError::from_upnp_code(714, "no such object"),
            UpnpError::ActionFailed(_)
        ));
    }

    #[test]
    fn http_status_follows_taxonomy() {
        assert_eq!(UpnpError::MalformedMessage("x".into()).http_status(), 400);
        assert_eq!(UpnpError::ResourceNotFound("x".into()).http_status(), 404);
        assert_eq!(UpnpError::PreconditionFailed("x".into()).http_status(), 412);
    }
}
