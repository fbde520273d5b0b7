/// Utilitaires partagés par les crates DomoCore.
///
/// Ce crate regroupe les petites fonctions réseau et système dont les
/// moteurs UPnP ont besoin sans dépendre l'un de l'autre :
///
/// - [`guess_local_ip`] : devine l'adresse IPv4 locale utilisée pour les
///   connexions sortantes (utile pour construire les URLs LOCATION et
///   CALLBACK) ;
/// - [`list_ipv4_interfaces`] : liste les interfaces IPv4 non-loopback ;
/// - [`os_token`] : jeton OS pour l'en-tête SERVER/USER-AGENT.
mod ip_utils;

pub use ip_utils::{guess_local_ip, list_ipv4_interfaces};

/// Retourne le jeton OS au format UPnP (`OS/version`).
///
/// Utilise la crate `os_info` pour obtenir de manière portable les
/// informations sur le système courant.
///
/// # Format
/// - Linux: "Linux/6.5.0"
/// - macOS: "MacOS/15.1"
/// - inconnu: "{OS}/Unknown"
pub fn os_token() -> String {
    let info = os_info::get();
    let os_type = format!("{:?}", info.os_type());

    let version = info.version();
    if version != &os_info::Version::Unknown {
        format!("{}/{}", os_type, version)
    } else {
        format!("{}/Unknown", os_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn os_token_has_slash() {
        let token = os_token();
        assert!(token.contains('/'), "os token must be OS/version: {token}");
        assert!(!token.contains(' '));
    }
}
