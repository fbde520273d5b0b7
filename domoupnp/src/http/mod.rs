//! # Module HTTP - transport TCP du runtime
//!
//! Petit transport HTTP/1.1 taillé pour UPnP : le serveur doit router
//! des méthodes hors vocabulaire web (`NOTIFY`, `SUBSCRIBE`,
//! `UNSUBSCRIBE`, `POST` + `SOAPACTION`) et le client doit émettre ces
//! mêmes méthodes vers les devices du réseau.
//!
//! ## Architecture
//!
//! - [`message`] : framing requête/réponse, chunked, keep-alive ;
//! - [`WorkerPool`] : pool borné de threads pour le travail bloquant ;
//! - [`HttpServer`] : accepteur TCP + connexions servies par le pool ;
//! - [`HttpClient`] : envois asynchrones (job + callback) avec cache de
//!   connexions par endpoint.

pub mod message;

mod client;
mod pool;
mod server;

pub use client::HttpClient;
pub use message::{HttpError, HttpRequest, HttpResponse};
pub use pool::WorkerPool;
pub use server::{HttpHandler, HttpServer};

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use url::Url;

/// Taille du pool de workers par défaut.
pub const DEFAULT_WORKERS: usize = 100;

/// Fenêtre d'inactivité par connexion serveur.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Échéance par défaut des opérations client (action, souscription,
/// récupération de description).
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

/// Résout l'endpoint TCP (ip, port) d'une URL HTTP.
pub fn endpoint_of(url: &Url) -> Option<SocketAddr> {
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    (host, port).to_socket_addrs().ok()?.next()
}

/// Construit une requête vers `url` : cible chemin+query, en-tête HOST.
pub fn request_for(method: &str, url: &Url) -> HttpRequest {
    let mut target = url.path().to_string();
    if let Some(query) = url.query() {
        target.push('?');
        target.push_str(query);
    }
    let host = match url.port() {
        Some(port) => format!("{}:{}", url.host_str().unwrap_or_default(), port),
        None => url.host_str().unwrap_or_default().to_string(),
    };
    HttpRequest::new(method, target).with_header("HOST", host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_for_builds_target_and_host() {
        let url = Url::parse("http://192.0.2.10:4932/device/x/desc.xml?v=1").unwrap();
        let request = request_for("GET", &url);
        assert_eq!(request.target, "/device/x/desc.xml?v=1");
        assert_eq!(request.headers.get("HOST"), Some("192.0.2.10:4932"));

        assert_eq!(
            endpoint_of(&url),
            Some("192.0.2.10:4932".parse().unwrap())
        );
    }
}
