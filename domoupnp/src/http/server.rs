//! Serveur HTTP : accepteur TCP + connexions servies par le pool.

use std::io::BufReader;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::errors::UpnpError;

use super::message::{read_request, write_response, HttpError, HttpRequest, HttpResponse};
use super::WorkerPool;

/// Routage d'une requête vers le code applicatif.
///
/// L'implémentation retourne la réponse à émettre (y compris 404/405) ;
/// `Err` est réservé aux conditions fatales pour la connexion — la
/// boucle écrit alors la réponse d'erreur et ferme la socket, sans
/// jamais paniquer à travers la frontière du handler.
pub trait HttpHandler: Send + Sync + 'static {
    fn handle(&self, peer: SocketAddr, request: &HttpRequest) -> Result<HttpResponse, UpnpError>;
}

/// Serveur TCP : un thread accepteur, les connexions vont au pool.
pub struct HttpServer {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
}

impl HttpServer {
    /// Lie `bind`, démarre l'accepteur et sert via `handler`.
    pub fn start(
        bind: SocketAddr,
        handler: Arc<dyn HttpHandler>,
        workers: usize,
        keep_alive: Duration,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(bind)?;
        let local_addr = listener.local_addr()?;
        let running = Arc::new(AtomicBool::new(true));
        let pool = WorkerPool::new("http-worker", workers, workers);

        {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("http-accept".into())
                .spawn(move || {
                    for stream in listener.incoming() {
                        if !running.load(Ordering::SeqCst) {
                            break;
                        }
                        match stream {
                            Ok(stream) => {
                                let handler = Arc::clone(&handler);
                                let running = Arc::clone(&running);
                                pool.submit(move || {
                                    serve_connection(stream, handler, keep_alive, running);
                                });
                            }
                            Err(e) => warn!("❌ Failed to accept connection: {}", e),
                        }
                    }
                })?;
        }

        info!("✅ HTTP server listening on {}", local_addr);
        Ok(Self {
            local_addr,
            running,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Arrêt : la prochaine connexion débloque l'accepteur et le voit
    /// éteint.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let _ = TcpStream::connect(self.local_addr);
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sert une connexion : plusieurs requêtes sur la même socket pendant
/// la fenêtre d'inactivité, puis fermeture explicite.
fn serve_connection(
    stream: TcpStream,
    handler: Arc<dyn HttpHandler>,
    keep_alive: Duration,
    running: Arc<AtomicBool>,
) {
    let peer = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(_) => return,
    };
    debug!("Incoming connection from {}", peer);

    let write_stream = match stream.try_clone() {
        Ok(s) => s,
        Err(e) => {
            warn!("❌ Cannot clone connection socket: {}", e);
            return;
        }
    };
    let mut write_stream = write_stream;
    let mut reader = BufReader::new(stream);

    let opened = Instant::now();
    while running.load(Ordering::SeqCst) && opened.elapsed() < keep_alive {
        let remaining = keep_alive.saturating_sub(opened.elapsed());
        if reader
            .get_ref()
            .set_read_timeout(Some(remaining.max(Duration::from_millis(10))))
            .is_err()
        {
            break;
        }

        let request = match read_request(&mut reader) {
            Ok(request) => request,
            Err(HttpError::Closed) => break,
            Err(e) if e.is_timeout() => break, // fenêtre écoulée
            Err(e) => {
                debug!("Malformed request from {}: {}", peer, e);
                let _ = write_response(&mut write_stream, &bad_request());
                break;
            }
        };

        // UDA : toute requête sans HOST est refusée.
        if request.headers.get("HOST").is_none() {
            let _ = write_response(&mut write_stream, &bad_request());
            break;
        }

        let wants_close = !request.keep_alive();

        match handler.handle(peer, &request) {
            Ok(mut response) => {
                response.headers.set(
                    "CONNECTION",
                    if wants_close { "close" } else { "keep-alive" },
                );
                if write_response(&mut write_stream, &response).is_err() {
                    break;
                }
            }
            Err(e) => {
                // Échec fatal : réponse d'erreur puis fermeture.
                let _ = write_response(&mut write_stream, &error_response(&e));
                break;
            }
        }

        if wants_close {
            break;
        }
    }

    let _ = write_stream.shutdown(std::net::Shutdown::Both);
}

fn bad_request() -> HttpResponse {
    HttpResponse::new(400).with_header("CONNECTION", "close")
}

/// Projette une erreur de la taxonomie sur un statut HTTP.
fn error_response(error: &UpnpError) -> HttpResponse {
    let status = error.http_status();
    debug!("Request failed ({}): {}", status, error);
    HttpResponse::new(status).with_header("CONNECTION", "close")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufReader as IoBufReader, Write};

    struct EchoHandler;

    impl HttpHandler for EchoHandler {
        fn handle(
            &self,
            _peer: SocketAddr,
            request: &HttpRequest,
        ) -> Result<HttpResponse, UpnpError> {
            match request.method.as_str() {
                "GET" => Ok(HttpResponse::ok()
                    .with_body(request.target.clone().into_bytes(), "text/plain")),
                "NOTIFY" => Ok(HttpResponse::ok()),
                _ => Ok(HttpResponse::new(405)),
            }
        }
    }

    fn start_server() -> HttpServer {
        HttpServer::start(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(EchoHandler),
            4,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn serves_get_and_keeps_the_connection() {
        let server = start_server();
        let mut stream = TcpStream::connect(server.local_addr()).unwrap();

        // Deux requêtes sur la même connexion.
        for path in ["/first", "/second"] {
            let request = format!(
                "GET {path} HTTP/1.1\r\nHOST: {}\r\n\r\n",
                server.local_addr()
            );
            stream.write_all(request.as_bytes()).unwrap();
            let mut reader = IoBufReader::new(stream.try_clone().unwrap());
            let response = crate::http::message::read_response(&mut reader, false).unwrap();
            assert_eq!(response.status, 200);
            assert_eq!(response.body, path.as_bytes());
        }
        server.stop();
    }

    #[test]
    fn missing_host_yields_400() {
        let server = start_server();
        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

        let mut reader = IoBufReader::new(stream);
        let response = crate::http::message::read_response(&mut reader, false).unwrap();
        assert_eq!(response.status, 400);
        server.stop();
    }

    #[test]
    fn unknown_method_yields_405() {
        let server = start_server();
        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        stream
            .write_all(format!("BREW / HTTP/1.1\r\nHOST: {}\r\n\r\n", server.local_addr()).as_bytes())
            .unwrap();

        let mut reader = IoBufReader::new(stream);
        let response = crate::http::message::read_response(&mut reader, false).unwrap();
        assert_eq!(response.status, 405);
        server.stop();
    }

    #[test]
    fn custom_methods_are_routed() {
        let server = start_server();
        let mut stream = TcpStream::connect(server.local_addr()).unwrap();
        stream
            .write_all(
                format!(
                    "NOTIFY /evt HTTP/1.1\r\nHOST: {}\r\nCONTENT-LENGTH: 0\r\n\r\n",
                    server.local_addr()
                )
                .as_bytes(),
            )
            .unwrap();

        let mut reader = IoBufReader::new(stream);
        let response = crate::http::message::read_response(&mut reader, false).unwrap();
        assert_eq!(response.status, 200);
        server.stop();
    }
}
