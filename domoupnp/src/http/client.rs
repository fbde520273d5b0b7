//! Client HTTP asynchrone avec cache de connexions.
//!
//! L'envoi est un job (requête + callback) poussé vers le pool du
//! client ; l'API synchrone est un submit-and-await par canal. Le cache
//! garde au plus une connexion par endpoint (ip, port) ; une connexion
//! en cours d'utilisation est retirée du cache, puis remise si la
//! réponse autorise le keep-alive. Toute erreur d'E/S jette la
//! connexion et remonte en `TransportError` ; le client ne réessaie
//! jamais, la politique de reprise appartient à l'appelant.

use std::collections::HashMap;
use std::io::BufReader;
use std::net::{SocketAddr, TcpStream};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;
use tracing::{debug, warn};

use crate::errors::UpnpError;

use super::message::{read_response, write_request, HttpError, HttpRequest, HttpResponse};
use super::WorkerPool;

type Callback = Box<dyn FnOnce(Result<HttpResponse, UpnpError>) + Send + 'static>;

/// Cache de connexions : une entrée par endpoint, possession unique
/// (la connexion est extraite le temps de l'échange).
type ConnectionCache = Arc<Mutex<HashMap<SocketAddr, TcpStream>>>;

/// Client HTTP du runtime.
#[derive(Clone)]
pub struct HttpClient {
    pool: WorkerPool,
    cache: ConnectionCache,
}

impl HttpClient {
    pub fn new(workers: usize) -> Self {
        Self {
            pool: WorkerPool::new("http-client", workers, workers * 4),
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Envoi asynchrone : la requête part dès qu'un worker est libre,
    /// `callback` reçoit le résultat.
    pub fn submit(
        &self,
        endpoint: SocketAddr,
        request: HttpRequest,
        deadline: Duration,
        callback: impl FnOnce(Result<HttpResponse, UpnpError>) + Send + 'static,
    ) {
        let cache = Arc::clone(&self.cache);
        let callback: Callback = Box::new(callback);
        self.pool.submit(move || {
            let result = perform(&cache, endpoint, &request, deadline);
            callback(result);
        });
    }

    /// Envoi synchrone : submit-and-await au-dessus du canal.
    pub fn send(
        &self,
        endpoint: SocketAddr,
        request: HttpRequest,
        deadline: Duration,
    ) -> Result<HttpResponse, UpnpError> {
        let (tx, rx) = bounded(1);
        self.submit(endpoint, request, deadline, move |result| {
            let _ = tx.send(result);
        });
        rx.recv()
            .map_err(|_| UpnpError::Internal("http client worker vanished".to_string()))?
    }
}

/// Un échange requête/réponse complet sur une connexion du cache.
fn perform(
    cache: &ConnectionCache,
    endpoint: SocketAddr,
    request: &HttpRequest,
    deadline: Duration,
) -> Result<HttpResponse, UpnpError> {
    let started = Instant::now();

    let cached = cache.lock().unwrap().remove(&endpoint);
    let reused = cached.is_some();
    let mut stream = match cached {
        Some(stream) => stream,
        None => TcpStream::connect_timeout(&endpoint, remaining(started, deadline)?)
            .map_err(|e| transport(endpoint, "connect", e))?,
    };
    if reused {
        debug!("Reusing cached connection to {}", endpoint);
    }

    stream
        .set_write_timeout(Some(remaining(started, deadline)?))
        .map_err(|e| transport(endpoint, "configure", e))?;
    write_request(&mut stream, request).map_err(|e| io_error(endpoint, started, deadline, e))?;

    stream
        .set_read_timeout(Some(remaining(started, deadline)?))
        .map_err(|e| transport(endpoint, "configure", e))?;
    let mut reader = BufReader::new(
        stream
            .try_clone()
            .map_err(|e| transport(endpoint, "clone", e))?,
    );
    let head = request.method.eq_ignore_ascii_case("HEAD");
    let response = match read_response(&mut reader, head) {
        Ok(response) => response,
        Err(HttpError::Io(e)) => return Err(io_error(endpoint, started, deadline, e)),
        Err(HttpError::Closed) => {
            return Err(UpnpError::TransportError(format!(
                "{endpoint} closed the connection before responding"
            )));
        }
        Err(e) => {
            return Err(UpnpError::MalformedMessage(format!(
                "invalid response from {endpoint}: {e}"
            )));
        }
    };

    if response.keep_alive() {
        cache.lock().unwrap().insert(endpoint, stream);
    }

    Ok(response)
}

/// Budget restant avant l'échéance ; `Timeout` quand il est épuisé.
fn remaining(started: Instant, deadline: Duration) -> Result<Duration, UpnpError> {
    let elapsed = started.elapsed();
    if elapsed >= deadline {
        return Err(UpnpError::Timeout(deadline));
    }
    Ok(deadline - elapsed)
}

fn io_error(
    endpoint: SocketAddr,
    started: Instant,
    deadline: Duration,
    error: std::io::Error,
) -> UpnpError {
    use std::io::ErrorKind;
    if matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
        || started.elapsed() >= deadline
    {
        UpnpError::Timeout(deadline)
    } else {
        transport(endpoint, "exchange", error)
    }
}

fn transport(endpoint: SocketAddr, phase: &str, error: std::io::Error) -> UpnpError {
    warn!("❌ HTTP {} failed for {}: {}", phase, endpoint, error);
    UpnpError::TransportError(format!("{phase} {endpoint}: {error}"))
}
