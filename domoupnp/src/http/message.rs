//! Framing HTTP/1.1 : requêtes, réponses, chunked, keep-alive.

use std::io::{self, BufRead, Write};

use thiserror::Error;

/// Taille maximale acceptée pour un corps de message (4 MiB).
const MAX_BODY: usize = 4 * 1024 * 1024;

/// Taille maximale d'une ligne (start line ou en-tête).
const MAX_LINE: usize = 8 * 1024;

/// Erreurs du framing HTTP.
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("connection closed by peer")]
    Closed,

    #[error("malformed start line: {0}")]
    BadStartLine(String),

    #[error("malformed header line: {0}")]
    BadHeader(String),

    #[error("malformed chunked body: {0}")]
    BadChunk(String),

    #[error("message exceeds size limits")]
    TooLarge,
}

impl HttpError {
    /// L'erreur est-elle une expiration de lecture ?
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            HttpError::Io(e) if e.kind() == io::ErrorKind::WouldBlock
                || e.kind() == io::ErrorKind::TimedOut
        )
    }
}

/// En-têtes ordonnés, accès insensible à la casse.
#[derive(Debug, Clone, Default)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remplace la valeur si l'en-tête existe, l'ajoute sinon.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Requête HTTP décodée ou à émettre.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            version: "HTTP/1.1".to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// La connexion doit-elle rester ouverte après cette requête ?
    pub fn keep_alive(&self) -> bool {
        keep_alive(&self.version, &self.headers)
    }
}

/// Réponse HTTP décodée ou à émettre.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub version: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            reason: reason_phrase(status).to_string(),
            version: "HTTP/1.1".to_string(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: Vec<u8>, content_type: &str) -> Self {
        self.headers.set("CONTENT-TYPE", content_type);
        self.body = body;
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn keep_alive(&self) -> bool {
        keep_alive(&self.version, &self.headers)
    }
}

/// Sémantique keep-alive : 1.1 reste ouvert sauf `close`, 1.0 ferme
/// sauf `keep-alive`.
pub fn keep_alive(version: &str, headers: &Headers) -> bool {
    let connection = headers.get("CONNECTION").map(str::to_ascii_lowercase);
    match connection.as_deref() {
        Some("close") => false,
        Some("keep-alive") => true,
        _ => version.eq_ignore_ascii_case("HTTP/1.1"),
    }
}

/// Lit une requête complète (start line, en-têtes, corps).
pub fn read_request<R: BufRead>(reader: &mut R) -> Result<HttpRequest, HttpError> {
    let line = read_line(reader)?;
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| HttpError::BadStartLine(line.clone()))?
        .to_ascii_uppercase();
    let target = parts
        .next()
        .ok_or_else(|| HttpError::BadStartLine(line.clone()))?
        .to_string();
    let version = parts
        .next()
        .ok_or_else(|| HttpError::BadStartLine(line.clone()))?
        .to_string();
    if !version.starts_with("HTTP/") || parts.next().is_some() {
        return Err(HttpError::BadStartLine(line));
    }

    let headers = read_headers(reader)?;
    let body = read_body(reader, &headers, false)?;

    Ok(HttpRequest {
        method,
        target,
        version,
        headers,
        body,
    })
}

/// Lit une réponse complète. `head` indique une réponse à HEAD (jamais
/// de corps, quel que soit Content-Length).
pub fn read_response<R: BufRead>(reader: &mut R, head: bool) -> Result<HttpResponse, HttpError> {
    let line = read_line(reader)?;
    let mut parts = line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| HttpError::BadStartLine(line.clone()))?
        .to_string();
    if !version.starts_with("HTTP/") {
        return Err(HttpError::BadStartLine(line.clone()));
    }
    let status: u16 = parts
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| HttpError::BadStartLine(line.clone()))?;
    let reason = parts.next().unwrap_or("").to_string();

    let headers = read_headers(reader)?;
    let body = if head || status == 204 || status == 304 {
        Vec::new()
    } else {
        read_body(reader, &headers, true)?
    };

    Ok(HttpResponse {
        status,
        reason,
        version,
        headers,
        body,
    })
}

/// Écrit une requête ; Content-Length est posé si absent.
pub fn write_request<W: Write>(writer: &mut W, request: &HttpRequest) -> io::Result<()> {
    write!(writer, "{} {} {}\r\n", request.method, request.target, request.version)?;
    write_headers_and_body(writer, &request.headers, &request.body)
}

/// Écrit une réponse ; passe en chunked si l'en-tête l'annonce.
pub fn write_response<W: Write>(writer: &mut W, response: &HttpResponse) -> io::Result<()> {
    write!(writer, "HTTP/1.1 {} {}\r\n", response.status, response.reason)?;
    write_headers_and_body(writer, &response.headers, &response.body)
}

fn write_headers_and_body<W: Write>(
    writer: &mut W,
    headers: &Headers,
    body: &[u8],
) -> io::Result<()> {
    let chunked = headers
        .get("TRANSFER-ENCODING")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));

    for (name, value) in headers.iter() {
        write!(writer, "{name}: {value}\r\n")?;
    }
    if !chunked && !headers.contains("CONTENT-LENGTH") {
        write!(writer, "CONTENT-LENGTH: {}\r\n", body.len())?;
    }
    write!(writer, "\r\n")?;

    if chunked {
        write_chunked(writer, body)?;
    } else {
        writer.write_all(body)?;
    }
    writer.flush()
}

/// Encode un corps en un chunk unique plus le chunk terminal.
fn write_chunked<W: Write>(writer: &mut W, body: &[u8]) -> io::Result<()> {
    if !body.is_empty() {
        write!(writer, "{:x}\r\n", body.len())?;
        writer.write_all(body)?;
        write!(writer, "\r\n")?;
    }
    write!(writer, "0\r\n\r\n")
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<String, HttpError> {
    let mut line = String::new();
    let read = reader.read_line(&mut line)?;
    if read == 0 {
        return Err(HttpError::Closed);
    }
    if line.len() > MAX_LINE {
        return Err(HttpError::TooLarge);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(line)
}

fn read_headers<R: BufRead>(reader: &mut R) -> Result<Headers, HttpError> {
    let mut headers = Headers::new();
    loop {
        let line = read_line(reader)?;
        if line.is_empty() {
            return Ok(headers);
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| HttpError::BadHeader(line.clone()))?;
        headers.set(name.trim().to_string(), value.trim().to_string());
    }
}

/// Lit le corps selon Transfer-Encoding/Content-Length.
///
/// `until_close` autorise la lecture jusqu'à fermeture pour les
/// réponses sans longueur annoncée (HTTP/1.0).
fn read_body<R: BufRead>(
    reader: &mut R,
    headers: &Headers,
    until_close: bool,
) -> Result<Vec<u8>, HttpError> {
    let chunked = headers
        .get("TRANSFER-ENCODING")
        .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"));
    if chunked {
        return read_chunked(reader);
    }

    if let Some(raw) = headers.get("CONTENT-LENGTH") {
        let length: usize = raw
            .trim()
            .parse()
            .map_err(|_| HttpError::BadHeader(format!("CONTENT-LENGTH: {raw}")))?;
        if length > MAX_BODY {
            return Err(HttpError::TooLarge);
        }
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).map_err(HttpError::Io)?;
        return Ok(body);
    }

    if until_close {
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        if body.len() > MAX_BODY {
            return Err(HttpError::TooLarge);
        }
        return Ok(body);
    }

    Ok(Vec::new())
}

/// Décode un corps chunked, extensions et trailers ignorés.
fn read_chunked<R: BufRead>(reader: &mut R) -> Result<Vec<u8>, HttpError> {
    let mut body = Vec::new();
    loop {
        let line = read_line(reader)?;
        let size_part = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_part, 16)
            .map_err(|_| HttpError::BadChunk(format!("invalid chunk size: {line}")))?;

        if size == 0 {
            // Trailers éventuels, jusqu'à la ligne vide.
            loop {
                let trailer = read_line(reader)?;
                if trailer.is_empty() {
                    return Ok(body);
                }
            }
        }

        if body.len() + size > MAX_BODY {
            return Err(HttpError::TooLarge);
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).map_err(HttpError::Io)?;

        let sep = read_line(reader)?;
        if !sep.is_empty() {
            return Err(HttpError::BadChunk("missing CRLF after chunk".to_string()));
        }
    }
}

/// Libellé standard d'un code de statut.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        412 => "Precondition Failed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "",
    }
}
