//! Serializes a finished response onto the transport sink.
//!
//! Every response carries the session cookie, a `Date` header and a
//! `Connection` header matching what the client asked for. When the client
//! did not ask for keep-alive the sink is shut down after the last byte.

use crate::error::{ServerError, ServerResult};
use crate::http::{Method, RawRequest, Response};
use crate::session::{Session, SESSION_COOKIE};
use crate::static_files::mime_type;
use flate2::write::{DeflateEncoder, GzEncoder};
use flate2::Compression;
use ::http::StatusCode;
use std::io::Write;
use std::path::Path;
use std::time::SystemTime;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Headers the writer owns; handler-supplied values for these are ignored.
const FRAMING_HEADERS: [&str; 3] = ["content-length", "connection", "transfer-encoding"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Gzip,
    Deflate,
}

impl Encoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Deflate => "deflate",
        }
    }

    /// Picks an encoding from an `Accept-Encoding` value, preferring gzip.
    ///
    /// Tokens weighted `q=0` count as refused.
    pub fn negotiate(accept: &str) -> Option<Encoding> {
        let mut gzip = None;
        let mut deflate = None;
        let mut any = None;
        for token in accept.split(',') {
            let mut parts = token.split(';');
            let name = parts.next().unwrap_or("").trim().to_ascii_lowercase();
            let accepted = parts
                .find_map(|p| p.trim().strip_prefix("q="))
                .map(|q| q.trim().parse::<f32>().map(|q| q > 0.0).unwrap_or(false))
                .unwrap_or(true);
            match name.as_str() {
                "gzip" | "x-gzip" => gzip = Some(accepted),
                "deflate" => deflate = Some(accepted),
                "*" => any = Some(accepted),
                _ => {}
            }
        }

        if gzip.or(any) == Some(true) {
            Some(Encoding::Gzip)
        } else if deflate.or(any) == Some(true) {
            Some(Encoding::Deflate)
        } else {
            None
        }
    }

    fn encode(&self, data: &[u8], level: Compression) -> std::io::Result<Vec<u8>> {
        match self {
            Encoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), level);
                encoder.write_all(data)?;
                encoder.finish()
            }
            Encoding::Deflate => {
                let mut encoder = DeflateEncoder::new(Vec::new(), level);
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }
}

/// Per-request connection facts the writer needs from the inbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub keep_alive: bool,
    pub encoding: Option<Encoding>,
    pub head_only: bool,
}

impl Negotiated {
    pub fn from_request(raw: &RawRequest) -> Self {
        Self {
            keep_alive: raw.keep_alive(),
            encoding: raw.first_header("accept-encoding").and_then(Encoding::negotiate),
            head_only: raw.method == Method::HEAD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// The response failed before any of it was written; the fixed 500
    /// went out instead and the connection was closed.
    FellBack,
    /// The response broke off part way, or the fallback failed too. The
    /// connection was shut down.
    Abandoned,
}

/// An `emit` failure, and whether any bytes already reached the sink.
struct EmitError {
    started: bool,
    source: ServerError,
}

impl EmitError {
    fn before_writing(source: ServerError) -> Self {
        Self { started: false, source }
    }

    fn after_writing(source: impl Into<ServerError>) -> Self {
        Self {
            started: true,
            source: source.into(),
        }
    }
}

enum Payload {
    Bytes(Vec<u8>),
    File(File),
}

struct Prepared {
    head: Vec<u8>,
    payload: Payload,
}

#[derive(Debug, Clone)]
pub struct ResponseWriter {
    level: Compression,
}

impl Default for ResponseWriter {
    fn default() -> Self {
        Self::new(6)
    }
}

impl ResponseWriter {
    pub fn new(compression_level: u32) -> Self {
        Self {
            level: Compression::new(compression_level.min(9)),
        }
    }

    /// Writes `response`, or the file it points at, exactly once.
    ///
    /// A failure before the first byte triggers one attempt at the fixed
    /// 500 response. Once bytes are on the wire a failure abandons the
    /// connection, as does a failed fallback.
    pub async fn write<W>(
        &self,
        sink: &mut W,
        response: Response,
        session: &Session,
        negotiated: &Negotiated,
    ) -> WriteOutcome
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let prepared = match self.prepare(response, session, negotiated).await {
            Ok(prepared) => prepared,
            Err(err) => {
                tracing::warn!(error = %err, "invalid response, sending fallback");
                return self.fallback(sink, session, negotiated).await;
            }
        };
        match emit(sink, prepared, negotiated).await {
            Ok(()) => WriteOutcome::Written,
            Err(EmitError { started: false, source }) => {
                tracing::warn!(error = %source, "response write failed, sending fallback");
                self.fallback(sink, session, negotiated).await
            }
            Err(EmitError { source, .. }) => {
                tracing::error!(error = %source, "response interrupted, abandoning connection");
                let _ = sink.shutdown().await;
                WriteOutcome::Abandoned
            }
        }
    }

    /// Streams a static file with status 200.
    ///
    /// Errors opening or reading the file are returned before anything is
    /// written. Once bytes are on the wire a failure abandons the connection.
    pub async fn send_file<W>(
        &self,
        sink: &mut W,
        path: &Path,
        session: &Session,
        negotiated: &Negotiated,
    ) -> ServerResult<WriteOutcome>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let prepared = self
            .prepare_file(StatusCode::OK, path, Vec::new(), session, negotiated)
            .await?;
        match emit(sink, prepared, negotiated).await {
            Ok(()) => Ok(WriteOutcome::Written),
            Err(EmitError { started: false, source }) => Err(source),
            Err(EmitError { source, .. }) => {
                tracing::error!(file = %path.display(), error = %source, "static file stream failed");
                let _ = sink.shutdown().await;
                Ok(WriteOutcome::Abandoned)
            }
        }
    }

    async fn fallback<W>(&self, sink: &mut W, session: &Session, negotiated: &Negotiated) -> WriteOutcome
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let closing = Negotiated {
            keep_alive: false,
            ..*negotiated
        };
        let result = match self.prepare(Response::internal_error(), session, &closing).await {
            Ok(prepared) => emit(sink, prepared, &closing).await.map_err(|e| e.source),
            Err(err) => Err(err),
        };
        match result {
            Ok(()) => WriteOutcome::FellBack,
            Err(err) => {
                tracing::error!(error = %err, "fallback response failed, abandoning connection");
                let _ = sink.shutdown().await;
                WriteOutcome::Abandoned
            }
        }
    }

    async fn prepare(
        &self,
        response: Response,
        session: &Session,
        negotiated: &Negotiated,
    ) -> ServerResult<Prepared> {
        let status = StatusCode::from_u16(response.status).map_err(|_| {
            ServerError::InvalidResponse(format!("status {} is out of range", response.status))
        })?;
        let extra = user_headers(&response)?;

        if let Some(path) = &response.file {
            return self
                .prepare_file(status, path, extra, session, negotiated)
                .await;
        }

        let mut headers = Vec::new();
        if !response.content_type.is_empty() {
            headers.push(("Content-Type".to_string(), response.content_type.clone()));
        }
        headers.push(("Content-Length".to_string(), response.body.len().to_string()));
        let head = serialize_head(status, headers, extra, session, negotiated)?;
        Ok(Prepared {
            head,
            payload: Payload::Bytes(response.body),
        })
    }

    async fn prepare_file(
        &self,
        status: StatusCode,
        path: &Path,
        extra: Vec<(String, String)>,
        session: &Session,
        negotiated: &Negotiated,
    ) -> ServerResult<Prepared> {
        let mut file = File::open(path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(ServerError::InvalidResponse(format!(
                "{} is not a regular file",
                path.display()
            )));
        }

        let mut headers = vec![("Content-Type".to_string(), mime_type(path).to_string())];
        if let Ok(modified) = metadata.modified() {
            headers.push(("Last-Modified".to_string(), httpdate::fmt_http_date(modified)));
        }

        let payload = match negotiated.encoding {
            Some(encoding) => {
                let mut raw = Vec::with_capacity(metadata.len() as usize);
                file.read_to_end(&mut raw).await?;
                let body = encoding.encode(&raw, self.level)?;
                headers.push(("Content-Length".to_string(), body.len().to_string()));
                headers.push(("Content-Encoding".to_string(), encoding.as_str().to_string()));
                headers.push(("Vary".to_string(), "Accept-Encoding".to_string()));
                Payload::Bytes(body)
            }
            None => {
                headers.push(("Content-Length".to_string(), metadata.len().to_string()));
                Payload::File(file)
            }
        };

        let head = serialize_head(status, headers, extra, session, negotiated)?;
        Ok(Prepared { head, payload })
    }
}

async fn emit<W>(sink: &mut W, prepared: Prepared, negotiated: &Negotiated) -> Result<(), EmitError>
where
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let head = &prepared.head;
    let mut written = 0;
    while written < head.len() {
        match sink.write(&head[written..]).await {
            Ok(0) => {
                let err = std::io::Error::from(std::io::ErrorKind::WriteZero);
                return Err(EmitError {
                    started: written > 0,
                    source: err.into(),
                });
            }
            Ok(n) => written += n,
            Err(err) if written == 0 => return Err(EmitError::before_writing(err.into())),
            Err(err) => return Err(EmitError::after_writing(err)),
        }
    }

    if !negotiated.head_only {
        match prepared.payload {
            Payload::Bytes(body) => sink.write_all(&body).await.map_err(EmitError::after_writing)?,
            Payload::File(mut file) => {
                tokio::io::copy(&mut file, sink)
                    .await
                    .map_err(EmitError::after_writing)?;
            }
        }
    }
    sink.flush().await.map_err(EmitError::after_writing)?;
    if !negotiated.keep_alive {
        sink.shutdown().await.map_err(EmitError::after_writing)?;
    }
    Ok(())
}

/// Handler headers in a stable order, rejecting anything that could split
/// the response.
fn user_headers(response: &Response) -> ServerResult<Vec<(String, String)>> {
    let mut headers: Vec<(String, String)> = Vec::with_capacity(response.headers.len());
    for (name, value) in &response.headers {
        if name.is_empty() || !name.bytes().all(is_token_byte) {
            return Err(ServerError::InvalidResponse(format!("invalid header name `{name}`")));
        }
        if value.bytes().any(|b| b == b'\r' || b == b'\n') {
            return Err(ServerError::InvalidResponse(format!(
                "header `{name}` contains a line break"
            )));
        }
        if FRAMING_HEADERS.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            tracing::debug!(header = %name, "ignoring handler-supplied framing header");
            continue;
        }
        headers.push((name.clone(), value.clone()));
    }
    headers.sort();
    Ok(headers)
}

fn serialize_head(
    status: StatusCode,
    mut headers: Vec<(String, String)>,
    extra: Vec<(String, String)>,
    session: &Session,
    negotiated: &Negotiated,
) -> ServerResult<Vec<u8>> {
    headers.push(("Date".to_string(), httpdate::fmt_http_date(SystemTime::now())));
    let connection = if negotiated.keep_alive { "keep-alive" } else { "close" };
    headers.push(("Connection".to_string(), connection.to_string()));

    for (name, value) in extra {
        // user headers replace defaults, except cookies which accumulate
        if !name.eq_ignore_ascii_case("set-cookie") {
            headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        }
        headers.push((name, value));
    }
    headers.push((
        "Set-Cookie".to_string(),
        format!("{SESSION_COOKIE}={}; Path=/; HttpOnly", session.id()),
    ));

    let content_type = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
        .map(|(_, value)| value.as_str());
    if content_type.map_or(false, |v| v.contains(|c| c == '\r' || c == '\n')) {
        return Err(ServerError::InvalidResponse("content type contains a line break".into()));
    }

    let mut head = format!(
        "HTTP/1.1 {} {}\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    );
    for (name, value) in &headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    Ok(head.into_bytes())
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}
