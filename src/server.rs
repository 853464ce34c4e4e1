//! Minimal HTTP/1.1 transport: accepts TCP connections, buffers one request
//! at a time and hands it to [`Application::handle`].

use crate::app::Application;
use crate::http::{Method, RawRequest, Version, TEXT_PLAIN};
use ::http::StatusCode;
use std::io;
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Runtime;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

const MAX_HEAD_SIZE: usize = 64 * 1024;
const MAX_HEADERS: usize = 100;

/// Why a request was refused before it reached the application.
#[derive(Debug, Error)]
enum Rejection {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("unsupported method `{0}`")]
    UnsupportedMethod(String),
    #[error("request body exceeds {0} bytes")]
    TooLarge(usize),
    #[error("chunked request bodies are not supported")]
    LengthRequired,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Rejection {
    fn status(&self) -> Option<StatusCode> {
        match self {
            Rejection::Malformed(_) => Some(StatusCode::BAD_REQUEST),
            Rejection::UnsupportedMethod(_) => Some(StatusCode::NOT_IMPLEMENTED),
            Rejection::TooLarge(_) => Some(StatusCode::PAYLOAD_TOO_LARGE),
            Rejection::LengthRequired => Some(StatusCode::LENGTH_REQUIRED),
            Rejection::Io(_) => None,
        }
    }
}

/// Aborts a background task when the owner goes away.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Application {
    /// Starts the HTTP server on its own runtime and blocks forever.
    ///
    /// # Arguments
    /// * `addr` - Address to listen on (e.g. "127.0.0.1:3000")
    pub fn listen(self, addr: &str) -> Result<(), Box<dyn std::error::Error>> {
        let runtime = Runtime::new()?;
        runtime.block_on(async move {
            let listener = TcpListener::bind(addr).await?;
            tracing::info!("Server running on http://{}", listener.local_addr()?);
            self.serve(listener).await
        })?;
        Ok(())
    }

    /// Accepts connections from `listener` until the task is dropped.
    ///
    /// Also runs the periodic session sweep, which stops with this future.
    pub async fn serve(self, listener: TcpListener) -> io::Result<()> {
        let app = Arc::new(self);
        let limit = Arc::new(Semaphore::new(app.config().max_connections.max(1)));
        let _sweeper = AbortOnDrop(app.sessions().spawn_sweeper(app.config().sweep_interval()));

        loop {
            let permit = Arc::clone(&limit)
                .acquire_owned()
                .await
                .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;

            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            };

            let app = Arc::clone(&app);
            tokio::spawn(async move {
                if let Err(err) = app.serve_connection(stream).await {
                    tracing::debug!(%peer, error = %err, "connection ended with error");
                }
                drop(permit);
            });
        }
    }

    async fn serve_connection(&self, stream: TcpStream) -> io::Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let idle = self.config().keep_alive();

        loop {
            // wait for the next request, closing idle connections
            match tokio::time::timeout(idle, reader.fill_buf()).await {
                Err(_) => return Ok(()),
                Ok(buf) => {
                    if buf?.is_empty() {
                        return Ok(());
                    }
                }
            }

            let raw = match read_request(&mut reader, self.config().max_body_size).await {
                Ok(Some(raw)) => raw,
                Ok(None) => return Ok(()),
                Err(rejection) => return reject(&mut writer, rejection).await,
            };

            let disposition = self.handle(&raw, &mut writer).await;
            if !disposition.keep_alive {
                return Ok(());
            }
        }
    }
}

async fn reject<W>(writer: &mut W, rejection: Rejection) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let Some(status) = rejection.status() else {
        return match rejection {
            Rejection::Io(err) => Err(err),
            _ => Ok(()),
        };
    };
    tracing::debug!(status = status.as_u16(), error = %rejection, "request rejected");

    let body = rejection.to_string();
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nDate: {}\r\nConnection: close\r\n\r\n",
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        TEXT_PLAIN,
        body.len(),
        httpdate::fmt_http_date(SystemTime::now()),
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await?;
    writer.shutdown().await
}

/// Reads one request head plus its `Content-Length` body.
///
/// Returns `Ok(None)` when the peer closed the connection before sending
/// anything.
async fn read_request<R>(reader: &mut R, max_body: usize) -> Result<Option<RawRequest>, Rejection>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = MAX_HEAD_SIZE;

    let mut request_line = String::new();
    loop {
        request_line.clear();
        if read_line(reader, &mut request_line, &mut budget).await? == 0 {
            return Ok(None);
        }
        // tolerate stray line breaks between requests
        if !request_line.trim().is_empty() {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(Rejection::Malformed("invalid request line".into()));
    };
    let version = match version {
        "HTTP/1.1" => Version::Http11,
        "HTTP/1.0" => Version::Http10,
        other => return Err(Rejection::Malformed(format!("unsupported version `{other}`"))),
    };
    if !target.starts_with('/') {
        return Err(Rejection::Malformed(format!("unsupported request target `{target}`")));
    }
    let method: Method = method
        .parse()
        .map_err(|_| Rejection::UnsupportedMethod(method.to_string()))?;

    let mut raw = RawRequest::new(method, target).version(version);
    loop {
        let mut line = String::new();
        if read_line(reader, &mut line, &mut budget).await? == 0 {
            return Err(Rejection::Malformed("connection closed inside the header block".into()));
        }
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            return Err(Rejection::Malformed(format!("invalid header line `{line}`")));
        };
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(Rejection::Malformed(format!("invalid header name `{name}`")));
        }
        if raw.headers.len() == MAX_HEADERS {
            return Err(Rejection::Malformed("too many headers".into()));
        }
        raw.headers.push((name.to_string(), value.trim().to_string()));
    }

    if raw.first_header("transfer-encoding").is_some() {
        return Err(Rejection::LengthRequired);
    }

    let mut length: Option<usize> = None;
    for (_, value) in raw.headers.iter().filter(|(n, _)| n.eq_ignore_ascii_case("content-length")) {
        let parsed = value
            .parse::<usize>()
            .map_err(|_| Rejection::Malformed(format!("invalid content length `{value}`")))?;
        if length.is_some_and(|l| l != parsed) {
            return Err(Rejection::Malformed("conflicting content lengths".into()));
        }
        length = Some(parsed);
    }

    if let Some(length) = length {
        if length > max_body {
            return Err(Rejection::TooLarge(max_body));
        }
        let mut body = vec![0; length];
        reader.read_exact(&mut body).await?;
        raw.body = body;
    }

    Ok(Some(raw))
}

async fn read_line<R>(reader: &mut R, line: &mut String, budget: &mut usize) -> Result<usize, Rejection>
where
    R: AsyncBufRead + Unpin,
{
    let n = (&mut *reader).take(*budget as u64).read_line(line).await?;
    if n > 0 && !line.ends_with('\n') && n == *budget {
        return Err(Rejection::Malformed("request head too large".into()));
    }
    *budget -= n;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn read(bytes: &[u8]) -> Result<Option<RawRequest>, Rejection> {
        let mut reader = BufReader::new(bytes);
        read_request(&mut reader, 1024).await
    }

    #[tokio::test]
    async fn reads_head_and_body() {
        let raw = read(
            b"\r\nPOST /submit?x=1 HTTP/1.1\r\nHost: local\r\nContent-Length: 5\r\nX-A: one\r\nx-a: two\r\n\r\nhelloEXTRA",
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(raw.method, Method::POST);
        assert_eq!(raw.target, "/submit?x=1");
        assert_eq!(raw.version, Version::Http11);
        assert_eq!(raw.headers.len(), 4);
        assert_eq!(raw.first_header("x-a"), Some("one"));
        assert_eq!(raw.body, b"hello");
    }

    #[tokio::test]
    async fn empty_stream_is_a_clean_close() {
        assert!(read(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejections_map_to_statuses() {
        let cases: [(&[u8], u16); 6] = [
            (b"GARBAGE\r\n\r\n", 400),
            (b"GET / HTTP/2.0\r\n\r\n", 400),
            (b"BREW /pot HTTP/1.1\r\n\r\n", 501),
            (b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n", 411),
            (b"POST / HTTP/1.1\r\nContent-Length: 4096\r\n\r\n", 413),
            (b"POST / HTTP/1.1\r\nContent-Length: 1\r\nContent-Length: 2\r\n\r\n", 400),
        ];
        for (input, status) in cases {
            let rejection = read(input).await.unwrap_err();
            assert_eq!(rejection.status().map(|s| s.as_u16()), Some(status), "{rejection}");
        }
    }

    #[tokio::test]
    async fn truncated_body_is_an_io_error() {
        let err = read(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort").await.unwrap_err();
        assert!(matches!(err, Rejection::Io(_)));
        assert!(err.status().is_none());
    }

    #[tokio::test]
    async fn oversized_head_is_rejected() {
        let mut input = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
        input.extend(std::iter::repeat(b'a').take(MAX_HEAD_SIZE));
        input.extend_from_slice(b"\r\n\r\n");
        let err = read(&input).await.unwrap_err();
        assert!(matches!(err, Rejection::Malformed(_)));
    }

    #[tokio::test]
    async fn dropping_serve_stops_the_session_sweeper() {
        let app = Application::new();
        let sessions = Arc::clone(app.sessions());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let server = tokio::spawn(app.serve(listener));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(Arc::strong_count(&sessions) > 2);

        server.abort();
        let _ = server.await;
        for _ in 0..50 {
            if Arc::strong_count(&sessions) == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(Arc::strong_count(&sessions), 1);
    }

    #[tokio::test]
    async fn rejection_writes_fixed_response_and_closes() {
        let mut out = Vec::new();
        reject(&mut out, Rejection::LengthRequired).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 411 Length Required\r\n"));
        assert!(text.contains("Connection: close"));
        assert!(text.ends_with("chunked request bodies are not supported"));
    }
}
