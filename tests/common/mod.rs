//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, BufReader};
use tokio::net::TcpStream;

/// In-memory response sink that records the close signal and can be told to
/// fail writes, optionally after accepting a few.
#[derive(Default)]
pub struct MemorySink {
    pub data: Vec<u8>,
    pub closed: bool,
    pub accepted: usize,
    pub failures: usize,
}

impl MemorySink {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures,
            ..Self::default()
        }
    }

    /// Accepts `accepted` writes, then fails every write after them.
    pub fn failing_after(accepted: usize) -> Self {
        Self {
            accepted,
            failures: usize::MAX,
            ..Self::default()
        }
    }

    /// Number of responses written, counted by status lines.
    pub fn responses(&self) -> usize {
        self.data.windows(9).filter(|w| *w == b"HTTP/1.1 ").count()
    }

    pub fn parsed(&self) -> Parsed {
        parse_response(&self.data)
    }
}

impl AsyncWrite for MemorySink {
    fn poll_write(mut self: Pin<&mut Self>, _: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.accepted > 0 {
            self.accepted -= 1;
        } else if self.failures > 0 {
            self.failures -= 1;
            return Poll::Ready(Err(io::ErrorKind::ConnectionReset.into()));
        }
        self.data.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.closed = true;
        Poll::Ready(Ok(()))
    }
}

#[derive(Debug)]
pub struct Parsed {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Parsed {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn all(&self, name: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// The session id carried by the `SESSIONID` cookie.
    pub fn session_id(&self) -> Option<String> {
        self.all("set-cookie")
            .into_iter()
            .find_map(|c| c.strip_prefix("SESSIONID="))
            .and_then(|rest| rest.split(';').next())
            .map(str::to_string)
    }
}

pub fn parse_response(bytes: &[u8]) -> Parsed {
    let at = bytes
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("complete response head");
    let head = std::str::from_utf8(&bytes[..at]).expect("utf-8 head");
    let mut lines = head.split("\r\n");
    let status = lines
        .next()
        .and_then(|l| l.split(' ').nth(1))
        .and_then(|s| s.parse().ok())
        .expect("status line");
    let headers = lines
        .filter_map(|l| l.split_once(": "))
        .map(|(n, v)| (n.to_string(), v.to_string()))
        .collect();
    Parsed {
        status,
        headers,
        body: bytes[at + 4..].to_vec(),
    }
}

/// Reads exactly one response off a live connection.
pub async fn read_response(reader: &mut BufReader<TcpStream>) -> Parsed {
    let mut head = Vec::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "connection closed before the response head ended");
        head.extend_from_slice(line.as_bytes());
        if line == "\r\n" {
            break;
        }
    }
    let mut parsed = parse_response(&head);
    let length: usize = parsed
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let mut body = vec![0; length];
    reader.read_exact(&mut body).await.unwrap();
    parsed.body = body;
    parsed
}
