use crate::error::ServerResult;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

pub const TEXT_PLAIN: &str = "text/plain; charset=UTF-8";

/// Mutable response-in-progress for a single request.
///
/// When `file` is set the writer streams that file instead of `body`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: String,
    pub headers: HashMap<String, String>,
    pub file: Option<PathBuf>,
}

impl Default for Response {
    fn default() -> Self {
        Response::new(200)
    }
}

impl Response {
    pub fn new(status: u16) -> Response {
        Response {
            status,
            body: Vec::new(),
            content_type: TEXT_PLAIN.to_string(),
            headers: HashMap::new(),
            file: None,
        }
    }

    pub fn status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    pub fn body<T: Into<Vec<u8>>>(&mut self, body: T) -> &mut Self {
        self.body = body.into();
        self
    }

    pub fn content_type<T: AsRef<str>>(&mut self, content_type: T) -> &mut Self {
        self.content_type = content_type.as_ref().to_string();
        self
    }

    pub fn header<K: AsRef<str>, V: AsRef<str>>(&mut self, name: K, value: V) -> &mut Self {
        self.headers
            .insert(name.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    pub fn file<P: Into<PathBuf>>(&mut self, path: P) -> &mut Self {
        self.file = Some(path.into());
        self
    }

    pub fn json_body<T: Serialize>(&mut self, value: &T) -> ServerResult<&mut Self> {
        let bytes = serde_json::to_vec(value)?;
        self.content_type("application/json").body(bytes);
        Ok(self)
    }

    pub fn text<T: AsRef<str>>(content: T) -> Response {
        let mut response = Response::new(200);
        response.body(content.as_ref());
        response
    }

    pub fn html<T: AsRef<str>>(content: T) -> Response {
        let mut response = Response::new(200);
        response.content_type("text/html").body(content.as_ref());
        response
    }

    pub fn json<T: Serialize>(data: &T) -> ServerResult<Response> {
        let mut response = Response::new(200);
        response.json_body(data)?;
        Ok(response)
    }

    pub fn redirect(location: &str, status: u16) -> Response {
        let mut response = Response::new(status);
        response.header("Location", location);
        response
    }

    /// The fixed body used when no error handler claims a 404.
    pub fn not_found(path: &str) -> Response {
        let mut response = Response::new(404);
        response.body(format!("404 Not Found: {path}"));
        response
    }

    /// The fixed body used when no error handler claims a fault.
    pub fn internal_error() -> Response {
        let mut response = Response::new(500);
        response.body("Internal Server Error");
        response
    }
}
