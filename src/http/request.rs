use crate::error::{ServerError, ServerResult};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Eq, Hash, PartialEq, Copy, Clone, Debug)]
pub enum Method {
    GET,
    POST,
    PUT,
    DELETE,
    HEAD,
    CONNECT,
    OPTIONS,
    TRACE,
    PATCH,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::GET => "GET",
            Method::POST => "POST",
            Method::PUT => "PUT",
            Method::DELETE => "DELETE",
            Method::HEAD => "HEAD",
            Method::CONNECT => "CONNECT",
            Method::OPTIONS => "OPTIONS",
            Method::TRACE => "TRACE",
            Method::PATCH => "PATCH",
        }
    }

    /// Methods whose requests conventionally carry an entity body.
    pub fn has_body(&self) -> bool {
        matches!(self, Method::POST | Method::PUT | Method::PATCH)
    }
}

impl FromStr for Method {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GET" => Ok(Method::GET),
            "POST" => Ok(Method::POST),
            "PUT" => Ok(Method::PUT),
            "DELETE" => Ok(Method::DELETE),
            "HEAD" => Ok(Method::HEAD),
            "CONNECT" => Ok(Method::CONNECT),
            "OPTIONS" => Ok(Method::OPTIONS),
            "TRACE" => Ok(Method::TRACE),
            "PATCH" => Ok(Method::PATCH),
            _ => Err(ServerError::BadRequest(format!("unsupported method `{s}`"))),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum Version {
    Http10,
    Http11,
}

/// One fully-buffered request as delivered by the transport.
///
/// Headers keep their wire order and may contain duplicates.
#[derive(Debug, Clone)]
pub struct RawRequest {
    pub method: Method,
    /// Request target: path plus optional query string.
    pub target: String,
    pub version: Version,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RawRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            version: Version::Http11,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or("/")
    }

    pub fn query_string(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, q)| q)
    }

    /// First value of a header, compared case-insensitively.
    pub fn first_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether the client asked for the connection to stay open.
    pub fn keep_alive(&self) -> bool {
        let connection = self.first_header("connection").map(|v| v.to_ascii_lowercase());
        let has = |token: &str| {
            connection
                .as_deref()
                .map(|v| v.split(',').any(|t| t.trim() == token))
                .unwrap_or(false)
        };
        match self.version {
            Version::Http11 => !has("close"),
            Version::Http10 => has("keep-alive"),
        }
    }
}

/// Ordered multi-value mapping for query and form parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    entries: Vec<(String, Vec<String>)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, key: String, value: String) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, values)) => values.push(value),
            None => self.entries.push((key, vec![value])),
        }
    }

    /// First value for a key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Single values become strings, repeated keys become arrays.
    pub fn to_json(&self) -> Value {
        let mut map = Map::with_capacity(self.entries.len());
        for (key, values) in &self.entries {
            let value = match values.as_slice() {
                [single] => Value::String(single.clone()),
                many => Value::Array(many.iter().cloned().map(Value::String).collect()),
            };
            map.insert(key.clone(), value);
        }
        Value::Object(map)
    }

    pub fn deserialize<T>(&self) -> ServerResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        Ok(serde_json::from_value(self.to_json())?)
    }
}

/// A multipart file part persisted to temporary storage.
///
/// The file outlives the request; whoever consumes it is responsible for
/// calling [`UploadedFile::remove`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub(crate) field_name: String,
    pub(crate) filename: String,
    pub(crate) content_type: String,
    pub(crate) path: PathBuf,
}

impl UploadedFile {
    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn remove(&self) -> ServerResult<()> {
        tokio::fs::remove_file(&self.path).await?;
        Ok(())
    }
}

/// Immutable parsed view of one inbound request.
#[derive(Debug, Clone)]
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) params: HashMap<String, String>,
    pub(crate) query: Params,
    pub(crate) form: Params,
    pub(crate) files: Vec<UploadedFile>,
    pub(crate) cookies: HashMap<String, String>,
    pub(crate) headers: HashMap<String, String>,
    pub(crate) body: Vec<u8>,
    pub(crate) content_type: String,
    pub(crate) wildcards: Vec<String>,
}

impl Request {
    /// Snapshot carrying only method, path and headers; used when the
    /// full parse failed and error handlers still need a context.
    pub(crate) fn bare(raw: &RawRequest) -> Self {
        let mut headers = HashMap::new();
        for (name, value) in &raw.headers {
            headers
                .entry(name.to_ascii_lowercase())
                .or_insert_with(|| value.clone());
        }
        Self {
            method: raw.method,
            path: raw.path().to_string(),
            params: HashMap::new(),
            query: Params::new(),
            form: Params::new(),
            files: Vec::new(),
            cookies: HashMap::new(),
            headers,
            body: Vec::new(),
            content_type: String::new(),
            wildcards: Vec::new(),
        }
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn query(&self) -> &Params {
        &self.query
    }

    pub fn form(&self) -> &Params {
        &self.form
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    pub fn file(&self, field_name: &str) -> Option<&UploadedFile> {
        self.files.iter().find(|f| f.field_name == field_name)
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    /// Header lookup; names are stored lowercased.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    /// Deserializes a JSON body; `None` unless the content type is JSON.
    pub fn json<T>(&self) -> Option<T>
    where
        T: serde::de::DeserializeOwned,
    {
        if self.content_type.starts_with("application/json") {
            serde_json::from_slice(&self.body).ok()
        } else {
            None
        }
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn wildcard(&self, index: usize) -> Option<&str> {
        self.wildcards.get(index).map(String::as_str)
    }

    pub fn wildcards(&self) -> &[String] {
        &self.wildcards
    }
}
