//! Maps URL paths onto files below a web root.

use crate::error::ServerResult;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

pub const OCTET_STREAM: &str = "application/octet-stream";

lazy_static! {
    static ref MIME_TYPES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("html", "text/html; charset=UTF-8");
        m.insert("htm", "text/html; charset=UTF-8");
        m.insert("css", "text/css; charset=UTF-8");
        m.insert("js", "application/javascript");
        m.insert("json", "application/json");
        m.insert("png", "image/png");
        m.insert("jpg", "image/jpeg");
        m.insert("jpeg", "image/jpeg");
        m.insert("gif", "image/gif");
        m.insert("svg", "image/svg+xml");
        m.insert("txt", "text/plain; charset=UTF-8");
        m.insert("ico", "image/x-icon");
        m.insert("pdf", "application/pdf");
        m
    };
}

/// Content type for a file, decided by its extension alone.
pub fn mime_type(path: &Path) -> &'static str {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| MIME_TYPES.get(ext.to_ascii_lowercase().as_str()).copied())
        .unwrap_or(OCTET_STREAM)
}

#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a URL path to a regular file inside the root.
    ///
    /// `/` maps to `/index.html`. Anything that would leave the root, either
    /// through `..` segments or through a symlink, resolves to `None`, as do
    /// missing files and directories.
    pub async fn resolve(&self, url_path: &str) -> ServerResult<Option<PathBuf>> {
        let path = url_path.split('?').next().unwrap_or("");
        let path = if path.is_empty() || path == "/" {
            "/index.html"
        } else {
            path
        };

        let decoded = match urlencoding::decode(path) {
            Ok(decoded) => decoded,
            Err(_) => return Ok(None),
        };
        let Some(relative) = confine(&decoded) else {
            tracing::debug!(path = url_path, "static path escapes the web root");
            return Ok(None);
        };

        let root = match tokio::fs::canonicalize(&self.root).await {
            Ok(root) => root,
            Err(err) => {
                tracing::debug!(root = %self.root.display(), error = %err, "web root unavailable");
                return Ok(None);
            }
        };
        let candidate = match tokio::fs::canonicalize(root.join(relative)).await {
            Ok(candidate) => candidate,
            Err(_) => return Ok(None),
        };
        if !candidate.starts_with(&root) {
            tracing::debug!(path = url_path, "static path resolves outside the web root");
            return Ok(None);
        }

        let metadata = tokio::fs::metadata(&candidate).await?;
        Ok(metadata.is_file().then_some(candidate))
    }
}

/// Normalizes `.` and `..` lexically; `None` if the path climbs above its start.
fn confine(path: &str) -> Option<PathBuf> {
    if path.contains('\0') {
        return None;
    }
    let mut out = PathBuf::new();
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}
