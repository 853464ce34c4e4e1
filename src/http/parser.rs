//! Turns a raw transport request into an immutable [`Request`] snapshot.
//!
//! Parsing is all-or-nothing: a malformed query or body fails the whole
//! request with [`ServerError::Parse`] and any upload already written to
//! temporary storage is removed again.

use crate::error::{ServerError, ServerResult};
use crate::http::{Params, RawRequest, Request, UploadedFile};
use crate::router::Router;
use std::collections::HashMap;
use std::path::PathBuf;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const MULTIPART_FORM_DATA: &str = "multipart/form-data";

#[derive(Debug, Clone, Default)]
pub struct RequestParser {
    upload_dir: Option<PathBuf>,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploaded files are written here instead of the system temp dir.
    pub fn with_upload_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: Some(dir.into()),
        }
    }

    pub async fn parse(&self, raw: &RawRequest, router: &Router) -> ServerResult<Request> {
        let path = raw.path().to_string();
        let cookies = parse_cookies(raw);
        let headers = parse_headers(raw);
        let query = match raw.query_string() {
            Some(query) => parse_query(query)?,
            None => Params::new(),
        };
        let content_type = raw.first_header("content-type").unwrap_or("").to_string();

        let mut body = Vec::new();
        let mut form = Params::new();
        let mut files = Vec::new();
        if raw.method.has_body() {
            body = raw.body.clone();
            let kind = content_type.to_ascii_lowercase();
            if kind.starts_with(FORM_URLENCODED) {
                let text = std::str::from_utf8(&body)
                    .map_err(|_| ServerError::Parse("form body is not valid UTF-8".into()))?;
                form = parse_query(text)?;
            } else if kind.starts_with(MULTIPART_FORM_DATA) {
                let parts = split_multipart(&content_type, &body)?;
                for part in parts {
                    match self.accept_part(part, &mut form).await {
                        Ok(Some(file)) => files.push(file),
                        Ok(None) => {}
                        Err(err) => {
                            discard(&files).await;
                            return Err(err);
                        }
                    }
                }
            }
        }

        let (params, wildcards) = match router.match_route(raw.method, &path) {
            Some(matched) => (matched.params, matched.wildcards),
            None => (HashMap::new(), Vec::new()),
        };

        Ok(Request {
            method: raw.method,
            path,
            params,
            query,
            form,
            files,
            cookies,
            headers,
            body,
            content_type,
            wildcards,
        })
    }

    async fn accept_part(&self, part: Part<'_>, form: &mut Params) -> ServerResult<Option<UploadedFile>> {
        let Some(filename) = part.filename else {
            let value = String::from_utf8(part.content.to_vec()).map_err(|_| {
                ServerError::Parse(format!("form field `{}` is not valid UTF-8", part.name))
            })?;
            form.push(part.name, value);
            return Ok(None);
        };
        // browsers send an empty file part when nothing was chosen
        if filename.is_empty() && part.content.is_empty() {
            return Ok(None);
        }

        let suffix = format!("_{}", sanitize_filename(&filename));
        let mut builder = tempfile::Builder::new();
        builder.prefix("upload_").suffix(&suffix);
        let temp = match &self.upload_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let (_, path) = temp.keep().map_err(|err| err.error)?;
        if let Err(err) = tokio::fs::write(&path, part.content).await {
            let _ = tokio::fs::remove_file(&path).await;
            return Err(err.into());
        }

        tracing::debug!(field = %part.name, file = %path.display(), size = part.content.len(), "stored upload");
        Ok(Some(UploadedFile {
            field_name: part.name,
            filename,
            content_type: part
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            path,
        }))
    }
}

async fn discard(files: &[UploadedFile]) {
    for file in files {
        if let Err(err) = file.remove().await {
            tracing::warn!(file = %file.path().display(), error = %err, "failed to remove upload");
        }
    }
}

/// Cookie pairs from every `Cookie` header; the first value of a name wins.
pub fn parse_cookies(raw: &RawRequest) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    let headers = raw
        .headers
        .iter()
        .filter(|(name, _)| name.eq_ignore_ascii_case("cookie"));
    for (_, header) in headers {
        for pair in header.split(';') {
            let Some((name, value)) = pair.split_once('=') else {
                continue;
            };
            let name = name.trim();
            if name.is_empty() || !name.chars().all(is_token_char) {
                continue;
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            cookies
                .entry(name.to_string())
                .or_insert_with(|| value.to_string());
        }
    }
    cookies
}

/// Header map keyed by lowercased name; the first value of a name wins.
pub fn parse_headers(raw: &RawRequest) -> HashMap<String, String> {
    let mut headers = HashMap::with_capacity(raw.headers.len());
    for (name, value) in &raw.headers {
        headers
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| value.clone());
    }
    headers
}

/// Decodes `a=1&b=2&a=3` into an ordered multi-value mapping.
pub fn parse_query(input: &str) -> ServerResult<Params> {
    let mut params = Params::new();
    for pair in input.split('&').filter(|s| !s.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = decode_component(key)?;
        if key.is_empty() {
            continue;
        }
        params.push(key, decode_component(value)?);
    }
    Ok(params)
}

fn decode_component(input: &str) -> ServerResult<String> {
    let input = input.replace('+', " ");
    urlencoding::decode(&input)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| ServerError::Parse(format!("invalid percent-encoding in `{input}`")))
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_graphic() && !"()<>@,;:\\\"/[]?={}".contains(c)
}

fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(|c| c == '/' || c == '\\')
        .next()
        .unwrap_or(filename);
    base.chars()
        .take(64)
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug)]
struct Part<'a> {
    name: String,
    filename: Option<String>,
    content_type: Option<String>,
    content: &'a [u8],
}

fn split_multipart<'a>(content_type: &str, body: &'a [u8]) -> ServerResult<Vec<Part<'a>>> {
    let boundary = extract_boundary(content_type)?;
    let opening = format!("--{boundary}").into_bytes();
    let delimiter = format!("\r\n--{boundary}").into_bytes();

    let start = find_subsequence(body, &opening)
        .ok_or_else(|| ServerError::Parse("multipart body has no opening boundary".into()))?;
    let mut rest = &body[start + opening.len()..];
    let mut parts = Vec::new();

    loop {
        if rest.starts_with(b"--") {
            break;
        }
        while let Some((b' ' | b'\t', tail)) = rest.split_first() {
            rest = tail;
        }
        rest = rest
            .strip_prefix(b"\r\n")
            .ok_or_else(|| ServerError::Parse("malformed multipart boundary line".into()))?;

        match find_subsequence(rest, &delimiter) {
            Some(end) => {
                parts.push(parse_part(&rest[..end])?);
                rest = &rest[end + delimiter.len()..];
            }
            None => {
                // no closing boundary: the transfer of this part never completed
                tracing::debug!("dropping unterminated multipart part");
                break;
            }
        }
    }

    Ok(parts)
}

fn parse_part(part: &[u8]) -> ServerResult<Part<'_>> {
    let (head, content) = split_headers_content(part)?;
    let head = std::str::from_utf8(head)
        .map_err(|_| ServerError::Parse("multipart part headers are not valid UTF-8".into()))?;

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in head.split("\r\n") {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();
        if key == "content-disposition" {
            for (param, param_value) in disposition_params(value) {
                match param.to_ascii_lowercase().as_str() {
                    "name" => name = Some(param_value),
                    "filename" => filename = Some(param_value),
                    _ => {}
                }
            }
        } else if key == "content-type" {
            content_type = Some(value.to_string());
        }
    }

    let name = name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ServerError::Parse("multipart part has no field name".into()))?;
    Ok(Part {
        name,
        filename,
        content_type,
        content,
    })
}

fn split_headers_content(part: &[u8]) -> ServerResult<(&[u8], &[u8])> {
    // a part may carry no headers at all
    if let Some(content) = part.strip_prefix(b"\r\n") {
        return Ok((&[], content));
    }
    let sep = b"\r\n\r\n";
    find_subsequence(part, sep)
        .map(|pos| (&part[..pos], &part[pos + sep.len()..]))
        .ok_or_else(|| ServerError::Parse("multipart part has no header terminator".into()))
}

/// Splits `form-data; name="a"; filename="b;c.txt"` on semicolons outside quotes.
fn disposition_params(value: &str) -> Vec<(String, String)> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for c in value.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                current.push(c);
            }
            ';' if !quoted => segments.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    segments.push(current);

    segments
        .iter()
        .skip(1)
        .filter_map(|segment| {
            let (key, value) = segment.trim().split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((key.trim().to_string(), value.to_string()))
        })
        .collect()
}

fn extract_boundary(content_type: &str) -> ServerResult<String> {
    content_type
        .split(';')
        .find_map(|s| {
            let (key, value) = s.trim().split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| value.trim().trim_matches('"').to_string())
        })
        .filter(|b| !b.is_empty())
        .ok_or_else(|| ServerError::Parse("multipart content type has no boundary".into()))
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
