use crate::error::ServerResult;
use crate::handler::HandlerResult;
use crate::http::{Request, Response};
use crate::session::Session;
use crate::template::TemplateEngine;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

/// Everything a handler, interceptor or error handler sees of one request.
///
/// The request is read-only; the response is owned by this context alone and
/// mutated in place by each callback in turn.
#[derive(Debug)]
pub struct HttpContext {
    request: Request,
    pub response: Response,
    session: Arc<Session>,
}

impl HttpContext {
    pub fn new(request: Request, session: Arc<Session>) -> Self {
        Self {
            request,
            response: Response::default(),
            session,
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn wildcard(&self, index: usize) -> Option<&str> {
        self.request.wildcard(index)
    }

    pub fn wildcards(&self) -> &[String] {
        self.request.wildcards()
    }

    pub(crate) fn take_response(&mut self) -> Response {
        std::mem::take(&mut self.response)
    }

    pub fn text<T: AsRef<str>>(&mut self, text: T) -> HandlerResult {
        self.status(200, text.as_ref(), crate::http::TEXT_PLAIN)
    }

    pub fn html<T: AsRef<str>>(&mut self, html: T) -> HandlerResult {
        self.status(200, html.as_ref(), "text/html")
    }

    pub fn json<T: Serialize>(&mut self, value: &T) -> HandlerResult {
        self.response.status(200).json_body(value)?;
        Ok(None)
    }

    /// Streams a file from disk instead of the body bytes.
    pub fn file<P: Into<PathBuf>>(&mut self, path: P) -> HandlerResult {
        self.response.status(200).file(path);
        Ok(None)
    }

    pub fn status<B: Into<Vec<u8>>>(&mut self, code: u16, body: B, content_type: &str) -> HandlerResult {
        self.response
            .status(code)
            .content_type(content_type)
            .body(body);
        Ok(None)
    }

    pub fn redirect(&mut self, location: &str, code: u16) -> HandlerResult {
        self.response.status(code).header("Location", location);
        Ok(None)
    }

    pub fn header(&mut self, name: &str, value: &str) -> &mut Self {
        self.response.header(name, value);
        self
    }

    pub fn content_type(&mut self, content_type: &str) -> &mut Self {
        self.response.content_type(content_type);
        self
    }

    pub fn set_body<B: Into<Vec<u8>>>(&mut self, body: B) -> &mut Self {
        self.response.body(body);
        self
    }

    pub fn render<E, T>(&mut self, engine: &E, template: &str, model: &T) -> HandlerResult
    where
        E: TemplateEngine + ?Sized,
        T: Serialize,
    {
        let html = engine.render(template, &serde_json::to_value(model)?)?;
        self.html(html)
    }

    pub fn set_session<T: Serialize>(&self, key: &str, value: T) {
        self.session.set(key, value);
    }

    pub fn session_value<T>(&self, key: &str) -> ServerResult<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        match self.session.get_value(key) {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}
