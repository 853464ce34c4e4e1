//! The application ties routing, interceptors, error handlers, sessions and
//! static files together and drives each request to exactly one response.
//!
//! # Examples
//!
//! ```no_run
//! use trellis::app::Application;
//!
//! let mut app = Application::new();
//! app.get("/hello/{name}", |ctx| {
//!     let name = ctx.request().param("name").unwrap_or("world").to_string();
//!     ctx.text(format!("Hello, {name}!"))
//! })
//! .unwrap();
//! app.listen("127.0.0.1:3000").unwrap();
//! ```

use crate::chain::{ErrorChain, InterceptorChain};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{self, HandlerResult};
use crate::http::{parse_cookies, HttpContext, Method, RawRequest, Request, RequestParser, Response};
use crate::router::{PatternError, Router};
use crate::session::{SessionRegistry, SESSION_COOKIE};
use crate::static_files::StaticFiles;
use crate::writer::{Negotiated, ResponseWriter, WriteOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWrite;

/// Which terminal state a request ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminal {
    Intercepted,
    Routed,
    StaticServed,
    NotFound,
    Faulted,
}

/// What happened to one request, and whether its connection may be reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposition {
    pub terminal: Terminal,
    pub keep_alive: bool,
}

enum Reply {
    Builder,
    File(PathBuf),
}

#[derive(Clone)]
pub struct Application {
    config: ServerConfig,
    router: Router,
    interceptors: InterceptorChain,
    errors: ErrorChain,
    sessions: Arc<SessionRegistry>,
    parser: RequestParser,
    writer: ResponseWriter,
    static_files: StaticFiles,
}

impl Default for Application {
    fn default() -> Self {
        Self::new()
    }
}

impl Application {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let parser = match &config.upload_dir {
            Some(dir) => RequestParser::with_upload_dir(dir),
            None => RequestParser::new(),
        };
        Self {
            router: Router::new(),
            interceptors: InterceptorChain::new(),
            errors: ErrorChain::new(),
            sessions: Arc::new(SessionRegistry::new(config.session_ttl())),
            parser,
            writer: ResponseWriter::new(config.compression_level),
            static_files: StaticFiles::new(&config.wwwroot),
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn max_connections(&mut self, max_connections: usize) -> &mut Self {
        self.config.max_connections = max_connections;
        self
    }

    pub fn keep_alive(&mut self, keep_alive: Duration) -> &mut Self {
        self.config.keep_alive_secs = keep_alive.as_secs();
        self
    }

    pub fn max_body_size(&mut self, max_body_size: usize) -> &mut Self {
        self.config.max_body_size = max_body_size;
        self
    }

    /// Sets the directory static files are served from.
    pub fn static_dir<P: Into<PathBuf>>(&mut self, dir: P) -> &mut Self {
        self.config.wwwroot = dir.into();
        self.static_files = StaticFiles::new(&self.config.wwwroot);
        self
    }

    pub fn upload_dir<P: Into<PathBuf>>(&mut self, dir: P) -> &mut Self {
        let dir = dir.into();
        self.parser = RequestParser::with_upload_dir(&dir);
        self.config.upload_dir = Some(dir);
        self
    }

    pub fn compression_level(&mut self, level: u32) -> &mut Self {
        self.config.compression_level = level;
        self.writer = ResponseWriter::new(level);
        self
    }

    /// Replaces the session registry; call before serving.
    pub fn session_ttl(&mut self, ttl: Duration) -> &mut Self {
        self.config.session_ttl_secs = ttl.as_secs();
        self.sessions = Arc::new(SessionRegistry::new(ttl));
        self
    }

    pub fn sweep_interval(&mut self, every: Duration) -> &mut Self {
        self.config.sweep_interval_secs = every.as_secs();
        self
    }

    pub fn route<F>(&mut self, method: Method, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.router.register(method, template, handler)?;
        Ok(self)
    }

    pub fn get<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::GET, template, handler)
    }

    pub fn post<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::POST, template, handler)
    }

    pub fn put<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::PUT, template, handler)
    }

    pub fn patch<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::PATCH, template, handler)
    }

    pub fn delete<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::DELETE, template, handler)
    }

    pub fn head<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::HEAD, template, handler)
    }

    pub fn options<F>(&mut self, template: &str, handler: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> HandlerResult + Send + Sync + 'static,
    {
        self.route(Method::OPTIONS, template, handler)
    }

    /// Mounts every route of `router` under `prefix`.
    pub fn mount(&mut self, prefix: &str, router: Router) -> Result<&mut Self, PatternError> {
        self.router.mount(prefix, router)?;
        Ok(self)
    }

    /// Registers an interceptor for paths matching `template`.
    pub fn intercept<F>(&mut self, template: &str, interceptor: F) -> Result<&mut Self, PatternError>
    where
        F: Fn(&mut HttpContext) -> ServerResult<bool> + Send + Sync + 'static,
    {
        self.interceptors.add(template, interceptor)?;
        Ok(self)
    }

    pub fn on_error<F>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(&mut HttpContext, u16, Option<&ServerError>) -> ServerResult<bool> + Send + Sync + 'static,
    {
        self.errors.add(handler);
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Drives one request to a terminal state and writes its response.
    pub async fn handle<W>(&self, raw: &RawRequest, sink: &mut W) -> Disposition
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let negotiated = Negotiated::from_request(raw);
        let cookies = parse_cookies(raw);
        let session = self
            .sessions
            .get_or_create(cookies.get(SESSION_COOKIE).map(String::as_str));

        let (mut ctx, parsed) = match self.parser.parse(raw, &self.router).await {
            Ok(request) => (HttpContext::new(request, session), Ok(())),
            Err(err) => (HttpContext::new(Request::bare(raw), session), Err(err)),
        };

        let (mut terminal, reply) = match parsed {
            Ok(()) => self.dispatch(&mut ctx, raw.method).await,
            Err(err) => {
                tracing::debug!(method = %raw.method, target = %raw.target, error = %err, "request parse failed");
                self.fault(&mut ctx, err);
                (Terminal::Faulted, Reply::Builder)
            }
        };

        let outcome = match reply {
            Reply::File(path) => {
                match self
                    .writer
                    .send_file(sink, &path, ctx.session(), &negotiated)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        terminal = Terminal::Faulted;
                        self.fault(&mut ctx, err);
                        self.write_builder(&mut ctx, sink, &negotiated).await
                    }
                }
            }
            Reply::Builder => self.write_builder(&mut ctx, sink, &negotiated).await,
        };

        tracing::debug!(
            method = %raw.method,
            path = %ctx.request().path(),
            terminal = ?terminal,
            outcome = ?outcome,
            "request complete"
        );
        Disposition {
            terminal,
            keep_alive: negotiated.keep_alive && outcome == WriteOutcome::Written,
        }
    }

    async fn dispatch(&self, ctx: &mut HttpContext, method: Method) -> (Terminal, Reply) {
        let path = ctx.request().path().to_string();
        match self.run(ctx, method, &path).await {
            Ok(step) => step,
            Err(err) => {
                self.fault(ctx, err);
                (Terminal::Faulted, Reply::Builder)
            }
        }
    }

    async fn run(&self, ctx: &mut HttpContext, method: Method, path: &str) -> ServerResult<(Terminal, Reply)> {
        if self.interceptors.apply(path, ctx)? {
            return Ok((Terminal::Intercepted, Reply::Builder));
        }

        if let Some(matched) = self.router.match_route(method, path) {
            tracing::debug!(%method, path, route = matched.binding.template(), "dispatching");
            handler::invoke(matched.binding.handler(), ctx)?;
            return Ok((Terminal::Routed, Reply::Builder));
        }

        if let Some(file) = self.static_files.resolve(path).await? {
            return Ok((Terminal::StaticServed, Reply::File(file)));
        }

        if !self.errors.handle_status(ctx, 404) {
            let fixed = Response::not_found(path);
            ctx.response
                .status(fixed.status)
                .content_type(&fixed.content_type)
                .body(fixed.body);
        }
        Ok((Terminal::NotFound, Reply::Builder))
    }

    /// Offers a fault to the error handlers, falling back to the fixed 500.
    fn fault(&self, ctx: &mut HttpContext, err: ServerError) {
        if self.errors.handle_error(ctx, &err) {
            tracing::debug!(error = %err, "fault handled by error handler");
            return;
        }
        tracing::error!(path = %ctx.request().path(), error = %err, "unhandled fault");
        ctx.response = Response::internal_error();
    }

    async fn write_builder<W>(&self, ctx: &mut HttpContext, sink: &mut W, negotiated: &Negotiated) -> WriteOutcome
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        let response = ctx.take_response();
        self.writer
            .write(sink, response, ctx.session(), negotiated)
            .await
    }
}
