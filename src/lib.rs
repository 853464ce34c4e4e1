//! # Trellis
//!
//! An embeddable HTTP request-processing engine.
//!
//! ## Features
//!
//! - Route templates with named parameters and `*` / `**` wildcards
//! - Path-scoped interceptors that can short-circuit a request
//! - Ordered error handlers for 404s and faults
//! - In-memory sessions carried in a `SESSIONID` cookie
//! - URL-encoded and multipart form parsing with file uploads
//! - Static file serving with gzip/deflate compression
//!
//! ## Quick Start
//!
//! ```no_run
//! use trellis::app::Application;
//! use trellis::json;
//!
//! fn main() {
//!     let mut app = Application::new();
//!
//!     app.get("/", |ctx| ctx.json(&json!({ "message": "Hello, World!" })))
//!         .unwrap();
//!
//!     app.listen("127.0.0.1:3000").unwrap();
//! }
//! ```
//!
//! ## Interceptors
//!
//! ```no_run
//! # use trellis::app::Application;
//! # let mut app = Application::new();
//! app.intercept("/admin/**", |ctx| {
//!     if ctx.request().cookie("role") == Some("admin") {
//!         return Ok(false);
//!     }
//!     ctx.status(403, "forbidden", trellis::http::TEXT_PLAIN)?;
//!     Ok(true)
//! })
//! .unwrap();
//! ```

pub mod app;
pub mod chain;
pub mod config;
pub mod error;
pub mod handler;
pub mod http;
pub mod router;
pub mod server;
pub mod session;
pub mod static_files;
pub mod template;
pub mod writer;
pub extern crate serde_json;

pub use app::{Application, Disposition, Terminal};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{Handler, HandlerResult};
pub use crate::http::{HttpContext, Method, RawRequest, Request, Response};
pub use router::{PathPattern, Router};
pub use session::{Session, SessionRegistry};

// Reexport serde_json
pub use serde_json::{json, Value};
