//! Interceptor and error handler example for Trellis
//!
//! This example demonstrates:
//! - Logging every request
//! - Guarding a subtree with an API key
//! - Custom 404 pages and fault handling

use trellis::http::TEXT_PLAIN;
use trellis::{json, Application, ServerError};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut app = Application::new();

    // Runs for every path and never stops the request
    app.intercept("/**", |ctx| {
        tracing::info!(method = %ctx.request().method(), path = ctx.request().path(), "incoming");
        ctx.header("X-Powered-By", "trellis");
        Ok(false)
    })
    .unwrap();

    // Short-circuits anything below /api/ without a valid key
    app.intercept("/api/**", |ctx| {
        if ctx.request().header("x-api-key") == Some("secret") {
            return Ok(false);
        }
        ctx.status(401, "missing or invalid API key", TEXT_PLAIN)?;
        Ok(true)
    })
    .unwrap();

    app.get("/api/users", |ctx| ctx.json(&json!([{ "name": "ferris" }])))
        .unwrap();

    app.get("/fail", |_| Err(ServerError::handler("database unavailable")))
        .unwrap();

    // First handler owns 404s
    app.on_error(|ctx, status, _| {
        if status != 404 {
            return Ok(false);
        }
        let path = ctx.request().path().to_string();
        ctx.status(404, format!("<h1>Nothing at {path}</h1>"), "text/html")?;
        Ok(true)
    });

    // Second handler turns faults into JSON
    app.on_error(|ctx, _, err| {
        let Some(err) = err else {
            return Ok(false);
        };
        let status = err.status_code();
        ctx.json(&json!({ "error": err.to_string() }))?;
        ctx.response().status(status);
        Ok(true)
    });

    app.listen("127.0.0.1:3000")
        .expect("Server failed to start");
}
