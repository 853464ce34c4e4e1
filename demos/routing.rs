//! Routing example for Trellis
//!
//! This example demonstrates:
//! - Path parameters and wildcards
//! - Query and form parameters
//! - JSON bodies
//! - Mounting a router under a prefix
//! - Sessions

use serde::{Deserialize, Serialize};
use trellis::router::Router;
use trellis::template::SimpleTemplateEngine;
use trellis::{json, Application, ServerError};
use tracing_subscriber::EnvFilter;

#[derive(Serialize, Deserialize)]
struct User {
    name: String,
    role: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut app = Application::new();
    app.static_dir("public");

    // Basic GET route
    app.get("/", |ctx| ctx.text("Welcome to the Trellis demo server!"))
        .unwrap();

    // Route with path parameter
    app.get("/users/{id}", |ctx| {
        let id = ctx.request().param("id").unwrap_or_default().to_string();
        ctx.text(format!("User ID: {id}"))
    })
    .unwrap();

    // Query parameters: /search?q=rust&tag=web&tag=http
    app.get("/search", |ctx| {
        let query = ctx.request().query().to_json();
        ctx.json(&query)
    })
    .unwrap();

    // POST request with JSON body
    app.post("/users", |ctx| match ctx.request().json::<User>() {
        Some(user) => ctx.json(&user),
        None => Err(ServerError::BadRequest("Invalid JSON body".to_string())),
    })
    .unwrap();

    // Multipart upload: files are written to the temp dir and cleaned up here
    app.post("/upload", |ctx| {
        let names: Vec<String> = ctx
            .request()
            .files()
            .iter()
            .map(|file| file.filename().to_string())
            .collect();
        for file in ctx.request().files() {
            std::fs::remove_file(file.path())?;
        }
        ctx.json(&json!({ "received": names }))
    })
    .unwrap();

    // Everything below /files/ lands in the wildcard
    app.get("/files/**", |ctx| {
        let rest = ctx.wildcard(0).unwrap_or_default().to_string();
        ctx.text(format!("requested file: {rest}"))
    })
    .unwrap();

    // Session counter
    app.get("/visits", |ctx| {
        let visits = ctx.session().get::<u64>("visits").unwrap_or(0) + 1;
        ctx.set_session("visits", visits);
        ctx.render(&SimpleTemplateEngine, "<p>Visit number {{visits}}</p>", &json!({ "visits": visits }))
    })
    .unwrap();

    // Group routes under /api prefix
    let mut api = Router::new();
    api.get("/status", |ctx| {
        ctx.json(&json!({
            "status": "operational",
            "version": env!("CARGO_PKG_VERSION")
        }))
    })
    .unwrap();

    // Mount the API router to the main server
    app.mount("/api", api).unwrap();

    app.listen("127.0.0.1:3000")
        .expect("Server failed to start")
}
