//! A minimal "Hello, World!" server using Trellis
//!
//! Run with `RUST_LOG=debug` to see every request's terminal state.

use trellis::Application;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let mut app = Application::new();

    // Add a route that handles GET requests to "/"
    app.get("/", |ctx| ctx.text("Hello, World!"))
        .expect("valid route");

    app.listen("127.0.0.1:3000")
        .expect("Server failed to start");
}
