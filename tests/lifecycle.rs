//! End-to-end request lifecycle tests driving `Application::handle`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use trellis::http::{HttpContext, Method, RawRequest, Version, TEXT_PLAIN};
use trellis::{json, Application, Response, ServerError, Terminal};

mod common;
use common::MemorySink;

fn app() -> Application {
    let mut app = Application::new();
    app.static_dir("/this/web/root/does/not/exist");
    app
}

async fn send(app: &Application, raw: RawRequest) -> (trellis::Disposition, MemorySink) {
    let mut sink = MemorySink::default();
    let disposition = app.handle(&raw, &mut sink).await;
    (disposition, sink)
}

#[tokio::test]
async fn unhandled_404_names_the_path() {
    let (disposition, sink) = send(&app(), RawRequest::new(Method::GET, "/nothing/here?x=1")).await;

    assert_eq!(disposition.terminal, Terminal::NotFound);
    let response = sink.parsed();
    assert_eq!(response.status, 404);
    assert_eq!(response.header("content-type"), Some(TEXT_PLAIN));
    assert!(response.text().contains("/nothing/here"));
    assert_eq!(sink.responses(), 1);
}

#[tokio::test]
async fn handler_fault_gives_fixed_500_and_keeps_connection_preference() {
    let mut app = app();
    app.get("/fail", |_| Err(ServerError::handler("database unavailable")))
        .unwrap();

    let (disposition, sink) = send(&app, RawRequest::new(Method::GET, "/fail")).await;
    assert_eq!(disposition.terminal, Terminal::Faulted);
    assert!(disposition.keep_alive);
    let response = sink.parsed();
    assert_eq!(response.status, 500);
    assert_eq!(response.text(), "Internal Server Error");
    assert_eq!(response.header("connection"), Some("keep-alive"));
    assert!(!sink.closed);

    let raw = RawRequest::new(Method::GET, "/fail").header("Connection", "close");
    let (disposition, sink) = send(&app, raw).await;
    assert!(!disposition.keep_alive);
    assert_eq!(sink.parsed().header("connection"), Some("close"));
    assert!(sink.closed);

    let raw = RawRequest::new(Method::GET, "/fail").version(Version::Http10);
    let (disposition, sink) = send(&app, raw).await;
    assert!(!disposition.keep_alive);
    assert!(sink.closed);
}

#[tokio::test]
async fn stopping_interceptor_prevents_the_handler() {
    let invoked = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&invoked);

    let mut app = app();
    app.intercept("/api/**", |ctx| {
        ctx.status(403, "blocked", TEXT_PLAIN)?;
        Ok(true)
    })
    .unwrap();
    app.get("/api/users", move |ctx| {
        flag.store(true, Ordering::SeqCst);
        ctx.text("users")
    })
    .unwrap();

    let (disposition, sink) = send(&app, RawRequest::new(Method::GET, "/api/users")).await;
    assert_eq!(disposition.terminal, Terminal::Intercepted);
    assert!(!invoked.load(Ordering::SeqCst));
    assert_eq!(sink.parsed().status, 403);
    assert_eq!(sink.parsed().text(), "blocked");
    assert_eq!(sink.responses(), 1);
}

#[tokio::test]
async fn passing_interceptors_decorate_the_routed_response() {
    let mut app = app();
    app.intercept("/**", |ctx| {
        ctx.header("X-Trace", "on");
        Ok(false)
    })
    .unwrap();
    app.get("/hello", |ctx| ctx.text("hi")).unwrap();

    let (disposition, sink) = send(&app, RawRequest::new(Method::GET, "/hello/")).await;
    assert_eq!(disposition.terminal, Terminal::Routed);
    let response = sink.parsed();
    assert_eq!(response.header("x-trace"), Some("on"));
    assert_eq!(response.text(), "hi");
}

#[tokio::test]
async fn interceptor_fault_is_offered_to_error_handlers() {
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&seen);

    let mut app = app();
    app.intercept("/**", |_| Err(ServerError::handler("auth backend down")))
        .unwrap();
    app.on_error(move |ctx, status, err| {
        counter.fetch_add(1, Ordering::SeqCst);
        assert_eq!(status, 0);
        let err = err.ok_or_else(|| ServerError::handler("missing fault"))?;
        ctx.status(503, err.to_string(), TEXT_PLAIN)?;
        Ok(true)
    });

    let (disposition, sink) = send(&app, RawRequest::new(Method::GET, "/")).await;
    assert_eq!(disposition.terminal, Terminal::Faulted);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    let response = sink.parsed();
    assert_eq!(response.status, 503);
    assert!(response.text().contains("auth backend down"));
}

#[tokio::test]
async fn faulting_error_handlers_fall_through_to_defaults() {
    let mut app = app();
    app.get("/boom", |_| panic!("handler exploded")).unwrap();
    app.on_error(|_, _, _| Err(ServerError::handler("secondary fault")));
    app.on_error(|_, _, _| panic!("error handler exploded"));

    let (disposition, sink) = send(&app, RawRequest::new(Method::GET, "/boom")).await;
    assert_eq!(disposition.terminal, Terminal::Faulted);
    assert_eq!(sink.parsed().status, 500);
    assert_eq!(sink.parsed().text(), "Internal Server Error");

    let (disposition, sink) = send(&app, RawRequest::new(Method::GET, "/absent")).await;
    assert_eq!(disposition.terminal, Terminal::NotFound);
    assert_eq!(sink.parsed().status, 404);
    assert_eq!(sink.responses(), 1);
}

#[tokio::test]
async fn fault_response_discards_partial_handler_output() {
    let mut app = app();
    app.get("/partial", |ctx| {
        ctx.header("X-Half-Done", "yes").set_body("partial");
        Err(ServerError::handler("gave up"))
    })
    .unwrap();

    let (_, sink) = send(&app, RawRequest::new(Method::GET, "/partial")).await;
    let response = sink.parsed();
    assert_eq!(response.status, 500);
    assert!(response.header("x-half-done").is_none());
    assert_eq!(response.text(), "Internal Server Error");
}

#[tokio::test]
async fn every_terminal_path_writes_exactly_one_response() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("index.html"), "<h1>index</h1>").unwrap();

    let mut app = Application::new();
    app.static_dir(root.path());
    app.intercept("/blocked/**", |_| Ok(true)).unwrap();
    app.get("/ok", |ctx| ctx.text("ok")).unwrap();
    app.get("/fault", |_| Err(ServerError::handler("x"))).unwrap();

    let cases = [
        ("/blocked/a", Terminal::Intercepted),
        ("/ok", Terminal::Routed),
        ("/", Terminal::StaticServed),
        ("/missing", Terminal::NotFound),
        ("/fault", Terminal::Faulted),
    ];
    for (path, terminal) in cases {
        let (disposition, sink) = send(&app, RawRequest::new(Method::GET, path)).await;
        assert_eq!(disposition.terminal, terminal, "{path}");
        assert_eq!(sink.responses(), 1, "{path}");
    }
}

#[tokio::test]
async fn static_files_are_served_and_compressed() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("css")).unwrap();
    let css = "body { color: rebeccapurple; }\n".repeat(40);
    std::fs::write(root.path().join("css/site.css"), &css).unwrap();

    let mut app = Application::new();
    app.static_dir(root.path());

    let (disposition, sink) = send(&app, RawRequest::new(Method::GET, "/css/site.css")).await;
    assert_eq!(disposition.terminal, Terminal::StaticServed);
    let response = sink.parsed();
    assert_eq!(response.status, 200);
    assert_eq!(response.header("content-type"), Some("text/css; charset=UTF-8"));
    assert_eq!(response.text(), css);
    assert!(response.header("last-modified").is_some());
    assert!(response.session_id().is_some());

    let raw = RawRequest::new(Method::GET, "/css/site.css").header("Accept-Encoding", "gzip, deflate");
    let (_, sink) = send(&app, raw).await;
    let response = sink.parsed();
    assert_eq!(response.header("content-encoding"), Some("gzip"));
    let mut decoded = String::new();
    std::io::Read::read_to_string(&mut flate2::read::GzDecoder::new(&response.body[..]), &mut decoded)
        .unwrap();
    assert_eq!(decoded, css);
}

#[tokio::test]
async fn static_traversal_is_a_404() {
    let outer = tempfile::tempdir().unwrap();
    std::fs::write(outer.path().join("secret.txt"), "top secret").unwrap();
    let root = outer.path().join("www");
    std::fs::create_dir(&root).unwrap();

    let mut app = Application::new();
    app.static_dir(&root);

    for path in ["/../secret.txt", "/%2e%2e/secret.txt"] {
        let (disposition, sink) = send(&app, RawRequest::new(Method::GET, path)).await;
        assert_eq!(disposition.terminal, Terminal::NotFound, "{path}");
        assert!(!sink.parsed().text().contains("top secret"));
    }
}

#[tokio::test]
async fn routes_win_over_static_files() {
    let root = tempfile::tempdir().unwrap();
    std::fs::write(root.path().join("index.html"), "static").unwrap();

    let mut app = Application::new();
    app.static_dir(root.path());
    app.get("/index.html", |ctx| ctx.text("dynamic")).unwrap();

    let (disposition, sink) = send(&app, RawRequest::new(Method::GET, "/index.html")).await;
    assert_eq!(disposition.terminal, Terminal::Routed);
    assert_eq!(sink.parsed().text(), "dynamic");
}

#[tokio::test]
async fn session_cookie_is_on_every_response_and_sticks() {
    let mut app = app();
    app.get("/count", |ctx| {
        let count = ctx.session().get::<u32>("count").unwrap_or(0) + 1;
        ctx.set_session("count", count);
        ctx.text(count.to_string())
    })
    .unwrap();

    let (_, sink) = send(&app, RawRequest::new(Method::GET, "/count")).await;
    let id = sink.parsed().session_id().unwrap();
    let cookie = sink.parsed().all("set-cookie").join(" | ");
    assert!(cookie.contains("Path=/"));
    assert!(cookie.contains("HttpOnly"));

    let raw = RawRequest::new(Method::GET, "/count").header("Cookie", format!("SESSIONID={id}"));
    let (_, sink) = send(&app, raw).await;
    assert_eq!(sink.parsed().session_id().as_deref(), Some(id.as_str()));
    assert_eq!(sink.parsed().text(), "2");

    let raw = RawRequest::new(Method::GET, "/missing").header("Cookie", format!("SESSIONID={id}"));
    let (_, sink) = send(&app, raw).await;
    assert_eq!(sink.parsed().status, 404);
    assert_eq!(sink.parsed().session_id().as_deref(), Some(id.as_str()));
}

#[tokio::test]
async fn expired_session_is_replaced() {
    let mut app = app();
    app.session_ttl(Duration::from_millis(1));
    app.get("/", |ctx| ctx.text("x")).unwrap();

    let (_, sink) = send(&app, RawRequest::new(Method::GET, "/")).await;
    let first = sink.parsed().session_id().unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    app.sessions().sweep();

    let raw = RawRequest::new(Method::GET, "/").header("Cookie", format!("SESSIONID={first}"));
    let (_, sink) = send(&app, raw).await;
    let second = sink.parsed().session_id().unwrap();
    assert_ne!(first, second);
}

#[tokio::test]
async fn write_failure_falls_back_once() {
    let mut app = app();
    app.get("/", |ctx| ctx.text("never seen")).unwrap();
    let raw = RawRequest::new(Method::GET, "/");

    let mut sink = MemorySink::failing(1);
    let disposition = app.handle(&raw, &mut sink).await;
    assert_eq!(disposition.terminal, Terminal::Routed);
    assert!(!disposition.keep_alive);
    assert_eq!(sink.responses(), 1);
    assert_eq!(sink.parsed().status, 500);
    assert_eq!(sink.parsed().header("connection"), Some("close"));
    assert!(sink.closed);

    let mut sink = MemorySink::failing(usize::MAX);
    let disposition = app.handle(&raw, &mut sink).await;
    assert!(!disposition.keep_alive);
    assert!(sink.closed);
    assert!(sink.data.is_empty());
}

#[tokio::test]
async fn forms_and_uploads_reach_handlers() {
    let uploads = tempfile::tempdir().unwrap();
    let mut app = app();
    app.upload_dir(uploads.path());
    app.post("/profile/{user}", |ctx: &mut HttpContext| {
        let request = ctx.request();
        let avatar = request.file("avatar").map(|f| {
            let bytes = std::fs::read(f.path()).unwrap_or_default();
            json!({ "name": f.filename(), "type": f.content_type(), "size": bytes.len() })
        });
        let body = json!({
            "user": request.param("user"),
            "bio": request.form().get("bio"),
            "avatar": avatar,
        });
        ctx.json(&body)
    })
    .unwrap();

    let boundary = "----trellis";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"bio\"\r\n\r\nI like crabs\r\n\
         --{boundary}\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\n\
         Content-Type: image/png\r\n\r\n\x01\x02\x03\r\n--{boundary}--\r\n"
    );
    let raw = RawRequest::new(Method::POST, "/profile/ferris")
        .header("Content-Type", format!("multipart/form-data; boundary={boundary}"))
        .body(body);

    let (disposition, sink) = send(&app, raw).await;
    assert_eq!(disposition.terminal, Terminal::Routed);
    let value: serde_json::Value = serde_json::from_slice(&sink.parsed().body).unwrap();
    assert_eq!(value["user"], "ferris");
    assert_eq!(value["bio"], "I like crabs");
    assert_eq!(value["avatar"]["name"], "me.png");
    assert_eq!(value["avatar"]["type"], "image/png");
    assert_eq!(value["avatar"]["size"], 3);
}

#[tokio::test]
async fn head_requests_get_headers_only() {
    let mut app = app();
    app.head("/resource", |ctx| ctx.text("twelve bytes")).unwrap();

    let (_, sink) = send(&app, RawRequest::new(Method::HEAD, "/resource")).await;
    let response = sink.parsed();
    assert_eq!(response.header("content-length"), Some("12"));
    assert!(response.body.is_empty());
}

#[tokio::test]
async fn handler_payload_replaces_the_builder() {
    let mut app = app();
    app.get("/moved", |ctx| {
        ctx.header("X-Dropped", "yes");
        Ok(Some(Response::redirect("/new-home", 301)))
    })
    .unwrap();

    let (_, sink) = send(&app, RawRequest::new(Method::GET, "/moved")).await;
    let response = sink.parsed();
    assert_eq!(response.status, 301);
    assert_eq!(response.header("location"), Some("/new-home"));
    assert!(response.header("x-dropped").is_none());
}

#[tokio::test]
async fn body_write_failure_closes_without_a_second_response() {
    let mut app = app();
    app.get("/x", |ctx| ctx.text("hello body")).unwrap();

    let mut sink = MemorySink::failing_after(1);
    let disposition = app.handle(&RawRequest::new(Method::GET, "/x"), &mut sink).await;

    assert_eq!(disposition.terminal, Terminal::Routed);
    assert!(!disposition.keep_alive);
    assert!(sink.closed);
    assert_eq!(sink.responses(), 1);
    let response = sink.parsed();
    assert_eq!(response.status, 200);
    assert!(response.body.is_empty());
}
