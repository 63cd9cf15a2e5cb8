//! Minimal scaffold usage: serve "Hello, World!" on port 8080 until the
//! process receives SIGINT/SIGTERM, then drain and report why we stopped.
//!
//! Run with `cargo run --example hello`, then `kill -TERM <pid>` or
//! Ctrl-C to watch the graceful shutdown.

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;

use gantry::{HttpResponse, HttpScaffold, ScaffoldConfig};

async fn hello(_req: Request<Incoming>) -> HttpResponse {
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", "text/plain")
        .body(Full::new(Bytes::from("Hello, World!")))
        .expect("static response never fails to build")
}

#[tokio::main]
async fn main() -> Result<(), gantry::ScaffoldError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut scaffold = HttpScaffold::new(ScaffoldConfig::builder().port(8080).build());
    scaffold.catch_signals();

    scaffold.open().await?;
    println!("listening on {}", scaffold.local_addr().expect("opened"));

    let reason = scaffold.listen(hello).await?;
    println!("HTTP server shut down: {reason}");
    Ok(())
}
