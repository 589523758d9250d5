//! Static-file origin server for trying the proxy locally.
//!
//! Speaks keep-alive HTTP/1.1, echoes the `Request-Id` header and marks
//! responses cacheable by file extension.
//!
//! ```text
//! cargo run --example origin -- --root ./public --port 9000
//! cargo run -- --upstream-port 9000
//! ```

use std::path::{Component, Path, PathBuf};

use clap::Parser;
use pooled_proxy::http::{Message, ParseState, REQUEST_ID_HEADER};
use pooled_proxy::observability::logging;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Parser, Debug)]
#[command(name = "origin", about = "Static-file origin server")]
struct Args {
    /// Directory to serve.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    #[arg(long, default_value_t = 9000)]
    port: u16,
}

/// Content type and cache lifetime for a file extension.
fn file_policy(path: &Path) -> (&'static str, u64) {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("html") | Some("htm") => ("text/html", 3600),
        Some("css") => ("text/css", 2_592_000),
        Some("jpg") | Some("jpeg") => ("image/jpeg", 2_592_000),
        Some("png") => ("image/png", 2_592_000),
        Some("pdf") => ("application/pdf", 86_400),
        Some("js") => ("application/javascript", 0),
        Some("txt") => ("text/plain", 0),
        _ => ("application/octet-stream", 0),
    }
}

/// Map a request URI onto the served directory, refusing to leave it.
fn resolve(root: &Path, uri: &str) -> Option<PathBuf> {
    let path = uri.split(['?', '#']).next().unwrap_or("/");
    let relative = Path::new(path.trim_start_matches('/'));
    if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
        return None;
    }

    let full = root.join(relative);
    if full.is_dir() {
        Some(full.join("index.html"))
    } else {
        Some(full)
    }
}

fn status_only(status: &str, request_id: Option<&str>) -> Vec<u8> {
    let mut head = format!("HTTP/1.1 {status}\r\nContent-Length: 0\r\n");
    if let Some(id) = request_id {
        head.push_str(&format!("Request-Id: {id}\r\n"));
    }
    head.push_str("\r\n");
    head.into_bytes()
}

async fn respond(root: &Path, request: &Message) -> Vec<u8> {
    let request_id = request.header(REQUEST_ID_HEADER);

    if request.method() != "GET" {
        return status_only("405 Method Not Allowed", request_id);
    }
    let Some(path) = resolve(root, request.uri()) else {
        return status_only("400 Bad Request", request_id);
    };

    let body = match tokio::fs::read(&path).await {
        Ok(body) => body,
        Err(_) => {
            tracing::debug!(uri = %request.uri(), "Not found");
            return status_only("404 Not Found", request_id);
        }
    };

    let (content_type, max_age) = file_policy(&path);
    let mut head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nCache-Control: max-age={max_age}\r\n",
        body.len()
    );
    if let Some(id) = request_id {
        head.push_str(&format!("Request-Id: {id}\r\n"));
    }
    head.push_str("\r\n");

    let mut response = head.into_bytes();
    response.extend_from_slice(&body);
    response
}

async fn serve_connection(mut socket: TcpStream, root: PathBuf) -> std::io::Result<()> {
    let mut buf = vec![0u8; 4096];
    let mut request = Message::request();

    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        let awaiting_start_line = request.state() == ParseState::Start;
        request.feed(&buf[..n]);

        // A full line was consumed without leaving the start state: the
        // parser dropped it as malformed.
        if awaiting_start_line
            && request.state() == ParseState::Start
            && request.buffered_len() == 0
            && buf[..n].contains(&b'\n')
        {
            socket.write_all(&status_only("400 Bad Request", None)).await?;
            return Ok(());
        }
        if !request.is_complete() {
            continue;
        }

        tracing::info!(method = %request.method(), uri = %request.uri(), "Request");
        let response = respond(&root, &request).await;
        socket.write_all(&response).await?;

        if !request.keep_alive() {
            return Ok(());
        }
        request = Message::request();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    logging::init("info");

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    tracing::info!(address = %listener.local_addr()?, root = %args.root.display(), "Origin listening");

    loop {
        let (socket, peer) = listener.accept().await?;
        let root = args.root.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_connection(socket, root).await {
                tracing::debug!(peer_addr = %peer, error = %e, "Connection ended");
            }
        });
    }
}
