//! Hand-rolled HTTP test server.
//!
//! The retrieval pack has no mocking crate (no `wiremock`/`httpmock`), so
//! integration tests spin up a tiny single-threaded TCP responder instead,
//! matching a fixed table of `(method, path) -> response` entries.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

#[derive(Clone)]
pub enum Response {
    Html(String),
    Bytes(Vec<u8>),
    NotFound,
}

pub struct TestServer {
    pub addr: SocketAddr,
}

impl TestServer {
    /// Starts a server on an ephemeral port backed by `routes`, keyed by
    /// `"METHOD path"` (e.g. `"GET /a/"`). Runs until the process exits;
    /// tests are short-lived so nothing explicitly shuts it down.
    pub fn start(routes: HashMap<String, Response>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
        let addr = listener.local_addr().expect("local addr");
        let routes = Arc::new(routes);

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                let routes = routes.clone();
                std::thread::spawn(move || handle(stream, &routes));
            }
        });

        Self { addr }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

fn handle(mut stream: TcpStream, routes: &HashMap<String, Response>) {
    let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).unwrap_or(0) == 0 {
        return;
    }
    // Drain headers.
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).unwrap_or(0) == 0 || line == "\r\n" {
            break;
        }
    }

    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("GET");
    let path = parts.next().unwrap_or("/");
    let key = format!("{method} {path}");
    let get_key = format!("GET {path}");

    match routes.get(&key).or_else(|| (method == "HEAD").then(|| routes.get(&get_key)).flatten()) {
        Some(Response::Html(body)) => {
            let status_line = if method == "HEAD" { "" } else { body.as_str() };
            write_response(&mut stream, 200, "text/html", status_line.len(), method == "HEAD", status_line.as_bytes());
        }
        Some(Response::Bytes(bytes)) => {
            write_response(&mut stream, 200, "application/octet-stream", bytes.len(), method == "HEAD", bytes);
        }
        Some(Response::NotFound) | None => {
            let body = b"not found";
            write_response(&mut stream, 404, "text/plain", body.len(), method == "HEAD", body);
        }
    }
}

fn write_response(stream: &mut TcpStream, status: u16, content_type: &str, len: usize, head_only: bool, body: &[u8]) {
    let reason = if status == 200 { "OK" } else { "Not Found" };
    let header = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nConnection: close\r\n\r\n"
    );
    let _ = stream.write_all(header.as_bytes());
    if !head_only {
        let _ = stream.write_all(body);
    }
}
