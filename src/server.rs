//! Static file server for the browser bundle.
//!
//! Plain HTTP/1.1, one request per connection, GET/HEAD/OPTIONS only.

use std::path::{Component, Path, PathBuf};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const MAX_REQUEST_HEAD: usize = 8192;

const CORS_HEADERS: &[(&str, &str)] = &[
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
];

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub root: PathBuf,
}

/// A fully built response, ready to be written to the socket
#[derive(Debug, Clone, PartialEq)]
pub struct StaticResponse {
    pub status: u16,
    pub reason: &'static str,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl StaticResponse {
    fn html(status: u16, reason: &'static str, body: String) -> Self {
        Self { status, reason, content_type: "text/html", body: body.into_bytes() }
    }

    pub fn to_bytes(&self, include_body: bool) -> Vec<u8> {
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\n",
            self.status,
            self.reason,
            self.content_type,
            self.body.len()
        );
        for (name, value) in CORS_HEADERS {
            head.push_str(&format!("{}: {}\r\n", name, value));
        }
        head.push_str("Connection: close\r\n\r\n");

        let mut bytes = head.into_bytes();
        if include_body {
            bytes.extend_from_slice(&self.body);
        }
        bytes
    }
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "html" => "text/html",
        "css" => "text/css",
        "js" => "text/javascript",
        "json" => "application/json",
        "png" => "image/png",
        "jpg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        _ => "text/plain",
    }
}

/// Map a request target onto a file under `root`. Query strings are
/// dropped; anything that climbs out of the root yields `None`.
pub fn resolve_path(root: &Path, target: &str) -> Option<PathBuf> {
    let path = target.split(['?', '#']).next().unwrap_or("/");
    let path = if path == "/" { "/index.html" } else { path };

    let mut resolved = root.to_path_buf();
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(resolved)
}

fn not_found_page(path: &str) -> StaticResponse {
    StaticResponse::html(
        404,
        "Not Found",
        format!(
            "<!DOCTYPE html>\n<html>\n<head><title>404 - Not Found</title>\
             <style>body {{ font-family: Arial, sans-serif; text-align: center; padding: 50px; }} h1 {{ color: #ef4444; }}</style></head>\n\
             <body>\n<h1>404 - Page Not Found</h1>\n<p>The requested file <code>{}</code> was not found.</p>\n\
             <a href=\"/\">Go back to home</a>\n</body>\n</html>\n",
            escape_html(path)
        ),
    )
}

fn server_error_page() -> StaticResponse {
    StaticResponse::html(
        500,
        "Internal Server Error",
        "<!DOCTYPE html>\n<html>\n<head><title>500 - Internal Server Error</title>\
         <style>body { font-family: Arial, sans-serif; text-align: center; padding: 50px; } h1 { color: #ef4444; }</style></head>\n\
         <body>\n<h1>500 - Internal Server Error</h1>\n<p>Sorry, there was an error serving the file.</p>\n\
         <a href=\"/\">Go back to home</a>\n</body>\n</html>\n"
            .to_string(),
    )
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// Build the response for one request line's method and target.
pub async fn respond(root: &Path, method: &str, target: &str) -> StaticResponse {
    match method {
        "OPTIONS" => {
            return StaticResponse { status: 200, reason: "OK", content_type: "text/plain", body: Vec::new() }
        }
        "GET" | "HEAD" => {}
        _ => {
            return StaticResponse {
                status: 405,
                reason: "Method Not Allowed",
                content_type: "text/plain",
                body: b"Method Not Allowed".to_vec(),
            }
        }
    }

    let display_path = target.split(['?', '#']).next().unwrap_or("/");
    let Some(file_path) = resolve_path(root, target) else {
        warn!("rejected path outside root: {}", target);
        return not_found_page(display_path);
    };

    match tokio::fs::metadata(&file_path).await {
        Ok(meta) if meta.is_file() => {}
        _ => return not_found_page(display_path),
    }

    match tokio::fs::read(&file_path).await {
        Ok(body) => StaticResponse {
            status: 200,
            reason: "OK",
            content_type: content_type_for(&file_path),
            body,
        },
        Err(e) => {
            warn!("failed to read {}: {}", file_path.display(), e);
            server_error_page()
        }
    }
}

async fn handle_connection(mut stream: TcpStream, root: PathBuf) -> Result<()> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if buf.windows(4).any(|w| w == b"\r\n\r\n") || buf.len() >= MAX_REQUEST_HEAD {
            break;
        }
    }

    let head = String::from_utf8_lossy(&buf);
    let mut parts = head.lines().next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        let bad = StaticResponse {
            status: 400,
            reason: "Bad Request",
            content_type: "text/plain",
            body: b"Bad Request".to_vec(),
        };
        stream.write_all(&bad.to_bytes(true)).await?;
        return Ok(());
    };

    let response = respond(&root, method, target).await;
    debug!("{} {} -> {}", method, target, response.status);
    stream.write_all(&response.to_bytes(method != "HEAD")).await?;
    stream.shutdown().await.ok();
    Ok(())
}

/// Accept connections until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, root: PathBuf, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down the server...");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        continue;
                    }
                };
                let root = root.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, root).await {
                        debug!("connection from {} ended with error: {}", peer, e);
                    }
                });
            }
        }
    }

    Ok(())
}

/// Bind on all interfaces and serve until Ctrl+C.
pub async fn run(config: ServerConfig) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("Bind 0.0.0.0:{} failed", config.port))?;

    if !config.root.join("index.html").exists() {
        warn!("no index.html under {}", config.root.display());
    }

    println!("🚀 DeepSeek AI Assistant Web Server running at:");
    println!("   Local:   http://localhost:{}", config.port);
    println!("   Network: http://127.0.0.1:{}", config.port);
    println!();
    println!("Press Ctrl+C to stop the server");
    info!("serving {} on port {}", config.root.display(), config.port);

    serve(listener, config.root, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    println!("Server stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn site() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>chat</h1>").unwrap();
        fs::write(dir.path().join("style.CSS"), "body{}").unwrap();
        fs::create_dir(dir.path().join("js")).unwrap();
        fs::write(dir.path().join("js/script.js"), "let x = 1;").unwrap();
        dir
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("a/index.html")), "text/html");
        assert_eq!(content_type_for(Path::new("style.CSS")), "text/css");
        assert_eq!(content_type_for(Path::new("icon.svg")), "image/svg+xml");
        assert_eq!(content_type_for(Path::new("README")), "text/plain");
    }

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/srv/web");
        assert_eq!(resolve_path(root, "/"), Some(root.join("index.html")));
        assert_eq!(resolve_path(root, "/js/app.js?v=2"), Some(root.join("js/app.js")));
        assert_eq!(resolve_path(root, "/../etc/passwd"), None);
        assert_eq!(resolve_path(root, "/js/../../secret"), None);
    }

    #[tokio::test]
    async fn test_serves_index_for_root() {
        let dir = site();
        let response = respond(dir.path(), "GET", "/").await;
        assert_eq!(response.status, 200);
        assert_eq!(response.content_type, "text/html");
        assert_eq!(response.body, b"<h1>chat</h1>");
    }

    #[tokio::test]
    async fn test_missing_file_is_404_page() {
        let dir = site();
        let response = respond(dir.path(), "GET", "/nope.png").await;
        assert_eq!(response.status, 404);
        assert_eq!(response.content_type, "text/html");
        assert!(String::from_utf8_lossy(&response.body).contains("<code>/nope.png</code>"));

        // Directories are not files
        assert_eq!(respond(dir.path(), "GET", "/js").await.status, 404);
        assert_eq!(respond(dir.path(), "GET", "/../x").await.status, 404);
    }

    #[tokio::test]
    async fn test_options_and_unknown_methods() {
        let dir = site();
        assert_eq!(respond(dir.path(), "OPTIONS", "/anything").await.status, 200);
        assert_eq!(respond(dir.path(), "DELETE", "/index.html").await.status, 405);
    }

    #[test]
    fn test_response_carries_cors_headers() {
        let response = StaticResponse {
            status: 200,
            reason: "OK",
            content_type: "text/css",
            body: b"body{}".to_vec(),
        };
        let text = String::from_utf8(response.to_bytes(true)).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(text.contains("Access-Control-Allow-Headers: Content-Type, Authorization\r\n"));
        assert!(text.contains("Content-Length: 6\r\n"));
        assert!(text.ends_with("\r\n\r\nbody{}"));

        let head_only = String::from_utf8(response.to_bytes(false)).unwrap();
        assert!(head_only.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let dir = site();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(serve(listener, dir.path().to_path_buf(), async move {
            let _ = stop_rx.await;
        }));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /js/script.js HTTP/1.1\r\nHost: localhost\r\n\r\n")
            .await
            .unwrap();
        let mut raw = Vec::new();
        client.read_to_end(&mut raw).await.unwrap();
        let text = String::from_utf8_lossy(&raw);

        assert!(text.starts_with("HTTP/1.1 200 OK"));
        assert!(text.contains("Content-Type: text/javascript"));
        assert!(text.ends_with("let x = 1;"));

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
