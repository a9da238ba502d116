//! Local HTTP callback server for the interactive B2C sign-in.
//!
//! Provides a temporary localhost server to receive the authorization
//! redirect, display a result page to the user, and pass the callback URL
//! back to the identity client.

use crate::error::ConfigError;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use url::Url;

/// Default port used when the redirect URI does not name one.
pub const DEFAULT_CALLBACK_PORT: u16 = 28491;

/// Result from the callback server.
#[derive(Debug)]
pub enum CallbackResult {
    /// Successfully received callback with the full URL.
    Success(String),
    /// No callback arrived before the deadline.
    TimedOut,
    /// Error occurred.
    Error(String),
}

/// A bound, not yet accepting, loopback listener for one redirect.
pub struct CallbackServer {
    listener: TcpListener,
    port: u16,
    path: String,
}

impl CallbackServer {
    /// Bind the loopback port named by `redirect_uri`.
    ///
    /// Binding happens before the browser is opened so the redirect cannot race the listener.
    pub fn bind(redirect_uri: &str) -> Result<Self, CallbackResult> {
        let (port, path) = redirect_target(redirect_uri)
            .map_err(|e| CallbackResult::Error(e.to_string()))?;
        let addr = format!("127.0.0.1:{}", port);

        let listener = TcpListener::bind(&addr).map_err(|e| {
            error!("Failed to bind callback server to {}: {}", addr, e);
            CallbackResult::Error(format!("Failed to start server: {}", e))
        })?;

        // Non-blocking so the deadline can be checked between accepts
        listener.set_nonblocking(true).map_err(|e| {
            error!("Failed to set non-blocking mode: {}", e);
            CallbackResult::Error(format!("Server configuration error: {}", e))
        })?;

        let port = listener.local_addr().map(|a| a.port()).unwrap_or(port);
        info!("OAuth callback server listening on 127.0.0.1:{}", port);

        Ok(Self {
            listener,
            port,
            path,
        })
    }

    /// Port actually bound.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for a single OAuth callback, giving up after `timeout`.
    ///
    /// Returns the full callback URL (including query parameters) when received.
    pub fn wait(self, timeout: Duration) -> CallbackResult {
        let deadline = Instant::now() + timeout;

        loop {
            if Instant::now() >= deadline {
                info!("Callback server timed out");
                return CallbackResult::TimedOut;
            }

            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    debug!("Connection from {}", peer_addr);
                    if let Some(url) = handle_connection(stream, &self.path, self.port) {
                        info!("OAuth callback received");
                        return CallbackResult::Success(url);
                    }
                    // Not a valid callback request, continue listening
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    return CallbackResult::Error(format!("Connection error: {}", e));
                }
            }
        }
    }
}

/// Port and path of a loopback redirect URI.
pub fn redirect_target(redirect_uri: &str) -> Result<(u16, String), ConfigError> {
    let url = Url::parse(redirect_uri)
        .map_err(|_| ConfigError::InvalidRedirectUri(redirect_uri.to_string()))?;

    let is_loopback = matches!(url.host_str(), Some("localhost") | Some("127.0.0.1"));
    if url.scheme() != "http" || !is_loopback {
        return Err(ConfigError::InvalidRedirectUri(redirect_uri.to_string()));
    }

    let port = url.port().unwrap_or(DEFAULT_CALLBACK_PORT);
    Ok((port, url.path().to_string()))
}

/// Handle an incoming HTTP connection.
///
/// Returns Some(url) if this was a valid OAuth callback, None otherwise.
fn handle_connection(mut stream: TcpStream, callback_path: &str, port: u16) -> Option<String> {
    // Accepted sockets inherit non-blocking mode on some platforms
    let _ = stream.set_nonblocking(false);
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));

    let mut buffer = [0; 4096];
    let bytes_read = match stream.read(&mut buffer) {
        Ok(n) => n,
        Err(e) => {
            debug!("Failed to read request: {}", e);
            return None;
        }
    };

    let request = String::from_utf8_lossy(&buffer[..bytes_read]);
    debug!("Received request: {}", request.lines().next().unwrap_or(""));

    let request_line = request.lines().next()?;
    let parts: Vec<&str> = request_line.split_whitespace().collect();

    if parts.len() < 2 {
        send_error_response(&mut stream, 400, "Bad Request");
        return None;
    }

    let method = parts[0];
    let path = parts[1];

    if method != "GET" {
        send_error_response(&mut stream, 405, "Method Not Allowed");
        return None;
    }

    let request_path = path.split('?').next().unwrap_or("");
    if request_path != callback_path {
        send_error_response(&mut stream, 404, "Not Found");
        return None;
    }

    let full_url = format!("http://localhost:{}{}", port, path);

    if path.contains("error=") {
        send_result_page(&mut stream, false, &error_description(path));
        // Still return the URL so the client can map the error
        return Some(full_url);
    }

    if !path.contains("code=") {
        send_error_response(&mut stream, 400, "Missing authorization code");
        return None;
    }

    send_result_page(
        &mut stream,
        true,
        "You are signed in. You can close this tab and return to the app.",
    );

    Some(full_url)
}

/// Extract `error_description` from the request path.
fn error_description(path: &str) -> String {
    if let Some(start) = path.find("error_description=") {
        let start = start + "error_description=".len();
        let end = path[start..]
            .find('&')
            .map(|i| start + i)
            .unwrap_or(path.len());
        let raw = path[start..end].replace('+', " ");
        urlencoding::decode(&raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| "Authentication failed".to_string())
    } else {
        "Authentication was cancelled or failed.".to_string()
    }
}

/// Send the HTML result page.
fn send_result_page(stream: &mut TcpStream, success: bool, message: &str) {
    let (title, color) = if success {
        ("Authentication Successful", "#10B981")
    } else {
        ("Authentication Failed", "#EF4444")
    };

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{title}</title>
    <style>
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: #F3F4F6;
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
            margin: 0;
        }}
        .container {{
            background: white;
            padding: 3rem;
            border-radius: 1rem;
            border-top: 6px solid {color};
            text-align: center;
            max-width: 400px;
        }}
        h1 {{ color: #1F2937; font-size: 1.5rem; }}
        p {{ color: #6B7280; }}
    </style>
</head>
<body>
    <div class="container">
        <h1>{title}</h1>
        <p>{message}</p>
    </div>
</body>
</html>"#,
        title = title,
        color = color,
        message = html_escape(message),
    );

    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        html.len(),
        html
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Send an error response.
fn send_error_response(stream: &mut TcpStream, status: u16, message: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        message,
        message.len(),
        message
    );

    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get(port: u16, path: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path).unwrap();
        let mut response = String::new();
        let _ = stream.read_to_string(&mut response);
        response
    }

    #[test]
    fn test_redirect_target() {
        assert_eq!(
            redirect_target("http://localhost:28491/callback").unwrap(),
            (28491, "/callback".to_string())
        );
        assert_eq!(
            redirect_target("http://127.0.0.1/auth").unwrap(),
            (DEFAULT_CALLBACK_PORT, "/auth".to_string())
        );
        assert!(redirect_target("msauth.com.example://auth").is_err());
        assert!(redirect_target("https://example.com/callback").is_err());
    }

    #[test]
    fn test_error_description() {
        let target = "/callback?error=access_denied&error_description=User+cancelled%21&state=x";
        assert_eq!(error_description(target), "User cancelled!");
        assert_eq!(
            error_description("/callback?error=access_denied"),
            "Authentication was cancelled or failed."
        );
    }

    #[test]
    fn test_callback_round_trip() {
        let server = CallbackServer::bind("http://localhost:0/callback").unwrap();
        let port = server.port();
        let handle = std::thread::spawn(move || server.wait(Duration::from_secs(5)));

        let response = get(port, "/other");
        assert!(response.starts_with("HTTP/1.1 404"));

        let response = get(port, "/callback?code=abc&state=xyz");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("Authentication Successful"));

        match handle.join().unwrap() {
            CallbackResult::Success(url) => {
                assert_eq!(url, format!("http://localhost:{}/callback?code=abc&state=xyz", port))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_callback_timeout() {
        let server = CallbackServer::bind("http://localhost:0/callback").unwrap();
        assert!(matches!(
            server.wait(Duration::from_millis(150)),
            CallbackResult::TimedOut
        ));
    }
}
