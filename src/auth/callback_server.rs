//! Loopback HTTP server that receives the OAuth redirect.
//!
//! Binds the host and port of the configured redirect URI, answers the
//! browser with a short page and hands the full callback URL to the caller.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

/// Result from the callback server.
#[derive(Debug)]
pub enum CallbackResult {
    /// Received a callback; carries the full URL including the query.
    Success(String),
    /// Server was cancelled.
    Cancelled,
    /// Error occurred.
    Error(String),
}

/// A bound listener for one redirect URI.
pub struct CallbackServer {
    listener: TcpListener,
    redirect: Url,
}

impl CallbackServer {
    /// Bind to the redirect URI's host and port.
    pub fn bind(redirect: &Url) -> Result<Self, String> {
        let host = match redirect.host_str() {
            Some("localhost") | None => "127.0.0.1",
            Some(host) => host,
        };
        let port = redirect
            .port_or_known_default()
            .ok_or_else(|| "redirect URI has no port".to_string())?;
        let addr = format!("{}:{}", host, port);

        let listener = TcpListener::bind(&addr).map_err(|e| {
            error!("Failed to bind callback server to {}: {}", addr, e);
            format!("Failed to start server: {}", e)
        })?;

        // Non-blocking so cancellation is noticed between accepts
        listener
            .set_nonblocking(true)
            .map_err(|e| format!("Server configuration error: {}", e))?;

        info!("OAuth callback server listening on {}", addr);
        Ok(Self {
            listener,
            redirect: redirect.clone(),
        })
    }

    /// Port actually bound (differs from the redirect URI when it asked for port 0).
    pub fn port(&self) -> Option<u16> {
        self.listener.local_addr().ok().map(|a| a.port())
    }

    /// Wait for a single OAuth callback or for cancellation.
    ///
    /// Cancellation is signalled by a message on `cancel_rx` or by dropping its sender.
    pub fn wait(self, cancel_rx: mpsc::Receiver<()>) -> CallbackResult {
        loop {
            match cancel_rx.try_recv() {
                Ok(()) | Err(mpsc::TryRecvError::Disconnected) => {
                    info!("Callback server cancelled");
                    return CallbackResult::Cancelled;
                }
                Err(mpsc::TryRecvError::Empty) => {}
            }

            match self.listener.accept() {
                Ok((stream, peer_addr)) => {
                    debug!("Connection from {}", peer_addr);
                    if let Some(url) = self.handle_connection(stream) {
                        info!("OAuth callback received");
                        return CallbackResult::Success(url);
                    }
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

    /// Returns the callback URL if this request was the OAuth redirect.
    fn handle_connection(&self, mut stream: TcpStream) -> Option<String> {
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
        let request_line = request.lines().next()?;
        let mut parts = request_line.split_whitespace();
        let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
            send_response(&mut stream, 400, "Bad Request", "text/plain", "Bad Request");
            return None;
        };

        if method != "GET" {
            send_response(&mut stream, 405, "Method Not Allowed", "text/plain", "Method Not Allowed");
            return None;
        }

        let mut callback = self.redirect.clone();
        let (path, query) = target.split_once('?').unwrap_or((target, ""));
        if path != self.redirect.path() {
            send_response(&mut stream, 404, "Not Found", "text/plain", "Not Found");
            return None;
        }
        callback.set_query(Some(query));

        let params: Vec<(String, String)> = callback.query_pairs().into_owned().collect();
        let param = |name: &str| params.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone());

        if let Some(error) = param("error") {
            let description = param("error_description").unwrap_or(error);
            send_page(&mut stream, "Sign-in not completed", &description);
            // Still return the URL so the caller can classify the error
            return Some(callback.to_string());
        }

        if param("code").is_none() {
            // Browsers also request favicons and similar on the same origin
            send_response(&mut stream, 400, "Bad Request", "text/plain", "Missing authorization code");
            return None;
        }

        send_page(
            &mut stream,
            "Authentication Successful",
            "You can close this tab and return to the application.",
        );
        Some(callback.to_string())
    }
}

fn send_page(stream: &mut TcpStream, title: &str, message: &str) {
    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>{title}</title></head>
<body style="font-family: sans-serif; text-align: center; margin-top: 4rem;">
    <h1>{title}</h1>
    <p>{message}</p>
</body>
</html>"#,
        title = html_escape(title),
        message = html_escape(message),
    );
    send_response(stream, 200, "OK", "text/html; charset=utf-8", &html);
}

fn send_response(stream: &mut TcpStream, status: u16, reason: &str, content_type: &str, body: &str) {
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        content_type,
        body.len(),
        body
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;

    fn request(port: u16, target: &str) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
        write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target).unwrap();
        let mut status = String::new();
        std::io::BufReader::new(stream).read_line(&mut status).unwrap();
        status
    }

    fn start() -> (u16, mpsc::Sender<()>, std::thread::JoinHandle<CallbackResult>) {
        let redirect = Url::parse("http://127.0.0.1:0/auth/callback").unwrap();
        let server = CallbackServer::bind(&redirect).unwrap();
        let port = server.port().unwrap();
        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || server.wait(rx));
        (port, tx, handle)
    }

    #[test]
    fn test_receives_code() {
        let (port, _tx, handle) = start();

        assert!(request(port, "/other").contains("404"));
        assert!(request(port, "/auth/callback?state=s").contains("400"));
        assert!(request(port, "/auth/callback?code=abc&state=s").contains("200"));

        match handle.join().unwrap() {
            CallbackResult::Success(url) => {
                assert!(url.ends_with("/auth/callback?code=abc&state=s"), "{}", url)
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_error_callback_is_returned() {
        let (port, _tx, handle) = start();

        assert!(request(port, "/auth/callback?error=access_denied").contains("200"));
        assert!(matches!(
            handle.join().unwrap(),
            CallbackResult::Success(url) if url.contains("error=access_denied")
        ));
    }

    #[test]
    fn test_cancel() {
        let (_port, tx, handle) = start();
        tx.send(()).unwrap();
        assert!(matches!(handle.join().unwrap(), CallbackResult::Cancelled));
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("<b>\"x\" & y</b>"), "&lt;b&gt;&quot;x&quot; &amp; y&lt;/b&gt;");
    }
}
