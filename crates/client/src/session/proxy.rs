//! HTTP CONNECT tunneling for proxied TLS sessions.
//!
//! Plain sessions talk to the proxy directly (the request layer uses
//! absolute-form URIs); TLS sessions first open a CONNECT tunnel to the
//! origin and then handshake through it.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use trawlr_core::Error;

/// Encode a `Proxy-Authorization: Basic` credential.
///
/// A missing password is sent as blank, which most proxies accept.
pub(crate) fn basic_auth(user: &str, password: Option<&str>) -> String {
    STANDARD.encode(format!("{}:{}", user, password.unwrap_or("")))
}

/// Establish a CONNECT tunnel to `host:port` over an open proxy stream.
///
/// Sends the CONNECT request (with credentials when given), requires a 200
/// response, drains the remaining response headers, and hands the stream
/// back ready for the TLS handshake.
pub(crate) async fn connect_tunnel(
    stream: TcpStream,
    host: &str,
    port: u16,
    auth: Option<String>,
) -> Result<TcpStream, Error> {
    let request = match auth {
        Some(auth) => format!(
            "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Authorization: Basic {auth}\r\n\r\n"
        ),
        None => format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n"),
    };

    let mut reader = BufReader::new(stream);
    reader
        .get_mut()
        .write_all(request.as_bytes())
        .await
        .map_err(|e| Error::Proxy(format!("failed to send CONNECT request: {e}")))?;

    let mut status_line = String::new();
    reader
        .read_line(&mut status_line)
        .await
        .map_err(|e| Error::Proxy(format!("failed to read CONNECT response: {e}")))?;

    if !is_connect_established(&status_line) {
        return Err(Error::Proxy(format!("CONNECT failed: {}", status_line.trim())));
    }

    // Drain headers up to the blank line; the tunnel is raw after that.
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(|e| Error::Proxy(format!("failed to read CONNECT headers: {e}")))?;
        if n == 0 {
            return Err(Error::Proxy("proxy closed connection during CONNECT".to_string()));
        }
        if line.trim().is_empty() {
            break;
        }
    }

    Ok(reader.into_inner())
}

fn is_connect_established(status_line: &str) -> bool {
    let mut parts = status_line.split_whitespace();
    matches!((parts.next(), parts.next()), (Some(version), Some("200")) if version.starts_with("HTTP/"))
}
