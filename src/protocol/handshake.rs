//! Client opening handshake (RFC 6455 section 4.1).
//!
//! - [`Target`]: the parts of a `ws://` URL the handshake needs
//! - [`perform`]: writes the upgrade request and validates the `101` response
//! - [`compute_accept_key`]: SHA-1 + Base64 per RFC 6455 section 4.2.2

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{Result, WsError};

/// Magic GUID concatenated with the key for `Sec-WebSocket-Accept`.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Upper bound on the response head, so a misbehaving server cannot make us buffer forever.
const MAX_RESPONSE_HEAD: usize = 16 * 1024;

/// Where to connect and what to ask for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// `wss://`; only the port defaults depend on it.
    pub secure: bool,
    /// Host as written in the URL (IPv6 literals keep their brackets).
    pub host: String,
    pub port: u16,
    /// Path and query, at least `/`.
    pub resource: String,
}

impl Target {
    /// Parse a `ws://host[:port][/path][?query]` URL to connect to over TCP.
    ///
    /// `wss://` is rejected: TLS is left to the caller, who can run the
    /// handshake over their own stream with [`perform`].
    pub fn parse(url: &str) -> Result<Self> {
        let target = Self::parse_any(url)?;
        if target.secure {
            return Err(WsError::IllegalArgument(format!(
                "{}: TLS is not supported by connect",
                url
            )));
        }
        Ok(target)
    }

    /// Parse a `ws://` or `wss://` URL.
    pub fn parse_any(url: &str) -> Result<Self> {
        let (secure, rest) = if let Some(rest) = url.strip_prefix("ws://") {
            (false, rest)
        } else if let Some(rest) = url.strip_prefix("wss://") {
            (true, rest)
        } else {
            return Err(WsError::IllegalArgument(format!("not a ws:// URL: {}", url)));
        };

        let rest = rest.split('#').next().unwrap_or_default();
        let (authority, resource) = match rest.find(['/', '?']) {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        let resource = if resource.starts_with('?') {
            format!("/{}", resource)
        } else {
            resource.to_string()
        };

        if authority.is_empty() || authority.contains('@') {
            return Err(WsError::IllegalArgument(format!("bad authority in {}", url)));
        }

        let (host, port) = if authority.starts_with('[') {
            let end = authority
                .find(']')
                .ok_or_else(|| WsError::IllegalArgument(format!("bad IPv6 host in {}", url)))?;
            let host = &authority[..=end];
            match &authority[end + 1..] {
                "" => (host, None),
                port => (host, Some(port.strip_prefix(':').unwrap_or(port))),
            }
        } else {
            match authority.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (authority, None),
            }
        };
        let port = match port {
            None => Self::default_port(secure),
            Some(port) => port
                .parse()
                .map_err(|_| WsError::IllegalArgument(format!("bad port in {}", url)))?,
        };

        Ok(Self {
            secure,
            host: host.to_string(),
            port,
            resource,
        })
    }

    fn default_port(secure: bool) -> u16 {
        if secure {
            443
        } else {
            80
        }
    }

    /// Host to resolve, without IPv6 brackets.
    pub fn connect_host(&self) -> &str {
        self.host.trim_start_matches('[').trim_end_matches(']')
    }

    /// Value of the `Host` header.
    pub fn host_header(&self) -> String {
        if self.port == Self::default_port(self.secure) {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Compute the `Sec-WebSocket-Accept` value expected for `key`.
pub fn compute_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Fresh `Sec-WebSocket-Key`: 16 random bytes, Base64 encoded.
pub fn generate_key() -> String {
    BASE64.encode(rand::random::<[u8; 16]>())
}

/// Check that `subprotocol` can be offered in a header.
pub fn validate_subprotocol(subprotocol: &str) -> Result<()> {
    let is_token = !subprotocol.is_empty()
        && subprotocol
            .bytes()
            .all(|b| b.is_ascii_graphic() && !b"()<>@,;:\\\"/[]?={}".contains(&b));
    if is_token {
        Ok(())
    } else {
        Err(WsError::IllegalArgument(format!(
            "invalid subprotocol: {:?}",
            subprotocol
        )))
    }
}

fn request(target: &Target, key: &str, subprotocols: &[String]) -> String {
    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n",
        target.resource,
        target.host_header(),
        key
    );
    if !subprotocols.is_empty() {
        request.push_str(&format!(
            "Sec-WebSocket-Protocol: {}\r\n",
            subprotocols.join(", ")
        ));
    }
    request.push_str("\r\n");
    request
}

fn find_header<'a>(headers: &[(&'a str, &'a str)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| *v)
}

/// Validate the response head (status line and headers, without the blank
/// line) and return the selected subprotocol, empty if none.
pub fn validate_response(head: &str, key: &str, offered: &[String]) -> Result<String> {
    let mut lines = head.lines();
    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(version), Some("101")) if version.starts_with("HTTP/1.") => {}
        _ => {
            return Err(WsError::Handshake(format!(
                "unexpected response: {}",
                status_line
            )))
        }
    }

    let headers: Vec<(&str, &str)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim(), value.trim()))
        .collect();

    match find_header(&headers, "Upgrade") {
        Some(v) if v.eq_ignore_ascii_case("websocket") => {}
        _ => return Err(WsError::Handshake("missing or invalid Upgrade header".into())),
    }
    match find_header(&headers, "Connection") {
        Some(v) if v.to_ascii_lowercase().contains("upgrade") => {}
        _ => {
            return Err(WsError::Handshake(
                "missing or invalid Connection header".into(),
            ))
        }
    }
    match find_header(&headers, "Sec-WebSocket-Accept") {
        Some(accept) if accept == compute_accept_key(key) => {}
        _ => {
            return Err(WsError::Handshake(
                "missing or wrong Sec-WebSocket-Accept".into(),
            ))
        }
    }
    if let Some(extensions) = find_header(&headers, "Sec-WebSocket-Extensions") {
        return Err(WsError::Handshake(format!(
            "server selected extensions that were not offered: {}",
            extensions
        )));
    }

    match find_header(&headers, "Sec-WebSocket-Protocol") {
        None => Ok(String::new()),
        Some(selected) if offered.iter().any(|o| o == selected) => Ok(selected.to_string()),
        Some(selected) => Err(WsError::Handshake(format!(
            "server selected subprotocol {:?} that was not offered",
            selected
        ))),
    }
}

/// Run the handshake over `stream`.
///
/// Returns the stream, still buffering any frame bytes that arrived with
/// the response, and the negotiated subprotocol.
pub async fn perform<S>(
    stream: S,
    target: &Target,
    subprotocols: &[String],
) -> Result<(BufReader<S>, String)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    for subprotocol in subprotocols {
        validate_subprotocol(subprotocol)?;
    }

    let key = generate_key();
    let mut stream = BufReader::new(stream);
    stream
        .write_all(request(target, &key, subprotocols).as_bytes())
        .await?;
    stream.flush().await?;

    let mut head = String::new();
    loop {
        let mut line = String::new();
        if stream.read_line(&mut line).await? == 0 {
            return Err(WsError::Handshake(
                "connection closed during handshake".into(),
            ));
        }
        if line == "\r\n" || line == "\n" {
            break;
        }
        head.push_str(&line);
        if head.len() > MAX_RESPONSE_HEAD {
            return Err(WsError::Handshake("response head too large".into()));
        }
    }

    let subprotocol = validate_response(&head, &key, subprotocols)?;
    tracing::debug!("handshake complete subprotocol={:?}", subprotocol);
    Ok((stream, subprotocol))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(accept: &str, extra: &str) -> String {
        format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n{}",
            accept, extra
        )
    }

    #[test]
    fn test_accept_key_matches_rfc_example() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_generated_keys_are_16_bytes() {
        let key = generate_key();
        assert_eq!(BASE64.decode(&key).unwrap().len(), 16);
        assert_ne!(key, generate_key());
    }

    #[test]
    fn test_parse_target() {
        let target = Target::parse("ws://example.com/chat?room=1").unwrap();
        assert_eq!(target.host, "example.com");
        assert_eq!(target.port, 80);
        assert_eq!(target.resource, "/chat?room=1");
        assert_eq!(target.host_header(), "example.com");

        let target = Target::parse("ws://127.0.0.1:9001").unwrap();
        assert_eq!(target.port, 9001);
        assert_eq!(target.resource, "/");
        assert_eq!(target.host_header(), "127.0.0.1:9001");

        let target = Target::parse("ws://[::1]:8080?x=y").unwrap();
        assert_eq!(target.host, "[::1]");
        assert_eq!(target.connect_host(), "::1");
        assert_eq!(target.port, 8080);
        assert_eq!(target.resource, "/?x=y");
    }

    #[test]
    fn test_parse_secure_target() {
        let target = Target::parse_any("wss://example.com/feed").unwrap();
        assert!(target.secure);
        assert_eq!(target.port, 443);
        assert_eq!(target.host_header(), "example.com");
    }

    #[test]
    fn test_parse_target_rejects() {
        for url in [
            "http://example.com",
            "wss://example.com",
            "ws://",
            "ws://user@host",
            "ws://host:notaport",
            "not a url",
        ] {
            assert!(
                matches!(Target::parse(url), Err(WsError::IllegalArgument(_))),
                "{}",
                url
            );
        }
    }

    #[test]
    fn test_request_lists_subprotocols() {
        let target = Target::parse("ws://localhost:9001/ws").unwrap();
        let text = request(&target, "KEY", &["chat".to_string(), "superchat".to_string()]);
        assert!(text.starts_with("GET /ws HTTP/1.1\r\nHost: localhost:9001\r\n"));
        assert!(text.contains("Sec-WebSocket-Key: KEY\r\n"));
        assert!(text.contains("Sec-WebSocket-Protocol: chat, superchat\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_validate_response() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let accept = compute_accept_key(key);
        let offered = vec!["chat".to_string()];

        let head = response(&accept, "");
        assert_eq!(validate_response(&head, key, &offered).unwrap(), "");

        let head = response(&accept, "sec-websocket-protocol: chat\r\n");
        assert_eq!(validate_response(&head, key, &offered).unwrap(), "chat");
    }

    #[test]
    fn test_validate_response_failures() {
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        let accept = compute_accept_key(key);
        let offered = vec!["chat".to_string()];

        let heads = [
            "HTTP/1.1 404 Not Found\r\n".to_string(),
            response("wrong", ""),
            response(&accept, "Sec-WebSocket-Protocol: other\r\n"),
            response(&accept, "Sec-WebSocket-Extensions: permessage-deflate\r\n"),
        ];
        for head in heads {
            assert!(
                matches!(validate_response(&head, key, &offered), Err(WsError::Handshake(_))),
                "{}",
                head
            );
        }
    }

    #[test]
    fn test_subprotocol_tokens() {
        assert!(validate_subprotocol("chat.v2").is_ok());
        assert!(validate_subprotocol("").is_err());
        assert!(validate_subprotocol("a b").is_err());
        assert!(validate_subprotocol("a,b").is_err());
    }

    #[tokio::test]
    async fn test_perform_keeps_bytes_after_head() {
        let (client, mut server) = tokio::io::duplex(4096);
        let target = Target::parse("ws://localhost/").unwrap();

        let server_task = tokio::spawn(async move {
            use tokio::io::AsyncReadExt;
            let mut buf = vec![0u8; 1024];
            let n = server.read(&mut buf).await.unwrap();
            let text = String::from_utf8_lossy(&buf[..n]).to_string();
            let key = text
                .lines()
                .find_map(|l| l.strip_prefix("Sec-WebSocket-Key: "))
                .unwrap()
                .to_string();
            let reply = format!("{}\r\n", response(&compute_accept_key(&key), ""));
            server.write_all(reply.as_bytes()).await.unwrap();
            // A text frame right behind the head
            server.write_all(&[0x81, 0x02, b'h', b'i']).await.unwrap();
            server
        });

        let (mut stream, subprotocol) = perform(client, &target, &[]).await.unwrap();
        assert_eq!(subprotocol, "");

        use tokio::io::AsyncReadExt;
        let mut frame = [0u8; 4];
        stream.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, [0x81, 0x02, b'h', b'i']);
        drop(server_task.await.unwrap());
    }
}
