//! Client builder: opening handshake and endpoint construction.
//!
//! The [`WebSocketBuilder`] collects the listener, the requested
//! subprotocols and the endpoint configuration, then either connects over
//! TCP ([`connect`](WebSocketBuilder::connect)), runs the handshake over a
//! stream the caller opened ([`handshake`](WebSocketBuilder::handshake), e.g.
//! for TLS), or wraps a stream that is already past it
//! ([`open`](WebSocketBuilder::open)).
//!
//! # Example
//!
//! ```ignore
//! use duplex_ws::{Listener, WebSocket};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> duplex_ws::Result<()> {
//!     let ws = WebSocket::builder(MyListener)
//!         .subprotocols(["chat"])
//!         .close_timeout(Duration::from_secs(5))
//!         .connect("ws://localhost:9001/chat")
//!         .await?;
//!
//!     ws.send_text("hello", true).await?;
//!     Ok(())
//! }
//! ```

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::config::EndpointConfig;
use crate::endpoint::WebSocket;
use crate::error::Result;
use crate::listener::Listener;
use crate::protocol::handshake::{self, Target};
use crate::transport::StreamTransport;

/// Builder for configuring and connecting a WebSocket client endpoint.
pub struct WebSocketBuilder<L> {
    listener: L,
    subprotocols: Vec<String>,
    config: EndpointConfig,
}

impl<L: Listener> WebSocketBuilder<L> {
    /// Create a builder; configuration starts from the environment.
    pub fn new(listener: L) -> Self {
        Self {
            listener,
            subprotocols: Vec::new(),
            config: EndpointConfig::from_env(),
        }
    }

    /// Subprotocols to offer, in order of preference.
    pub fn subprotocols<I, S>(mut self, subprotocols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subprotocols = subprotocols.into_iter().map(Into::into).collect();
        self
    }

    /// Set the close-handshake timeout.
    ///
    /// Default: 30 seconds, or `DUPLEX_WS_CLOSE_TIMEOUT`
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    /// Replace the whole endpoint configuration.
    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Connect to a `ws://` URL, perform the opening handshake and start
    /// the endpoint.
    ///
    /// The listener's `on_open` has run by the time this resolves.
    pub async fn connect(self, url: &str) -> Result<WebSocket> {
        let target = Target::parse(url)?;
        tracing::debug!("Connecting to {}", url);
        let stream = TcpStream::connect((target.connect_host(), target.port)).await?;
        self.handshake_target(stream, url, &target).await
    }

    /// Perform the opening handshake for `url` over `stream` and start the endpoint.
    ///
    /// The URL only names the resource and host header; `stream` may be
    /// any transport, including TLS the caller set up.
    pub async fn handshake<S>(self, stream: S, url: &str) -> Result<WebSocket>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let target = Target::parse_any(url)?;
        self.handshake_target(stream, url, &target).await
    }

    async fn handshake_target<S>(self, stream: S, url: &str, target: &Target) -> Result<WebSocket>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (stream, subprotocol) = handshake::perform(stream, target, &self.subprotocols).await?;
        tracing::debug!("Connected to {} subprotocol={:?}", url, subprotocol);
        self.start(stream, url.to_string(), subprotocol)
    }

    /// Start the endpoint over a stream whose handshake is already done.
    pub fn open<S>(self, stream: S, subprotocol: impl Into<String>) -> Result<WebSocket>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        self.start(stream, String::new(), subprotocol.into())
    }

    fn start<S>(self, stream: S, uri: String, subprotocol: String) -> Result<WebSocket>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        WebSocket::create(self.listener, uri, subprotocol, self.config, move |consumer| {
            StreamTransport::spawn(stream, consumer)
        })
    }
}

impl<L> std::fmt::Debug for WebSocketBuilder<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketBuilder")
            .field("subprotocols", &self.subprotocols)
            .field("config", &self.config)
            .finish()
    }
}
