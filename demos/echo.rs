//! Echo client - sends a few messages and prints what comes back.
//!
//! This example demonstrates:
//! - Connecting with the builder pattern
//! - A listener that asks for one message at a time
//! - Delaying the close reply until the listener is done
//!
//! # Running against an echo server
//!
//! ```text
//! websocat -s 9001 &
//! cargo run --example echo -- ws://127.0.0.1:9001
//! ```

use std::time::Duration;

use duplex_ws::protocol::status;
use duplex_ws::{CompletionSignal, Listener, WebSocket};
use tokio::sync::mpsc;

/// Forwards every text message to the main task.
struct Printer {
    received: mpsc::UnboundedSender<String>,
}

impl Listener for Printer {
    fn on_text(&self, ws: &WebSocket, text: String, last: bool) -> Option<CompletionSignal> {
        println!("received: {text} (last={last})");
        let _ = self.received.send(text);
        let _ = ws.request(1);
        None
    }

    fn on_close(&self, _ws: &WebSocket, code: u16, reason: String) -> Option<CompletionSignal> {
        println!("closed by server: {code} {reason:?}");
        None
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "ws://127.0.0.1:9001".to_string());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let ws = WebSocket::builder(Printer { received: tx })
        .close_timeout(Duration::from_secs(5))
        .connect(&url)
        .await?;
    println!("connected: {ws:?}");

    for message in ["hello", "duplex", "world"] {
        ws.send_text(message, true).await?;
        match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(echo)) => assert_eq!(echo, message),
            _ => return Err("no echo from server".into()),
        }
    }

    ws.send_close(status::NORMAL_CLOSURE, "done").await?;
    Ok(())
}
