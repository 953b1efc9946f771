//! Transport over any byte stream that has completed the opening handshake.
//!
//! # Architecture
//!
//! ```text
//! send_* ─► mpsc::UnboundedSender<Command> ─► Writer Task ─► SplitSink<Framed<S, FrameCodec>>
//!                                                   │
//!                                   oneshot completion per command
//!
//! SplitStream<Framed<S, FrameCodec>> ─► Reader Task ─► MessageConsumer   (only while demand > 0)
//! ```
//!
//! The writer task owns the sink, so sends never contend on a lock and are
//! written in submission order. The reader task owns the source and waits
//! for demand before pulling the next frame; the consumer hands demand
//! back through [`Transport::acknowledge_reception`].
//!
//! Nothing is answered on the endpoint's behalf: pings and close frames are
//! only delivered, and the endpoint decides what to send back.

use std::future::ready;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Notify};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use super::{MessageConsumer, PongSupplier, SendFuture, Transport};
use crate::demand::Demand;
use crate::error::{Result, WsError};
use crate::protocol::frame::MAX_CONTROL_PAYLOAD;
use crate::protocol::{status, Frame, FrameCodec, OpCode};

/// An outbound message waiting for the writer task.
enum Outbound {
    Text(String, bool),
    Binary(Bytes, bool),
    Ping(Bytes),
    Pong(Bytes),
    AutomaticPong(PongSupplier),
    Close(u16, String),
}

impl Outbound {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text(..) => "text",
            Self::Binary(..) => "binary",
            Self::Ping(_) => "ping",
            Self::Pong(_) | Self::AutomaticPong(_) => "pong",
            Self::Close(..) => "close",
        }
    }
}

struct Command {
    message: Outbound,
    done: oneshot::Sender<Result<()>>,
}

/// [`Transport`] over a stream past the opening handshake, with one reader
/// and one writer task.
///
/// Dropping the transport stops both tasks.
pub struct StreamTransport {
    commands: mpsc::UnboundedSender<Command>,
    demand: Arc<Demand>,
    wakeup: Arc<Notify>,
    input: CancellationToken,
    output: CancellationToken,
}

impl StreamTransport {
    /// Frame `stream` and spawn the reader and writer tasks.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn<S>(stream: S, consumer: Arc<dyn MessageConsumer>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_codec(stream, FrameCodec::new(), consumer)
    }

    /// Like [`spawn`](Self::spawn) with a custom codec (e.g. a smaller payload limit).
    pub fn with_codec<S>(stream: S, codec: FrameCodec, consumer: Arc<dyn MessageConsumer>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = Framed::new(stream, codec).split();
        let (commands, rx) = mpsc::unbounded_channel();
        let demand = Arc::new(Demand::new());
        let wakeup = Arc::new(Notify::new());
        let input = CancellationToken::new();
        let output = CancellationToken::new();

        tokio::spawn(writer_loop(rx, sink, output.clone()));
        tokio::spawn(reader_loop(
            source,
            consumer,
            demand.clone(),
            wakeup.clone(),
            input.clone(),
        ));

        Self {
            commands,
            demand,
            wakeup,
            input,
            output,
        }
    }

    fn submit(&self, message: Outbound) -> SendFuture {
        if self.output.is_cancelled() {
            return Box::pin(ready(Err(WsError::OutputClosed)));
        }
        let (done, completion) = oneshot::channel();
        if self.commands.send(Command { message, done }).is_err() {
            return Box::pin(ready(Err(WsError::OutputClosed)));
        }
        // A dropped completion means the writer task ended before writing.
        Box::pin(async move { completion.await.unwrap_or(Err(WsError::OutputClosed)) })
    }
}

impl Transport for StreamTransport {
    fn send_text(&self, text: String, last: bool) -> SendFuture {
        self.submit(Outbound::Text(text, last))
    }

    fn send_binary(&self, data: Bytes, last: bool) -> SendFuture {
        self.submit(Outbound::Binary(data, last))
    }

    fn send_ping(&self, data: Bytes) -> SendFuture {
        self.submit(Outbound::Ping(data))
    }

    fn send_pong(&self, data: Bytes) -> SendFuture {
        self.submit(Outbound::Pong(data))
    }

    fn send_automatic_pong(&self, payload: PongSupplier) -> SendFuture {
        self.submit(Outbound::AutomaticPong(payload))
    }

    fn send_close(&self, code: u16, reason: String) -> SendFuture {
        self.submit(Outbound::Close(code, reason))
    }

    fn request(&self, n: u64) {
        match self.demand.increase(n) {
            Ok(_) => self.wakeup.notify_one(),
            Err(e) => tracing::warn!("Ignoring transport request: {}", e),
        }
    }

    fn acknowledge_reception(&self) {
        self.demand.try_decrement();
    }

    fn close_input(&self) -> io::Result<()> {
        self.input.cancel();
        Ok(())
    }

    fn close_output(&self) -> io::Result<()> {
        self.output.cancel();
        Ok(())
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.input.cancel();
        self.output.cancel();
    }
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport")
            .field("demand", &self.demand.get())
            .field("input_closed", &self.input.is_cancelled())
            .field("output_closed", &self.output.is_cancelled())
            .finish()
    }
}

/// Turns outbound messages into frames, tracking fragmentation and the close.
#[derive(Debug, Default)]
struct Framer {
    /// A fragmented data message is in progress.
    continuing: bool,
    /// A close frame was written; nothing may follow it.
    close_sent: bool,
}

impl Framer {
    fn frame(&mut self, message: Outbound) -> Result<Frame> {
        if self.close_sent {
            return Err(WsError::OutputClosed);
        }
        let frame = match message {
            Outbound::Text(text, last) => self.data(OpCode::Text, Bytes::from(text), last),
            Outbound::Binary(data, last) => self.data(OpCode::Binary, data, last),
            Outbound::Ping(data) => control(OpCode::Ping, data)?,
            Outbound::Pong(data) => control(OpCode::Pong, data)?,
            Outbound::AutomaticPong(payload) => control(OpCode::Pong, payload())?,
            Outbound::Close(code, reason) => {
                self.close_sent = true;
                Frame::close(code, &reason)
            }
        };
        Ok(frame)
    }

    fn data(&mut self, opcode: OpCode, payload: Bytes, last: bool) -> Frame {
        let opcode = if self.continuing {
            OpCode::Continuation
        } else {
            opcode
        };
        self.continuing = !last;
        Frame::new(opcode, payload, last)
    }
}

fn control(opcode: OpCode, payload: Bytes) -> Result<Frame> {
    if payload.len() > MAX_CONTROL_PAYLOAD {
        return Err(WsError::IllegalArgument(format!(
            "control payload of {} bytes",
            payload.len()
        )));
    }
    Ok(Frame::new(opcode, payload, true))
}

/// A decoded inbound event.
#[derive(Debug, PartialEq)]
enum Received {
    Text(String, bool),
    Binary(Bytes, bool),
    Ping(Bytes),
    Pong(Bytes),
    Close(u16, String),
}

/// Checks the ordering rules of data frames and decodes text as it arrives.
#[derive(Debug, Default)]
struct Reassembler {
    /// Opcode of the fragmented message in progress.
    current: Option<OpCode>,
    /// Leading bytes of a UTF-8 sequence split across text fragments.
    partial: Vec<u8>,
}

impl Reassembler {
    fn accept(&mut self, frame: Frame) -> Result<Received> {
        match frame.opcode {
            OpCode::Ping => Ok(Received::Ping(frame.payload)),
            OpCode::Pong => Ok(Received::Pong(frame.payload)),
            OpCode::Close => {
                let (code, reason) = frame.close_status()?;
                Ok(Received::Close(code, reason))
            }
            OpCode::Text | OpCode::Binary => {
                if self.current.is_some() {
                    return Err(WsError::protocol(
                        status::PROTOCOL_ERROR,
                        "new data frame while a fragmented message is in progress",
                    ));
                }
                self.data(frame.opcode, frame.payload, frame.fin)
            }
            OpCode::Continuation => match self.current {
                Some(opcode) => self.data(opcode, frame.payload, frame.fin),
                None => Err(WsError::protocol(
                    status::PROTOCOL_ERROR,
                    "continuation frame without a message in progress",
                )),
            },
        }
    }

    fn data(&mut self, opcode: OpCode, payload: Bytes, last: bool) -> Result<Received> {
        self.current = if last { None } else { Some(opcode) };
        if opcode == OpCode::Binary {
            return Ok(Received::Binary(payload, last));
        }
        self.text(&payload, last).map(|text| Received::Text(text, last))
    }

    /// Decode as much of the fragment as forms whole characters.
    fn text(&mut self, payload: &[u8], last: bool) -> Result<String> {
        let mut bytes = std::mem::take(&mut self.partial);
        bytes.extend_from_slice(payload);
        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => {
                let error = e.utf8_error();
                // A sequence cut at the end of a non-final fragment is fine
                if last || error.error_len().is_some() {
                    return Err(invalid_utf8());
                }
                let mut bytes = e.into_bytes();
                self.partial = bytes.split_off(error.valid_up_to());
                String::from_utf8(bytes).map_err(|_| invalid_utf8())
            }
        }
    }
}

fn invalid_utf8() -> WsError {
    WsError::protocol(status::NOT_CONSISTENT, "invalid UTF-8 in text message")
}

/// Writer loop - receives commands and writes them to the sink in order.
async fn writer_loop<S>(
    mut rx: mpsc::UnboundedReceiver<Command>,
    mut sink: SplitSink<Framed<S, FrameCodec>, Frame>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framer = Framer::default();
    loop {
        let command = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            command = rx.recv() => match command {
                Some(c) => c,
                None => break,
            },
        };

        let kind = command.message.kind();
        let result = match framer.frame(command.message) {
            Ok(frame) => sink.send(frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &result {
            tracing::debug!("Failed to write {}: {}", kind, e);
        }
        let _ = command.done.send(result);
    }

    // Fail whatever was queued after the shutdown
    rx.close();
    while let Ok(command) = rx.try_recv() {
        let _ = command.done.send(Err(WsError::OutputClosed));
    }

    if let Err(e) = sink.close().await {
        tracing::debug!("Closing sink: {}", e);
    }
    tracing::debug!("Writer task finished");
}

/// Reader loop - pulls one message per unit of demand and hands it to the consumer.
async fn reader_loop<S>(
    mut source: SplitStream<Framed<S, FrameCodec>>,
    consumer: Arc<dyn MessageConsumer>,
    demand: Arc<Demand>,
    wakeup: Arc<Notify>,
    shutdown: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reassembler = Reassembler::default();
    loop {
        while !demand.is_positive() {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = wakeup.notified() => {}
            }
        }

        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return,
            next = source.next() => next,
        };

        let received = match next {
            None => {
                tracing::debug!("Stream ended without a close message");
                consumer.on_complete();
                return;
            }
            Some(Err(e)) if e.is_connection_reset() => {
                tracing::debug!("Stream reset without a close message: {}", e);
                consumer.on_complete();
                return;
            }
            Some(frame) => frame.and_then(|frame| reassembler.accept(frame)),
        };

        match received {
            Err(e) => {
                tracing::debug!("Read error: {}", e);
                consumer.on_error(e);
                return;
            }
            Ok(Received::Text(text, last)) => consumer.on_text(text, last),
            Ok(Received::Binary(data, last)) => consumer.on_binary(data, last),
            Ok(Received::Ping(data)) => consumer.on_ping(data),
            Ok(Received::Pong(data)) => consumer.on_pong(data),
            Ok(Received::Close(code, reason)) => {
                consumer.on_close(code, reason);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(opcode: OpCode, payload: &'static [u8], fin: bool) -> Frame {
        Frame::new(opcode, Bytes::from_static(payload), fin)
    }

    #[test]
    fn test_whole_messages_are_single_frames() {
        let mut framer = Framer::default();
        let text = framer.frame(Outbound::Text("hi".to_string(), true)).unwrap();
        assert_eq!(text, frame(OpCode::Text, b"hi", true));

        let binary = framer
            .frame(Outbound::Binary(Bytes::from_static(b"\x01"), true))
            .unwrap();
        assert_eq!(binary, frame(OpCode::Binary, b"\x01", true));
    }

    #[test]
    fn test_fragment_opcodes() {
        let mut framer = Framer::default();

        let first = framer.frame(Outbound::Text("he".to_string(), false)).unwrap();
        let middle = framer.frame(Outbound::Text("l".to_string(), false)).unwrap();
        let last = framer.frame(Outbound::Text("lo".to_string(), true)).unwrap();

        assert_eq!((first.opcode, first.fin), (OpCode::Text, false));
        assert_eq!((middle.opcode, middle.fin), (OpCode::Continuation, false));
        assert_eq!((last.opcode, last.fin), (OpCode::Continuation, true));

        // Next message starts fresh
        let next = framer
            .frame(Outbound::Binary(Bytes::from_static(b"x"), true))
            .unwrap();
        assert_eq!(next.opcode, OpCode::Binary);
    }

    #[test]
    fn test_automatic_pong_payload_taken_when_framed() {
        let mut framer = Framer::default();
        let pong = framer
            .frame(Outbound::AutomaticPong(Box::new(|| Bytes::from_static(b"latest"))))
            .unwrap();
        assert_eq!(pong, frame(OpCode::Pong, b"latest", true));
    }

    #[test]
    fn test_nothing_is_framed_after_close() {
        let mut framer = Framer::default();
        let close = framer.frame(Outbound::Close(1000, "bye".to_string())).unwrap();
        assert_eq!(close.close_status().unwrap(), (1000, "bye".to_string()));

        let late = framer.frame(Outbound::Text("late".to_string(), true));
        assert!(matches!(late, Err(WsError::OutputClosed)));
        let late = framer.frame(Outbound::Pong(Bytes::new()));
        assert!(matches!(late, Err(WsError::OutputClosed)));
    }

    #[test]
    fn test_oversized_control_payload_is_rejected() {
        let mut framer = Framer::default();
        let ping = framer.frame(Outbound::Ping(Bytes::from(vec![0u8; 126])));
        assert!(matches!(ping, Err(WsError::IllegalArgument(_))));
    }

    #[test]
    fn test_reassembler_passes_fragments_through() {
        let mut reassembler = Reassembler::default();
        assert_eq!(
            reassembler.accept(frame(OpCode::Binary, b"ab", false)).unwrap(),
            Received::Binary(Bytes::from_static(b"ab"), false)
        );
        // Control frames may interleave with fragments
        assert_eq!(
            reassembler.accept(frame(OpCode::Ping, b"p", true)).unwrap(),
            Received::Ping(Bytes::from_static(b"p"))
        );
        assert_eq!(
            reassembler.accept(frame(OpCode::Continuation, b"c", true)).unwrap(),
            Received::Binary(Bytes::from_static(b"c"), true)
        );
    }

    #[test]
    fn test_reassembler_rejects_bad_ordering() {
        let mut reassembler = Reassembler::default();
        let err = reassembler
            .accept(frame(OpCode::Continuation, b"c", true))
            .unwrap_err();
        assert_eq!(err.close_code(), Some(status::PROTOCOL_ERROR));

        let mut reassembler = Reassembler::default();
        reassembler.accept(frame(OpCode::Text, b"a", false)).unwrap();
        let err = reassembler.accept(frame(OpCode::Text, b"b", true)).unwrap_err();
        assert_eq!(err.close_code(), Some(status::PROTOCOL_ERROR));
    }

    #[test]
    fn test_text_split_inside_a_character() {
        // "é" is 0xC3 0xA9
        let mut reassembler = Reassembler::default();
        assert_eq!(
            reassembler.accept(frame(OpCode::Text, b"caf\xC3", false)).unwrap(),
            Received::Text("caf".to_string(), false)
        );
        assert_eq!(
            reassembler.accept(frame(OpCode::Continuation, b"\xA9!", true)).unwrap(),
            Received::Text("é!".to_string(), true)
        );
    }

    #[test]
    fn test_invalid_utf8_is_not_consistent() {
        let mut reassembler = Reassembler::default();
        let err = reassembler
            .accept(frame(OpCode::Text, b"\xFF", false))
            .unwrap_err();
        assert_eq!(err.close_code(), Some(status::NOT_CONSISTENT));

        // Truncated sequence in the final fragment
        let mut reassembler = Reassembler::default();
        let err = reassembler
            .accept(frame(OpCode::Text, b"caf\xC3", true))
            .unwrap_err();
        assert_eq!(err.close_code(), Some(status::NOT_CONSISTENT));
    }

    #[test]
    fn test_close_frame_is_decoded() {
        let mut reassembler = Reassembler::default();
        let empty = Frame::new(OpCode::Close, Bytes::new(), true);
        assert_eq!(
            reassembler.accept(empty).unwrap(),
            Received::Close(status::NO_STATUS_CODE, String::new())
        );
        assert_eq!(
            reassembler.accept(Frame::close(1001, "away")).unwrap(),
            Received::Close(1001, "away".to_string())
        );
    }
}
