//! Protocol module - wire format, opening handshake and close status codes.
//!
//! - [`frame`]: RFC 6455 frame codec used by the stream transport
//! - [`handshake`]: client opening handshake
//! - [`status`]: close status codes and the rules for which ones may be sent
//! - decoded inbound message and close status types

pub mod frame;
pub mod handshake;
mod message;
pub mod status;

pub use frame::{Frame, FrameCodec, OpCode};
pub use message::{CloseStatus, Inbound};
