//! WebSocket frame codec (RFC 6455 section 5).
//!
//! [`FrameCodec`] plugs into `tokio_util::codec::Framed`:
//! - decoding accepts unmasked server frames and checks the framing rules
//!   that do not depend on earlier frames
//! - encoding masks every frame with a fresh random key, as a client must
//!
//! Frame layout:
//! ```text
//! +-+-+-+-+-------+-+-------------+-------------------------------+
//! |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
//! |I|S|S|S|  (4)  |A|     (7)     |           (16/64)             |
//! |N|V|V|V|       |S|             |                               |
//! +-+-+-+-+-------+-+-------------+ - - - - - - - - - - - - - - - +
//! |     Masking key (client only)   |          Payload data        |
//! +---------------------------------+ - - - - - - - - - - - - - - +
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::status;
use crate::error::WsError;

/// Default maximum payload size accepted from the peer (64 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u64 = 64 * 1024 * 1024;

/// Maximum payload of a control frame.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Frame opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl OpCode {
    /// Parse the low nibble of the first header byte. Reserved opcodes yield `None`.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    /// Close, ping and pong.
    #[inline]
    pub fn is_control(self) -> bool {
        (self as u8) & 0x08 != 0
    }
}

/// One frame, payload unmasked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(opcode: OpCode, payload: impl Into<Bytes>, fin: bool) -> Self {
        Self {
            fin,
            opcode,
            payload: payload.into(),
        }
    }

    /// Close frame with a status code and reason.
    pub fn close(code: u16, reason: &str) -> Self {
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code);
        payload.put_slice(reason.as_bytes());
        Self::new(OpCode::Close, payload.freeze(), true)
    }

    /// Status code and reason carried by a close frame.
    ///
    /// An empty payload means no status code (1005).
    pub fn close_status(&self) -> Result<(u16, String), WsError> {
        match self.payload.len() {
            0 => Ok((status::NO_STATUS_CODE, String::new())),
            1 => Err(WsError::protocol(
                status::PROTOCOL_ERROR,
                "close frame with a one byte payload",
            )),
            _ => {
                let code = u16::from_be_bytes([self.payload[0], self.payload[1]]);
                if !status::is_legal(code) {
                    return Err(WsError::protocol(
                        status::PROTOCOL_ERROR,
                        format!("illegal close code {}", code),
                    ));
                }
                let reason = std::str::from_utf8(&self.payload[2..]).map_err(|_| {
                    WsError::protocol(status::NOT_CONSISTENT, "close reason is not UTF-8")
                })?;
                Ok((code, reason.to_string()))
            }
        }
    }
}

/// Apply or remove the 4-byte XOR mask.
pub fn apply_mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Client-side frame codec.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload_size: u64,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// Codec rejecting payloads larger than `max_payload_size` with 1009.
    pub fn with_max_payload(max_payload_size: u64) -> Self {
        Self { max_payload_size }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn violation(message: impl Into<String>) -> WsError {
    WsError::protocol(status::PROTOCOL_ERROR, message)
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = WsError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, WsError> {
        if src.len() < 2 {
            return Ok(None);
        }
        let (first, second) = (src[0], src[1]);

        let fin = first & 0x80 != 0;
        if first & 0x70 != 0 {
            return Err(violation("non-zero RSV bits without negotiated extensions"));
        }
        let opcode = OpCode::from_u8(first & 0x0F)
            .ok_or_else(|| violation(format!("unknown opcode: 0x{:X}", first & 0x0F)))?;
        if second & 0x80 != 0 {
            return Err(violation("masked frame from server"));
        }

        let (header_len, payload_len) = match second & 0x7F {
            126 => {
                if src.len() < 4 {
                    return Ok(None);
                }
                (4, u64::from(u16::from_be_bytes([src[2], src[3]])))
            }
            127 => {
                if src.len() < 10 {
                    return Ok(None);
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&src[2..10]);
                let len = u64::from_be_bytes(buf);
                if len >> 63 != 0 {
                    return Err(violation("MSB of 64-bit length must be 0"));
                }
                (10, len)
            }
            len => (2, u64::from(len)),
        };

        if opcode.is_control() {
            if !fin {
                return Err(violation("fragmented control frame"));
            }
            if payload_len > MAX_CONTROL_PAYLOAD as u64 {
                return Err(violation(format!(
                    "control frame payload of {} bytes",
                    payload_len
                )));
            }
        }
        if payload_len > self.max_payload_size {
            return Err(WsError::protocol(
                status::TOO_BIG,
                format!(
                    "payload length {} exceeds maximum {}",
                    payload_len, self.max_payload_size
                ),
            ));
        }

        let total = header_len + payload_len as usize;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        src.advance(header_len);
        let payload = src.split_to(payload_len as usize).freeze();
        Ok(Some(Frame {
            fin,
            opcode,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = WsError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), WsError> {
        encode_masked(&frame, rand::random(), dst);
        Ok(())
    }
}

fn encode_masked(frame: &Frame, key: [u8; 4], dst: &mut BytesMut) {
    let len = frame.payload.len();
    dst.reserve(14 + len);

    let fin = if frame.fin { 0x80 } else { 0x00 };
    dst.put_u8(fin | frame.opcode as u8);
    if len <= 125 {
        dst.put_u8(0x80 | len as u8);
    } else if len <= 0xFFFF {
        dst.put_u8(0x80 | 126);
        dst.put_u16(len as u16);
    } else {
        dst.put_u8(0x80 | 127);
        dst.put_u64(len as u64);
    }
    dst.put_slice(&key);

    let start = dst.len();
    dst.put_slice(&frame.payload);
    apply_mask(&mut dst[start..], key);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Result<Option<Frame>, WsError> {
        let mut buf = BytesMut::from(bytes);
        FrameCodec::new().decode(&mut buf)
    }

    #[test]
    fn test_decode_small_text_frame() {
        let frame = decode_all(&[0x81, 0x02, b'H', b'i']).unwrap().unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, OpCode::Text);
        assert_eq!(&frame.payload[..], b"Hi");
    }

    #[test]
    fn test_decode_waits_for_whole_frame() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x82u8, 126, 0x00][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[200]);
        buf.extend_from_slice(&[0xAB; 100]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0xAB; 100]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode, OpCode::Binary);
        assert_eq!(frame.payload.len(), 200);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_64bit_length() {
        let mut bytes = vec![0x82, 127];
        bytes.extend_from_slice(&300u64.to_be_bytes());
        bytes.extend_from_slice(&[0xCD; 300]);
        let frame = decode_all(&bytes).unwrap().unwrap();
        assert_eq!(frame.payload.len(), 300);
    }

    #[test]
    fn test_decode_leaves_next_frame_in_buffer() {
        let mut codec = FrameCodec::new();
        let mut buf = BytesMut::from(&[0x89u8, 0x01, b'p', 0x8A, 0x00][..]);

        let ping = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(ping.opcode, OpCode::Ping);
        let pong = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(pong.opcode, OpCode::Pong);
        assert!(pong.payload.is_empty());
    }

    #[test]
    fn test_decode_rejects_framing_violations() {
        let cases: &[(&[u8], &str)] = &[
            (&[0xC1, 0x00], "RSV"),
            (&[0x83, 0x00], "unknown opcode"),
            (&[0x81, 0x80, 0, 0, 0, 0], "masked"),
            (&[0x09, 0x00], "fragmented control"),
            (&[0x89, 126, 0x00, 0x7E], "control frame payload"),
        ];
        for (bytes, expected) in cases {
            let err = decode_all(bytes).unwrap_err();
            assert_eq!(err.close_code(), Some(status::PROTOCOL_ERROR), "{:?}", bytes);
            assert!(err.to_string().contains(expected), "{}", err);
        }
    }

    #[test]
    fn test_decode_oversized_payload_is_too_big() {
        let mut codec = FrameCodec::with_max_payload(4);
        let mut buf = BytesMut::from(&[0x82u8, 0x05, 1, 2, 3, 4, 5][..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.close_code(), Some(status::TOO_BIG));
    }

    #[test]
    fn test_encode_masks_payload() {
        let mut buf = BytesMut::new();
        let key = [0x37, 0xFA, 0x21, 0x3D];
        encode_masked(&Frame::new(OpCode::Text, "Hello", true), key, &mut buf);

        assert_eq!(buf[0], 0x81);
        assert_eq!(buf[1], 0x80 | 5);
        assert_eq!(&buf[2..6], &key);
        let mut payload = buf[6..].to_vec();
        assert_ne!(payload, b"Hello");
        apply_mask(&mut payload, key);
        assert_eq!(payload, b"Hello");
    }

    #[test]
    fn test_encode_extended_lengths() {
        let mut buf = BytesMut::new();
        encode_masked(&Frame::new(OpCode::Binary, vec![0u8; 200], false), [0; 4], &mut buf);
        assert_eq!(buf[0], 0x02);
        assert_eq!(buf[1], 0x80 | 126);
        assert_eq!(&buf[2..4], &200u16.to_be_bytes());
        assert_eq!(buf.len(), 4 + 4 + 200);

        let mut buf = BytesMut::new();
        encode_masked(&Frame::new(OpCode::Binary, vec![0u8; 70_000], true), [0; 4], &mut buf);
        assert_eq!(buf[1], 0x80 | 127);
        assert_eq!(&buf[2..10], &70_000u64.to_be_bytes());
    }

    #[test]
    fn test_close_frame_status() {
        let frame = Frame::close(status::GOING_AWAY, "bye");
        assert_eq!(frame.close_status().unwrap(), (1001, "bye".to_string()));

        let empty = Frame::new(OpCode::Close, Bytes::new(), true);
        assert_eq!(empty.close_status().unwrap(), (status::NO_STATUS_CODE, String::new()));
    }

    #[test]
    fn test_close_frame_violations() {
        let short = Frame::new(OpCode::Close, vec![0x03], true);
        assert_eq!(short.close_status().unwrap_err().close_code(), Some(1002));

        let reserved = Frame::close(status::NO_STATUS_CODE, "");
        assert_eq!(reserved.close_status().unwrap_err().close_code(), Some(1002));

        let mut payload = 1000u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0xFF, 0xFE]);
        let bad_reason = Frame::new(OpCode::Close, payload, true);
        assert_eq!(
            bad_reason.close_status().unwrap_err().close_code(),
            Some(status::NOT_CONSISTENT)
        );
    }

    #[test]
    fn test_opcode_classes() {
        assert!(OpCode::Ping.is_control());
        assert!(OpCode::Close.is_control());
        assert!(!OpCode::Continuation.is_control());
        assert!(!OpCode::Binary.is_control());
        assert_eq!(OpCode::from_u8(0x3), None);
    }
}
