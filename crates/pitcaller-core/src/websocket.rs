//! Minimal WebSocket (RFC 6455) framing for the push channel
//!
//! Only what the push channel needs: the opening handshake key, and headers of
//! unfragmented frames. The firmware does the actual socket I/O.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use heapless::{String, Vec};
use sha1::{Digest, Sha1};
use thiserror_no_std::Error;

/// GUID appended to the client key when computing the accept key
const HANDSHAKE_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Length of a base64 encoded SHA-1 digest
pub const ACCEPT_KEY_LEN: usize = 28;

/// Largest possible frame header: 2 bytes + 8 byte length + 4 byte mask
pub const MAX_HEADER_LEN: usize = 14;

/// Largest inbound payload accepted from a client
pub const MAX_INBOUND_PAYLOAD: usize = 128;

/// Largest payload a control frame may carry
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// A complete encoded control frame, header included
pub type ControlFrame = Vec<u8, { 2 + MAX_CONTROL_PAYLOAD }>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebSocketError {
    #[error("unknown opcode {0:#x}")]
    UnknownOpcode(u8),
    #[error("reserved bits set")]
    ReservedBits,
    #[error("header is truncated")]
    Truncated,
    #[error("fragmented frames are not supported")]
    Fragmented,
    #[error("client frames must be masked")]
    Unmasked,
    #[error("payload of {0} bytes is too large")]
    PayloadTooLarge(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_bits(bits: u8) -> Result<Self, WebSocketError> {
        Ok(match bits {
            0x0 => Self::Continuation,
            0x1 => Self::Text,
            0x2 => Self::Binary,
            0x8 => Self::Close,
            0x9 => Self::Ping,
            0xA => Self::Pong,
            other => return Err(WebSocketError::UnknownOpcode(other)),
        })
    }

    const fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

/// Compute `Sec-WebSocket-Accept` for a client's `Sec-WebSocket-Key`
pub fn accept_key(client_key: &str) -> String<ACCEPT_KEY_LEN> {
    let mut hasher = Sha1::new();
    hasher.update(client_key.trim().as_bytes());
    hasher.update(HANDSHAKE_GUID);
    let digest = hasher.finalize();

    let mut encoded = [0u8; ACCEPT_KEY_LEN];
    let mut key = String::new();
    // A 20 byte digest always encodes to exactly 28 ASCII bytes
    if let Ok(len) = STANDARD.encode_slice(digest, &mut encoded) {
        for &b in &encoded[..len] {
            let _ = key.push(b as char);
        }
    }
    key
}

/// Header of a single WebSocket frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub fin: bool,
    pub opcode: Opcode,
    pub payload_len: u64,
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Header for an unmasked, unfragmented server frame
    pub const fn server(opcode: Opcode, payload_len: usize) -> Self {
        Self {
            fin: true,
            opcode,
            payload_len: payload_len as u64,
            mask: None,
        }
    }

    /// Total header length implied by the second header byte
    pub const fn header_len(second_byte: u8) -> usize {
        let ext = match second_byte & 0x7F {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        let mask = if second_byte & 0x80 != 0 { 4 } else { 0 };
        2 + ext + mask
    }

    /// Decode a complete header; `bytes` must hold at least [`FrameHeader::header_len`] bytes
    pub fn decode(bytes: &[u8]) -> Result<Self, WebSocketError> {
        let [first, second, rest @ ..] = bytes else {
            return Err(WebSocketError::Truncated);
        };
        if bytes.len() < Self::header_len(*second) {
            return Err(WebSocketError::Truncated);
        }
        if first & 0x70 != 0 {
            return Err(WebSocketError::ReservedBits);
        }

        let fin = first & 0x80 != 0;
        let opcode = Opcode::from_bits(first & 0x0F)?;
        let (payload_len, rest) = match second & 0x7F {
            126 => (u64::from(u16::from_be_bytes([rest[0], rest[1]])), &rest[2..]),
            127 => {
                let mut len = [0u8; 8];
                len.copy_from_slice(&rest[..8]);
                (u64::from_be_bytes(len), &rest[8..])
            }
            short => (u64::from(short), rest),
        };
        let mask = if second & 0x80 != 0 {
            Some([rest[0], rest[1], rest[2], rest[3]])
        } else {
            None
        };

        Ok(Self {
            fin,
            opcode,
            payload_len,
            mask,
        })
    }

    /// Check the constraints on a frame received from a browser client
    pub fn validate_client_frame(&self) -> Result<(), WebSocketError> {
        if !self.fin || self.opcode == Opcode::Continuation {
            return Err(WebSocketError::Fragmented);
        }
        if self.mask.is_none() {
            return Err(WebSocketError::Unmasked);
        }
        if self.payload_len > MAX_INBOUND_PAYLOAD as u64
            || (self.is_control() && self.payload_len > MAX_CONTROL_PAYLOAD as u64)
        {
            return Err(WebSocketError::PayloadTooLarge(self.payload_len));
        }
        Ok(())
    }

    const fn is_control(&self) -> bool {
        matches!(self.opcode, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }

    /// Encode into `out`, returning the number of bytes written
    pub fn encode(&self, out: &mut [u8; MAX_HEADER_LEN]) -> usize {
        out[0] = (if self.fin { 0x80 } else { 0 }) | self.opcode.bits();
        let mask_bit = if self.mask.is_some() { 0x80 } else { 0 };

        let mut len = 2;
        if self.payload_len < 126 {
            out[1] = mask_bit | self.payload_len as u8;
        } else if self.payload_len <= u64::from(u16::MAX) {
            out[1] = mask_bit | 126;
            out[2..4].copy_from_slice(&(self.payload_len as u16).to_be_bytes());
            len += 2;
        } else {
            out[1] = mask_bit | 127;
            out[2..10].copy_from_slice(&self.payload_len.to_be_bytes());
            len += 8;
        }

        if let Some(mask) = self.mask {
            out[len..len + 4].copy_from_slice(&mask);
            len += 4;
        }
        len
    }

    /// Remove the client mask from a payload in place
    pub fn unmask(&self, payload: &mut [u8]) {
        if let Some(mask) = self.mask {
            for (i, b) in payload.iter_mut().enumerate() {
                *b ^= mask[i % 4];
            }
        }
    }
}

/// Build the Pong frame answering a client Ping; the payload is echoed back
pub fn pong_frame(ping_payload: &[u8]) -> Result<ControlFrame, WebSocketError> {
    if ping_payload.len() > MAX_CONTROL_PAYLOAD {
        return Err(WebSocketError::PayloadTooLarge(ping_payload.len() as u64));
    }
    let mut header = [0u8; MAX_HEADER_LEN];
    let len = FrameHeader::server(Opcode::Pong, ping_payload.len()).encode(&mut header);

    let mut frame = ControlFrame::new();
    // Short control headers are 2 bytes, so both always fit
    let _ = frame.extend_from_slice(&header[..len]);
    let _ = frame.extend_from_slice(ping_payload);
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_key() {
        // Example handshake from RFC 6455 section 1.3
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ==").as_str(),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_decode_masked_text_frame() {
        // "Hello" from a client, RFC 6455 section 5.7
        let mut frame = [
            0x81, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        assert_eq!(FrameHeader::header_len(frame[1]), 6);

        let header = FrameHeader::decode(&frame[..6]).unwrap();
        assert!(header.fin);
        assert_eq!(header.opcode, Opcode::Text);
        assert_eq!(header.payload_len, 5);
        assert_eq!(header.validate_client_frame(), Ok(()));

        let payload = &mut frame[6..];
        header.unmask(payload);
        assert_eq!(payload, b"Hello");
    }

    #[test]
    fn test_encode_server_frames() {
        let mut out = [0u8; MAX_HEADER_LEN];

        let len = FrameHeader::server(Opcode::Text, 5).encode(&mut out);
        assert_eq!(&out[..len], &[0x81, 0x05]);

        let len = FrameHeader::server(Opcode::Text, 600).encode(&mut out);
        assert_eq!(&out[..len], &[0x81, 126, 0x02, 0x58]);

        let len = FrameHeader::server(Opcode::Close, 0).encode(&mut out);
        assert_eq!(&out[..len], &[0x88, 0x00]);
    }

    #[test]
    fn test_extended_length_header() {
        let bytes = [0x82, 0xFE, 0x01, 0x00, 1, 2, 3, 4];
        assert_eq!(FrameHeader::header_len(bytes[1]), 8);
        let header = FrameHeader::decode(&bytes).unwrap();
        assert_eq!(header.opcode, Opcode::Binary);
        assert_eq!(header.payload_len, 256);
        assert_eq!(header.mask, Some([1, 2, 3, 4]));
        assert_eq!(
            header.validate_client_frame(),
            Err(WebSocketError::PayloadTooLarge(256))
        );
    }

    #[test]
    fn test_rejects_bad_client_frames() {
        assert_eq!(
            FrameHeader::decode(&[0x81]),
            Err(WebSocketError::Truncated)
        );
        assert_eq!(
            FrameHeader::decode(&[0x81, 0x85, 0, 0]),
            Err(WebSocketError::Truncated)
        );
        assert_eq!(
            FrameHeader::decode(&[0x83, 0x00]),
            Err(WebSocketError::UnknownOpcode(3))
        );
        assert_eq!(
            FrameHeader::decode(&[0xC1, 0x00]),
            Err(WebSocketError::ReservedBits)
        );

        let unmasked = FrameHeader::decode(&[0x81, 0x05]).unwrap();
        assert_eq!(unmasked.validate_client_frame(), Err(WebSocketError::Unmasked));

        let fragment = FrameHeader::decode(&[0x01, 0x80, 0, 0, 0, 0]).unwrap();
        assert_eq!(fragment.validate_client_frame(), Err(WebSocketError::Fragmented));
    }

    #[test]
    fn test_ping_is_answered_with_pong() {
        // Masked "Hello" ping from RFC 6455 section 5.7
        let mut frame = [
            0x89, 0x85, 0x37, 0xfa, 0x21, 0x3d, 0x7f, 0x9f, 0x4d, 0x51, 0x58,
        ];
        let header = FrameHeader::decode(&frame[..6]).unwrap();
        assert_eq!(header.opcode, Opcode::Ping);
        assert_eq!(header.validate_client_frame(), Ok(()));

        let payload = &mut frame[6..];
        header.unmask(payload);
        let pong = pong_frame(payload).unwrap();
        assert_eq!(pong.as_slice(), &[0x8a, 0x05, b'H', b'e', b'l', b'l', b'o']);

        assert_eq!(pong_frame(&[]).unwrap().as_slice(), &[0x8a, 0x00]);
    }

    #[test]
    fn test_oversized_control_frames_are_rejected() {
        let ping = FrameHeader::decode(&[0x89, 0xFE, 0x00, 126, 0, 0, 0, 0]).unwrap();
        assert_eq!(
            ping.validate_client_frame(),
            Err(WebSocketError::PayloadTooLarge(126))
        );
        assert_eq!(
            pong_frame(&[0u8; MAX_CONTROL_PAYLOAD + 1]),
            Err(WebSocketError::PayloadTooLarge(126))
        );
    }
}
