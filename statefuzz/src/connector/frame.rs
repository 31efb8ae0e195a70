//! A compact CoAP style datagram codec: fixed four byte header, token, delta encoded options
//! and an optional payload behind the `0xFF` marker.

use std::fmt::Display;

use itertools::Itertools;
use thiserror::Error;

const VERSION: u8 = 1;
const PAYLOAD_MARKER: u8 = 0xFF;

/// Well known option numbers.
pub mod option {
    pub const OSCORE: u16 = 9;
    pub const URI_PATH: u16 = 11;
    pub const CONTENT_FORMAT: u16 = 12;
    pub const EDHOC: u16 = 21;
}

/// Codes are stored as `class << 5 | detail`, so 2.05 is `0x45`.
pub mod code {
    pub const EMPTY: u8 = 0x00;
    pub const GET: u8 = 0x01;
    pub const POST: u8 = 0x02;
    pub const CREATED: u8 = 0x41;
    pub const CHANGED: u8 = 0x44;
    pub const CONTENT: u8 = 0x45;
    pub const BAD_REQUEST: u8 = 0x80;
    pub const UNAUTHORIZED: u8 = 0x81;
    pub const NOT_FOUND: u8 = 0x84;
    pub const METHOD_NOT_ALLOWED: u8 = 0x85;
    pub const INTERNAL_SERVER_ERROR: u8 = 0xA0;

    pub fn class(code: u8) -> u8 {
        code >> 5
    }

    pub fn detail(code: u8) -> u8 {
        code & 0x1F
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("datagram of {0} bytes is shorter than the header")]
    Truncated(usize),
    #[error("unsupported version {0}")]
    Version(u8),
    #[error("token length {0} exceeds 8")]
    TokenLength(u8),
    #[error("malformed option at byte {0}")]
    Option(usize),
    #[error("payload marker without payload")]
    EmptyPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Confirmable,
    NonConfirmable,
    Acknowledgement,
    Reset,
}

impl FrameType {
    fn bits(self) -> u8 {
        match self {
            FrameType::Confirmable => 0,
            FrameType::NonConfirmable => 1,
            FrameType::Acknowledgement => 2,
            FrameType::Reset => 3,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => FrameType::Confirmable,
            1 => FrameType::NonConfirmable,
            2 => FrameType::Acknowledgement,
            _ => FrameType::Reset,
        }
    }
}

/// A single datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ty: FrameType,
    pub code: u8,
    pub mid: u16,
    pub token: Vec<u8>,
    /// Options sorted by number, repeated numbers are kept in order.
    pub options: Vec<(u16, Vec<u8>)>,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(ty: FrameType, code: u8, mid: u16) -> Self {
        Self {
            ty,
            code,
            mid,
            token: vec![],
            options: vec![],
            payload: vec![],
        }
    }

    /// An empty acknowledgement or reset for the frame with message id `mid`.
    pub fn empty(ty: FrameType, mid: u16) -> Self {
        Self::new(ty, code::EMPTY, mid)
    }

    pub fn with_token(mut self, token: impl Into<Vec<u8>>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_option(mut self, number: u16, value: impl Into<Vec<u8>>) -> Self {
        let position = self.options.partition_point(|(n, _)| *n <= number);
        self.options.insert(position, (number, value.into()));
        self
    }

    /// Adds one path option per non-empty segment of `path`.
    pub fn with_path(self, path: &str) -> Self {
        path.split('/')
            .filter(|s| !s.is_empty())
            .fold(self, |frame, segment| {
                frame.with_option(option::URI_PATH, segment.as_bytes())
            })
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn has_option(&self, number: u16) -> bool {
        self.options.iter().any(|(n, _)| *n == number)
    }

    pub fn without_option(mut self, number: u16) -> Self {
        self.options.retain(|(n, _)| *n != number);
        self
    }

    /// Joins the path options with `/`.
    pub fn path(&self) -> String {
        self.options
            .iter()
            .filter(|(n, _)| *n == option::URI_PATH)
            .map(|(_, v)| String::from_utf8_lossy(v))
            .join("/")
    }

    /// Empty frames carry code 0.00 and nothing else.
    pub fn is_empty(&self) -> bool {
        self.code == code::EMPTY
    }

    pub fn is_request(&self) -> bool {
        code::class(self.code) == 0 && self.code != code::EMPTY
    }

    pub fn is_success(&self) -> bool {
        code::class(self.code) == 2
    }

    pub fn is_error(&self) -> bool {
        matches!(code::class(self.code), 4 | 5)
    }

    pub fn encode(&self) -> Vec<u8> {
        debug_assert!(self.token.len() <= 8);
        let mut out = Vec::with_capacity(4 + self.token.len() + self.payload.len() + 8);
        out.push(VERSION << 6 | self.ty.bits() << 4 | self.token.len() as u8);
        out.push(self.code);
        out.extend_from_slice(&self.mid.to_be_bytes());
        out.extend_from_slice(&self.token);

        let mut previous = 0u16;
        for (number, value) in &self.options {
            let (delta_nibble, delta_ext) = nibble(number - previous);
            let (len_nibble, len_ext) = nibble(value.len() as u16);
            out.push(delta_nibble << 4 | len_nibble);
            out.extend_from_slice(&delta_ext);
            out.extend_from_slice(&len_ext);
            out.extend_from_slice(value);
            previous = *number;
        }

        if !self.payload.is_empty() {
            out.push(PAYLOAD_MARKER);
            out.extend_from_slice(&self.payload);
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < 4 {
            return Err(FrameError::Truncated(bytes.len()));
        }
        let version = bytes[0] >> 6;
        if version != VERSION {
            return Err(FrameError::Version(version));
        }
        let tkl = bytes[0] & 0x0F;
        if tkl > 8 {
            return Err(FrameError::TokenLength(tkl));
        }
        let token_end = 4 + tkl as usize;
        if bytes.len() < token_end {
            return Err(FrameError::Truncated(bytes.len()));
        }

        let mut frame = Frame::new(
            FrameType::from_bits(bytes[0] >> 4),
            bytes[1],
            u16::from_be_bytes([bytes[2], bytes[3]]),
        )
        .with_token(&bytes[4..token_end]);

        let mut position = token_end;
        let mut number = 0u16;
        while position < bytes.len() {
            let header = bytes[position];
            if header == PAYLOAD_MARKER {
                if position + 1 == bytes.len() {
                    return Err(FrameError::EmptyPayload);
                }
                frame.payload = bytes[position + 1..].to_vec();
                break;
            }
            let start = position;
            position += 1;
            let delta = read_extended(header >> 4, bytes, &mut position)
                .ok_or(FrameError::Option(start))?;
            let length = read_extended(header & 0x0F, bytes, &mut position)
                .ok_or(FrameError::Option(start))? as usize;
            if position + length > bytes.len() {
                return Err(FrameError::Option(start));
            }
            number = number.checked_add(delta).ok_or(FrameError::Option(start))?;
            frame
                .options
                .push((number, bytes[position..position + length].to_vec()));
            position += length;
        }
        Ok(frame)
    }
}

fn nibble(value: u16) -> (u8, Vec<u8>) {
    if value < 13 {
        (value as u8, vec![])
    } else if value < 269 {
        (13, vec![(value - 13) as u8])
    } else {
        (14, (value - 269).to_be_bytes().to_vec())
    }
}

fn read_extended(nibble: u8, bytes: &[u8], position: &mut usize) -> Option<u16> {
    match nibble {
        0..=12 => Some(nibble as u16),
        13 => {
            let value = *bytes.get(*position)? as u16 + 13;
            *position += 1;
            Some(value)
        }
        14 => {
            let high = *bytes.get(*position)?;
            let low = *bytes.get(*position + 1)?;
            *position += 2;
            u16::from_be_bytes([high, low]).checked_add(269)
        }
        _ => None,
    }
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} {}.{:02} mid={} {}B",
            self.ty,
            code::class(self.code),
            code::detail(self.code),
            self.mid,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_request_with_options() {
        let frame = Frame::new(FrameType::Confirmable, code::POST, 0x1234)
            .with_token([0xABu8])
            .with_path(".well-known/edhoc")
            .with_option(option::OSCORE, Vec::<u8>::new())
            .with_payload(b"hi".to_vec());
        let bytes = frame.encode();
        assert_eq!(&bytes[..5], &[0x41, 0x02, 0x12, 0x34, 0xAB]);
        // the oscore option comes first because options are sorted by number
        assert_eq!(bytes[5], 0x90);
        assert_eq!(bytes.last(), Some(&b'i'));

        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(decoded.path(), ".well-known/edhoc");
        assert!(decoded.is_request());
    }

    #[test]
    fn extended_option_numbers() {
        let frame = Frame::new(FrameType::Acknowledgement, code::CHANGED, 7)
            .with_option(option::EDHOC, Vec::<u8>::new())
            .with_option(300, vec![0u8; 20]);
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert!(decoded.has_option(option::EDHOC));
        assert_eq!(decoded.options[1].0, 300);
        assert_eq!(decoded.options[1].1.len(), 20);
        assert!(decoded.is_success());
    }

    #[test]
    fn malformed() {
        assert_eq!(Frame::decode(&[0x40, 0]), Err(FrameError::Truncated(2)));
        assert_eq!(Frame::decode(&[0x00, 0, 0, 0]), Err(FrameError::Version(0)));
        assert_eq!(
            Frame::decode(&[0x40, 0x45, 0, 1, 0xFF]),
            Err(FrameError::EmptyPayload)
        );
        assert_eq!(
            Frame::decode(&[0x40, 0x45, 0, 1, 0x12, 0x00]),
            Err(FrameError::Option(4))
        );
    }

    #[test]
    fn empty_frames() {
        let ack = Frame::empty(FrameType::Acknowledgement, 3);
        assert_eq!(ack.encode(), vec![0x60, 0x00, 0x00, 0x03]);
        assert!(Frame::decode(&ack.encode()).unwrap().is_empty());
    }
}
