//! F628 frame codec
//!
//! Layout: marker `F6 28`, big-endian length (counts every byte after the
//! marker), opcode word with the C/R flag in bit 15, a status word on
//! responses only, then the payload.

use log::debug;

use crate::types::{RainError, Result, Status};

pub const MARKER: [u8; 2] = [0xF6, 0x28];
pub const MARKER_LEN: usize = 2;
/// Marker, length and opcode
pub const REQUEST_HEADER_LEN: usize = 6;
/// Marker, length, opcode and status
pub const RESPONSE_HEADER_LEN: usize = 8;
/// Set on responses, clear on commands
pub const RESPONSE_FLAG: u16 = 0x8000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    KeepAlive,
    SetOpRegion,
    GetOpRegion,
    GetVersion,
    SetTxPower,
    GetTxPower,
    GetTagReport,
    SetOpParams,
    GetOpParams,
    SetOpState,
    GetOpState,
    SetAntEnables,
    GetAntEnables,
    GetTemp,
    SetEventMask,
    GetEventMask,
}

impl Opcode {
    /// 15-bit opcode as sent in a command
    pub fn code(self) -> u16 {
        match self {
            Self::KeepAlive => 0x0001,
            Self::SetOpRegion => 0x0002,
            Self::GetOpRegion => 0x0003,
            Self::GetVersion => 0x0004,
            Self::SetTxPower => 0x0005,
            Self::GetTxPower => 0x0006,
            Self::GetTagReport => 0x0009,
            Self::SetOpParams => 0x000A,
            Self::GetOpParams => 0x000B,
            Self::SetOpState => 0x000C,
            Self::GetOpState => 0x000D,
            Self::SetAntEnables => 0x000E,
            Self::GetAntEnables => 0x000F,
            Self::GetTemp => 0x0013,
            Self::SetEventMask => 0x0014,
            Self::GetEventMask => 0x0015,
        }
    }

    /// Opcode word echoed by the reader
    pub fn response_code(self) -> u16 {
        self.code() | RESPONSE_FLAG
    }

    pub fn from_code(code: u16) -> Option<Self> {
        let opcode = match code & !RESPONSE_FLAG {
            0x0001 => Self::KeepAlive,
            0x0002 => Self::SetOpRegion,
            0x0003 => Self::GetOpRegion,
            0x0004 => Self::GetVersion,
            0x0005 => Self::SetTxPower,
            0x0006 => Self::GetTxPower,
            0x0009 => Self::GetTagReport,
            0x000A => Self::SetOpParams,
            0x000B => Self::GetOpParams,
            0x000C => Self::SetOpState,
            0x000D => Self::GetOpState,
            0x000E => Self::SetAntEnables,
            0x000F => Self::GetAntEnables,
            0x0013 => Self::GetTemp,
            0x0014 => Self::SetEventMask,
            0x0015 => Self::GetEventMask,
            _ => return None,
        };
        Some(opcode)
    }
}

/// Shapes of request payload understood by the reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Empty,
    /// UTF-8 text followed by a zero byte
    Text(String),
    Word(u16),
    Words([u16; 4]),
    Int32(u32),
    /// Parameter code bytes followed by a 32-bit value
    Param { code: Vec<u8>, value: u32 },
    /// Pre-formatted bytes
    Raw(Vec<u8>),
}

/// Discriminant used to decode a payload back out of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Empty,
    Text,
    Word,
    Words,
    Int32,
    Param { code_len: usize },
    Raw,
}

impl Payload {
    pub fn kind(&self) -> PayloadKind {
        match self {
            Self::Empty => PayloadKind::Empty,
            Self::Text(_) => PayloadKind::Text,
            Self::Word(_) => PayloadKind::Word,
            Self::Words(_) => PayloadKind::Words,
            Self::Int32(_) => PayloadKind::Int32,
            Self::Param { code, .. } => PayloadKind::Param {
                code_len: code.len(),
            },
            Self::Raw(_) => PayloadKind::Raw,
        }
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Text(text) => text.len() + 1,
            Self::Word(_) => 2,
            Self::Words(_) => 8,
            Self::Int32(_) => 4,
            Self::Param { code, .. } => code.len() + 4,
            Self::Raw(bytes) => bytes.len(),
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Self::Empty => {}
            Self::Text(text) => {
                out.extend_from_slice(text.as_bytes());
                out.push(0x00);
            }
            Self::Word(word) => out.extend_from_slice(&word.to_be_bytes()),
            Self::Words(words) => words
                .iter()
                .for_each(|word| out.extend_from_slice(&word.to_be_bytes())),
            Self::Int32(value) => out.extend_from_slice(&value.to_be_bytes()),
            Self::Param { code, value } => {
                out.extend_from_slice(code);
                out.extend_from_slice(&value.to_be_bytes());
            }
            Self::Raw(bytes) => out.extend_from_slice(bytes),
        }
    }

    /// Decode the payload bytes of a request frame
    pub fn decode(kind: PayloadKind, bytes: &[u8]) -> Result<Self> {
        let short = || {
            RainError::InvalidResponse(format!(
                "Payload too short for {:?}: {} bytes",
                kind,
                bytes.len()
            ))
        };

        let payload = match kind {
            PayloadKind::Empty => Self::Empty,
            PayloadKind::Text => {
                let end = bytes.iter().position(|&b| b == 0x00).ok_or_else(short)?;
                let text = std::str::from_utf8(&bytes[..end])
                    .map_err(|e| RainError::InvalidResponse(format!("Invalid UTF-8: {}", e)))?;
                Self::Text(text.to_string())
            }
            PayloadKind::Word => Self::Word(read_u16(bytes, 0).ok_or_else(short)?),
            PayloadKind::Words => {
                let mut words = [0u16; 4];
                for (i, word) in words.iter_mut().enumerate() {
                    *word = read_u16(bytes, i * 2).ok_or_else(short)?;
                }
                Self::Words(words)
            }
            PayloadKind::Int32 => Self::Int32(read_u32(bytes, 0).ok_or_else(short)?),
            PayloadKind::Param { code_len } => {
                let code = bytes.get(..code_len).ok_or_else(short)?.to_vec();
                let value = read_u32(bytes, code_len).ok_or_else(short)?;
                Self::Param { code, value }
            }
            PayloadKind::Raw => Self::Raw(bytes.to_vec()),
        };
        Ok(payload)
    }
}

/// Encode a command frame, zero-padding the payload up to `length`
pub fn encode(opcode: Opcode, length: u16, payload: &Payload) -> Result<Vec<u8>> {
    let natural = REQUEST_HEADER_LEN - MARKER_LEN + payload.encoded_len();
    if natural > length as usize {
        return Err(RainError::InvalidParameter(format!(
            "Payload for {:?} needs {} bytes but frame length is {}",
            opcode, natural, length
        )));
    }

    let mut frame = Vec::with_capacity(MARKER_LEN + length as usize);
    frame.extend_from_slice(&MARKER);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&opcode.code().to_be_bytes());
    payload.write_to(&mut frame);
    frame.resize(MARKER_LEN + length as usize, 0x00);
    Ok(frame)
}

/// Encode a command frame whose length is exactly what the payload needs
pub fn encode_request(opcode: Opcode, payload: &Payload) -> Vec<u8> {
    let mut frame = Vec::with_capacity(REQUEST_HEADER_LEN + payload.encoded_len());
    let length = (REQUEST_HEADER_LEN - MARKER_LEN + payload.encoded_len()) as u16;
    frame.extend_from_slice(&MARKER);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&opcode.code().to_be_bytes());
    payload.write_to(&mut frame);
    frame
}

/// Split a command frame into its opcode and payload bytes
pub fn decode_request(bytes: &[u8]) -> Result<(Opcode, &[u8])> {
    if bytes.len() < REQUEST_HEADER_LEN || bytes[..MARKER_LEN] != MARKER {
        return Err(RainError::InvalidResponse(format!(
            "Not a command frame: {:02X?}",
            bytes
        )));
    }
    let code = u16::from_be_bytes([bytes[4], bytes[5]]);
    let opcode = Opcode::from_code(code)
        .ok_or_else(|| RainError::InvalidResponse(format!("Unknown opcode 0x{:04X}", code)))?;
    Ok((opcode, &bytes[REQUEST_HEADER_LEN..]))
}

/// A response frame as received, possibly empty or truncated
///
/// Accessors never panic: fields past the end of the buffer read as `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Recover the frame answering `expected` from a raw receive buffer
    ///
    /// The buffer may start with an unsolicited frame (typically a keep-alive
    /// reply) ahead of the real answer. When the marker occurs at least twice
    /// the third fragment is preferred if it carries the expected opcode,
    /// otherwise the second fragment is used. The result is cut to the
    /// length its header declares.
    pub fn resynchronize(raw: &[u8], expected: Opcode) -> Self {
        let fragments = split_on_marker(raw);
        let mut bytes = if fragments.len() > 2 {
            let third = with_marker(fragments[2]);
            if read_u16(&third, 4) == Some(expected.response_code()) {
                third
            } else {
                debug!("Discarding unsolicited frame ahead of {:?} response", expected);
                with_marker(fragments[1])
            }
        } else {
            raw.to_vec()
        };

        if let Some(length) = read_u16(&bytes, MARKER_LEN) {
            bytes.truncate(length as usize + MARKER_LEN);
        }
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn length(&self) -> Option<u16> {
        read_u16(&self.bytes, 2)
    }

    /// Raw opcode word including the C/R flag
    pub fn opcode_word(&self) -> Option<u16> {
        read_u16(&self.bytes, 4)
    }

    pub fn status(&self) -> Option<Status> {
        read_u16(&self.bytes, 6).map(Status::from_code)
    }

    pub fn payload(&self) -> &[u8] {
        self.bytes.get(RESPONSE_HEADER_LEN..).unwrap_or_default()
    }

    pub fn matches(&self, expected: Opcode) -> bool {
        self.opcode_word() == Some(expected.response_code())
    }

    /// Check that this frame is a successful answer to `expected`
    pub fn validate(&self, expected: Opcode) -> Result<()> {
        self.validate_status(expected, Status::Success)
    }

    pub fn validate_status(&self, expected: Opcode, expected_status: Status) -> Result<()> {
        if self.is_empty() {
            return Err(RainError::EmptyResponse(format!("{:?}", expected)));
        }
        match self.opcode_word() {
            Some(actual) if actual == expected.response_code() => {}
            actual => {
                return Err(RainError::ProtocolMismatch {
                    expected: expected.response_code(),
                    actual: actual.unwrap_or_default(),
                });
            }
        }
        match self.status() {
            Some(status) if status == expected_status => Ok(()),
            Some(status) => Err(RainError::Device {
                status,
                context: format!("{:?} rejected", expected),
            }),
            None => Err(RainError::InvalidResponse(format!(
                "{:?} response has no status: {:02X?}",
                expected, self.bytes
            ))),
        }
    }
}

/// Split like `bytes.split(marker)`: non-overlapping, left to right, keeping empty fragments
fn split_on_marker(raw: &[u8]) -> Vec<&[u8]> {
    let mut fragments = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + MARKER_LEN <= raw.len() {
        if raw[i..i + MARKER_LEN] == MARKER {
            fragments.push(&raw[start..i]);
            i += MARKER_LEN;
            start = i;
        } else {
            i += 1;
        }
    }
    fragments.push(&raw[start..]);
    fragments
}

fn with_marker(fragment: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MARKER_LEN + fragment.len());
    bytes.extend_from_slice(&MARKER);
    bytes.extend_from_slice(fragment);
    bytes
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    bytes
        .get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

pub(crate) fn read_i16(bytes: &[u8], offset: usize) -> Option<i16> {
    read_u16(bytes, offset).map(|word| word as i16)
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

/// Big-endian unsigned value of a variable-width field (at most 8 bytes are significant)
pub(crate) fn read_be_uint(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64)
}
