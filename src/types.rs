//! Types for reader operations

use std::fmt;
use thiserror::Error;

/// Status word carried by every response frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Success,
    InvalidRegion,
    InvalidPowerLevel,
    InternalError,
    Unknown(u16),
}

impl Status {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => Self::Success,
            0x0005 => Self::InvalidRegion,
            0x0006 => Self::InvalidPowerLevel,
            0x0007 => Self::InternalError,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::Success => 0x0000,
            Self::InvalidRegion => 0x0005,
            Self::InvalidPowerLevel => 0x0006,
            Self::InternalError => 0x0007,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::InvalidRegion => write!(f, "invalid operating region"),
            Self::InvalidPowerLevel => write!(f, "invalid power level"),
            Self::InternalError => write!(f, "internal error"),
            Self::Unknown(code) => write!(f, "unknown status 0x{:04X}", code),
        }
    }
}

/// Errors that can occur during reader operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RainError {
    /// Transport layer error (UART, serial, etc.)
    #[error("transport error: {0}")]
    Transport(String),
    /// The response echoed a different opcode than the request
    #[error("protocol mismatch: expected opcode 0x{expected:04X}, got 0x{actual:04X}")]
    ProtocolMismatch { expected: u16, actual: u16 },
    /// The reader answered with a non-success status
    #[error("{context}: {status}")]
    Device { status: Status, context: String },
    /// Nothing usable arrived within the wait bound
    #[error("no response from reader: {0}")]
    EmptyResponse(String),
    /// Invalid parameter passed to a function
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// Invalid response received from the reader
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    /// A stop signal interrupted a wait
    #[error("stopped")]
    Stopped,
}

pub type Result<T> = std::result::Result<T, RainError>;

/// Firmware, SDK, software and hardware revision strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub firmware: String,
    pub sdk: String,
    pub software: String,
    pub hardware: String,
}

/// Reader RF/test mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingState {
    Idle,
    CwTest,
    PrbsTest,
    EtsiBurstTest,
    TagRead,
    OverTemp,
    ReaderError,
    HardReset,
    SwMismatch,
    Bootloader,
    Undefined(u16),
}

impl OperatingState {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0000 => Self::Idle,
            0x0001 => Self::CwTest,
            0x0002 => Self::PrbsTest,
            0x0003 => Self::EtsiBurstTest,
            0x0004 => Self::TagRead,
            0x0005 => Self::OverTemp,
            0x0006 => Self::ReaderError,
            0x0007 => Self::HardReset,
            0x0008 => Self::SwMismatch,
            0x0009 => Self::Bootloader,
            other => Self::Undefined(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::Idle => 0x0000,
            Self::CwTest => 0x0001,
            Self::PrbsTest => 0x0002,
            Self::EtsiBurstTest => 0x0003,
            Self::TagRead => 0x0004,
            Self::OverTemp => 0x0005,
            Self::ReaderError => 0x0006,
            Self::HardReset => 0x0007,
            Self::SwMismatch => 0x0008,
            Self::Bootloader => 0x0009,
            Self::Undefined(code) => code,
        }
    }
}

/// Tunable reader parameters addressed by a 16-bit code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationalParameter {
    TagTimeout,
    TagPowerChangeThreshold,
    TagReportTimeout,
    TransientDetectTime,
    TransientCount,
    TransientInterval,
    Gen2OpTimeout,
    Undefined(u16),
}

impl OperationalParameter {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => Self::TagTimeout,
            0x0002 => Self::TagPowerChangeThreshold,
            0x0003 => Self::TagReportTimeout,
            0x0004 => Self::TransientDetectTime,
            0x0005 => Self::TransientCount,
            0x0006 => Self::TransientInterval,
            0x0007 => Self::Gen2OpTimeout,
            other => Self::Undefined(other),
        }
    }

    pub fn code(self) -> u16 {
        match self {
            Self::TagTimeout => 0x0001,
            Self::TagPowerChangeThreshold => 0x0002,
            Self::TagReportTimeout => 0x0003,
            Self::TransientDetectTime => 0x0004,
            Self::TransientCount => 0x0005,
            Self::TransientInterval => 0x0006,
            Self::Gen2OpTimeout => 0x0007,
            Self::Undefined(code) => code,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::TagTimeout => "tag_timeout",
            Self::TagPowerChangeThreshold => "tag_power_change_threshold",
            Self::TagReportTimeout => "tag_report_timeout",
            Self::TransientDetectTime => "transient_detect_time",
            Self::TransientCount => "transient_count",
            Self::TransientInterval => "transient_interval",
            Self::Gen2OpTimeout => "gen2_op_timeout",
            Self::Undefined(_) => "undefined",
        }
    }
}

impl fmt::Display for OperationalParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Value of an operational parameter as read back from the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationalParamValue {
    pub param: OperationalParameter,
    pub value: u32,
}

/// Asynchronous events the reader may report (bit 0 = `tag_seen`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventMask {
    pub tag_seen: bool,
    pub tag_removed: bool,
    pub tag_power_change: bool,
    pub tag_report_timeout: bool,
    pub gen2_op_completed: bool,
    pub gen2_op_timeout: bool,
}

impl EventMask {
    pub fn to_bits(&self) -> u32 {
        [
            self.tag_seen,
            self.tag_removed,
            self.tag_power_change,
            self.tag_report_timeout,
            self.gen2_op_completed,
            self.gen2_op_timeout,
        ]
        .iter()
        .enumerate()
        .fold(0, |acc, (bit, &set)| acc | ((set as u32) << bit))
    }

    pub fn from_bits(bits: u32) -> Self {
        let bit = |n: u32| bits & (1 << n) != 0;
        Self {
            tag_seen: bit(0),
            tag_removed: bit(1),
            tag_power_change: bit(2),
            tag_report_timeout: bit(3),
            gen2_op_completed: bit(4),
            gen2_op_timeout: bit(5),
        }
    }
}

/// Enable flags for antennas 1-4 (bit 0 = antenna 1)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AntennaEnables(pub [bool; 4]);

impl AntennaEnables {
    pub fn to_bits(&self) -> u16 {
        self.0
            .iter()
            .enumerate()
            .fold(0, |acc, (bit, &set)| acc | ((set as u16) << bit))
    }

    pub fn from_bits(bits: u16) -> Self {
        Self(std::array::from_fn(|n| bits & (1 << n) != 0))
    }
}

/// Transmit power for antennas 1-4 in dBm
///
/// Travels on the wire as centi-dBm words.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TxPowerSet(pub [f32; 4]);

impl TxPowerSet {
    /// Largest power a centi-dBm word can carry
    pub const MAX_DBM: f32 = u16::MAX as f32 / 100.0;

    pub fn to_centi_dbm(&self) -> Result<[u16; 4]> {
        let mut words = [0u16; 4];
        for (word, &dbm) in words.iter_mut().zip(self.0.iter()) {
            if !(0.0..=Self::MAX_DBM).contains(&dbm) {
                return Err(RainError::InvalidParameter(format!(
                    "Transmit power out of range: {} dBm (0 to {} dBm)",
                    dbm,
                    Self::MAX_DBM
                )));
            }
            *word = (dbm * 100.0).round() as u16;
        }
        Ok(words)
    }

    pub fn from_centi_dbm(words: [u16; 4]) -> Self {
        Self(words.map(|w| w as f32 / 100.0))
    }
}

/// Why the reader produced a tag report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplyReason {
    NewTagSeen,
    TagRemoved,
    PowerChanged,
    Gen2OpCompleted,
    TagReportTimeout,
    ReportRequested,
    Undefined(u16),
}

impl ReplyReason {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x0001 => Self::NewTagSeen,
            0x0002 => Self::TagRemoved,
            0x0003 => Self::PowerChanged,
            0x0004 => Self::Gen2OpCompleted,
            0x0005 => Self::TagReportTimeout,
            0x0006 => Self::ReportRequested,
            other => Self::Undefined(other),
        }
    }
}

/// A detected, removed or re-reported tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagReport {
    pub reply_reason: ReplyReason,
    pub rssi_raw: i16,
    pub power_dbm: i16,
    pub timestamp: u32,
    pub antenna_id: u16,
    /// EPC section as received: length word followed by the EPC bytes
    pub epc_data: Vec<u8>,
}

impl TagReport {
    pub fn epc_length(&self) -> Option<u16> {
        self.epc_data
            .get(..2)
            .map(|word| u16::from_be_bytes([word[0], word[1]]))
    }

    pub fn epc_hex(&self) -> String {
        bytes_to_hex(self.epc_data.get(2..).unwrap_or_default())
    }
}

/// Convert bytes to uppercase hex string
pub(crate) fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}
