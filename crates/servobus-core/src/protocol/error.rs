//! Protocol errors

use std::fmt;

use thiserror::Error;

use crate::registers::{Model, Register};

/// Response field that was being read when a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseField {
    /// First 0xFF marker
    HeaderFirst,
    /// Second 0xFF marker
    HeaderSecond,
    /// Device address
    Address,
    /// Length byte
    Length,
    /// Status / error byte
    Status,
    /// Parameter byte at the given index
    Param(usize),
    /// Trailing checksum
    Checksum,
}

impl fmt::Display for ResponseField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseField::HeaderFirst => write!(f, "header byte 1"),
            ResponseField::HeaderSecond => write!(f, "header byte 2"),
            ResponseField::Address => write!(f, "device address"),
            ResponseField::Length => write!(f, "length"),
            ResponseField::Status => write!(f, "status byte"),
            ResponseField::Param(i) => write!(f, "parameter byte {}", i),
            ResponseField::Checksum => write!(f, "checksum"),
        }
    }
}

/// Errors that can occur during bus communication
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Timeout while reading {during}")]
    Timeout { during: ResponseField },

    #[error("Header mismatch: expected FF FF, got {first:02X} {second:02X}")]
    HeaderMismatch { first: u8, second: u8 },

    #[error("Address mismatch: expected {expected}, got {got}")]
    AddressMismatch { expected: u8, got: u8 },

    #[error("Checksum mismatch: expected {expected:#04x}, got {got:#04x}")]
    ChecksumError { expected: u8, got: u8 },

    #[error("Arity mismatch: {0}")]
    ArityMismatch(String),

    #[error("{what} out of range: {value} not in {min}..={max}")]
    RangeError {
        what: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Register {register:?} is not available on {model:?} servos")]
    UnsupportedOnModel { register: Register, model: Model },

    #[error("Response carried {got} parameter bytes, expected {expected}")]
    ResponseLength { expected: usize, got: usize },

    #[error("Packet too large: {len} parameter bytes")]
    PacketTooLarge { len: usize },

    #[error("Malformed packet")]
    MalformedPacket,

    #[error("Serial port error: {0}")]
    SerialError(String),

    #[error("Bus lock poisoned by a panicked caller")]
    BusPoisoned,

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl ProtocolError {
    /// Stable identifier for each failure kind, for reporting to remote clients
    pub fn code(&self) -> &'static str {
        match self {
            ProtocolError::Timeout { .. } => "bus_timeout",
            ProtocolError::HeaderMismatch { .. } => "header_mismatch",
            ProtocolError::AddressMismatch { .. } => "address_mismatch",
            ProtocolError::ChecksumError { .. } => "checksum_error",
            ProtocolError::ArityMismatch(_) => "arity_mismatch",
            ProtocolError::RangeError { .. } => "range_error",
            ProtocolError::UnsupportedOnModel { .. } => "unsupported_on_model",
            ProtocolError::ResponseLength { .. } => "response_length",
            ProtocolError::PacketTooLarge { .. } => "packet_too_large",
            ProtocolError::MalformedPacket => "malformed_packet",
            ProtocolError::SerialError(_) => "serial_error",
            ProtocolError::BusPoisoned => "bus_poisoned",
            ProtocolError::IoError(_) => "io_error",
        }
    }

    /// True if no (complete) response arrived in time
    pub fn is_timeout(&self) -> bool {
        matches!(self, ProtocolError::Timeout { .. })
    }

    /// True for failures detected before any byte reached the bus
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ProtocolError::ArityMismatch(_)
                | ProtocolError::RangeError { .. }
                | ProtocolError::UnsupportedOnModel { .. }
                | ProtocolError::PacketTooLarge { .. }
        )
    }

    pub(crate) fn range(what: &'static str, value: i64, min: i64, max: i64) -> Self {
        ProtocolError::RangeError {
            what,
            value,
            min,
            max,
        }
    }
}
