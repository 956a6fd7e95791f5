//! Decoding errors of the programming protocols

use thiserror::Error;

/// A request stream that cannot be decoded. The codec drops its buffer on
/// any of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Leading bytes match no request of the protocol
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// A read or write names a memory section the protocol does not have
    #[error("unknown section {section} in {request} request")]
    UnknownSection { request: &'static str, section: u8 },

    /// Trailing sum of a frame does not match its content
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// Errors outside of frame decoding
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Name given for a protocol matches none of [`Protocol::ALL`](crate::Protocol::ALL)
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),
}
