//! Programming Protocol Library
//!
//! This crate provides parsing and encoding for the serial protocols that
//! vendor programming software (CPS) uses to read and write a radio's
//! codeplug memory:
//!
//! - **AnyTone**: ASCII handshake (`PROGRAM`/`END`) with binary read/write
//!   frames carrying a 32-bit address (D878UV, D878UVII)
//! - **Radtel**: fixed 1 KiB pages with an additive checksum (RT-4D)
//! - **OpenGD77**: command/read/write frames of the OpenGD77 firmware
//!   (GD-77 and related)
//! - **MD-32UV**: ASCII identification keywords with little-endian memory
//!   frames (TYT MD-32UV, Retevis DP570UV)
//!
//! # Architecture
//!
//! Each protocol module provides:
//! - A request type implementing [`DecodeRequest`], which parses one request
//!   from the front of a byte buffer and reports how many bytes it consumed
//! - Response types implementing [`EncodeResponse`]
//! - [`EncodeRequest`] for the programmer side, so tests can play the CPS
//!
//! Decoding never blocks on partial data: `Ok(None)` means "wait for more
//! bytes". A hard error means the buffer can not be resynchronized and should
//! be discarded.
//!
//! # Example
//!
//! ```rust
//! use cp_protocol::anytone::{AnyToneCodec, AnyToneRequest};
//! use cp_protocol::ProtocolCodec;
//!
//! let mut codec = AnyToneCodec::new();
//! codec.push_bytes(b"PROG");
//! assert_eq!(codec.next_request(), Ok(None));
//!
//! codec.push_bytes(b"RAM");
//! assert_eq!(codec.next_request(), Ok(Some(AnyToneRequest::Program)));
//! ```

use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

pub mod anytone;
pub mod error;
pub mod md32uv;
pub mod opengd77;
pub mod radtel;

pub use error::{ParseError, ProtocolError};

/// Identifies which programming protocol a radio speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Protocol {
    /// AnyTone binary protocol (D868UV/D878UV family)
    AnyTone,
    /// Radtel page protocol (RT-4D)
    Radtel,
    /// OpenGD77 firmware protocol
    OpenGd77,
    /// TYT MD-32UV protocol
    Md32Uv,
}

impl Protocol {
    /// All supported protocols
    pub const ALL: [Protocol; 4] = [
        Protocol::AnyTone,
        Protocol::Radtel,
        Protocol::OpenGd77,
        Protocol::Md32Uv,
    ];

    /// Returns a human-readable name for the protocol
    pub fn name(&self) -> &'static str {
        match self {
            Protocol::AnyTone => "AnyTone",
            Protocol::Radtel => "Radtel",
            Protocol::OpenGd77 => "OpenGD77",
            Protocol::Md32Uv => "MD-32UV",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Protocol {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Protocol::ALL
            .into_iter()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ProtocolError::UnknownProtocol(s.to_string()))
    }
}

/// Outcome of decoding the front of a buffer: the request and the number of
/// bytes it occupied, `None` if more bytes are needed
pub type Decoded<T> = Result<Option<(T, usize)>, ParseError>;

/// Requests that can be parsed from the front of a byte buffer
pub trait DecodeRequest: Sized {
    /// Try to decode one request starting at `buffer[0]`
    fn decode(buffer: &[u8]) -> Decoded<Self>;
}

/// Encode a device response to its wire format (device → CPS)
pub trait EncodeResponse {
    fn encode(&self) -> Vec<u8>;
}

/// Encode a request to its wire format (CPS → device)
pub trait EncodeRequest {
    fn encode(&self) -> Vec<u8>;
}

/// Trait for protocol codecs that buffer an incoming byte stream
pub trait ProtocolCodec {
    /// The request type produced by this codec
    type Request;

    /// Push raw bytes into the codec's buffer
    fn push_bytes(&mut self, data: &[u8]);

    /// Try to extract the next complete request from the buffer
    ///
    /// On error the buffer is cleared.
    fn next_request(&mut self) -> Result<Option<Self::Request>, ParseError>;

    /// Try to extract the next complete request along with its raw bytes
    fn next_request_with_bytes(&mut self) -> Result<Option<(Self::Request, Vec<u8>)>, ParseError>;

    /// Clear the internal buffer
    fn clear(&mut self);
}

/// Buffering codec for any [`DecodeRequest`] type
#[derive(Debug)]
pub struct RequestCodec<R> {
    buffer: Vec<u8>,
    _request: PhantomData<fn() -> R>,
}

impl<R: DecodeRequest> RequestCodec<R> {
    /// Create an empty codec
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(64),
            _request: PhantomData,
        }
    }

    /// Number of bytes waiting to be decoded
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl<R: DecodeRequest> Default for RequestCodec<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: DecodeRequest> ProtocolCodec for RequestCodec<R> {
    type Request = R;

    fn push_bytes(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    fn next_request(&mut self) -> Result<Option<R>, ParseError> {
        self.next_request_with_bytes()
            .map(|decoded| decoded.map(|(request, _)| request))
    }

    fn next_request_with_bytes(&mut self) -> Result<Option<(R, Vec<u8>)>, ParseError> {
        match R::decode(&self.buffer) {
            Ok(Some((request, consumed))) => {
                let consumed = consumed.min(self.buffer.len());
                let raw = self.buffer.drain(..consumed).collect();
                Ok(Some((request, raw)))
            }
            Ok(None) => Ok(None),
            Err(e) => {
                tracing::warn!("Discarding {} buffered bytes: {}", self.buffer.len(), e);
                self.buffer.clear();
                Err(e)
            }
        }
    }

    fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Additive 8-bit checksum shared by the AnyTone and Radtel framings
pub(crate) fn sum8(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_names_parse_back() {
        for protocol in Protocol::ALL {
            assert_eq!(protocol.name().parse::<Protocol>(), Ok(protocol));
        }
        assert_eq!("opengd77".parse::<Protocol>(), Ok(Protocol::OpenGd77));
        assert_eq!("md-32uv".parse::<Protocol>(), Ok(Protocol::Md32Uv));
        assert!(matches!(
            "Baofeng".parse::<Protocol>(),
            Err(ProtocolError::UnknownProtocol(_))
        ));
    }

    #[test]
    fn test_sum8_wraps() {
        assert_eq!(sum8(&[]), 0);
        assert_eq!(sum8(&[0xff, 0x02]), 0x01);
    }
}
