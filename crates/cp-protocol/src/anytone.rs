//! AnyTone Programming Protocol
//!
//! Used by the AnyTone D868UV/D878UV family. A session starts with an ASCII
//! handshake and continues with binary frames addressed by 32-bit big-endian
//! addresses.
//!
//! # Request Format
//! ```text
//! PROGRAM                                 enter programming mode
//! 02                                      device info query
//! 52 [addr:4] [len]                       read 'R'
//! 57 [addr:4] [len] [data:len] [sum] 06   write 'W'
//! END                                     leave programming mode
//! ```
//!
//! `sum` is the 8-bit sum of address, length and data. The radio does not
//! reject frames with a bad sum, it only reports them, and neither do we.
//!
//! # Responses
//! - `PROGRAM` → `QX 06`
//! - device info → `ID [model:6] [band] [revision:6] 06`
//! - read → a write frame carrying the requested bytes
//! - write → `06`
//! - `END` → nothing

use std::fmt;

use crate::error::ParseError;
use crate::{sum8, Decoded, DecodeRequest, EncodeRequest, EncodeResponse, RequestCodec};

/// Handshake entering programming mode
pub const PROGRAM: &[u8] = b"PROGRAM";
/// Handshake leaving programming mode
pub const END: &[u8] = b"END";
/// Device info query byte
pub const DEVICE_INFO: u8 = 0x02;
/// Acknowledge byte
pub const ACK: u8 = 0x06;

/// Length of the read request frame
const READ_LEN: usize = 6;
/// Header (`W`, address, length) plus trailing sum and ack
const WRITE_OVERHEAD: usize = 8;

/// Buffering codec for AnyTone requests
pub type AnyToneCodec = RequestCodec<AnyToneRequest>;

/// Request sent by the CPS to an AnyTone radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyToneRequest {
    /// Enter programming mode
    Program,
    /// Leave programming mode
    End,
    /// Query model and hardware revision
    DeviceInfo,
    /// Read `length` bytes starting at `address`
    Read { address: u32, length: u8 },
    /// Write `data` at `address`
    Write {
        address: u32,
        data: Vec<u8>,
        /// Whether the transmitted sum matched the frame content
        checksum_ok: bool,
    },
}

impl AnyToneRequest {
    /// A write request with a valid checksum
    pub fn write(address: u32, data: impl Into<Vec<u8>>) -> Self {
        Self::Write {
            address,
            data: data.into(),
            checksum_ok: true,
        }
    }
}

impl fmt::Display for AnyToneRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnyToneRequest::Program => write!(f, "PROGRAM"),
            AnyToneRequest::End => write!(f, "END"),
            AnyToneRequest::DeviceInfo => write!(f, "device info"),
            AnyToneRequest::Read { address, length } => {
                write!(f, "read {}b at 0x{:08x}", length, address)
            }
            AnyToneRequest::Write { address, data, .. } => {
                write!(f, "write {}b at 0x{:08x}", data.len(), address)
            }
        }
    }
}

/// Match a fixed ASCII keyword against a possibly short buffer
fn keyword(buffer: &[u8], word: &[u8], request: AnyToneRequest) -> Decoded<AnyToneRequest> {
    let n = buffer.len().min(word.len());
    if buffer[..n] != word[..n] {
        return Err(ParseError::UnknownCommand(format!(
            "AnyTone {:?}",
            String::from_utf8_lossy(&buffer[..n])
        )));
    }
    if n < word.len() {
        return Ok(None);
    }
    Ok(Some((request, word.len())))
}

impl DecodeRequest for AnyToneRequest {
    fn decode(buffer: &[u8]) -> Decoded<Self> {
        let Some(&first) = buffer.first() else {
            return Ok(None);
        };

        match first {
            b'P' => keyword(buffer, PROGRAM, AnyToneRequest::Program),
            b'E' => keyword(buffer, END, AnyToneRequest::End),
            DEVICE_INFO => Ok(Some((AnyToneRequest::DeviceInfo, 1))),
            b'R' => {
                if buffer.len() < READ_LEN {
                    return Ok(None);
                }
                let address = u32::from_be_bytes([buffer[1], buffer[2], buffer[3], buffer[4]]);
                Ok(Some((
                    AnyToneRequest::Read {
                        address,
                        length: buffer[5],
                    },
                    READ_LEN,
                )))
            }
            b'W' => {
                if buffer.len() < 6 {
                    return Ok(None);
                }
                let length = buffer[5] as usize;
                let frame_len = length + WRITE_OVERHEAD;
                if buffer.len() < frame_len {
                    return Ok(None);
                }
                let address = u32::from_be_bytes([buffer[1], buffer[2], buffer[3], buffer[4]]);
                let expected = sum8(&buffer[1..6 + length]);
                let actual = buffer[6 + length];
                let checksum_ok = expected == actual;
                if !checksum_ok {
                    tracing::warn!(
                        "AnyTone write at 0x{:08x}: {}",
                        address,
                        ParseError::ChecksumMismatch { expected, actual }
                    );
                }
                Ok(Some((
                    AnyToneRequest::Write {
                        address,
                        data: buffer[6..6 + length].to_vec(),
                        checksum_ok,
                    },
                    frame_len,
                )))
            }
            other => Err(ParseError::UnknownCommand(format!("AnyTone 0x{:02X}", other))),
        }
    }
}

impl EncodeRequest for AnyToneRequest {
    fn encode(&self) -> Vec<u8> {
        match self {
            AnyToneRequest::Program => PROGRAM.to_vec(),
            AnyToneRequest::End => END.to_vec(),
            AnyToneRequest::DeviceInfo => vec![DEVICE_INFO],
            AnyToneRequest::Read { address, length } => {
                let mut out = vec![b'R'];
                out.extend_from_slice(&address.to_be_bytes());
                out.push(*length);
                out
            }
            AnyToneRequest::Write { address, data, .. } => write_frame(*address, data),
        }
    }
}

/// `W addr len data sum 06`, shared by write requests and read responses.
///
/// The length field is one byte; longer payloads are cut to 255 bytes.
fn write_frame(address: u32, data: &[u8]) -> Vec<u8> {
    let length = u8::try_from(data.len()).unwrap_or_else(|_| {
        tracing::warn!(
            "AnyTone frame at 0x{:08x}: truncating {}b payload to {}b",
            address,
            data.len(),
            u8::MAX
        );
        u8::MAX
    });
    let data = &data[..usize::from(length)];
    let mut out = Vec::with_capacity(data.len() + WRITE_OVERHEAD);
    out.push(b'W');
    out.extend_from_slice(&address.to_be_bytes());
    out.push(length);
    out.extend_from_slice(data);
    out.push(sum8(&out[1..]));
    out.push(ACK);
    out
}

/// Response sent by the emulated radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnyToneResponse {
    /// Programming mode entered
    Program,
    /// Device identification
    DeviceInfo {
        model: Vec<u8>,
        band: u8,
        revision: Vec<u8>,
    },
    /// Data read from the radio's memory
    Read { address: u32, data: Vec<u8> },
    /// Write acknowledged
    Write,
}

/// Truncate or zero-pad to exactly `len` bytes
fn padded(bytes: &[u8], len: usize) -> impl Iterator<Item = u8> + '_ {
    bytes.iter().copied().chain(std::iter::repeat(0)).take(len)
}

impl EncodeResponse for AnyToneResponse {
    fn encode(&self) -> Vec<u8> {
        match self {
            AnyToneResponse::Program => vec![b'Q', b'X', ACK],
            AnyToneResponse::DeviceInfo {
                model,
                band,
                revision,
            } => {
                let mut out = b"ID".to_vec();
                out.extend(padded(model, 6));
                out.push(*band);
                out.extend(padded(revision, 6));
                out.push(ACK);
                out
            }
            AnyToneResponse::Read { address, data } => write_frame(*address, data),
            AnyToneResponse::Write => vec![ACK],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProtocolCodec;
    use proptest::prelude::*;

    #[test]
    fn test_parse_handshake() {
        assert_eq!(
            AnyToneRequest::decode(b"PROGRAM"),
            Ok(Some((AnyToneRequest::Program, 7)))
        );
        assert_eq!(AnyToneRequest::decode(b"EN"), Ok(None));
        assert_eq!(AnyToneRequest::decode(b"END"), Ok(Some((AnyToneRequest::End, 3))));
        assert_eq!(
            AnyToneRequest::decode(&[0x02, b'P']),
            Ok(Some((AnyToneRequest::DeviceInfo, 1)))
        );
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            AnyToneRequest::decode(b"PRX"),
            Err(ParseError::UnknownCommand(_))
        ));
        assert!(matches!(
            AnyToneRequest::decode(&[0xAA]),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_parse_read() {
        let frame = [b'R', 0x00, 0x80, 0x00, 0x00, 0x10];
        assert_eq!(AnyToneRequest::decode(&frame[..5]), Ok(None));
        assert_eq!(
            AnyToneRequest::decode(&frame),
            Ok(Some((
                AnyToneRequest::Read {
                    address: 0x0080_0000,
                    length: 0x10
                },
                6
            )))
        );
    }

    #[test]
    fn test_parse_write() {
        let frame = [b'W', 0x00, 0x00, 0x00, 0x10, 0x02, 0xAA, 0xBB, 0x77, ACK];
        assert_eq!(AnyToneRequest::decode(&frame[..9]), Ok(None));
        let (request, consumed) = AnyToneRequest::decode(&frame).unwrap().unwrap();
        assert_eq!(consumed, 10);
        assert_eq!(request, AnyToneRequest::write(0x10, vec![0xAA, 0xBB]));
    }

    #[test]
    fn test_long_payload_is_truncated_consistently() {
        let frame = AnyToneResponse::Read {
            address: 0x20,
            data: vec![0x11; 300],
        }
        .encode();
        assert_eq!(frame[5], 0xff);
        assert_eq!(frame.len(), 255 + WRITE_OVERHEAD);

        let long_write = AnyToneRequest::write(0x20, vec![0x11; 256]).encode();
        let (request, consumed) = AnyToneRequest::decode(&long_write).unwrap().unwrap();
        assert_eq!(consumed, 255 + WRITE_OVERHEAD);
        assert_eq!(request, AnyToneRequest::write(0x20, vec![0x11; 255]));
    }

    #[test]
    fn test_bad_checksum_is_accepted() {
        let frame = [b'W', 0x00, 0x00, 0x00, 0x10, 0x02, 0xAA, 0xBB, 0x00, ACK];
        let (request, _) = AnyToneRequest::decode(&frame).unwrap().unwrap();
        assert!(matches!(
            request,
            AnyToneRequest::Write {
                address: 0x10,
                checksum_ok: false,
                ..
            }
        ));
    }

    #[test]
    fn test_encode_responses() {
        assert_eq!(AnyToneResponse::Program.encode(), b"QX\x06");
        assert_eq!(AnyToneResponse::Write.encode(), vec![ACK]);

        let info = AnyToneResponse::DeviceInfo {
            model: b"D878UV".to_vec(),
            band: 0x04,
            revision: b"V100".to_vec(),
        };
        assert_eq!(info.encode(), b"IDD878UV\x04V100\x00\x00\x06");

        let read = AnyToneResponse::Read {
            address: 0x0100,
            data: vec![0x01, 0x02],
        };
        assert_eq!(
            read.encode(),
            vec![b'W', 0, 0, 1, 0, 2, 1, 2, 0x06, ACK]
        );
    }

    #[test]
    fn test_codec_session() {
        let mut codec = AnyToneCodec::new();
        let mut stream = AnyToneRequest::Program.encode();
        stream.extend(AnyToneRequest::write(0x20, vec![1, 2, 3]).encode());
        stream.extend(AnyToneRequest::End.encode());
        codec.push_bytes(&stream);

        assert_eq!(codec.next_request(), Ok(Some(AnyToneRequest::Program)));
        assert_eq!(
            codec.next_request(),
            Ok(Some(AnyToneRequest::write(0x20, vec![1, 2, 3])))
        );
        assert_eq!(codec.next_request(), Ok(Some(AnyToneRequest::End)));
        assert_eq!(codec.next_request(), Ok(None));
    }

    #[test]
    fn test_codec_clears_on_error() {
        let mut codec = AnyToneCodec::new();
        codec.push_bytes(&[0xFF, b'P', b'R']);
        assert!(codec.next_request().is_err());
        assert_eq!(codec.buffered(), 0);
    }

    proptest! {
        #[test]
        fn prop_write_frame_survives_any_split(
            address in any::<u32>(),
            data in proptest::collection::vec(any::<u8>(), 0..=255),
            split in 0usize..300,
        ) {
            let frame = AnyToneRequest::write(address, data.clone()).encode();
            let split = split.min(frame.len());
            let mut codec = AnyToneCodec::new();
            codec.push_bytes(&frame[..split]);
            if split < frame.len() {
                prop_assert_eq!(codec.next_request(), Ok(None));
            }
            codec.push_bytes(&frame[split..]);
            prop_assert_eq!(codec.next_request(), Ok(Some(AnyToneRequest::write(address, data))));
            prop_assert_eq!(codec.buffered(), 0);
        }
    }
}
