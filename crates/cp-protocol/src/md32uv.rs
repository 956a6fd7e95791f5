//! MD-32UV Programming Protocol
//!
//! Spoken by the TYT MD-32UV and its relabels (Retevis DP570UV). The CPS
//! identifies the radio with ASCII keywords and then moves memory in frames
//! with a 24-bit little-endian address and a 16-bit little-endian length.
//!
//! # Request Format
//! ```text
//! 06                                    ping
//! "PSEARCH" | "PASSSTA" | "SYSINFO"     identify, password check, system info
//! "PROGRAM"                             enter programming mode
//! 56 [flags:2] [len:1] [field:1]        'V' read identification value
//! 47 [addr:3] [len:2]                   'G' read info memory
//! 52 [addr:3] [len:2]                   'R' read memory
//! 57 [addr:3] [len:2] [data:len]        'W' write memory
//! ```
//!
//! `FF` bytes between requests are line filler and skipped. There is no
//! "leave programming mode" request; the CPS simply goes quiet.
//!
//! The device answers with `06`, `06 [model:7]` to a search, `50 00 00` to a
//! password check, `56 [field] [len] [data]` to value reads,
//! `53 [addr:3] [len:2] [data]` to info reads and `57 [addr:3] [len:2] [data]`
//! to memory reads.

use std::fmt;

use crate::error::ParseError;
use crate::{Decoded, DecodeRequest, EncodeRequest, EncodeResponse, RequestCodec};

/// Acknowledge byte, also the ping request
pub const ACK: u8 = 0x06;
/// Length of the model name in a search response
pub const MODEL_LEN: usize = 7;

const FILL: u8 = 0xff;
const SEARCH: &[u8] = b"PSEARCH";
const PASSWORD: &[u8] = b"PASSSTA";
const SYSTEM_INFO: &[u8] = b"SYSINFO";
const PROGRAM: &[u8] = b"PROGRAM";

const VALUE_LEN: usize = 5;
const FRAME_HEADER_LEN: usize = 6;

/// Buffering codec for MD-32UV requests
pub type Md32UvCodec = RequestCodec<Md32UvRequest>;

/// Request sent by the CPS to an MD-32UV
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Md32UvRequest {
    Ping,
    /// Device detection
    Search,
    /// Ask whether a programming password is set
    Password,
    /// Enter system info mode
    SystemInfo,
    /// Enter programming mode
    Program,
    /// Read an identification value
    Value { flags: u16, length: u8, field: u8 },
    /// Read from the info memory
    ReadInfo { address: u32, length: u16 },
    /// Read codeplug memory
    Read { address: u32, length: u16 },
    /// Write codeplug memory
    Write { address: u32, data: Vec<u8> },
}

impl fmt::Display for Md32UvRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Md32UvRequest::Ping => write!(f, "ping"),
            Md32UvRequest::Search => write!(f, "PSEARCH"),
            Md32UvRequest::Password => write!(f, "PASSSTA"),
            Md32UvRequest::SystemInfo => write!(f, "SYSINFO"),
            Md32UvRequest::Program => write!(f, "PROGRAM"),
            Md32UvRequest::Value { length, field, .. } => {
                write!(f, "read {}b of value {:02x}h", length, field)
            }
            Md32UvRequest::ReadInfo { address, length } => {
                write!(f, "read {}b of info at 0x{:06x}", length, address)
            }
            Md32UvRequest::Read { address, length } => {
                write!(f, "read {}b at 0x{:06x}", length, address)
            }
            Md32UvRequest::Write { address, data } => {
                write!(f, "write {}b at 0x{:06x}", data.len(), address)
            }
        }
    }
}

fn address_at(frame: &[u8]) -> u32 {
    u32::from_le_bytes([frame[1], frame[2], frame[3], 0])
}

fn length_at(frame: &[u8]) -> u16 {
    u16::from_le_bytes([frame[4], frame[5]])
}

/// Match the ASCII keywords, waiting while the buffer is a prefix of one
fn keyword(buffer: &[u8]) -> Decoded<Md32UvRequest> {
    let keywords = [
        (SEARCH, Md32UvRequest::Search),
        (PASSWORD, Md32UvRequest::Password),
        (SYSTEM_INFO, Md32UvRequest::SystemInfo),
        (PROGRAM, Md32UvRequest::Program),
    ];
    let mut partial = false;
    for (word, request) in keywords {
        if buffer.starts_with(word) {
            return Ok(Some((request, word.len())));
        }
        partial |= word.starts_with(buffer);
    }
    if partial {
        return Ok(None);
    }
    let n = buffer.len().min(PROGRAM.len());
    Err(ParseError::UnknownCommand(format!(
        "MD-32UV {:?}",
        String::from_utf8_lossy(&buffer[..n])
    )))
}

fn decode_frame(buffer: &[u8]) -> Decoded<Md32UvRequest> {
    let Some(&first) = buffer.first() else {
        return Ok(None);
    };

    match first {
        ACK => Ok(Some((Md32UvRequest::Ping, 1))),
        b'P' | b'S' => keyword(buffer),
        b'V' => {
            if buffer.len() < VALUE_LEN {
                return Ok(None);
            }
            Ok(Some((
                Md32UvRequest::Value {
                    flags: u16::from_le_bytes([buffer[1], buffer[2]]),
                    length: buffer[3],
                    field: buffer[4],
                },
                VALUE_LEN,
            )))
        }
        b'G' | b'R' => {
            if buffer.len() < FRAME_HEADER_LEN {
                return Ok(None);
            }
            let address = address_at(buffer);
            let length = length_at(buffer);
            let request = if first == b'G' {
                Md32UvRequest::ReadInfo { address, length }
            } else {
                Md32UvRequest::Read { address, length }
            };
            Ok(Some((request, FRAME_HEADER_LEN)))
        }
        b'W' => {
            if buffer.len() < FRAME_HEADER_LEN {
                return Ok(None);
            }
            let frame_len = FRAME_HEADER_LEN + usize::from(length_at(buffer));
            if buffer.len() < frame_len {
                return Ok(None);
            }
            Ok(Some((
                Md32UvRequest::Write {
                    address: address_at(buffer),
                    data: buffer[FRAME_HEADER_LEN..frame_len].to_vec(),
                },
                frame_len,
            )))
        }
        other => Err(ParseError::UnknownCommand(format!("MD-32UV 0x{:02X}", other))),
    }
}

impl DecodeRequest for Md32UvRequest {
    fn decode(buffer: &[u8]) -> Decoded<Self> {
        let skip = buffer.iter().take_while(|b| **b == FILL).count();
        Ok(decode_frame(&buffer[skip..])?.map(|(request, len)| (request, skip + len)))
    }
}

/// `[tag] [addr:3] [len:2] [data]`; payloads are cut to 64 KiB - 1
fn memory_frame(tag: u8, address: u32, data: &[u8]) -> Vec<u8> {
    let length = u16::try_from(data.len()).unwrap_or(u16::MAX);
    let data = &data[..usize::from(length)];
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + data.len());
    out.push(tag);
    out.extend_from_slice(&address.to_le_bytes()[..3]);
    out.extend_from_slice(&length.to_le_bytes());
    out.extend_from_slice(data);
    out
}

impl EncodeRequest for Md32UvRequest {
    fn encode(&self) -> Vec<u8> {
        match self {
            Md32UvRequest::Ping => vec![ACK],
            Md32UvRequest::Search => SEARCH.to_vec(),
            Md32UvRequest::Password => PASSWORD.to_vec(),
            Md32UvRequest::SystemInfo => SYSTEM_INFO.to_vec(),
            Md32UvRequest::Program => PROGRAM.to_vec(),
            Md32UvRequest::Value {
                flags,
                length,
                field,
            } => {
                let [lo, hi] = flags.to_le_bytes();
                vec![b'V', lo, hi, *length, *field]
            }
            Md32UvRequest::ReadInfo { address, length } => {
                let mut out = memory_frame(b'G', *address, &[]);
                out[4..6].copy_from_slice(&length.to_le_bytes());
                out
            }
            Md32UvRequest::Read { address, length } => {
                let mut out = memory_frame(b'R', *address, &[]);
                out[4..6].copy_from_slice(&length.to_le_bytes());
                out
            }
            Md32UvRequest::Write { address, data } => memory_frame(b'W', *address, data),
        }
    }
}

/// Response sent by the emulated radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Md32UvResponse {
    Ack,
    /// Model name, zero padded or truncated to [`MODEL_LEN`]
    Search { model: Vec<u8> },
    /// No programming password set
    Password,
    /// Identification value, at most 255 bytes
    Value { field: u8, data: Vec<u8> },
    /// Info memory content
    ReadInfo { address: u32, data: Vec<u8> },
    /// Codeplug memory content
    Read { address: u32, data: Vec<u8> },
}

impl EncodeResponse for Md32UvResponse {
    fn encode(&self) -> Vec<u8> {
        match self {
            Md32UvResponse::Ack => vec![ACK],
            Md32UvResponse::Search { model } => {
                let mut out = vec![ACK];
                out.extend(model.iter().copied().chain(std::iter::repeat(0)).take(MODEL_LEN));
                out
            }
            Md32UvResponse::Password => vec![b'P', 0x00, 0x00],
            Md32UvResponse::Value { field, data } => {
                let data = &data[..data.len().min(usize::from(u8::MAX))];
                let mut out = vec![b'V', *field, data.len() as u8];
                out.extend_from_slice(data);
                out
            }
            Md32UvResponse::ReadInfo { address, data } => memory_frame(b'S', *address, data),
            Md32UvResponse::Read { address, data } => memory_frame(b'W', *address, data),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProtocolCodec;
    use proptest::prelude::*;

    #[test]
    fn test_parse_keywords() {
        assert_eq!(
            Md32UvRequest::decode(b"PSEARCH"),
            Ok(Some((Md32UvRequest::Search, 7)))
        );
        assert_eq!(
            Md32UvRequest::decode(b"PASSSTA"),
            Ok(Some((Md32UvRequest::Password, 7)))
        );
        assert_eq!(Md32UvRequest::decode(b"SYSIN"), Ok(None));
        assert_eq!(Md32UvRequest::decode(b"P"), Ok(None));
        assert_eq!(
            Md32UvRequest::decode(b"PROGRAMR"),
            Ok(Some((Md32UvRequest::Program, 7)))
        );
        assert!(matches!(
            Md32UvRequest::decode(b"PROX"),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_parse_ping_and_filler() {
        assert_eq!(Md32UvRequest::decode(&[ACK]), Ok(Some((Md32UvRequest::Ping, 1))));
        assert_eq!(
            Md32UvRequest::decode(&[0xff, 0xff, ACK]),
            Ok(Some((Md32UvRequest::Ping, 3)))
        );
        assert_eq!(Md32UvRequest::decode(&[0xff]), Ok(None));
        assert!(matches!(
            Md32UvRequest::decode(&[0x00]),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(Md32UvRequest::decode(&[b'V', 0x01, 0x00, 0x40]), Ok(None));
        assert_eq!(
            Md32UvRequest::decode(&[b'V', 0x01, 0x00, 0x40, 0x0d]),
            Ok(Some((
                Md32UvRequest::Value {
                    flags: 1,
                    length: 0x40,
                    field: 0x0d
                },
                5
            )))
        );
    }

    #[test]
    fn test_parse_read() {
        let frame = [b'R', 0x00, 0x10, 0x02, 0x00, 0x01];
        assert_eq!(Md32UvRequest::decode(&frame[..5]), Ok(None));
        assert_eq!(
            Md32UvRequest::decode(&frame),
            Ok(Some((
                Md32UvRequest::Read {
                    address: 0x02_1000,
                    length: 0x100
                },
                6
            )))
        );
        let info = [b'G', 0x00, 0x00, 0x00, 0x10, 0x00];
        assert_eq!(
            Md32UvRequest::decode(&info),
            Ok(Some((
                Md32UvRequest::ReadInfo {
                    address: 0,
                    length: 0x10
                },
                6
            )))
        );
    }

    #[test]
    fn test_parse_write() {
        let frame = [b'W', 0x01, 0xf0, 0xff, 0x02, 0x00, 0xaa, 0x07];
        assert_eq!(Md32UvRequest::decode(&frame[..7]), Ok(None));
        assert_eq!(
            Md32UvRequest::decode(&frame),
            Ok(Some((
                Md32UvRequest::Write {
                    address: 0xff_f001,
                    data: vec![0xaa, 0x07]
                },
                8
            )))
        );
    }

    #[test]
    fn test_encode_responses() {
        assert_eq!(Md32UvResponse::Ack.encode(), vec![ACK]);
        assert_eq!(
            Md32UvResponse::Search {
                model: b"DP570UV-extra".to_vec()
            }
            .encode(),
            b"\x06DP570UV".to_vec()
        );
        assert_eq!(
            Md32UvResponse::Search { model: b"MD32".to_vec() }.encode(),
            b"\x06MD32\0\0\0".to_vec()
        );
        assert_eq!(Md32UvResponse::Password.encode(), vec![b'P', 0, 0]);
        assert_eq!(
            Md32UvResponse::Value {
                field: 0x10,
                data: vec![0x50, 0xc3, 0x00]
            }
            .encode(),
            vec![b'V', 0x10, 0x03, 0x50, 0xc3, 0x00]
        );
        assert_eq!(
            Md32UvResponse::Read {
                address: 0x00_1fff,
                data: vec![0x01]
            }
            .encode(),
            vec![b'W', 0xff, 0x1f, 0x00, 0x01, 0x00, 0x01]
        );
        assert_eq!(
            Md32UvResponse::ReadInfo {
                address: 0,
                data: vec![0xff; 2]
            }
            .encode(),
            vec![b'S', 0, 0, 0, 0x02, 0x00, 0xff, 0xff]
        );
    }

    #[test]
    fn test_codec_splits_session_stream() {
        let mut codec = Md32UvCodec::new();
        codec.push_bytes(b"PSEARCH\x06PASSSTAPROG");
        assert_eq!(codec.next_request(), Ok(Some(Md32UvRequest::Search)));
        assert_eq!(codec.next_request(), Ok(Some(Md32UvRequest::Ping)));
        assert_eq!(codec.next_request(), Ok(Some(Md32UvRequest::Password)));
        assert_eq!(codec.next_request(), Ok(None));
        codec.push_bytes(b"RAM");
        assert_eq!(codec.next_request(), Ok(Some(Md32UvRequest::Program)));
        assert_eq!(codec.buffered(), 0);
    }

    proptest! {
        #[test]
        fn prop_write_frames_decode(address in 0u32..0x0100_0000, data in proptest::collection::vec(any::<u8>(), 0..300)) {
            let request = Md32UvRequest::Write { address, data };
            let frame = request.encode();
            prop_assert_eq!(Md32UvRequest::decode(&frame), Ok(Some((request, frame.len()))));
        }
    }
}
