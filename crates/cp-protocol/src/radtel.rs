//! Radtel Programming Protocol
//!
//! Used by the Radtel RT-4D. Memory is transferred in 1 KiB pages, every
//! frame ends with the 8-bit sum of all preceding bytes.
//!
//! # Request Format
//! ```text
//! 34 [xx] 05 10 [sum]                   enter programming mode
//! 34 [xx] 05 EE [sum]                   leave programming mode
//! 52 [page:2] [sum]                     read page at page * 1024
//! 9S [page:2] [data:1024] [sum]         write page at (S << 24) + (page << 10)
//! ```
//!
//! The device answers commands and writes with `06` and reads with
//! `52 [page:2] [data:1024] [sum]`.

use std::fmt;

use crate::error::ParseError;
use crate::{sum8, Decoded, DecodeRequest, EncodeRequest, EncodeResponse, RequestCodec};

/// Page size of reads and writes
pub const PAGE_SIZE: usize = 1024;
/// Acknowledge byte
pub const ACK: u8 = 0x06;

const COMMAND: u8 = 0x34;
const READ: u8 = 0x52;
const WRITE: u8 = 0x90;
const ENTER: u8 = 0x10;
const LEAVE: u8 = 0xee;

const COMMAND_LEN: usize = 5;
const READ_LEN: usize = 4;
const WRITE_LEN: usize = PAGE_SIZE + 4;

/// Buffering codec for Radtel requests
pub type RadtelCodec = RequestCodec<RadtelRequest>;

/// Request sent by the CPS to a Radtel radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadtelRequest {
    /// Enter programming mode
    Enter,
    /// Leave programming mode
    Leave,
    /// Read one page
    Read { page: u16 },
    /// Write one page of a memory segment
    Write { segment: u8, page: u16, data: Vec<u8> },
}

impl RadtelRequest {
    /// Memory address targeted by a read or write
    pub fn address(&self) -> Option<u32> {
        match self {
            RadtelRequest::Read { page } => Some(u32::from(*page) * PAGE_SIZE as u32),
            RadtelRequest::Write { segment, page, .. } => {
                Some((u32::from(*segment) << 24) + (u32::from(*page) << 10))
            }
            RadtelRequest::Enter | RadtelRequest::Leave => None,
        }
    }
}

impl fmt::Display for RadtelRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadtelRequest::Enter => write!(f, "enter programming mode"),
            RadtelRequest::Leave => write!(f, "leave programming mode"),
            RadtelRequest::Read { page } => write!(f, "read page {}", page),
            RadtelRequest::Write { segment, page, .. } => {
                write!(f, "write page {} of segment {}", page, segment)
            }
        }
    }
}

/// Verify the trailing sum of a complete frame
fn check_sum(frame: &[u8]) -> Result<(), ParseError> {
    let (body, last) = frame.split_at(frame.len() - 1);
    let expected = sum8(body);
    if expected != last[0] {
        return Err(ParseError::ChecksumMismatch {
            expected,
            actual: last[0],
        });
    }
    Ok(())
}

impl DecodeRequest for RadtelRequest {
    fn decode(buffer: &[u8]) -> Decoded<Self> {
        let Some(&first) = buffer.first() else {
            return Ok(None);
        };

        if first == COMMAND {
            if buffer.len() < COMMAND_LEN {
                return Ok(None);
            }
            check_sum(&buffer[..COMMAND_LEN])?;
            let request = match (buffer[2], buffer[3]) {
                (0x05, ENTER) => RadtelRequest::Enter,
                (0x05, LEAVE) => RadtelRequest::Leave,
                (a, b) => {
                    return Err(ParseError::UnknownCommand(format!(
                        "Radtel command {:02x} {:02x}",
                        a, b
                    )))
                }
            };
            return Ok(Some((request, COMMAND_LEN)));
        }

        if first == READ {
            if buffer.len() < READ_LEN {
                return Ok(None);
            }
            check_sum(&buffer[..READ_LEN])?;
            let page = u16::from_be_bytes([buffer[1], buffer[2]]);
            return Ok(Some((RadtelRequest::Read { page }, READ_LEN)));
        }

        if first & 0xf0 == WRITE {
            if buffer.len() < WRITE_LEN {
                return Ok(None);
            }
            check_sum(&buffer[..WRITE_LEN])?;
            let page = u16::from_be_bytes([buffer[1], buffer[2]]);
            return Ok(Some((
                RadtelRequest::Write {
                    segment: first & 0x0f,
                    page,
                    data: buffer[3..3 + PAGE_SIZE].to_vec(),
                },
                WRITE_LEN,
            )));
        }

        Err(ParseError::UnknownCommand(format!("Radtel 0x{:02X}", first)))
    }
}

/// Append the running sum to a frame
fn sealed(mut frame: Vec<u8>) -> Vec<u8> {
    frame.push(sum8(&frame));
    frame
}

fn page_data(data: &[u8]) -> impl Iterator<Item = u8> + '_ {
    data.iter().copied().chain(std::iter::repeat(0)).take(PAGE_SIZE)
}

impl EncodeRequest for RadtelRequest {
    fn encode(&self) -> Vec<u8> {
        match self {
            RadtelRequest::Enter => sealed(vec![COMMAND, 0x00, 0x05, ENTER]),
            RadtelRequest::Leave => sealed(vec![COMMAND, 0x00, 0x05, LEAVE]),
            RadtelRequest::Read { page } => {
                let [hi, lo] = page.to_be_bytes();
                sealed(vec![READ, hi, lo])
            }
            RadtelRequest::Write {
                segment,
                page,
                data,
            } => {
                let [hi, lo] = page.to_be_bytes();
                let mut frame = vec![WRITE | (segment & 0x0f), hi, lo];
                frame.extend(page_data(data));
                sealed(frame)
            }
        }
    }
}

/// Response sent by the emulated radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadtelResponse {
    /// Command or write acknowledged
    Ack,
    /// Page content, zero padded or truncated to one page
    Read { page: u16, data: Vec<u8> },
}

impl EncodeResponse for RadtelResponse {
    fn encode(&self) -> Vec<u8> {
        match self {
            RadtelResponse::Ack => vec![ACK],
            RadtelResponse::Read { page, data } => {
                let [hi, lo] = page.to_be_bytes();
                let mut frame = Vec::with_capacity(WRITE_LEN);
                frame.extend_from_slice(&[READ, hi, lo]);
                frame.extend(page_data(data));
                sealed(frame)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProtocolCodec;
    use proptest::prelude::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            RadtelRequest::decode(&[0x34, 0x52, 0x05, 0x10, 0x9b]),
            Ok(Some((RadtelRequest::Enter, 5)))
        );
        assert_eq!(
            RadtelRequest::decode(&RadtelRequest::Leave.encode()),
            Ok(Some((RadtelRequest::Leave, 5)))
        );
        assert_eq!(RadtelRequest::decode(&[0x34, 0x00, 0x05]), Ok(None));
    }

    #[test]
    fn test_bad_checksum_rejected() {
        assert_eq!(
            RadtelRequest::decode(&[0x52, 0x00, 0x01, 0x00]),
            Err(ParseError::ChecksumMismatch {
                expected: 0x53,
                actual: 0x00
            })
        );
    }

    #[test]
    fn test_unknown_command() {
        assert!(matches!(
            RadtelRequest::decode(&[0x34, 0x00, 0x05, 0x11, 0x4a]),
            Err(ParseError::UnknownCommand(_))
        ));
        assert!(matches!(
            RadtelRequest::decode(&[0x00]),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_read_address() {
        let (request, consumed) = RadtelRequest::decode(&[0x52, 0x00, 0x03, 0x55])
            .unwrap()
            .unwrap();
        assert_eq!(consumed, 4);
        assert_eq!(request, RadtelRequest::Read { page: 3 });
        assert_eq!(request.address(), Some(3 * 1024));
    }

    #[test]
    fn test_write_address() {
        let request = RadtelRequest::Write {
            segment: 1,
            page: 2,
            data: vec![0xAB; PAGE_SIZE],
        };
        let frame = request.encode();
        assert_eq!(frame.len(), 1028);
        assert_eq!(frame[0], 0x91);
        assert_eq!(RadtelRequest::decode(&frame[..1027]), Ok(None));
        let (decoded, consumed) = RadtelRequest::decode(&frame).unwrap().unwrap();
        assert_eq!(consumed, 1028);
        assert_eq!(decoded.address(), Some(0x0100_0800));
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_encode_read_response_pads() {
        let frame = RadtelResponse::Read {
            page: 1,
            data: vec![0x01, 0x02],
        }
        .encode();
        assert_eq!(frame.len(), 1028);
        assert_eq!(&frame[..5], &[0x52, 0x00, 0x01, 0x01, 0x02]);
        assert!(frame[5..1027].iter().all(|b| *b == 0));
        assert_eq!(frame[1027], 0x56);

        let long = RadtelResponse::Read {
            page: 0,
            data: vec![0x01; 2000],
        }
        .encode();
        assert_eq!(long.len(), 1028);
        assert_eq!(RadtelResponse::Ack.encode(), vec![0x06]);
    }

    proptest! {
        #[test]
        fn prop_codec_recovers_after_bad_checksum(page in any::<u16>(), noise in any::<u8>()) {
            let mut codec = RadtelCodec::new();
            let mut bad = RadtelRequest::Read { page }.encode();
            bad[3] = bad[3].wrapping_add(1 + noise % 255);
            codec.push_bytes(&bad);
            prop_assert!(codec.next_request().is_err());

            codec.push_bytes(&RadtelRequest::Read { page }.encode());
            prop_assert_eq!(codec.next_request(), Ok(Some(RadtelRequest::Read { page })));
        }
    }
}
