//! OpenGD77 Programming Protocol
//!
//! Spoken by radios running the OpenGD77 firmware. Every request starts with
//! a type byte:
//!
//! # Request Format
//! ```text
//! 43 [cmd] ...                              'C' screen/control command
//! 52 [section] [addr:4] [len:2]             'R' read
//! 57 [section] ...                          'W' write ('X' is accepted too)
//! ```
//!
//! Write sections:
//! ```text
//! 01 [sector:3]                             set flash sector
//! 02|04|07 [addr:4] [len:2] [data:len]      sector buffer, EEPROM, WAV buffer
//! 03                                        write flash sector
//! ```
//!
//! The device acknowledges commands with `-` (or `E` on failure), answers
//! reads with `R [len:2] [data]` and writes with the type and section bytes.

use std::fmt;

use crate::error::ParseError;
use crate::{Decoded, DecodeRequest, EncodeRequest, EncodeResponse, RequestCodec};

/// Command acknowledge
pub const ACK: u8 = b'-';
/// Command failure
pub const NACK: u8 = b'E';

/// Buffering codec for OpenGD77 requests
pub type OpenGd77Codec = RequestCodec<OpenGd77Request>;

/// Option of a control command (`C 06 [option]`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlOption {
    SaveSettingsNotVfos,
    Reboot,
    SaveSettingsAndVfos,
    FlashGreenLed,
    FlashRedLed,
    SetDateTime,
    Other(u8),
}

impl ControlOption {
    pub fn code(&self) -> u8 {
        match self {
            ControlOption::SaveSettingsNotVfos => 0,
            ControlOption::Reboot => 1,
            ControlOption::SaveSettingsAndVfos => 2,
            ControlOption::FlashGreenLed => 3,
            ControlOption::FlashRedLed => 4,
            ControlOption::SetDateTime => 6,
            ControlOption::Other(code) => *code,
        }
    }

    /// Options the CPS sends as the last request of a session
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            ControlOption::Reboot | ControlOption::SaveSettingsNotVfos | ControlOption::SetDateTime
        )
    }
}

impl From<u8> for ControlOption {
    fn from(code: u8) -> Self {
        match code {
            0 => ControlOption::SaveSettingsNotVfos,
            1 => ControlOption::Reboot,
            2 => ControlOption::SaveSettingsAndVfos,
            3 => ControlOption::FlashGreenLed,
            4 => ControlOption::FlashRedLed,
            6 => ControlOption::SetDateTime,
            other => ControlOption::Other(other),
        }
    }
}

/// Memory section of a read request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSection {
    Flash,
    Eeprom,
    McuRom,
    DisplayBuffer,
    WavBuffer,
    AmbeBuffer,
    FirmwareInfo,
    Other(u8),
}

impl ReadSection {
    pub fn code(&self) -> u8 {
        match self {
            ReadSection::Flash => 1,
            ReadSection::Eeprom => 2,
            ReadSection::McuRom => 5,
            ReadSection::DisplayBuffer => 6,
            ReadSection::WavBuffer => 7,
            ReadSection::AmbeBuffer => 8,
            ReadSection::FirmwareInfo => 9,
            ReadSection::Other(code) => *code,
        }
    }
}

impl From<u8> for ReadSection {
    fn from(code: u8) -> Self {
        match code {
            1 => ReadSection::Flash,
            2 => ReadSection::Eeprom,
            5 => ReadSection::McuRom,
            6 => ReadSection::DisplayBuffer,
            7 => ReadSection::WavBuffer,
            8 => ReadSection::AmbeBuffer,
            9 => ReadSection::FirmwareInfo,
            other => ReadSection::Other(other),
        }
    }
}

/// Section of a write request carrying data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSection {
    SectorBuffer,
    Eeprom,
    WavBuffer,
}

impl DataSection {
    pub fn code(&self) -> u8 {
        match self {
            DataSection::SectorBuffer => 2,
            DataSection::Eeprom => 4,
            DataSection::WavBuffer => 7,
        }
    }
}

/// Type byte of a write request, echoed in the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteTag {
    W,
    X,
}

impl WriteTag {
    pub fn byte(&self) -> u8 {
        match self {
            WriteTag::W => b'W',
            WriteTag::X => b'X',
        }
    }
}

/// Body of a write request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    /// Select the 4 KiB flash sector the sector buffer belongs to
    SetFlashSector { sector: u32 },
    /// Commit the sector buffer to flash
    WriteFlashSector,
    /// Write data into a section
    Data {
        section: DataSection,
        address: u32,
        data: Vec<u8>,
    },
}

impl Write {
    /// Section byte on the wire
    pub fn section(&self) -> u8 {
        match self {
            Write::SetFlashSector { .. } => 1,
            Write::WriteFlashSector => 3,
            Write::Data { section, .. } => section.code(),
        }
    }
}

/// Text placed on the radio's display during a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayText {
    pub x: u8,
    pub y: u8,
    pub font: u8,
    pub alignment: u8,
    pub inverted: bool,
    pub text: Vec<u8>,
}

impl fmt::Display for DisplayText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) {:?}",
            self.x,
            self.y,
            String::from_utf8_lossy(&self.text)
        )
    }
}

/// Request sent by the CPS to an OpenGD77 radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenGd77Request {
    /// Show the CPS screen; the first request of a session
    ShowCpsScreen,
    ClearScreen,
    Display(DisplayText),
    RenderCps,
    CloseCpsScreen,
    Control(ControlOption),
    Ping,
    Read {
        section: ReadSection,
        address: u32,
        length: u16,
    },
    Write { tag: WriteTag, write: Write },
}

impl fmt::Display for OpenGd77Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenGd77Request::ShowCpsScreen => write!(f, "show CPS screen"),
            OpenGd77Request::ClearScreen => write!(f, "clear screen"),
            OpenGd77Request::Display(text) => write!(f, "display {}", text),
            OpenGd77Request::RenderCps => write!(f, "render CPS screen"),
            OpenGd77Request::CloseCpsScreen => write!(f, "close CPS screen"),
            OpenGd77Request::Control(option) => write!(f, "control {:?}", option),
            OpenGd77Request::Ping => write!(f, "ping"),
            OpenGd77Request::Read {
                section,
                address,
                length,
            } => write!(f, "read {}b of {:?} at 0x{:08x}", length, section, address),
            OpenGd77Request::Write { write, .. } => match write {
                Write::SetFlashSector { sector } => write!(f, "set flash sector 0x{:06x}", sector),
                Write::WriteFlashSector => write!(f, "write flash sector"),
                Write::Data {
                    section,
                    address,
                    data,
                } => write!(f, "write {}b to {:?} at 0x{:08x}", data.len(), section, address),
            },
        }
    }
}

const SHOW_CPS_SCREEN: u8 = 0;
const CLEAR_SCREEN: u8 = 1;
const DISPLAY: u8 = 2;
const RENDER_CPS: u8 = 3;
const CLOSE_CPS_SCREEN: u8 = 5;
const CONTROL: u8 = 6;
const PING: u8 = 0xfe;

const READ_LEN: usize = 8;
const DATA_HEADER_LEN: usize = 8;

fn be32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn be16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

fn decode_command(buffer: &[u8]) -> Decoded<OpenGd77Request> {
    if buffer.len() < 2 {
        return Ok(None);
    }
    tracing::trace!("OpenGD77 command 0x{:02x}", buffer[1]);
    let request = match buffer[1] {
        SHOW_CPS_SCREEN => OpenGd77Request::ShowCpsScreen,
        CLEAR_SCREEN => OpenGd77Request::ClearScreen,
        RENDER_CPS => OpenGd77Request::RenderCps,
        CLOSE_CPS_SCREEN => OpenGd77Request::CloseCpsScreen,
        PING => OpenGd77Request::Ping,
        CONTROL => {
            if buffer.len() < 3 {
                return Ok(None);
            }
            return Ok(Some((OpenGd77Request::Control(buffer[2].into()), 3)));
        }
        DISPLAY => {
            if buffer.len() < 7 {
                return Ok(None);
            }
            // The text is not length prefixed, it runs to the end of the chunk.
            let display = DisplayText {
                x: buffer[2],
                y: buffer[3],
                font: buffer[4],
                alignment: buffer[5],
                inverted: buffer[6] != 0,
                text: buffer[7..].to_vec(),
            };
            return Ok(Some((OpenGd77Request::Display(display), buffer.len())));
        }
        other => {
            return Err(ParseError::UnknownCommand(format!(
                "OpenGD77 command {}",
                other
            )))
        }
    };
    Ok(Some((request, 2)))
}

fn decode_read(buffer: &[u8]) -> Decoded<OpenGd77Request> {
    if buffer.len() < READ_LEN {
        return Ok(None);
    }
    Ok(Some((
        OpenGd77Request::Read {
            section: buffer[1].into(),
            address: be32(&buffer[2..6]),
            length: be16(&buffer[6..8]),
        },
        READ_LEN,
    )))
}

fn decode_write(buffer: &[u8], tag: WriteTag) -> Decoded<OpenGd77Request> {
    if buffer.len() < 2 {
        return Ok(None);
    }
    let (write, consumed) = match buffer[1] {
        1 => {
            if buffer.len() < 5 {
                return Ok(None);
            }
            let sector = u32::from_be_bytes([0, buffer[2], buffer[3], buffer[4]]);
            (Write::SetFlashSector { sector }, 5)
        }
        3 => (Write::WriteFlashSector, 2),
        code @ (2 | 4 | 7) => {
            if buffer.len() < DATA_HEADER_LEN {
                return Ok(None);
            }
            let length = be16(&buffer[6..8]) as usize;
            if buffer.len() < DATA_HEADER_LEN + length {
                return Ok(None);
            }
            let section = match code {
                2 => DataSection::SectorBuffer,
                4 => DataSection::Eeprom,
                _ => DataSection::WavBuffer,
            };
            let write = Write::Data {
                section,
                address: be32(&buffer[2..6]),
                data: buffer[DATA_HEADER_LEN..DATA_HEADER_LEN + length].to_vec(),
            };
            (write, DATA_HEADER_LEN + length)
        }
        section => {
            return Err(ParseError::UnknownSection {
                request: "write",
                section,
            })
        }
    };
    Ok(Some((OpenGd77Request::Write { tag, write }, consumed)))
}

impl DecodeRequest for OpenGd77Request {
    fn decode(buffer: &[u8]) -> Decoded<Self> {
        let Some(&first) = buffer.first() else {
            return Ok(None);
        };
        match first {
            b'C' => decode_command(buffer),
            b'R' => decode_read(buffer),
            b'W' => decode_write(buffer, WriteTag::W),
            b'X' => decode_write(buffer, WriteTag::X),
            other => Err(ParseError::UnknownCommand(format!(
                "OpenGD77 type '{}' ({})",
                other.escape_ascii(),
                other
            ))),
        }
    }
}

impl EncodeRequest for OpenGd77Request {
    fn encode(&self) -> Vec<u8> {
        match self {
            OpenGd77Request::ShowCpsScreen => vec![b'C', SHOW_CPS_SCREEN],
            OpenGd77Request::ClearScreen => vec![b'C', CLEAR_SCREEN],
            OpenGd77Request::RenderCps => vec![b'C', RENDER_CPS],
            OpenGd77Request::CloseCpsScreen => vec![b'C', CLOSE_CPS_SCREEN],
            OpenGd77Request::Ping => vec![b'C', PING],
            OpenGd77Request::Control(option) => vec![b'C', CONTROL, option.code()],
            OpenGd77Request::Display(d) => {
                let mut out = vec![b'C', DISPLAY, d.x, d.y, d.font, d.alignment, d.inverted as u8];
                out.extend_from_slice(&d.text);
                out
            }
            OpenGd77Request::Read {
                section,
                address,
                length,
            } => {
                let mut out = vec![b'R', section.code()];
                out.extend_from_slice(&address.to_be_bytes());
                out.extend_from_slice(&length.to_be_bytes());
                out
            }
            OpenGd77Request::Write { tag, write } => {
                let mut out = vec![tag.byte(), write.section()];
                match write {
                    Write::SetFlashSector { sector } => {
                        out.extend_from_slice(&sector.to_be_bytes()[1..]);
                    }
                    Write::WriteFlashSector => {}
                    Write::Data { address, data, .. } => {
                        out.extend_from_slice(&address.to_be_bytes());
                        out.extend_from_slice(&(data.len() as u16).to_be_bytes());
                        out.extend_from_slice(data);
                    }
                }
                out
            }
        }
    }
}

/// Response sent by the emulated radio
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenGd77Response {
    /// Command succeeded
    Ack,
    /// Command or read failed
    Nack,
    /// Data read from memory
    Read(Vec<u8>),
    /// Write acknowledged, echoing the request's type and section bytes
    Write { tag: WriteTag, section: u8 },
}

impl EncodeResponse for OpenGd77Response {
    fn encode(&self) -> Vec<u8> {
        match self {
            OpenGd77Response::Ack => vec![ACK],
            OpenGd77Response::Nack => vec![NACK],
            OpenGd77Response::Read(data) => {
                let mut out = Vec::with_capacity(data.len() + 3);
                out.push(b'R');
                out.extend_from_slice(&(data.len() as u16).to_be_bytes());
                out.extend_from_slice(data);
                out
            }
            OpenGd77Response::Write { tag, section } => vec![tag.byte(), *section],
        }
    }
}
