//! Radios running the OpenGD77 firmware
//!
//! The firmware exposes EEPROM and flash through separate sections. Both
//! are mapped into one address space: EEPROM at its own address, flash at
//! [`FLASH_BASE`] and the firmware identification block at
//! [`FIRMWARE_INFO_ADDRESS`].

use cp_protocol::opengd77::{DataSection, OpenGd77Request, OpenGd77Response, ReadSection, Write};
use cp_protocol::{ParseError, Protocol};
use tracing::{debug, error, warn};

use crate::device::Device;
use crate::handler::{exchange, Exchange, RequestHandler};

pub const FLASH_BASE: u32 = 0x0100_0000;
pub const FIRMWARE_INFO_ADDRESS: u32 = 0x0200_0000;
pub const FIRMWARE_INFO_LEN: usize = 46;

#[derive(Debug)]
pub struct OpenGd77Handler {
    device: Device,
}

impl OpenGd77Handler {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    fn read(&self, section: ReadSection, address: u32, length: u16) -> OpenGd77Response {
        let length = usize::from(length);
        let data = match section {
            ReadSection::Eeprom => self.device.read(address, length),
            ReadSection::Flash => self.device.read(FLASH_BASE.wrapping_add(address), length),
            ReadSection::FirmwareInfo => self.device.read(FIRMWARE_INFO_ADDRESS, FIRMWARE_INFO_LEN),
            other => {
                warn!("{}: cannot read section {:?}", self.device.name(), other);
                None
            }
        };
        data.map_or(OpenGd77Response::Nack, OpenGd77Response::Read)
    }

    /// Apply a write; `false` if it must be refused
    fn write(&mut self, write: &Write) -> bool {
        if !self.device.is_programming() {
            warn!("{}: write outside programming mode", self.device.name());
            return false;
        }
        let Write::Data {
            section,
            address,
            data,
        } = write
        else {
            return true;
        };
        let address = match section {
            DataSection::Eeprom => *address,
            DataSection::SectorBuffer => FLASH_BASE.wrapping_add(*address),
            DataSection::WavBuffer => {
                debug!("{}: ignoring {}b of WAV buffer", self.device.name(), data.len());
                return true;
            }
        };
        match self.device.write(address, data) {
            Ok(()) => true,
            Err(e) => {
                error!("{}: write at {:x}h failed: {}", self.device.name(), address, e);
                false
            }
        }
    }

    fn handle(&mut self, request: OpenGd77Request) -> Option<OpenGd77Response> {
        let response = match request {
            OpenGd77Request::ShowCpsScreen => {
                self.device.start_program();
                OpenGd77Response::Ack
            }
            OpenGd77Request::Control(option) => {
                if option.ends_session() {
                    self.device.end_program();
                }
                OpenGd77Response::Ack
            }
            OpenGd77Request::ClearScreen
            | OpenGd77Request::Display(_)
            | OpenGd77Request::RenderCps
            | OpenGd77Request::CloseCpsScreen
            | OpenGd77Request::Ping => OpenGd77Response::Ack,
            OpenGd77Request::Read {
                section,
                address,
                length,
            } => self.read(section, address, length),
            OpenGd77Request::Write { tag, write } => {
                if self.write(&write) {
                    OpenGd77Response::Write {
                        tag,
                        section: write.section(),
                    }
                } else {
                    OpenGd77Response::Nack
                }
            }
        };
        Some(response)
    }
}

impl RequestHandler for OpenGd77Handler {
    fn protocol(&self) -> Protocol {
        Protocol::OpenGd77
    }

    fn device(&self) -> &Device {
        &self.device
    }

    fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    fn handle_next(&mut self, buffer: &[u8]) -> Result<Option<Exchange>, ParseError> {
        exchange(buffer, |request| self.handle(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CaptureEvent;
    use crate::rom::ModelRom;
    use cp_protocol::opengd77::{ControlOption, WriteTag};
    use cp_protocol::EncodeRequest;
    use tokio::sync::mpsc;

    fn handler() -> (OpenGd77Handler, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut rom = ModelRom::new();
        rom.write(0x0080, &[1, 2, 3, 4]);
        rom.write(FLASH_BASE + 0x10, &[9, 8]);
        let mut info = b"OpenGD77".to_vec();
        info.resize(FIRMWARE_INFO_LEN, 0);
        rom.write(FIRMWARE_INFO_ADDRESS, &info);
        (
            OpenGd77Handler::new(Device::new("GD-77", rom).with_sink(Box::new(tx))),
            rx,
        )
    }

    fn send(handler: &mut OpenGd77Handler, request: OpenGd77Request) -> Vec<u8> {
        let bytes = request.encode();
        let exchange = handler.handle_next(&bytes).unwrap().unwrap();
        assert_eq!(exchange.consumed, bytes.len());
        exchange.response.unwrap()
    }

    fn read(section: ReadSection, address: u32, length: u16) -> OpenGd77Request {
        OpenGd77Request::Read {
            section,
            address,
            length,
        }
    }

    #[test]
    fn test_reads() {
        let (mut handler, _rx) = handler();
        assert_eq!(
            send(&mut handler, read(ReadSection::Eeprom, 0x81, 2)),
            b"R\x00\x02\x02\x03".to_vec()
        );
        assert_eq!(
            send(&mut handler, read(ReadSection::Flash, 0x10, 2)),
            b"R\x00\x02\x09\x08".to_vec()
        );
        let info = send(&mut handler, read(ReadSection::FirmwareInfo, 0, 8));
        assert_eq!(info.len(), 3 + FIRMWARE_INFO_LEN);
        assert_eq!(&info[3..11], b"OpenGD77");

        assert_eq!(send(&mut handler, read(ReadSection::Eeprom, 0x1000, 2)), b"E");
        assert_eq!(send(&mut handler, read(ReadSection::McuRom, 0, 2)), b"E");
    }

    #[test]
    fn test_write_session() {
        let (mut handler, mut rx) = handler();
        assert_eq!(send(&mut handler, OpenGd77Request::ShowCpsScreen), b"-");
        assert_eq!(send(&mut handler, OpenGd77Request::Ping), b"-");

        let eeprom = OpenGd77Request::Write {
            tag: WriteTag::X,
            write: Write::Data {
                section: DataSection::Eeprom,
                address: 0x0100,
                data: vec![0xAB],
            },
        };
        assert_eq!(send(&mut handler, eeprom), b"X\x04");

        let flash = OpenGd77Request::Write {
            tag: WriteTag::W,
            write: Write::Data {
                section: DataSection::SectorBuffer,
                address: 0x0200,
                data: vec![0xCD],
            },
        };
        assert_eq!(send(&mut handler, flash), b"W\x02");
        assert_eq!(
            send(
                &mut handler,
                OpenGd77Request::Write {
                    tag: WriteTag::W,
                    write: Write::WriteFlashSector
                }
            ),
            b"W\x03"
        );
        assert_eq!(
            send(&mut handler, OpenGd77Request::Control(ControlOption::FlashGreenLed)),
            b"-"
        );
        assert!(handler.device().is_programming());
        assert_eq!(
            send(&mut handler, OpenGd77Request::Control(ControlOption::Reboot)),
            b"-"
        );
        assert!(!handler.device().is_programming());

        assert_eq!(rx.try_recv().unwrap(), CaptureEvent::Started);
        assert_eq!(
            rx.try_recv().unwrap(),
            CaptureEvent::Write {
                address: 0x0100,
                data: vec![0xAB]
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            CaptureEvent::Write {
                address: FLASH_BASE + 0x0200,
                data: vec![0xCD]
            }
        );
        assert_eq!(rx.try_recv().unwrap(), CaptureEvent::Ended);
    }

    #[test]
    fn test_write_outside_session_is_refused() {
        let (mut handler, mut rx) = handler();
        let write = OpenGd77Request::Write {
            tag: WriteTag::W,
            write: Write::SetFlashSector { sector: 0x10 },
        };
        assert_eq!(send(&mut handler, write), b"E");
        assert!(rx.try_recv().is_err());
    }
}
