//! TYT MD-32UV and relabels

use std::time::Duration;

use cp_protocol::md32uv::{Md32UvRequest, Md32UvResponse};
use cp_protocol::{ParseError, Protocol};
use tracing::{debug, error, warn};

use crate::device::Device;
use crate::handler::{exchange, Exchange, RequestHandler};
use crate::rom::ModelRom;

/// The CPS never announces the end of a session; it just stops talking
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Writes here go to the block named by the last payload byte
const ALLOCATE_ADDRESS: u32 = 0xff_f001;
const BLOCK_SHIFT: u32 = 12;
const BLOCK_SIZE: u32 = 1 << BLOCK_SHIFT;

/// Last byte of each 4 KiB block of the settings area, read back by the CPS
/// to learn which blocks are allocated
const BLOCK_FLAGS: &[u8; 0xc9] = b"\
    \xff\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\x0b\x0c\x0d\x0e\x0f\
    \x10\x11\x12\x13\x14\xff\xff\x00\x18\xff\x1a\xff\x1c\x1d\xff\x1f\
    \x20\xff\x22\x23\x24\xff\x00\x00\xff\x00\xff\x00\x00\x00\x00\x00\
    \x30\x31\x32\x00\x34\xff\xff\x37\xff\xff\xff\x3b\xff\x3d\xff\x00\
    \xff\x41\x42\x43\x44\xff\xff\xff\xff\xff\xff\x4b\xff\xff\xff\x4f\
    \x50\x51\xff\x53\x54\x55\x56\x57\x58\x59\x5a\x5b\x5c\x5d\x5e\x5f\
    \x60\xff\xff\xff\x64\x65\x66\x67\xff\x69\x6a\x6b\x6c\x6d\x6e\xff\
    \xff\xff\xff\xff\x74\x75\xff\xff\xff\xff\xff\xff\x7c\xff\xff\xff\
    \xff\x00\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\
    \xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\
    \xff\xff\x00\x00\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\
    \xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\xff\
    \xff\xff\xff\xff\xff\xff\xff\x00\xff";

/// First 256 bytes of the info memory; everything past it reads as erased
const INFO_BLOCK: [u8; 256] = {
    let mut block = [0xff; 256];
    block[0x40] = 0x36;
    let mut i = 0x41;
    while i < 0x50 {
        block[i] = 0x00;
        i += 1;
    }
    block[0x60] = 0x00;
    let colors: [u8; 80] = [
        0xdf, 0xff, 0xdf, 0xff, 0xff, 0xff, 0xbe, 0xf7, 0x79, 0xce, 0xd6, 0xb5, 0x79, 0xce, 0xbe,
        0xf7, 0xff, 0xff, 0xef, 0xde, 0x1c, 0xe7, 0x3d, 0xe7, 0x9a, 0xd6, 0xf4, 0x9c, 0x55, 0xa5,
        0xfb, 0xd6, 0x5e, 0xdf, 0x5d, 0xe7, 0x5d, 0xe7, 0x5d, 0xe7, 0x7d, 0xef, 0x92, 0x94, 0xc7,
        0x39, 0x49, 0x4a, 0x69, 0xa5, 0x69, 0x4a, 0xaa, 0x52, 0xaa, 0x52, 0x8a, 0x52, 0x28, 0x42,
        0x65, 0x29, 0x08, 0x43, 0x60, 0x13, 0x40, 0x17, 0x60, 0x13, 0x40, 0x17, 0x00, 0x40, 0x00,
        0x52, 0x00, 0x40, 0x00, 0x52,
    ];
    let mut i = 0;
    while i < colors.len() {
        block[0x70 + i] = colors[i];
        i += 1;
    }
    block
};

/// Capability bitmap answered to value 0Dh, cut to the requested length
const CAPABILITIES: [u8; 64] = {
    let mut caps = [0; 64];
    caps[0] = 0x03;
    caps[1] = 0x4e;
    caps[2] = 0x2d;
    caps[32] = 0x3f;
    caps
};

/// Start and end address of a memory area, both little-endian
fn address_range(from: u32, to: u32) -> Vec<u8> {
    let mut out = from.to_le_bytes().to_vec();
    out.extend_from_slice(&to.to_le_bytes());
    out
}

/// Identification value `field`, `None` for fields the radio does not know
fn value(field: u8, length: u8) -> Option<Vec<u8>> {
    let data = match field {
        0x01 => b"32.01.01.04".to_vec(),
        0x02 => vec![0, 0, 0, 0, 0, 0, 0x1c, 0x4c, 0, 0, 0x1c, 0x4c],
        0x03 => b"2022-06-27".to_vec(),
        0x04 => b"D1.01.01.004".to_vec(),
        0x05 => b"R1.00.01.001".to_vec(),
        0x06 => address_range(0x0020_1000, 0x0026_4fff),
        0x07 => address_range(0x000c_9000, 0x0014_9fff),
        0x08 => address_range(0x0018_0000, 0x0020_0fff),
        0x09 => address_range(0x006d_c000, 0x00ff_ffff),
        0x0a => address_range(0x0000_1000, 0x000c_8fff),
        0x0b => b"C1.00.01.001".to_vec(),
        0x0d => CAPABILITIES[..usize::from(length).min(CAPABILITIES.len())].to_vec(),
        0x0e => address_range(0x0015_0000, 0x0017_5fff),
        0x0f => address_range(0x0027_8000, 0x006d_bfff),
        0x10 => vec![0x50, 0xc3, 0x00],
        _ => return None,
    };
    Some(data)
}

/// Seed the allocation flags of the settings blocks the ROM does not
/// already define
fn seed_block_flags(rom: &mut ModelRom) {
    for (block, flag) in (0u32..).zip(BLOCK_FLAGS.iter()) {
        let address = block * BLOCK_SIZE + BLOCK_SIZE - 1;
        if rom.read(address, 1).is_none() {
            rom.write(address, &[*flag]);
        }
    }
}

#[derive(Debug)]
pub struct Md32UvHandler {
    device: Device,
    model: Vec<u8>,
    idle_timeout: Duration,
}

impl Md32UvHandler {
    pub fn new(mut device: Device, model: Vec<u8>) -> Self {
        seed_block_flags(device.rom_mut());
        Self {
            device,
            model,
            idle_timeout: IDLE_TIMEOUT,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    fn handle(&mut self, request: Md32UvRequest) -> Option<Md32UvResponse> {
        match request {
            Md32UvRequest::Ping | Md32UvRequest::SystemInfo => Some(Md32UvResponse::Ack),
            Md32UvRequest::Search => Some(Md32UvResponse::Search {
                model: self.model.clone(),
            }),
            Md32UvRequest::Password => Some(Md32UvResponse::Password),
            Md32UvRequest::Program => {
                self.device.start_program();
                Some(Md32UvResponse::Ack)
            }
            Md32UvRequest::Value { field, length, .. } => {
                let data = value(field, length).unwrap_or_else(|| {
                    warn!("{}: unknown value {:02x}h", self.device.name(), field);
                    Vec::new()
                });
                Some(Md32UvResponse::Value { field, data })
            }
            Md32UvRequest::ReadInfo { address, length } => {
                let length = usize::from(length);
                let mut data = vec![0xff; length];
                if address == 0 {
                    let n = length.min(INFO_BLOCK.len());
                    data[..n].copy_from_slice(&INFO_BLOCK[..n]);
                }
                Some(Md32UvResponse::ReadInfo { address, data })
            }
            request if !self.device.is_programming() => {
                warn!("{}: {} outside programming mode", self.device.name(), request);
                None
            }
            Md32UvRequest::Read { address, length } => {
                let length = usize::from(length);
                let data = self
                    .device
                    .read(address, length)
                    .unwrap_or_else(|| vec![0xff; length]);
                Some(Md32UvResponse::Read { address, data })
            }
            Md32UvRequest::Write { address, data } => {
                let address = match (address, data.last()) {
                    (ALLOCATE_ADDRESS, Some(block)) => {
                        let target = u32::from(*block) << BLOCK_SHIFT;
                        debug!("{}: allocating block at {:x}h", self.device.name(), target);
                        target
                    }
                    _ => address,
                };
                if let Err(e) = self.device.write(address, &data) {
                    error!("{}: write at {:x}h failed: {}", self.device.name(), address, e);
                }
                Some(Md32UvResponse::Ack)
            }
        }
    }
}

impl RequestHandler for Md32UvHandler {
    fn protocol(&self) -> Protocol {
        Protocol::Md32Uv
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

    fn idle_timeout(&self) -> Option<Duration> {
        Some(self.idle_timeout)
    }
}
