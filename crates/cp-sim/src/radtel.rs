//! Radtel RT-4D and relatives

use cp_protocol::radtel::{RadtelRequest, RadtelResponse, PAGE_SIZE};
use cp_protocol::{ParseError, Protocol};
use tracing::{error, warn};

use crate::device::Device;
use crate::handler::{exchange, Exchange, RequestHandler};

#[derive(Debug)]
pub struct RadtelHandler {
    device: Device,
}

impl RadtelHandler {
    pub fn new(device: Device) -> Self {
        Self { device }
    }

    fn handle(&mut self, request: RadtelRequest) -> Option<RadtelResponse> {
        match request {
            RadtelRequest::Enter => {
                self.device.start_program();
                Some(RadtelResponse::Ack)
            }
            RadtelRequest::Leave => {
                self.device.end_program();
                Some(RadtelResponse::Ack)
            }
            request if !self.device.is_programming() => {
                warn!("{}: {} outside programming mode", self.device.name(), request);
                None
            }
            RadtelRequest::Read { page } => {
                let address = u32::from(page) * PAGE_SIZE as u32;
                match self.device.read(address, PAGE_SIZE) {
                    Some(data) => Some(RadtelResponse::Read { page, data }),
                    None => Some(RadtelResponse::Ack),
                }
            }
            RadtelRequest::Write {
                segment,
                page,
                data,
            } => {
                let address = (u32::from(segment) << 24) + (u32::from(page) << 10);
                if let Err(e) = self.device.write(address, &data) {
                    error!("{}: write at {:x}h failed: {}", self.device.name(), address, e);
                }
                Some(RadtelResponse::Ack)
            }
        }
    }
}

impl RequestHandler for RadtelHandler {
    fn protocol(&self) -> Protocol {
        Protocol::Radtel
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
