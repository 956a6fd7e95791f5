//! AnyTone D868/D878 family

use cp_protocol::anytone::{AnyToneRequest, AnyToneResponse};
use cp_protocol::{ParseError, Protocol};
use tracing::{error, warn};

use crate::device::Device;
use crate::handler::{exchange, Exchange, RequestHandler};

#[derive(Debug)]
pub struct AnyToneHandler {
    device: Device,
    model_id: Vec<u8>,
    band: u8,
    revision: Vec<u8>,
}

impl AnyToneHandler {
    pub fn new(device: Device, model_id: Vec<u8>, band: u8, revision: Vec<u8>) -> Self {
        Self {
            device,
            model_id,
            band,
            revision,
        }
    }

    fn handle(&mut self, request: AnyToneRequest) -> Option<AnyToneResponse> {
        match request {
            AnyToneRequest::Program => {
                self.device.start_program();
                Some(AnyToneResponse::Program)
            }
            AnyToneRequest::End => {
                self.device.end_program();
                None
            }
            request if !self.device.is_programming() => {
                warn!("{}: dropping {} outside programming mode", self.device.name(), request);
                None
            }
            AnyToneRequest::DeviceInfo => Some(AnyToneResponse::DeviceInfo {
                model: self.model_id.clone(),
                band: self.band,
                revision: self.revision.clone(),
            }),
            AnyToneRequest::Read { address, length } => self
                .device
                .read(address, usize::from(length))
                .map(|data| AnyToneResponse::Read { address, data }),
            AnyToneRequest::Write { address, data, .. } => {
                match self.device.write(address, &data) {
                    Ok(()) => Some(AnyToneResponse::Write),
                    Err(e) => {
                        error!("{}: write at {:x}h failed: {}", self.device.name(), address, e);
                        None
                    }
                }
            }
        }
    }
}

impl RequestHandler for AnyToneHandler {
    fn protocol(&self) -> Protocol {
        Protocol::AnyTone
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
