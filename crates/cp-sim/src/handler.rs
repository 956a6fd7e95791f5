//! Protocol-specific request handling
//!
//! A [`RequestHandler`] decodes one request from the front of the receive
//! buffer, applies it to its [`Device`] and produces the bytes to send back.

use std::time::Duration;

use cp_protocol::{DecodeRequest, EncodeResponse, ParseError, Protocol};

use crate::anytone::AnyToneHandler;
use crate::catalog::ModelDefinition;
use crate::device::{CaptureSink, Device};
use crate::error::CatalogError;
use crate::md32uv::Md32UvHandler;
use crate::opengd77::OpenGd77Handler;
use crate::radtel::RadtelHandler;

/// Result of handling one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    /// Bytes of the receive buffer the request occupied
    pub consumed: usize,
    /// Encoded reply, if the request gets one
    pub response: Option<Vec<u8>>,
    /// Human-readable description of the request
    pub summary: String,
}

/// An emulated radio speaking one vendor protocol
pub trait RequestHandler: Send {
    fn protocol(&self) -> Protocol;

    fn device(&self) -> &Device;

    fn device_mut(&mut self) -> &mut Device;

    /// Decode and handle the request at the front of `buffer`.
    ///
    /// Returns `Ok(None)` if the buffer does not yet hold a complete request.
    fn handle_next(&mut self, buffer: &[u8]) -> Result<Option<Exchange>, ParseError>;

    /// Silence after which a running programming session counts as ended.
    /// `None` for protocols that end sessions with an explicit request.
    fn idle_timeout(&self) -> Option<Duration> {
        None
    }
}

/// Decode a request and hand it to `handle`, encoding whatever it answers
pub(crate) fn exchange<R, S, F>(buffer: &[u8], handle: F) -> Result<Option<Exchange>, ParseError>
where
    R: DecodeRequest + std::fmt::Display,
    S: EncodeResponse,
    F: FnOnce(R) -> Option<S>,
{
    let Some((request, consumed)) = R::decode(buffer)? else {
        return Ok(None);
    };
    let summary = request.to_string();
    let response = handle(request).map(|r| r.encode());
    Ok(Some(Exchange {
        consumed,
        response,
        summary,
    }))
}

/// Build the handler for `model` running `firmware`, capturing into `sink`
pub fn create_handler(
    model: &ModelDefinition,
    firmware: Option<&str>,
    sink: Option<Box<dyn CaptureSink>>,
) -> Result<Box<dyn RequestHandler>, CatalogError> {
    let profile = model.profile(firmware)?;
    let mut device = Device::from_profile(&profile);
    device.set_sink(sink);

    let handler: Box<dyn RequestHandler> = match profile.protocol {
        Protocol::AnyTone => Box::new(AnyToneHandler::new(
            device,
            profile.model_id,
            profile.band,
            profile.revision,
        )),
        Protocol::Radtel => Box::new(RadtelHandler::new(device)),
        Protocol::OpenGd77 => Box::new(OpenGd77Handler::new(device)),
        Protocol::Md32Uv => Box::new(Md32UvHandler::new(device, profile.model_id)),
    };
    Ok(handler)
}
