//! Emulated device core shared by all vendor handlers
//!
//! A [`Device`] answers reads from its ROM and forwards writes to a
//! [`CaptureSink`]. The vendor handlers translate protocol requests into
//! calls on it.

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::catalog::DeviceProfile;
use crate::error::DeviceError;
use crate::events::CaptureEvent;
use crate::rom::ModelRom;
use crate::session::Session;

/// Receiver of captured codeplug writes
pub trait CaptureSink: Send {
    /// A programming session started
    fn begin_capture(&mut self) -> Result<(), DeviceError>;

    /// The CPS wrote `data` at `address`
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError>;

    /// The programming session ended
    fn end_capture(&mut self) -> Result<(), DeviceError>;

    /// The session was torn down before it ended; drop what was captured
    fn abort_capture(&mut self) {}
}

/// Forward captures to another task
impl CaptureSink for mpsc::UnboundedSender<CaptureEvent> {
    fn begin_capture(&mut self) -> Result<(), DeviceError> {
        self.send(CaptureEvent::Started)
            .map_err(|_| DeviceError::SinkClosed)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
        self.send(CaptureEvent::Write {
            address,
            data: data.to_vec(),
        })
        .map_err(|_| DeviceError::SinkClosed)
    }

    fn end_capture(&mut self) -> Result<(), DeviceError> {
        self.send(CaptureEvent::Ended)
            .map_err(|_| DeviceError::SinkClosed)
    }

    fn abort_capture(&mut self) {
        let _ = self.send(CaptureEvent::Aborted);
    }
}

/// A radio in programming mode
pub struct Device {
    name: String,
    rom: ModelRom,
    session: Session,
    sink: Option<Box<dyn CaptureSink>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.name)
            .field("segments", &self.rom.segment_count())
            .field("session", &self.session.state())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl Device {
    pub fn new(name: impl Into<String>, rom: ModelRom) -> Self {
        Self {
            name: name.into(),
            rom,
            session: Session::new(),
            sink: None,
        }
    }

    pub fn from_profile(profile: &DeviceProfile) -> Self {
        Self::new(profile.name.clone(), profile.rom.clone())
    }

    pub fn with_sink(mut self, sink: Box<dyn CaptureSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn CaptureSink>>) {
        self.sink = sink;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rom(&self) -> &ModelRom {
        &self.rom
    }

    pub fn rom_mut(&mut self) -> &mut ModelRom {
        &mut self.rom
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn is_programming(&self) -> bool {
        self.session.is_programming()
    }

    /// Enter programming mode, starting a capture unless one is running
    pub fn start_program(&mut self) {
        if self.session.enter_program().is_none() {
            debug!("{}: already in programming mode", self.name);
            return;
        }
        info!("{}: programming session started", self.name);
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.begin_capture() {
                error!("{}: cannot start capture: {}", self.name, e);
                self.session.fail();
            }
        }
    }

    /// Leave programming mode, finishing the capture if one is running
    pub fn end_program(&mut self) {
        if self.session.end_program().is_none() {
            debug!("{}: not in programming mode", self.name);
            return;
        }
        info!("{}: programming session ended", self.name);
        if let Some(sink) = self.sink.as_mut() {
            if let Err(e) = sink.end_capture() {
                error!("{}: cannot finish capture: {}", self.name, e);
            }
        }
    }

    /// Read `len` bytes of ROM
    pub fn read(&self, address: u32, len: usize) -> Option<Vec<u8>> {
        let data = self.rom.read(address, len);
        if data.is_none() {
            error!(
                "{}: cannot read {}b from ROM at address {:x}h",
                self.name, len, address
            );
        }
        data
    }

    /// Forward a write to the capture sink
    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
        let sink = self.sink.as_mut().ok_or(DeviceError::NoCaptureTarget)?;
        debug!("{}: write {}b at {:x}h", self.name, data.len(), address);
        sink.write(address, data)
    }

    /// The endpoint went away; drop a capture that never ended
    pub fn teardown(&mut self) {
        if !self.session.is_programming() {
            return;
        }
        warn!("{}: connection lost during programming session", self.name);
        self.session.fail();
        if let Some(sink) = self.sink.as_mut() {
            sink.abort_capture();
        }
    }
}
