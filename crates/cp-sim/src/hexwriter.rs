//! Capture sink writing each session as a plain-text hex dump
//!
//! Session `n` goes to `<dir>/<prefix><nnnn>.hex`. Writes that do not
//! continue the previous one are separated by a rule.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use cp_codeplug::hexdump::hexdump_bytes;
use tracing::{info, warn};

use crate::device::CaptureSink;
use crate::error::DeviceError;

const RULE: &str = "--------------------------------------------------------\n";

#[derive(Debug)]
pub struct HexWriter {
    directory: PathBuf,
    prefix: String,
    counter: u32,
    next_address: Option<u64>,
    file: Option<BufWriter<File>>,
    current_path: Option<PathBuf>,
}

impl HexWriter {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            counter: 0,
            next_address: None,
            file: None,
            current_path: None,
        }
    }

    /// File of the running or most recent session
    pub fn current_path(&self) -> Option<&Path> {
        self.current_path.as_deref()
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

impl CaptureSink for HexWriter {
    fn begin_capture(&mut self) -> Result<(), DeviceError> {
        self.close()?;
        let path = self
            .directory
            .join(format!("{}{:04}.hex", self.prefix, self.counter));
        self.counter += 1;
        self.file = Some(BufWriter::new(File::create(&path)?));
        info!("Writing hex dump to {}", path.display());
        self.current_path = Some(path);
        self.next_address = None;
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
        let file = self.file.as_mut().ok_or(DeviceError::NoCaptureTarget)?;
        let address = u64::from(address);
        if self.next_address.is_some_and(|next| next != address) {
            file.write_all(RULE.as_bytes())?;
        }
        file.write_all(hexdump_bytes(address, data).as_bytes())?;
        self.next_address = Some(address + data.len() as u64);
        Ok(())
    }

    fn end_capture(&mut self) -> Result<(), DeviceError> {
        self.close()
    }

    fn abort_capture(&mut self) {
        if let Err(e) = self.close() {
            warn!("Cannot flush hex dump: {}", e);
        }
    }
}
