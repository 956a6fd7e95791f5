//! Collects captured writes into codeplug images
//!
//! Each programming session becomes one [`Image`] in a [`Collection`].
//! Sessions that never wrote anything leave no image behind.

use cp_codeplug::{Address, Collection, Image};
use tracing::{debug, info};

use crate::device::CaptureSink;
use crate::error::DeviceError;
use crate::events::CaptureEvent;

#[derive(Debug, Default)]
pub struct ImageCollector {
    collection: Collection,
    current: Option<Image>,
    writes: usize,
}

impl ImageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Images sealed so far
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn collection_mut(&mut self) -> &mut Collection {
        &mut self.collection
    }

    pub fn into_collection(self) -> Collection {
        self.collection
    }

    /// Image being filled by the running session
    pub fn current(&self) -> Option<&Image> {
        self.current.as_ref()
    }

    /// Start a new image. A fresh image with no writes is reused; one that
    /// was written to is sealed first.
    pub fn begin(&mut self) {
        if self.current.is_some() {
            if self.writes == 0 {
                debug!("Reusing empty capture");
                return;
            }
            self.end();
        }
        let label = format!("Codeplug {}", self.collection.len());
        debug!("Begin {}", label);
        self.current = Some(Image::new(label));
        self.writes = 0;
    }

    pub fn write(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
        let image = self.current.as_mut().ok_or(DeviceError::NoCaptureTarget)?;
        image.append(Address::from_byte(u64::from(address)), data);
        self.writes += 1;
        Ok(())
    }

    /// Seal the current image into the collection. Returns its index, `None`
    /// if there was no image or it received no writes.
    pub fn end(&mut self) -> Option<usize> {
        let image = self.current.take()?;
        let writes = std::mem::take(&mut self.writes);
        if writes == 0 {
            debug!("Dropping empty capture '{}'", image.label());
            return None;
        }
        info!(
            "Captured '{}': {} writes, {} elements, {} bytes",
            image.label(),
            writes,
            image.len(),
            image.size().byte()
        );
        Some(self.collection.add_image(image))
    }

    /// Drop the image being filled
    pub fn discard(&mut self) {
        if let Some(image) = self.current.take() {
            info!("Discarding incomplete capture '{}'", image.label());
        }
        self.writes = 0;
    }

    pub fn handle_event(&mut self, event: CaptureEvent) -> Result<(), DeviceError> {
        match event {
            CaptureEvent::Started => self.begin(),
            CaptureEvent::Write { address, data } => self.write(address, &data)?,
            CaptureEvent::Ended => {
                self.end();
            }
            CaptureEvent::Aborted => self.discard(),
        }
        Ok(())
    }
}

impl CaptureSink for ImageCollector {
    fn begin_capture(&mut self) -> Result<(), DeviceError> {
        self.begin();
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), DeviceError> {
        ImageCollector::write(self, address, data)
    }

    fn end_capture(&mut self) -> Result<(), DeviceError> {
        self.end();
        Ok(())
    }

    fn abort_capture(&mut self) {
        self.discard();
    }
}
