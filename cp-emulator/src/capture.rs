//! Consumer of captured codeplug writes
//!
//! Captures arrive from the device task as [`CaptureEvent`]s. Each one is
//! fed to the image collector and the hex writer; a finished image is
//! annotated with the configured schema and compared to the one before it.

use cp_codeplug::{Collection, CodeplugPattern, ImageDifference};
use cp_sim::{CaptureEvent, CaptureSink, HexWriter, ImageCollector};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

pub struct CaptureStore {
    collector: ImageCollector,
    hex: Option<HexWriter>,
    schema: Option<CodeplugPattern>,
}

impl CaptureStore {
    pub fn new(hex: Option<HexWriter>, schema: Option<CodeplugPattern>) -> Self {
        Self {
            collector: ImageCollector::new(),
            hex,
            schema,
        }
    }

    pub fn collection(&self) -> &Collection {
        self.collector.collection()
    }

    pub fn into_collection(self) -> Collection {
        self.collector.into_collection()
    }

    pub fn handle_event(&mut self, event: CaptureEvent) {
        if let Some(hex) = self.hex.as_mut() {
            let result = match &event {
                CaptureEvent::Started => hex.begin_capture(),
                CaptureEvent::Write { address, data } => hex.write(*address, data),
                CaptureEvent::Ended => hex.end_capture(),
                CaptureEvent::Aborted => {
                    hex.abort_capture();
                    Ok(())
                }
            };
            if let Err(e) = result {
                error!("Hex dump failed, disabling it: {}", e);
                self.hex = None;
            }
        }

        match event {
            CaptureEvent::Ended => {
                if let Some(index) = self.collector.end() {
                    self.finish(index);
                }
            }
            event => {
                if let Err(e) = self.collector.handle_event(event) {
                    warn!("Dropping captured write: {}", e);
                }
            }
        }
    }

    fn finish(&mut self, index: usize) {
        let collection = self.collector.collection();
        if let (Some(previous), Some(current)) = (
            index.checked_sub(1).and_then(|i| collection.image(i)),
            collection.image(index),
        ) {
            let diff = ImageDifference::new(previous, current);
            info!(
                "'{}' vs '{}': {} added, {} removed, {} modified elements",
                previous.label(),
                current.label(),
                diff.added_count(),
                diff.removed_count(),
                diff.modified_count()
            );
        }

        let Some(schema) = &self.schema else {
            return;
        };
        let Some(image) = self.collector.collection_mut().image_mut(index) else {
            return;
        };
        match image.annotate(schema) {
            Ok(()) => info!("Annotated '{}'", image.label()),
            Err(e) => warn!("Cannot annotate '{}': {}", image.label(), e),
        }
    }
}

/// Store captures until the device side of the channel goes away
pub async fn run_capture_task(
    mut rx: mpsc::UnboundedReceiver<CaptureEvent>,
    mut store: CaptureStore,
) -> Collection {
    while let Some(event) = rx.recv().await {
        store.handle_event(event);
    }
    info!("Capture task ended with {} images", store.collection().len());
    store.into_collection()
}
