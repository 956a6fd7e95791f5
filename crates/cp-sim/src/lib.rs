//! Emulated programming-mode radios
//!
//! This crate impersonates a radio towards its vendor programming software
//! (CPS) so that codeplug writes can be captured. It includes:
//!
//! - **ModelCatalog**: Known models and firmwares with the ROM content the
//!   CPS expects to read back
//! - **RequestHandler**: Per-vendor request handling on top of a [`Device`]
//! - **Transport**: Receive/transmit buffering, plus [`run_device_task`] to
//!   serve it over any async stream
//! - **Capture sinks**: [`ImageCollector`] builds codeplug images,
//!   [`HexWriter`] dumps each session as text
//!
//! # Example
//!
//! ```rust
//! use cp_sim::{create_handler, CaptureEvent, ModelCatalog, Transport};
//! use tokio::sync::mpsc;
//!
//! let catalog = ModelCatalog::builtin();
//! let model = catalog.by_id("d878uv").unwrap();
//! let (capture_tx, mut capture_rx) = mpsc::unbounded_channel();
//! let handler = create_handler(model, None, Some(Box::new(capture_tx))).unwrap();
//!
//! let mut transport = Transport::new(handler);
//! transport.on_bytes_available(b"PROGRAM");
//! assert_eq!(transport.pending_output(), b"QX\x06");
//! assert_eq!(capture_rx.try_recv().unwrap(), CaptureEvent::Started);
//! ```

pub mod anytone;
pub mod catalog;
pub mod collector;
pub mod device;
pub mod error;
pub mod events;
pub mod handler;
pub mod hexwriter;
pub mod md32uv;
pub mod opengd77;
pub mod radtel;
pub mod rom;
pub mod session;
pub mod transport;

pub use catalog::{DeviceProfile, FirmwareDefinition, HexBytes, ModelCatalog, ModelDefinition};
pub use collector::ImageCollector;
pub use device::{CaptureSink, Device};
pub use error::{CatalogError, DeviceError};
pub use events::{CaptureEvent, DeviceEvent};
pub use handler::{create_handler, Exchange, RequestHandler};
pub use hexwriter::HexWriter;
pub use rom::ModelRom;
pub use session::{Session, SessionState};
pub use transport::{run_device_task, DeviceCommand, Transport};
