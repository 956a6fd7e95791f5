//! Error types for device emulation

use std::io;

use thiserror::Error;

/// Errors raised while emulating a device or storing its captures
#[derive(Debug, Error)]
pub enum DeviceError {
    /// A write arrived while no capture was in progress
    #[error("no capture target for write")]
    NoCaptureTarget,

    /// The capture sink went away
    #[error("capture sink closed")]
    SinkClosed,

    /// I/O error while storing a capture
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while loading or resolving model definitions
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Invalid hex string in a memory mapping or identifier
    #[error("invalid hex data: {0}")]
    InvalidHex(String),

    /// Two models share the same id
    #[error("duplicate model id '{0}'")]
    DuplicateModel(String),

    /// No model with this id
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    /// The model has no firmware with this name
    #[error("model '{model}' has no firmware '{firmware}'")]
    UnknownFirmware { model: String, firmware: String },

    /// Malformed catalog document
    #[error("invalid catalog: {0}")]
    Json(#[from] serde_json::Error),

    /// Catalog file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
