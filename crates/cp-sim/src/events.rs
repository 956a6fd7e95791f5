//! Events emitted by emulated devices

use cp_protocol::{ParseError, Protocol};

/// Progress of a codeplug capture, as seen by a capture sink
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// The CPS entered programming mode
    Started,
    /// The CPS wrote `data` at `address`
    Write { address: u32, data: Vec<u8> },
    /// The CPS left programming mode
    Ended,
    /// The connection dropped before the CPS left programming mode
    Aborted,
}

/// Activity of a device task, for logging and UI subscription
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The task started serving an endpoint
    Connected { device: String, protocol: Protocol },
    /// A request was decoded and handled
    Request {
        summary: String,
        /// Bytes consumed from the receive buffer
        consumed: usize,
        /// Bytes queued in reply
        response: usize,
    },
    /// The receive buffer held garbage and was discarded
    ParseError(ParseError),
    /// The endpoint closed or the task was shut down
    Disconnected,
}
