//! Byte transport between the CPS and an emulated radio
//!
//! [`Transport`] holds the receive and transmit buffers and drives a
//! [`RequestHandler`] without doing any I/O itself. [`run_device_task`] pumps
//! it from an async stream (a serial port, or an in-memory duplex in tests):
//! - Read bytes from the stream and decode all complete requests
//! - Write queued responses back as the stream accepts them
//! - End a programming session the CPS abandoned, for protocols with an
//!   idle timeout
//! - Handle shutdown commands from a channel
//! - Emit [`DeviceEvent`]s via a broadcast channel

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::events::DeviceEvent;
use crate::handler::RequestHandler;

/// Commands that can be sent to a device task
#[derive(Debug, Clone)]
pub enum DeviceCommand {
    /// Stop serving the endpoint
    Shutdown,
}

pub struct Transport {
    handler: Box<dyn RequestHandler>,
    rx: Vec<u8>,
    tx: Vec<u8>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("protocol", &self.handler.protocol())
            .field("device", self.handler.device())
            .field("rx", &self.rx.len())
            .field("tx", &self.tx.len())
            .finish()
    }
}

impl Transport {
    pub fn new(handler: Box<dyn RequestHandler>) -> Self {
        Self {
            handler,
            rx: Vec::with_capacity(2048),
            tx: Vec::new(),
        }
    }

    pub fn handler(&self) -> &dyn RequestHandler {
        self.handler.as_ref()
    }

    pub fn handler_mut(&mut self) -> &mut dyn RequestHandler {
        self.handler.as_mut()
    }

    /// Append received bytes and handle every complete request they finish.
    ///
    /// An incomplete request stays buffered. A request that cannot be parsed
    /// discards the whole receive buffer.
    pub fn on_bytes_available(&mut self, data: &[u8]) -> Vec<DeviceEvent> {
        self.rx.extend_from_slice(data);
        let mut events = Vec::new();

        while !self.rx.is_empty() {
            match self.handler.handle_next(&self.rx) {
                Ok(Some(exchange)) => {
                    let consumed = exchange.consumed.min(self.rx.len());
                    self.rx.drain(..consumed);
                    let response = exchange.response.map_or(0, |bytes| {
                        self.tx.extend_from_slice(&bytes);
                        bytes.len()
                    });
                    debug!(
                        "{}: {} ({} bytes in, {} bytes out)",
                        self.handler.device().name(),
                        exchange.summary,
                        consumed,
                        response
                    );
                    events.push(DeviceEvent::Request {
                        summary: exchange.summary,
                        consumed,
                        response,
                    });
                    if consumed == 0 {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(
                        "{}: discarding {} received bytes: {}",
                        self.handler.device().name(),
                        self.rx.len(),
                        e
                    );
                    self.rx.clear();
                    events.push(DeviceEvent::ParseError(e));
                }
            }
        }

        events
    }

    /// Bytes waiting to be sent to the CPS
    pub fn pending_output(&self) -> &[u8] {
        &self.tx
    }

    /// The stream accepted the first `n` pending bytes
    pub fn on_bytes_written(&mut self, n: usize) {
        let n = n.min(self.tx.len());
        self.tx.drain(..n);
    }

    /// Bytes received but not yet decoded
    pub fn buffered_input(&self) -> usize {
        self.rx.len()
    }

    /// How long the CPS may stay silent before [`Transport::on_idle`] is due.
    /// `None` outside programming mode.
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.handler.device().is_programming() {
            self.handler.idle_timeout()
        } else {
            None
        }
    }

    /// The CPS went quiet mid-session: finish the capture
    pub fn on_idle(&mut self) {
        info!(
            "{}: no traffic, ending programming session",
            self.handler.device().name()
        );
        self.handler.device_mut().end_program();
    }

    /// The endpoint closed: drop buffered bytes and any unfinished capture
    pub fn teardown(&mut self) {
        self.rx.clear();
        self.tx.clear();
        self.handler.device_mut().teardown();
    }
}

/// Run an emulated device on `stream` until it closes or a shutdown is
/// requested.
///
/// The transport is torn down on exit, so a capture interrupted by a closed
/// stream is discarded.
pub async fn run_device_task<S>(
    stream: S,
    mut transport: Transport,
    mut cmd_rx: mpsc::Receiver<DeviceCommand>,
    event_tx: broadcast::Sender<DeviceEvent>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut buf = [0u8; 1024];
    let name = transport.handler().device().name().to_string();
    let protocol = transport.handler().protocol();

    info!("Starting device task for {} ({})", name, protocol.name());
    let _ = event_tx.send(DeviceEvent::Connected {
        device: name.clone(),
        protocol,
    });

    let mut last_rx = Instant::now();

    let result = loop {
        let pending = !transport.pending_output().is_empty();
        let idle_deadline = transport.idle_timeout().map(|timeout| last_rx + timeout);
        tokio::select! {
            result = reader.read(&mut buf) => {
                match result {
                    Ok(0) => {
                        debug!("Stream closed for {}", name);
                        break Ok(());
                    }
                    Ok(n) => {
                        last_rx = Instant::now();
                        for event in transport.on_bytes_available(&buf[..n]) {
                            let _ = event_tx.send(event);
                        }
                    }
                    Err(e) => {
                        warn!("Device {} read error: {}", name, e);
                        break Err(e);
                    }
                }
            }

            result = writer.write(transport.pending_output()), if pending => {
                match result {
                    Ok(0) => {
                        debug!("Stream closed for writing for {}", name);
                        break Ok(());
                    }
                    Ok(n) => {
                        transport.on_bytes_written(n);
                        if transport.pending_output().is_empty() {
                            if let Err(e) = writer.flush().await {
                                warn!("Device {} flush error: {}", name, e);
                                break Err(e);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Device {} write error: {}", name, e);
                        break Err(e);
                    }
                }
            }

            _ = sleep_until(idle_deadline.unwrap_or(last_rx)), if idle_deadline.is_some() => {
                transport.on_idle();
            }

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(DeviceCommand::Shutdown) => {
                        info!("Shutdown requested for device {}", name);
                        break Ok(());
                    }
                    None => {
                        debug!("Command channel closed for device {}", name);
                        break Ok(());
                    }
                }
            }
        }
    };

    transport.teardown();
    let _ = event_tx.send(DeviceEvent::Disconnected);
    info!("Device task ended for {}", name);
    result
}
