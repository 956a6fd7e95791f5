//! Codeplug capture emulator
//!
//! Impersonates a radio on a serial port so its vendor programming software
//! can "write" a codeplug into it. Every programming session is kept as an
//! image, dumped as hex and optionally annotated with a pattern document.

mod capture;
mod config;

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::Parser;
use cp_codeplug::{document, CodeplugPattern};
use cp_sim::{
    create_handler, run_device_task, DeviceCommand, DeviceEvent, HexWriter, ModelCatalog,
    Transport,
};
use tokio::sync::{broadcast, mpsc};
use tokio_serial::SerialPortBuilderExt;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::capture::{run_capture_task, CaptureStore};
use crate::config::EmulatorConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture codeplugs written by vendor programming software", long_about = None)]
struct Args {
    /// Configuration file, see CP_EMULATOR_CONFIG
    config: Option<PathBuf>,

    /// Print the known models and firmwares, then exit
    #[arg(long)]
    list_models: bool,

    /// Serial port, overrides the configuration
    #[arg(short, long)]
    port: Option<String>,

    /// Model id from the catalog, overrides the configuration
    #[arg(short, long)]
    model: Option<String>,

    /// Firmware of the model, overrides the configuration
    #[arg(short, long)]
    firmware: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut EmulatorConfig) {
        if let Some(port) = &self.port {
            config.port = port.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(firmware) = &self.firmware {
            config.firmware = Some(firmware.clone());
        }
    }
}

fn load_schema(path: &std::path::Path) -> anyhow::Result<CodeplugPattern> {
    let xml = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read schema {}", path.display()))?;
    document::parse(&xml).with_context(|| format!("Invalid schema {}", path.display()))
}

fn list_models(catalog: &ModelCatalog) {
    for model in catalog.iter() {
        println!("{:<10} {:<14} {}", model.id, model.name, model.protocol);
        for firmware in &model.firmwares {
            println!("{:<10}   firmware {}", "", firmware.name);
        }
    }
}

async fn log_device_events(mut event_rx: broadcast::Receiver<DeviceEvent>) {
    loop {
        match event_rx.recv().await {
            Ok(DeviceEvent::Connected { device, protocol }) => {
                info!("Emulating {} ({})", device, protocol)
            }
            Ok(DeviceEvent::Request { summary, .. }) => debug!("Request: {}", summary),
            Ok(DeviceEvent::ParseError(e)) => warn!("Garbage from CPS: {}", e),
            Ok(DeviceEvent::Disconnected) => info!("Device disconnected"),
            Err(broadcast::error::RecvError::Lagged(n)) => debug!("Skipped {} device events", n),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cp_emulator=info,cp_codeplug=info,cp_protocol=info,cp_sim=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = match EmulatorConfig::locate(args.config.clone()) {
        Some(path) => {
            info!("Loading config from {}", path.display());
            EmulatorConfig::load(&path)?
        }
        None => EmulatorConfig::default(),
    };
    args.apply(&mut config);

    let mut catalog = ModelCatalog::builtin();
    if let Some(path) = &config.catalog {
        catalog.extend(ModelCatalog::load(path).context("Failed to load model catalog")?);
    }
    if args.list_models {
        list_models(&catalog);
        return Ok(());
    }

    let model = catalog
        .by_id(&config.model)
        .ok_or_else(|| anyhow!("Unknown model '{}'", config.model))?;
    let schema = config.schema.as_deref().map(load_schema).transpose()?;

    std::fs::create_dir_all(&config.output_dir).with_context(|| {
        format!("Failed to create output directory {}", config.output_dir.display())
    })?;
    let hex = HexWriter::new(&config.output_dir, config.hex_prefix.clone());

    let (capture_tx, capture_rx) = mpsc::unbounded_channel();
    let handler = create_handler(model, config.firmware.as_deref(), Some(Box::new(capture_tx)))?;

    let stream = tokio_serial::new(&config.port, config.baud_rate)
        .open_native_async()
        .with_context(|| format!("Failed to open {}", config.port))?;
    info!("Listening on {} at {} baud", config.port, config.baud_rate);

    let (cmd_tx, cmd_rx) = mpsc::channel(4);
    let (event_tx, event_rx) = broadcast::channel(256);
    let capture_task = tokio::spawn(run_capture_task(
        capture_rx,
        CaptureStore::new(Some(hex), schema),
    ));
    let monitor_task = tokio::spawn(log_device_events(event_rx));
    let mut device_task = tokio::spawn(run_device_task(
        stream,
        Transport::new(handler),
        cmd_rx,
        event_tx,
    ));

    tokio::select! {
        result = &mut device_task => {
            result.context("Device task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            let _ = cmd_tx.send(DeviceCommand::Shutdown).await;
            device_task.await.context("Device task panicked")??;
        }
    }

    let collection = capture_task.await.context("Capture task panicked")?;
    let _ = monitor_task.await;
    for image in &collection {
        info!(
            "{}: {} elements, {} bytes",
            image.label(),
            image.len(),
            image.size().byte()
        );
    }
    Ok(())
}
