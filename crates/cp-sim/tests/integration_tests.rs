//! Integration tests for the emulated devices
//!
//! These tests drive complete CPS sessions through [`Transport`] and the
//! async device task, and check what ends up in the captured images.

use std::time::Duration;

use cp_codeplug::{document, Address, FieldValue};
use cp_protocol::anytone::AnyToneRequest;
use cp_protocol::md32uv::Md32UvRequest;
use cp_protocol::opengd77::{ControlOption, DataSection, OpenGd77Request, ReadSection, Write, WriteTag};
use cp_protocol::radtel::{RadtelRequest, PAGE_SIZE};
use cp_protocol::EncodeRequest;
use cp_sim::{
    create_handler, run_device_task, CaptureEvent, CaptureSink, DeviceCommand, DeviceEvent,
    HexWriter, ImageCollector, ModelCatalog, Transport,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};

// ============================================================================
// Helper Functions
// ============================================================================

mod helpers {
    use super::*;

    /// Transport for a built-in model, forwarding captures to a channel
    pub fn transport(model: &str) -> (Transport, mpsc::UnboundedReceiver<CaptureEvent>) {
        let catalog = ModelCatalog::builtin();
        let model = catalog.by_id(model).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = create_handler(model, None, Some(Box::new(tx))).unwrap();
        (Transport::new(handler), rx)
    }

    /// Feed `bytes` and take whatever the device answered
    pub fn pump(transport: &mut Transport, bytes: &[u8]) -> Vec<u8> {
        transport.on_bytes_available(bytes);
        let out = transport.pending_output().to_vec();
        transport.on_bytes_written(out.len());
        out
    }

    /// Drain captured events into a fresh collector
    pub fn collect(rx: &mut mpsc::UnboundedReceiver<CaptureEvent>) -> ImageCollector {
        let mut collector = ImageCollector::new();
        while let Ok(event) = rx.try_recv() {
            collector.handle_event(event).unwrap();
        }
        collector
    }

    pub fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("cp-sim-it-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}

use helpers::*;

// ============================================================================
// AnyTone Tests
// ============================================================================

#[test]
fn test_anytone_capture() {
    let (mut transport, mut rx) = transport("d878uv");

    assert_eq!(pump(&mut transport, b"PROGRAM"), b"QX\x06");
    assert_eq!(
        pump(&mut transport, b"W\x00\x00\x00\x10\x02\xAA\xBB\x77\x06"),
        b"\x06"
    );
    assert!(pump(&mut transport, b"END").is_empty());

    assert_eq!(rx.try_recv().unwrap(), CaptureEvent::Started);
    assert_eq!(
        rx.try_recv().unwrap(),
        CaptureEvent::Write {
            address: 0x10,
            data: vec![0xAA, 0xBB]
        }
    );
    assert_eq!(rx.try_recv().unwrap(), CaptureEvent::Ended);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_anytone_bad_checksum_is_accepted() {
    let (mut transport, mut rx) = transport("d878uv");

    pump(&mut transport, b"PROGRAM");
    assert_eq!(
        pump(&mut transport, b"W\x00\x00\x00\x10\x02\xAA\xBB\x00\x06"),
        b"\x06"
    );
    pump(&mut transport, b"END");

    let collector = collect(&mut rx);
    let image = collector.collection().image(0).unwrap();
    assert_eq!(image.data(Address::from_byte(0x10)).unwrap(), &[0xAA, 0xBB]);
}

#[test]
fn test_anytone_device_info() {
    let (mut transport, _rx) = transport("d878uv2");
    pump(&mut transport, b"PROGRAM");
    let info = pump(&mut transport, &AnyToneRequest::DeviceInfo.encode());
    assert_eq!(info.len(), 16);
    assert_eq!(&info[..8], b"ID878UV2");
    assert_eq!(info[15], 0x06);
}

#[test]
fn test_anytone_write_before_program_is_dropped() {
    let (mut transport, mut rx) = transport("d878uv");

    let events = transport.on_bytes_available(&AnyToneRequest::write(0x10, vec![0xAA]).encode());
    assert!(matches!(events.as_slice(), [DeviceEvent::Request { response: 0, .. }]));
    assert!(transport.pending_output().is_empty());
    assert!(rx.try_recv().is_err());

    pump(&mut transport, b"END");
    assert!(collect(&mut rx).collection().is_empty());
}

#[test]
fn test_repeated_sessions_make_separate_images() {
    let (mut transport, mut rx) = transport("d878uv");

    for value in [0x11u8, 0x22] {
        let mut session = AnyToneRequest::Program.encode();
        session.extend(AnyToneRequest::write(0x0080_0000, vec![value; 16]).encode());
        session.extend(AnyToneRequest::End.encode());
        pump(&mut transport, &session);
    }
    // A session without writes leaves nothing behind
    pump(&mut transport, b"PROGRAMEND");

    let collection = collect(&mut rx).into_collection();
    assert_eq!(collection.len(), 2);
    let first = collection.image(0).unwrap();
    let second = collection.image(1).unwrap();
    assert_eq!(first.data(Address::from_byte(0x0080_0000)).unwrap(), &[0x11; 16]);

    let diff = cp_codeplug::ImageDifference::new(first, second);
    assert_eq!(diff.modified_count(), 1);
    assert!(cp_codeplug::ImageDifference::new(first, first).is_empty());
}

#[test]
fn test_captured_image_can_be_annotated() {
    let (mut transport, mut rx) = transport("d878uv");
    let mut session = AnyToneRequest::Program.encode();
    session.extend(AnyToneRequest::write(0x10, vec![0x00, 0x02]).encode());
    session.extend(AnyToneRequest::End.encode());
    pump(&mut transport, &session);

    let pattern = document::parse(r#"<codeplug><uint16be at="10h"/></codeplug>"#).unwrap();
    let mut collection = collect(&mut rx).into_collection();
    assert_eq!(collection.annotate_all(&pattern), 1);

    let image = collection.image(0).unwrap();
    let field = image.elements()[0]
        .annotations()
        .and_then(|a| a.resolve(Address::from_byte(0x10)))
        .and_then(|a| a.as_field())
        .unwrap();
    assert_eq!(field.value, FieldValue::Integer(2));
}

// ============================================================================
// Radtel Tests
// ============================================================================

#[test]
fn test_radtel_capture() {
    let (mut transport, mut rx) = transport("rt4d");

    let mut session = RadtelRequest::Enter.encode();
    session.extend(
        RadtelRequest::Write {
            segment: 0,
            page: 3,
            data: vec![0x42; PAGE_SIZE],
        }
        .encode(),
    );
    session.extend(RadtelRequest::Leave.encode());
    assert_eq!(pump(&mut transport, &session), vec![0x06; 3]);

    let collection = collect(&mut rx).into_collection();
    let image = collection.image(0).unwrap();
    assert_eq!(image.len(), 1);
    assert_eq!(image.elements()[0].address(), Address::from_byte(3 * 1024));
    assert_eq!(image.elements()[0].len(), PAGE_SIZE);
}

#[test]
fn test_radtel_write_outside_session_is_dropped() {
    let (mut transport, mut rx) = transport("rt4d");
    let write = RadtelRequest::Write {
        segment: 0,
        page: 1,
        data: vec![0x11; PAGE_SIZE],
    };

    assert!(pump(&mut transport, &write.encode()).is_empty());
    pump(&mut transport, &RadtelRequest::Enter.encode());
    pump(&mut transport, &RadtelRequest::Leave.encode());
    assert!(pump(&mut transport, &write.encode()).is_empty());

    assert_eq!(rx.try_recv().unwrap(), CaptureEvent::Started);
    assert_eq!(rx.try_recv().unwrap(), CaptureEvent::Ended);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_radtel_bad_checksum_discards_buffer() {
    let (mut transport, mut rx) = transport("rt4d");
    let mut enter = RadtelRequest::Enter.encode();
    *enter.last_mut().unwrap() ^= 0xff;

    let events = transport.on_bytes_available(&enter);
    assert!(matches!(events.as_slice(), [DeviceEvent::ParseError(_)]));
    assert_eq!(transport.buffered_input(), 0);
    assert!(rx.try_recv().is_err());
}

// ============================================================================
// OpenGD77 Tests
// ============================================================================

#[test]
fn test_opengd77_capture() {
    let (mut transport, mut rx) = transport("gd77");

    assert_eq!(pump(&mut transport, &OpenGd77Request::ShowCpsScreen.encode()), b"-");
    let info = pump(
        &mut transport,
        &OpenGd77Request::Read {
            section: ReadSection::FirmwareInfo,
            address: 0,
            length: 46,
        }
        .encode(),
    );
    assert_eq!(&info[..3], b"R\x00\x2e");
    assert_eq!(&info[3..11], b"OpenGD77");

    let write = OpenGd77Request::Write {
        tag: WriteTag::X,
        write: Write::Data {
            section: DataSection::Eeprom,
            address: 0x0e00,
            data: vec![1, 2, 3],
        },
    };
    assert_eq!(pump(&mut transport, &write.encode()), b"X\x04");
    assert_eq!(
        pump(&mut transport, &OpenGd77Request::Control(ControlOption::Reboot).encode()),
        b"-"
    );

    let collection = collect(&mut rx).into_collection();
    assert_eq!(
        collection.image(0).unwrap().data(Address::from_byte(0x0e00)).unwrap(),
        &[1, 2, 3]
    );
}

// ============================================================================
// MD-32UV Tests
// ============================================================================

#[test]
fn test_md32uv_capture() {
    let (mut transport, mut rx) = transport("md32uv");

    let mut identify = vec![0xff, 0xff];
    identify.extend(Md32UvRequest::Search.encode());
    identify.extend(Md32UvRequest::Password.encode());
    assert_eq!(pump(&mut transport, &identify), b"\x06DP570UVP\x00\x00");

    let mut session = Md32UvRequest::Program.encode();
    session.extend(
        Md32UvRequest::Read {
            address: 0x1fff,
            length: 1,
        }
        .encode(),
    );
    session.extend(
        Md32UvRequest::Write {
            address: 0x2000,
            data: vec![0x33; 0x100],
        }
        .encode(),
    );
    let reply = pump(&mut transport, &session);
    // Allocation flag of block 1, then the write ack
    assert_eq!(reply, vec![0x06, b'W', 0xff, 0x1f, 0x00, 0x01, 0x00, 0x01, 0x06]);
    transport.on_idle();

    let collection = collect(&mut rx).into_collection();
    let image = collection.image(0).unwrap();
    assert_eq!(image.data(Address::from_byte(0x2000)).unwrap(), &[0x33; 0x100][..]);
}

#[test]
fn test_md32uv_program_restart_keeps_one_session() {
    let (mut transport, mut rx) = transport("md32uv");
    pump(&mut transport, &Md32UvRequest::Program.encode());
    pump(&mut transport, &Md32UvRequest::Program.encode());
    transport.on_idle();

    assert_eq!(rx.try_recv().unwrap(), CaptureEvent::Started);
    assert_eq!(rx.try_recv().unwrap(), CaptureEvent::Ended);
    assert!(rx.try_recv().is_err());
}

// ============================================================================
// Capture Sink Tests
// ============================================================================

#[test]
fn test_hex_writer_follows_capture_events() {
    let dir = scratch_dir("hex");
    let (mut transport, mut rx) = transport("d878uv");
    let mut session = AnyToneRequest::Program.encode();
    session.extend(AnyToneRequest::write(0x20, vec![0xde, 0xad]).encode());
    session.extend(AnyToneRequest::End.encode());
    pump(&mut transport, &session);

    let mut writer = HexWriter::new(&dir, "d878uv-");
    while let Ok(event) = rx.try_recv() {
        match event {
            CaptureEvent::Started => writer.begin_capture().unwrap(),
            CaptureEvent::Write { address, data } => writer.write(address, &data).unwrap(),
            CaptureEvent::Ended => writer.end_capture().unwrap(),
            CaptureEvent::Aborted => writer.abort_capture(),
        }
    }

    let text = std::fs::read_to_string(dir.join("d878uv-0000.hex")).unwrap();
    assert_eq!(text, "00000020: de ad\n");
    std::fs::remove_dir_all(&dir).unwrap();
}

// ============================================================================
// Device Task Tests
// ============================================================================

#[tokio::test]
async fn test_device_task_full_session() {
    let catalog = ModelCatalog::builtin();
    let model = catalog.by_id("d878uv").unwrap();
    let (capture_tx, mut capture_rx) = mpsc::unbounded_channel();
    let handler = create_handler(model, None, Some(Box::new(capture_tx))).unwrap();

    let (mut cps_stream, device_stream) = tokio::io::duplex(1024);
    let (cmd_tx, cmd_rx) = mpsc::channel(10);
    let (event_tx, mut event_rx) = broadcast::channel(64);
    let task_handle = tokio::spawn(run_device_task(
        device_stream,
        Transport::new(handler),
        cmd_rx,
        event_tx,
    ));

    cps_stream.write_all(b"PROGRAM").await.unwrap();
    let mut ack = [0u8; 3];
    cps_stream.read_exact(&mut ack).await.unwrap();
    assert_eq!(&ack, b"QX\x06");

    cps_stream
        .write_all(&AnyToneRequest::write(0x100, vec![7; 8]).encode())
        .await
        .unwrap();
    let mut ack = [0u8; 1];
    cps_stream.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack, [0x06]);

    cps_stream.write_all(b"END").await.unwrap();

    let mut collector = ImageCollector::new();
    loop {
        let event = tokio::time::timeout(Duration::from_millis(500), capture_rx.recv())
            .await
            .unwrap()
            .unwrap();
        let ended = event == CaptureEvent::Ended;
        collector.handle_event(event).unwrap();
        if ended {
            break;
        }
    }
    assert_eq!(collector.collection().len(), 1);

    cmd_tx.send(DeviceCommand::Shutdown).await.unwrap();
    tokio::time::timeout(Duration::from_millis(500), task_handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let mut requests = 0;
    while let Ok(event) = event_rx.try_recv() {
        if matches!(event, DeviceEvent::Request { .. }) {
            requests += 1;
        }
    }
    assert_eq!(requests, 3);
}

#[tokio::test]
async fn test_device_task_disconnect_discards_capture() {
    let (transport, mut capture_rx) = transport("d878uv");
    let (mut cps_stream, device_stream) = tokio::io::duplex(1024);
    let (_cmd_tx, cmd_rx) = mpsc::channel(10);
    let (event_tx, _event_rx) = broadcast::channel(16);
    let task_handle = tokio::spawn(run_device_task(device_stream, transport, cmd_rx, event_tx));

    let mut session = AnyToneRequest::Program.encode();
    session.extend(AnyToneRequest::write(0x100, vec![7; 8]).encode());
    cps_stream.write_all(&session).await.unwrap();
    let mut acks = [0u8; 4];
    cps_stream.read_exact(&mut acks).await.unwrap();
    drop(cps_stream);
    task_handle.await.unwrap().unwrap();

    let mut collector = ImageCollector::new();
    while let Some(event) = capture_rx.recv().await {
        collector.handle_event(event).unwrap();
    }
    assert!(collector.current().is_none());
    assert!(collector.collection().is_empty());
}
