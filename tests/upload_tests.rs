//! Firmware upload engine tests: the happy-path end-to-end scenario plus
//! timeout, NACK, cancellation and link-loss behavior, all against the mock
//! peripheral.

use std::time::Duration;
use zyd_rs::ble::{ConnectionSession, MockHandle, MockTransport};
use zyd_rs::upload::{run_upload, CancelHandle, FirmwareImage, UploadEvent, UploadState};
use zyd_rs::ZydError;

type UploadFixture = (
    ConnectionSession<MockTransport>,
    MockHandle,
    tokio::sync::mpsc::UnboundedSender<UploadEvent>,
    tokio::sync::mpsc::UnboundedReceiver<UploadEvent>,
);

async fn ready_session() -> UploadFixture {
    let (mock, handle) = MockTransport::new();
    let (mut session, _events) = ConnectionSession::new(mock);
    let devices = session.scan().await.unwrap();
    session.connect(&devices[0]).await.unwrap();
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (session, handle, tx, rx)
}

fn drain(rx: &mut tokio::sync::mpsc::UnboundedReceiver<UploadEvent>) -> Vec<UploadEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn image(len: usize) -> FirmwareImage {
    FirmwareImage::new(vec![0x5A; len]).unwrap()
}

/// A 4096-byte image against an immediately-acknowledging device: exactly 32
/// D2 packets, one completion, no failure.
#[tokio::test(start_paused = true)]
async fn test_end_to_end_4096_byte_upload() {
    let (mut session, handle, tx, mut rx) = ready_session().await;

    run_upload(&mut session, image(4096), tx, CancelHandle::new())
        .await
        .unwrap();

    assert_eq!(handle.commands_with(0xD0).len(), 1);
    assert_eq!(handle.commands_with(0xD1).len(), 1);
    assert_eq!(handle.commands_with(0xD3).len(), 1);

    let d2 = handle.commands_with(0xD2);
    assert_eq!(d2.len(), 32);
    for (index, packet) in d2.iter().enumerate() {
        assert_eq!(packet.len(), 136);
        assert_eq!(packet[2] as usize, index >> 8);
        assert_eq!(packet[3] as usize, index & 0xFF);
    }

    let events = drain(&mut rx);
    let completed = events
        .iter()
        .filter(|e| matches!(e, UploadEvent::Completed))
        .count();
    let failed = events
        .iter()
        .filter(|e| matches!(e, UploadEvent::Failed { .. }))
        .count();
    assert_eq!(completed, 1);
    assert_eq!(failed, 0);

    let states: Vec<UploadState> = events
        .iter()
        .filter_map(|e| match e {
            UploadEvent::StateChanged(state) => Some(*state),
            _ => None,
        })
        .collect();
    assert_eq!(
        states,
        vec![
            UploadState::RequestingPermission,
            UploadState::Erasing,
            UploadState::Transferring,
            UploadState::Completing,
            UploadState::Done,
        ]
    );
}

/// Progress percentages never decrease and the final report is exactly 100.
#[tokio::test(start_paused = true)]
async fn test_progress_is_monotone_and_ends_at_100() {
    let (mut session, _handle, tx, mut rx) = ready_session().await;

    run_upload(&mut session, image(1500), tx, CancelHandle::new())
        .await
        .unwrap();

    let progress: Vec<(usize, usize, u8)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            UploadEvent::Progress {
                packets_sent,
                total_packets,
                percent,
            } => Some((packets_sent, total_packets, percent)),
            _ => None,
        })
        .collect();

    // ceil(1500 / 128) = 12 packets.
    assert_eq!(progress.len(), 12);
    assert!(progress.windows(2).all(|w| w[0].2 <= w[1].2));
    assert_eq!(progress.last().unwrap(), &(12, 12, 100));
}

/// The last chunk of a 1500-byte image is padded to 128 bytes with 0xFF.
#[tokio::test(start_paused = true)]
async fn test_final_chunk_padding_on_the_wire() {
    let (mut session, handle, tx, _rx) = ready_session().await;

    run_upload(&mut session, image(1500), tx, CancelHandle::new())
        .await
        .unwrap();

    let d2 = handle.commands_with(0xD2);
    assert_eq!(d2.len(), 12);
    let last = &d2[11];
    // 1500 = 11 * 128 + 92 data bytes in the final packet.
    let payload = &last[6..134];
    assert!(payload[..92].iter().all(|&b| b == 0x5A));
    assert!(payload[92..].iter().all(|&b| b == 0xFF));
}

/// With the default 23-byte MTU every sub-write stays within MTU - 3 bytes.
#[tokio::test(start_paused = true)]
async fn test_subwrites_respect_negotiated_mtu() {
    let (mock, handle) = MockTransport::new();
    handle.set_mtu(23);
    let (mut session, _events) = ConnectionSession::new(mock);
    let devices = session.scan().await.unwrap();
    session.connect(&devices[0]).await.unwrap();
    assert_eq!(session.max_write_size(), 20);

    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    run_upload(&mut session, image(1024), tx, CancelHandle::new())
        .await
        .unwrap();

    assert!(handle.writes().iter().all(|w| w.len() <= 20));
    // Sub-writes still reassemble into full 136-byte packets.
    let d2 = handle.commands_with(0xD2);
    assert_eq!(d2.len(), 8);
    assert!(d2.iter().all(|p| p.len() == 136));
}

/// A silent device fails the D0 step at the 10-second timeout, not earlier
/// and not indefinitely.
#[tokio::test(start_paused = true)]
async fn test_d0_timeout_fires_at_ten_seconds() {
    let (mut session, handle, tx, mut rx) = ready_session().await;
    handle.silence(0xD0);

    let started = tokio::time::Instant::now();
    let err = run_upload(&mut session, image(1024), tx, CancelHandle::new())
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(
        err,
        ZydError::ProtocolTimeout { command: 0xD0, millis: 10_000 }
    ));
    assert!(elapsed >= Duration::from_secs(10));
    assert!(elapsed < Duration::from_secs(11));

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, UploadEvent::Failed { .. })));
    assert!(!events.iter().any(|e| matches!(e, UploadEvent::Completed)));
}

/// A non-zero D0 status is a NACK, not a timeout.
#[tokio::test(start_paused = true)]
async fn test_d0_nack_rejects_upload() {
    let (mut session, handle, tx, _rx) = ready_session().await;
    handle.set_firmware_status(0xD0, 0x01);

    let err = run_upload(&mut session, image(1024), tx, CancelHandle::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ZydError::ProtocolNack { command: 0xD0, status: 0x01 }
    ));
    // Nothing past D0 was attempted.
    assert!(handle.commands_with(0xD1).is_empty());
    assert!(handle.commands_with(0xD2).is_empty());
}

/// The erase step gets its own, longer timeout.
#[tokio::test(start_paused = true)]
async fn test_d1_timeout_fires_at_fifteen_seconds() {
    let (mut session, handle, tx, _rx) = ready_session().await;
    handle.silence(0xD1);

    let started = tokio::time::Instant::now();
    let err = run_upload(&mut session, image(1024), tx, CancelHandle::new())
        .await
        .unwrap_err();

    assert!(matches!(err, ZydError::ProtocolTimeout { command: 0xD1, .. }));
    assert!(started.elapsed() >= Duration::from_secs(15));
}

/// Cancelling mid-transfer halts within a packet boundary and reports
/// Cancelled, never Done.
#[tokio::test(start_paused = true)]
async fn test_cancel_mid_transfer() {
    let (mut session, handle, tx, mut rx) = ready_session().await;

    let cancel = CancelHandle::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        // Roughly four packets into the transfer.
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let err = run_upload(&mut session, image(4096), tx, cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, ZydError::Cancelled));

    let sent = handle.commands_with(0xD2).len();
    assert!(sent < 32, "cancel must stop the transfer early, sent {sent}");
    assert!(handle.commands_with(0xD3).is_empty());

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, UploadEvent::Cancelled)));
    assert!(!events.iter().any(|e| matches!(e, UploadEvent::Completed)));
}

/// Link loss between packets surfaces as LinkLostDuringUpload and stops all
/// further writes.
#[tokio::test(start_paused = true)]
async fn test_link_loss_during_transfer() {
    let (mut session, handle, tx, mut rx) = ready_session().await;
    handle.drop_link_after_packets(5);

    let err = run_upload(&mut session, image(4096), tx, CancelHandle::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ZydError::LinkLostDuringUpload));

    // The transfer stopped at the packet where the link died.
    assert_eq!(handle.commands_with(0xD2).len(), 5);
    assert!(handle.commands_with(0xD3).is_empty());

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, UploadEvent::Failed { .. })));
}

/// Image size bounds are enforced before any transmission.
#[tokio::test(start_paused = true)]
async fn test_image_size_preflight() {
    assert!(matches!(
        FirmwareImage::new(vec![0; 512]),
        Err(ZydError::ImageSizeInvalid { .. })
    ));
    assert!(matches!(
        FirmwareImage::new(vec![0; 600 * 1024]),
        Err(ZydError::ImageSizeInvalid { .. })
    ));
}

/// An upload can only start on a ready session.
#[tokio::test(start_paused = true)]
async fn test_upload_requires_ready_session() {
    let (mock, _handle) = MockTransport::new();
    let (mut session, _events) = ConnectionSession::new(mock);

    // Not connected yet.
    let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
    let err = run_upload(&mut session, image(1024), tx, CancelHandle::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ZydError::NotReady(_)));
}

/// Uploads keep working after the session latched the alternate header.
#[tokio::test(start_paused = true)]
async fn test_upload_uses_latched_header() {
    let (mut session, handle, tx, _rx) = ready_session().await;
    handle.use_alternate_header();

    // The first D0 goes out with 0xF0; its 0xAB response latches the
    // alternate header for every later command.
    run_upload(&mut session, image(1024), tx, CancelHandle::new())
        .await
        .unwrap();

    let commands = handle.commands();
    assert_eq!(commands.first().unwrap()[0], 0xF0);
    assert_eq!(commands.last().unwrap()[0], 0xAB);
}
