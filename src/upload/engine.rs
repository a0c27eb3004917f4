//! # Firmware Upload Engine
//!
//! Drives the D0 -> D1 -> D2 xN -> D3 upload sequence against a ready
//! [`ConnectionSession`]. Every wait is bounded: command responses by the
//! per-command timeouts, writes by the session write timeout. Progress, log
//! lines and the terminal outcome are delivered through a single event
//! channel.
//!
//! Cancellation is cooperative: [`CancelHandle::cancel`] sets a flag and
//! unblocks any pending response wait; the engine observes it between
//! sub-writes and between packets and reports `Cancelled`. A cancelled or
//! failed upload leaves the device in an indeterminate firmware state; the
//! sequence is never retried end-to-end.

use crate::ble::session::ConnectionSession;
use crate::ble::transport::BleTransport;
use crate::constants::{
    CMD_FW_COMPLETE, CMD_FW_DATA, CMD_FW_ERASE, CMD_FW_REQUEST, D0_TIMEOUT, D1_TIMEOUT,
    D2_INITIAL_PACKETS, D2_INITIAL_TIMEOUT, D2_PACKET_TIMEOUT, D3_SETTLE, FIRMWARE_CHUNK_SIZE,
    INTER_WRITE_PAUSE,
};
use crate::protocol::packet::{build_chunk_packet, build_short_request, PacketKind};
use crate::upload::image::FirmwareImage;
use crate::util::hex::{format_hex_compact, format_hex_prefix};
use crate::ZydError;
use log::debug;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::time::timeout;

/// Phase of an upload, as reported in failures and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadState {
    RequestingPermission,
    Erasing,
    Transferring,
    Completing,
    Done,
    Failed,
    Cancelled,
}

/// Severity attached to upload log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UploadLogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Events streamed to the caller while an upload runs.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    Started {
        image_size: usize,
        total_packets: usize,
    },
    /// The engine entered a new phase of the D0-D3 sequence.
    StateChanged(UploadState),
    /// Emitted after every acknowledged D2 packet. `percent` is
    /// non-decreasing and reaches exactly 100 on the final packet.
    Progress {
        packets_sent: usize,
        total_packets: usize,
        percent: u8,
    },
    Log {
        message: String,
        level: UploadLogLevel,
    },
    Completed,
    Cancelled,
    Failed {
        reason: String,
    },
}

/// Cooperative cancellation handle for a running upload.
#[derive(Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelHandle {
    pub fn new() -> CancelHandle {
        CancelHandle::default()
    }

    /// Requests cancellation and unblocks any pending wait.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        // notify_one stores a permit, so a wait that registers later still
        // completes.
        self.inner.notify.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

/// Runs one complete firmware upload on the given session.
///
/// Emits [`UploadEvent`]s on `events` and returns `Ok(())` once the device
/// accepted the image and the post-D3 settle elapsed. The session stays
/// usable afterwards (until the device reboots and drops the link itself).
pub async fn run_upload<T: BleTransport>(
    session: &mut ConnectionSession<T>,
    image: FirmwareImage,
    events: mpsc::UnboundedSender<UploadEvent>,
    cancel: CancelHandle,
) -> Result<(), ZydError> {
    session.begin_upload()?;
    let result = perform_upload(session, &image, &events, &cancel).await;
    session.end_upload();

    match &result {
        Ok(()) => {
            let _ = events.send(UploadEvent::StateChanged(UploadState::Done));
            emit_log(
                &events,
                "Firmware upload completed successfully",
                UploadLogLevel::Success,
            );
            let _ = events.send(UploadEvent::Completed);
        }
        Err(ZydError::Cancelled) => {
            let _ = events.send(UploadEvent::StateChanged(UploadState::Cancelled));
            emit_log(&events, "Upload aborted by user", UploadLogLevel::Warning);
            let _ = events.send(UploadEvent::Cancelled);
        }
        Err(e) => {
            let _ = events.send(UploadEvent::StateChanged(UploadState::Failed));
            emit_log(
                &events,
                &format!("Firmware upload failed: {e}"),
                UploadLogLevel::Error,
            );
            let _ = events.send(UploadEvent::Failed {
                reason: e.to_string(),
            });
        }
    }
    result
}

async fn perform_upload<T: BleTransport>(
    session: &mut ConnectionSession<T>,
    image: &FirmwareImage,
    events: &mpsc::UnboundedSender<UploadEvent>,
    cancel: &CancelHandle,
) -> Result<(), ZydError> {
    let total_packets = image.total_packets();
    let _ = events.send(UploadEvent::Started {
        image_size: image.len(),
        total_packets,
    });
    emit_log(
        events,
        &format!("Starting MCU firmware upload ({} bytes)", image.len()),
        UploadLogLevel::Info,
    );

    // Step 1: D0 - request upgrade permission.
    let _ = events.send(UploadEvent::StateChanged(UploadState::RequestingPermission));
    emit_log(events, "Requesting upgrade permission...", UploadLogLevel::Info);
    let response = exchange_command(session, CMD_FW_REQUEST, D0_TIMEOUT, cancel).await?;
    expect_zero_status(CMD_FW_REQUEST, &response)?;
    emit_log(events, "D0 upgrade permission granted", UploadLogLevel::Success);

    // Step 2: D1 - erase flash. The device signals erase completion purely
    // through this response; no extra delay before the first D2.
    let _ = events.send(UploadEvent::StateChanged(UploadState::Erasing));
    emit_log(events, "Erasing flash memory...", UploadLogLevel::Info);
    let response = exchange_command(session, CMD_FW_ERASE, D1_TIMEOUT, cancel).await?;
    expect_zero_status(CMD_FW_ERASE, &response)?;
    emit_log(events, "D1 flash erase completed", UploadLogLevel::Success);

    // Step 3: D2 - transfer the image in 128-byte chunks.
    let _ = events.send(UploadEvent::StateChanged(UploadState::Transferring));
    emit_log(
        events,
        &format!(
            "Uploading {} packets ({} bytes per write)...",
            total_packets,
            sub_write_size(session)
        ),
        UploadLogLevel::Info,
    );
    for index in 0..total_packets {
        if cancel.is_cancelled() {
            return Err(ZydError::Cancelled);
        }
        if !session.link_is_up() {
            return Err(ZydError::LinkLostDuringUpload);
        }

        let packet = build_chunk_packet(session.header(), index as u16, &image.chunk(index));
        if index == 0 {
            emit_log(
                events,
                &format!("First D2 packet: {}", format_hex_prefix(&packet, 6)),
                UploadLogLevel::Info,
            );
        }

        // The first packets get a longer timeout while the device's flash
        // programming warms up.
        let response_timeout = if index < D2_INITIAL_PACKETS {
            D2_INITIAL_TIMEOUT
        } else {
            D2_PACKET_TIMEOUT
        };
        let response = exchange_chunk(session, &packet, response_timeout, cancel).await?;
        if response.len() < 2 || response[1] != CMD_FW_DATA {
            return Err(ZydError::Other(format!(
                "invalid D2 response for packet {index}: {}",
                format_hex_compact(&response)
            )));
        }

        let packets_sent = index + 1;
        let _ = events.send(UploadEvent::Progress {
            packets_sent,
            total_packets,
            percent: (packets_sent * 100 / total_packets) as u8,
        });

        tokio::time::sleep(INTER_WRITE_PAUSE).await;
    }
    emit_log(events, "All firmware data uploaded", UploadLogLevel::Success);

    // Step 4: D3 - complete. The device resets after accepting it, so no
    // structured reply is awaited; a fixed settle covers the reboot.
    let _ = events.send(UploadEvent::StateChanged(UploadState::Completing));
    emit_log(events, "Sending completion command...", UploadLogLevel::Info);
    let packet = build_short_request(session.header(), CMD_FW_COMPLETE);
    write_for_upload(session, &packet).await?;
    emit_log(
        events,
        "D3 completion command sent - device will restart",
        UploadLogLevel::Success,
    );

    tokio::select! {
        _ = cancel.cancelled() => Err(ZydError::Cancelled),
        _ = tokio::time::sleep(D3_SETTLE) => Ok(()),
    }
}

/// Sends a 4-byte handshake command and waits for its echoed response.
async fn exchange_command<T: BleTransport>(
    session: &mut ConnectionSession<T>,
    command: u8,
    response_timeout: Duration,
    cancel: &CancelHandle,
) -> Result<Vec<u8>, ZydError> {
    let packet = build_short_request(session.header(), command);
    debug!(
        "sending {}: {}",
        PacketKind::name(command),
        format_hex_compact(&packet)
    );

    // Arm before writing: the response can arrive before the write call
    // returns on fast devices.
    let waiter = session.arm_firmware_response();
    write_for_upload(session, &packet).await?;
    await_response(session, waiter, command, response_timeout, cancel).await
}

/// Sends one 136-byte D2 packet as a sequence of acknowledged sub-writes of
/// at most `MTU - 3` bytes, then waits for the device response. The
/// cancellation flag is observed between sub-writes.
async fn exchange_chunk<T: BleTransport>(
    session: &mut ConnectionSession<T>,
    packet: &[u8],
    response_timeout: Duration,
    cancel: &CancelHandle,
) -> Result<Vec<u8>, ZydError> {
    let waiter = session.arm_firmware_response();

    let write_size = sub_write_size(session);
    for sub_write in packet.chunks(write_size) {
        if cancel.is_cancelled() {
            return Err(ZydError::Cancelled);
        }
        write_for_upload(session, sub_write).await?;
        tokio::time::sleep(INTER_WRITE_PAUSE).await;
    }

    await_response(session, waiter, CMD_FW_DATA, response_timeout, cancel).await
}

/// Usable bytes per sub-write: bounded by the negotiated MTU and by the
/// 128-byte write unit the controller firmware expects.
fn sub_write_size<T: BleTransport>(session: &ConnectionSession<T>) -> usize {
    session.max_write_size().min(FIRMWARE_CHUNK_SIZE)
}

async fn write_for_upload<T: BleTransport>(
    session: &mut ConnectionSession<T>,
    data: &[u8],
) -> Result<(), ZydError> {
    let result = session.write_and_wait(data).await;
    match result {
        Err(_) if !session.link_is_up() => Err(ZydError::LinkLostDuringUpload),
        other => other,
    }
}

/// Waits for the armed firmware response, racing the per-command timeout,
/// link loss and cancellation.
async fn await_response<T: BleTransport>(
    session: &ConnectionSession<T>,
    waiter: oneshot::Receiver<Vec<u8>>,
    command: u8,
    response_timeout: Duration,
    cancel: &CancelHandle,
) -> Result<Vec<u8>, ZydError> {
    let shared = session.shared();
    if !session.link_is_up() {
        return Err(ZydError::LinkLostDuringUpload);
    }

    tokio::select! {
        _ = cancel.cancelled() => Err(ZydError::Cancelled),
        _ = shared.link_down.notified() => Err(ZydError::LinkLostDuringUpload),
        result = timeout(response_timeout, waiter) => match result {
            Ok(Ok(response)) => Ok(response),
            // The waiter can only be dropped when the session tore down.
            Ok(Err(_)) => Err(ZydError::LinkLostDuringUpload),
            Err(_) => Err(ZydError::ProtocolTimeout {
                command,
                millis: response_timeout.as_millis() as u64,
            }),
        },
    }
}

/// Validates an echoed handshake response: the command byte must match and
/// the status byte must be zero.
fn expect_zero_status(command: u8, response: &[u8]) -> Result<(), ZydError> {
    if response.len() < 3 || response[1] != command {
        return Err(ZydError::Other(format!(
            "unexpected response to 0x{command:02X}: {}",
            format_hex_compact(response)
        )));
    }
    if response[2] != 0x00 {
        return Err(ZydError::ProtocolNack {
            command,
            status: response[2],
        });
    }
    Ok(())
}

fn emit_log(events: &mpsc::UnboundedSender<UploadEvent>, message: &str, level: UploadLogLevel) {
    debug!("{message}");
    let _ = events.send(UploadEvent::Log {
        message: message.to_string(),
        level,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expect_zero_status() {
        assert!(expect_zero_status(0xD0, &[0xF0, 0xD0, 0x00]).is_ok());
        assert!(matches!(
            expect_zero_status(0xD0, &[0xF0, 0xD0, 0x01]),
            Err(ZydError::ProtocolNack { command: 0xD0, status: 0x01 })
        ));
        assert!(expect_zero_status(0xD0, &[0xF0, 0xD1, 0x00]).is_err());
        assert!(expect_zero_status(0xD0, &[0xF0, 0xD0]).is_err());
    }

    #[test]
    fn test_cancel_handle_is_sticky() {
        let cancel = CancelHandle::new();
        assert!(!cancel.is_cancelled());
        cancel.cancel();
        assert!(cancel.is_cancelled());
        let clone = cancel.clone();
        assert!(clone.is_cancelled());
    }
}
