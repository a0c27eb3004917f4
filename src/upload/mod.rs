//! Firmware upload engine.
//!
//! Turns an arbitrary-length firmware image into the controller's ordered
//! D0 (permission) -> D1 (erase) -> D2 (data chunks) -> D3 (complete)
//! sequence of acknowledged, checksummed writes. Runs only against a
//! `Ready` connection session; at most one upload per session at a time.

pub mod engine;
pub mod image;

pub use engine::{run_upload, CancelHandle, UploadEvent, UploadLogLevel, UploadState};
pub use image::FirmwareImage;
