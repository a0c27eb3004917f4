//! BLE transport and connection session.
//!
//! The engine talks to the platform BLE stack only through the narrow
//! [`transport::BleTransport`] capability trait. `central` implements it on
//! top of `btleplug` for real hardware; `mock` implements it in memory for
//! tests.

pub mod central;
pub mod mock;
pub mod session;
pub mod transport;

pub use central::BtleplugTransport;
pub use mock::{MockHandle, MockTransport};
pub use session::{ConnectionSession, DeviceIdentity, SessionState};
pub use transport::{Advertisement, BleTransport, DeviceInfoItem};
