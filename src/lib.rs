//! RAIN RFID UHF reader driver for modules speaking the F628 framed binary
//! protocol, with support for multiple transport backends.
//!
//! # Features
//!
//! - `uart-esp32` - UART transport for ESP32 using esp-idf-svc
//! - `serial` - Serial port transport for desktop using serialport crate
//!
//! # Example
//!
//! ```ignore
//! use rain_rfid::{spawn_session, ConfigChannel, RainReader, SerialSettings, SerialTransport};
//! use rain_rfid::{SessionEvent, SessionParameters};
//!
//! let transport = SerialTransport::new(SerialSettings::default());
//! let channel = ConfigChannel::new();
//! let session = spawn_session(RainReader::new(transport), channel.clone())?;
//!
//! channel.request_start(SessionParameters { enable_tag_report: true, ..Default::default() });
//! if let Ok(SessionEvent::Cycle(cycle)) = session.events().recv() {
//!     println!("Tag report: {:?}", cycle.tag_report);
//! }
//! session.stop()?;
//! ```

mod channel;
mod frame;
mod reader;
mod retry;
mod session;
mod transport;
mod types;

#[cfg(test)]
mod test_support;

#[cfg(feature = "uart-esp32")]
mod uart;

#[cfg(feature = "serial")]
mod serial;

// Re-exports
pub use channel::{ConfigChannel, StopSignal};
pub use frame::{Frame, Opcode, Payload, PayloadKind, decode_request, encode, encode_request};
pub use reader::{RainReader, Timing};
pub use retry::{LONG_WAIT_ATTEMPTS, WAKE_ATTEMPTS};
pub use session::{
    CycleResult, Session, SessionEvent, SessionHandle, SessionParameters, Step,
    TAG_REPORT_ATTEMPTS, spawn_session,
};
pub use transport::RainTransport;
pub use types::{
    AntennaEnables, EventMask, OperatingState, OperationalParamValue, OperationalParameter,
    RainError, ReplyReason, Result, Status, TagReport, TxPowerSet, Version,
};

#[cfg(feature = "uart-esp32")]
pub use uart::UartTransport;

#[cfg(feature = "serial")]
pub use serial::{SerialSettings, SerialTransport};
