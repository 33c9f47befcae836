//! An async client implementation of the [Modbus](http://modbus.org/) protocol
//! using [Tokio](https://docs.rs/tokio) and Rust's `async/await` syntax.
//!
//! # Features
//!
//! * Explicit connection management: `connect`, `disconnect` and an observable connection state
//! * Many requests in flight over TCP, correlated by MBAP transaction id
//! * Per-request response timeout and retransmission policy
//! * Panic-free parsing of arbitrary input
//! * Protocol decoding at the PDU, frame and physical layers via `tracing`
//!
//! # Supported modes
//!
//! * TCP client (MBAP framing)
//! * RTU client over a serial port (feature `serial`, enabled by default)
//!
//! # Supported functions
//!
//! * Read Coils
//! * Read Discrete Inputs
//! * Read Holding Registers
//! * Read Input Registers
//! * Write Single Coil
//! * Write Single Register
//! * Write Multiple Coils
//! * Write Multiple Registers
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use modbus_engine::client::*;
//! use modbus_engine::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut channel = spawn_tcp_client_task("127.0.0.1", 502, ChannelConfig::default(), None);
//!     channel.connect().await?;
//!
//!     let param = RequestParam::new(UnitId::new(1), Duration::from_secs(1)).with_retries(2);
//!     for x in channel
//!         .read_holding_registers(param, AddressRange::try_from(0, 5)?)
//!         .await?
//!     {
//!         println!("index: {} value: {}", x.index, x.value);
//!     }
//!
//!     channel.disconnect().await?;
//!     Ok(())
//! }
//! ```

// the RTU framing stays compiled without a serial port to drive it
#![cfg_attr(not(feature = "serial"), allow(dead_code))]

/// Client API
pub mod client;
/// Public constant values related to the Modbus specification
pub mod constants;
/// Request encoding and response decoding of protocol data units
pub mod pdu;

// internal modules
mod channel;
mod common;
mod decode;
mod error;
mod exception;
mod maybe_async;
mod serial;
mod tcp;
mod types;

pub use crate::common::function::FunctionCode;
pub use crate::decode::*;
pub use crate::error::*;
pub use crate::exception::*;
pub use crate::maybe_async::*;
#[cfg(feature = "serial")]
pub use crate::serial::{DataBits, FlowControl, Parity, SerialSettings, StopBits};
pub use crate::types::*;
