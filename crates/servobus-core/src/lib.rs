//! # ServoBus Core Library
//!
//! Host-side driver for Feetech STS/SCS smart servos on a half-duplex UART bus.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - Packet framing and checksum validation
//! - Timeout-bounded request/response transactions (ping, read, write, reg-write, action)
//! - Broadcast sync-write and sync-read across many servos
//! - Per-model register maps and value encoding
//! - A simulated servo bus for testing without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use servobus_core::prelude::*;
//!
//! let config = BusConfig::load(Path::new("bus.json"))?;
//! let mut bus = Bus::open(&config)?;
//!
//! bus.ping(1)?;
//! bus.move_to_position(1, 2048, 1000, 50)?;
//! let positions = bus.sync_read_positions(&[1, 2, 3])?;
//! ```

pub mod config;
pub mod encoder;
pub mod protocol;
pub mod registers;
pub mod servo;
pub mod sim;
pub mod values;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::{BaudRate, BusConfig, ConfigError};
    pub use crate::encoder::EncoderUnwrapper;
    pub use crate::protocol::{
        find_adapter, list_ports, Bus, ByteTransport, MemoryTransport, ProtocolError, Response,
        SerialTransport, SharedBus, StatusFlags, BROADCAST_ADDRESS,
    };
    pub use crate::registers::{Model, Register, RegisterMap};
    pub use crate::servo::{Mode, TorqueMode};
    pub use crate::sim::SimulatedBus;
    pub use crate::values::{PositionSample, ServoStatus};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
