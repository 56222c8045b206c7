//! Serial Bus Protocol
//!
//! Implements the Feetech STS/SCS half-duplex serial protocol used to talk to
//! bus servos.
//!
//! Request:  `FF FF <addr> <len> <instr> <params..> <checksum>`
//! Response: `FF FF <addr> <len> <status> <params..> <checksum>`

mod bus;
mod error;
pub mod instruction;
mod packet;
pub mod serial;
mod sync;
pub mod transport;

pub use bus::{Bus, BusCounters, SharedBus};
pub use error::{ProtocolError, ResponseField};
pub use instruction::Instruction;
pub use packet::{
    build_response, checksum, parse_response, read_frame_body, read_frame_head, read_response,
    verify_checksum, Packet, PacketBuilder, Response, StatusFlags,
};
pub use serial::{find_adapter, list_ports, open_port, PortInfo, SerialTransport};
pub use transport::{ByteTransport, MemoryTransport, TimedReader};

/// Two marker bytes that open every packet
pub const HEADER: [u8; 2] = [0xFF, 0xFF];

/// Reserved address that every servo on the bus listens to
pub const BROADCAST_ADDRESS: u8 = 0xFE;

/// Highest address a single servo can answer on
pub const MAX_DEVICE_ADDRESS: u8 = 0xFD;

/// Default baud rate of factory-fresh STS servos
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

/// Default response timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Default sleep between polls of an empty receive buffer, in microseconds
pub const DEFAULT_POLL_INTERVAL_US: u64 = 1000;

/// Largest parameter block that still fits the one-byte length field
pub const MAX_PARAMS: usize = 253;
