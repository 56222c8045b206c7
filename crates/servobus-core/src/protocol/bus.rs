//! Transaction engine
//!
//! One [`Bus`] owns the transport and runs every exchange to completion
//! before the next one starts. Unicast requests go out as
//! clear input -> write packet -> read one response; broadcast ACTION is
//! written and never answered.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::packet::{read_response, Packet, PacketBuilder, Response};
use super::serial::{open_port, SerialTransport};
use super::{
    ByteTransport, Instruction, ProtocolError, TimedReader, BROADCAST_ADDRESS,
    DEFAULT_POLL_INTERVAL_US, DEFAULT_TIMEOUT_MS, MAX_DEVICE_ADDRESS,
};
use crate::config::BusConfig;
use crate::registers::{Model, Register, RegisterMap};
use crate::values::encode_u16_le;

/// Cumulative traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BusCounters {
    /// Bytes written to the transport
    pub tx_bytes: u64,
    /// Bytes of validated responses
    pub rx_bytes: u64,
    /// Packets written
    pub tx_packets: u64,
    /// Responses accepted
    pub rx_packets: u64,
}

/// Protocol engine bound to one half-duplex bus
pub struct Bus<T: ByteTransport> {
    /// Exclusively owned byte channel
    transport: T,
    /// Register table for the active model
    registers: RegisterMap,
    /// Budget for one complete response
    timeout: Duration,
    /// Sleep between polls of an empty input buffer
    poll_interval: Duration,
    /// Log every packet
    debug: bool,
    counters: BusCounters,
}

impl<T: ByteTransport> Bus<T> {
    /// Create an engine with default timing
    pub fn new(transport: T, model: Model) -> Self {
        Self {
            transport,
            registers: RegisterMap::for_model(model),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            poll_interval: Duration::from_micros(DEFAULT_POLL_INTERVAL_US),
            debug: false,
            counters: BusCounters::default(),
        }
    }

    /// Create an engine with timing, model and debug flag taken from `config`
    pub fn from_config(transport: T, config: &BusConfig) -> Self {
        let mut bus = Self::new(transport, config.model);
        bus.set_timeout(config.timeout());
        bus.set_poll_interval(config.poll_interval());
        bus.set_debug(config.debug);
        bus
    }

    /// Servo family the register table is built for
    pub fn model(&self) -> Model {
        self.registers.model()
    }

    /// Switch servo family; the register table is rebuilt immediately
    pub fn set_model(&mut self, model: Model) {
        if model != self.registers.model() {
            debug!(?model, "switching register map");
            self.registers = RegisterMap::for_model(model);
        }
    }

    /// Register table of the active model
    pub fn registers(&self) -> &RegisterMap {
        &self.registers
    }

    /// Protocol address of `register` on the active model
    pub fn register(&self, register: Register) -> Result<u8, ProtocolError> {
        self.registers.resolve(register)
    }

    /// Budget for one complete response
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the response budget for later transactions
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Sleep between polls of an empty input buffer
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Change the sleep between polls
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval;
    }

    /// Whether every packet is logged
    pub fn is_debug(&self) -> bool {
        self.debug
    }

    /// Enable packet-level logging
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Borrow the underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutably borrow the underlying transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give back the transport
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Cumulative tx/rx bytes and packets
    pub fn counters(&self) -> BusCounters {
        self.counters
    }

    /// Check that a device presence/liveness probe gets an answer
    pub fn ping(&mut self, address: u8) -> Result<Response, ProtocolError> {
        let packet = Packet::new(address, Instruction::Ping, Vec::new());
        self.transact(packet)
    }

    /// Read `length` bytes starting at register `register`
    pub fn read(&mut self, address: u8, register: u8, length: u8) -> Result<Response, ProtocolError> {
        let packet = PacketBuilder::new(address, Instruction::Read)
            .byte(register)
            .byte(length)
            .build();
        let response = self.transact(packet)?;
        if response.params.len() != length as usize {
            warn!(
                device = address,
                expected = length,
                got = response.params.len(),
                "read returned wrong number of bytes"
            );
            return Err(ProtocolError::ResponseLength {
                expected: length as usize,
                got: response.params.len(),
            });
        }
        Ok(response)
    }

    /// Read a one-byte register
    pub fn read_u8(&mut self, address: u8, register: u8) -> Result<u8, ProtocolError> {
        let response = self.read(address, register, 1)?;
        Ok(response.params[0])
    }

    /// Read a little-endian two-byte register
    pub fn read_u16(&mut self, address: u8, register: u8) -> Result<u16, ProtocolError> {
        let response = self.read(address, register, 2)?;
        Ok(u16::from_le_bytes([response.params[0], response.params[1]]))
    }

    /// Write `data` starting at `register`, applied immediately
    pub fn write(&mut self, address: u8, register: u8, data: &[u8]) -> Result<Response, ProtocolError> {
        let packet = PacketBuilder::new(address, Instruction::Write)
            .byte(register)
            .bytes(data)
            .build();
        self.transact(packet)
    }

    /// Write a one-byte register
    pub fn write_u8(&mut self, address: u8, register: u8, value: u8) -> Result<Response, ProtocolError> {
        self.write(address, register, &[value])
    }

    /// Write a little-endian two-byte register
    pub fn write_u16(&mut self, address: u8, register: u8, value: u16) -> Result<Response, ProtocolError> {
        let (low, high) = encode_u16_le(value);
        self.write(address, register, &[low, high])
    }

    /// Stage a write that the device applies on the next [`Bus::action`]
    pub fn reg_write(&mut self, address: u8, register: u8, data: &[u8]) -> Result<Response, ProtocolError> {
        let packet = PacketBuilder::new(address, Instruction::RegWrite)
            .byte(register)
            .bytes(data)
            .build();
        self.transact(packet)
    }

    /// Tell every device to apply its staged writes; nobody answers
    pub fn action(&mut self) -> Result<(), ProtocolError> {
        let packet = Packet::new(BROADCAST_ADDRESS, Instruction::Action, Vec::new());
        self.transmit(&packet)
    }

    /// Run one unicast exchange
    fn transact(&mut self, packet: Packet) -> Result<Response, ProtocolError> {
        check_unicast(packet.address)?;
        packet.validate_size()?;

        // A late reply to an earlier timed-out request must not be taken
        // for this one
        self.transport.clear_input()?;
        self.transmit(&packet)?;

        let expected = packet.address;
        self.receive_frame(|reader| read_response(reader, expected))
    }

    /// Write one packet to the bus
    pub(super) fn transmit(&mut self, packet: &Packet) -> Result<(), ProtocolError> {
        packet.validate_size()?;
        let bytes = packet.to_bytes();
        if self.debug {
            debug!(
                device = packet.address,
                instruction = ?packet.instruction,
                "tx {:02X?}",
                bytes
            );
        }

        self.transport.write_all(&bytes)?;
        self.counters.tx_bytes = self.counters.tx_bytes.saturating_add(bytes.len() as u64);
        self.counters.tx_packets = self.counters.tx_packets.saturating_add(1);
        Ok(())
    }

    /// Read one response with a fresh timeout budget
    pub(super) fn receive_frame<F>(&mut self, read: F) -> Result<Response, ProtocolError>
    where
        F: FnOnce(&mut TimedReader<'_, T>) -> Result<Response, ProtocolError>,
    {
        let mut reader = TimedReader::new(&mut self.transport, self.timeout, self.poll_interval);
        let result = read(&mut reader);
        let consumed = reader.consumed() as u64;
        let elapsed = reader.elapsed();
        self.counters.rx_bytes = self.counters.rx_bytes.saturating_add(consumed);

        match &result {
            Ok(response) => {
                self.counters.rx_packets = self.counters.rx_packets.saturating_add(1);
                if self.debug {
                    debug!(
                        device = response.address,
                        status = response.status,
                        elapsed_us = elapsed.as_micros() as u64,
                        "rx {:02X?}",
                        response.params
                    );
                }
            }
            Err(e) => {
                warn!(code = e.code(), consumed, "response failed: {}", e);
            }
        }
        result
    }
}

impl Bus<SerialTransport> {
    /// Open the serial port named in `config`
    pub fn open(config: &BusConfig) -> Result<Self, ProtocolError> {
        let name = config
            .port
            .as_deref()
            .ok_or_else(|| ProtocolError::SerialError("no serial port configured".to_string()))?;
        let transport = open_port(name, Some(config.baud_rate))?;
        Ok(Self::from_config(transport, config))
    }
}

/// Reject addresses no single device can answer on
pub(super) fn check_unicast(address: u8) -> Result<(), ProtocolError> {
    if address > MAX_DEVICE_ADDRESS {
        return Err(ProtocolError::range(
            "device address",
            address as i64,
            0,
            MAX_DEVICE_ADDRESS as i64,
        ));
    }
    Ok(())
}

/// Cloneable handle serializing access to one [`Bus`] across threads
///
/// The lock is held for the whole request/response exchange run inside
/// [`SharedBus::with`].
pub struct SharedBus<T: ByteTransport> {
    inner: Arc<Mutex<Bus<T>>>,
}

impl<T: ByteTransport> Clone for SharedBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ByteTransport> SharedBus<T> {
    /// Wrap an engine for use from several threads
    pub fn new(bus: Bus<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bus)),
        }
    }

    /// Run `f` with exclusive access to the bus
    pub fn with<R, F>(&self, f: F) -> Result<R, ProtocolError>
    where
        F: FnOnce(&mut Bus<T>) -> Result<R, ProtocolError>,
    {
        let mut bus = self.inner.lock().map_err(|_| ProtocolError::BusPoisoned)?;
        f(&mut bus)
    }
}
