//! Packet encoding/decoding
//!
//! Instruction packet (host -> servo):
//! - 2 bytes: header `FF FF`
//! - 1 byte: device address
//! - 1 byte: length = params + 2 (instruction + checksum)
//! - 1 byte: instruction
//! - N bytes: parameters
//! - 1 byte: checksum = `255 - (sum(address..last param) mod 256)`
//!
//! Response packet (servo -> host) has the same shape with a status byte in
//! place of the instruction.

use std::time::Duration;

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use super::{
    ByteTransport, Instruction, ProtocolError, ResponseField, TimedReader,
    DEFAULT_POLL_INTERVAL_US, HEADER, MAX_PARAMS,
};

/// Compute the protocol checksum of everything after the header
pub fn checksum(bytes: &[u8]) -> u8 {
    checksum_of(bytes)
}

fn checksum_of<'a>(bytes: impl IntoIterator<Item = &'a u8>) -> u8 {
    let sum = bytes.into_iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    255 - sum
}

/// Check `expected` against the checksum of `bytes`
pub fn verify_checksum(bytes: &[u8], expected: u8) -> bool {
    checksum(bytes) == expected
}

/// An instruction packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Target device (or the broadcast address)
    pub address: u8,
    /// Instruction opcode
    pub instruction: Instruction,
    /// Instruction parameters
    pub params: Vec<u8>,
}

impl Packet {
    /// Create a new packet
    pub fn new(address: u8, instruction: Instruction, params: Vec<u8>) -> Self {
        Self {
            address,
            instruction,
            params,
        }
    }

    /// Value of the length field
    pub fn length(&self) -> u8 {
        (self.params.len() + 2) as u8
    }

    /// Checksum over address, length, instruction and parameters
    pub fn checksum(&self) -> u8 {
        let head = [self.address, self.length(), self.instruction.code()];
        checksum_of(head.iter().chain(&self.params))
    }

    /// Encode the packet to raw bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.encoded_size());
        bytes.extend_from_slice(&HEADER);
        bytes.push(self.address);
        bytes.push(self.length());
        bytes.push(self.instruction.code());
        bytes.extend_from_slice(&self.params);
        bytes.push(checksum(&bytes[2..]));
        bytes
    }

    /// Get the total encoded size
    pub fn encoded_size(&self) -> usize {
        6 + self.params.len()
    }

    /// Check the parameter block fits the length byte
    pub fn validate_size(&self) -> Result<(), ProtocolError> {
        if self.params.len() > MAX_PARAMS {
            return Err(ProtocolError::PacketTooLarge {
                len: self.params.len(),
            });
        }
        Ok(())
    }

    /// Decode a complete instruction packet from raw bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() < 6 {
            return Err(ProtocolError::MalformedPacket);
        }
        if data[..2] != HEADER {
            return Err(ProtocolError::HeaderMismatch {
                first: data[0],
                second: data[1],
            });
        }

        let length = data[3] as usize;
        if length < 2 || data.len() != 4 + length {
            return Err(ProtocolError::MalformedPacket);
        }

        let last = data.len() - 1;
        let expected = checksum(&data[2..last]);
        if expected != data[last] {
            return Err(ProtocolError::ChecksumError {
                expected,
                got: data[last],
            });
        }

        let instruction = Instruction::from_code(data[4]).ok_or(ProtocolError::MalformedPacket)?;
        Ok(Self {
            address: data[2],
            instruction,
            params: data[5..last].to_vec(),
        })
    }
}

/// Builder for constructing instruction packets
pub struct PacketBuilder {
    address: u8,
    instruction: Instruction,
    params: Vec<u8>,
}

impl PacketBuilder {
    /// Start a packet for `address`
    pub fn new(address: u8, instruction: Instruction) -> Self {
        Self {
            address,
            instruction,
            params: Vec::new(),
        }
    }

    /// Add a single byte
    pub fn byte(mut self, b: u8) -> Self {
        self.params.push(b);
        self
    }

    /// Add a 16-bit value (little-endian)
    pub fn u16_le(mut self, value: u16) -> Self {
        let mut bytes = [0u8; 2];
        LittleEndian::write_u16(&mut bytes, value);
        self.params.extend_from_slice(&bytes);
        self
    }

    /// Add raw bytes
    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.params.extend_from_slice(data);
        self
    }

    /// Build the packet
    pub fn build(self) -> Packet {
        Packet::new(self.address, self.instruction, self.params)
    }
}

/// Error bits reported in a response status byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusFlags(pub u8);

impl StatusFlags {
    /// Input voltage out of range
    pub const VOLTAGE: u8 = 1 << 0;
    /// Angle sensor fault
    pub const ANGLE: u8 = 1 << 1;
    /// Temperature limit exceeded
    pub const OVERHEAT: u8 = 1 << 2;
    /// Current limit exceeded
    pub const OVERCURRENT: u8 = 1 << 3;
    /// Load limit exceeded
    pub const OVERLOAD: u8 = 1 << 5;

    /// No error bit set
    pub fn is_ok(&self) -> bool {
        self.0 == 0
    }

    /// Voltage bit set
    pub fn voltage(&self) -> bool {
        self.0 & Self::VOLTAGE != 0
    }

    /// Angle bit set
    pub fn angle(&self) -> bool {
        self.0 & Self::ANGLE != 0
    }

    /// Overheat bit set
    pub fn overheat(&self) -> bool {
        self.0 & Self::OVERHEAT != 0
    }

    /// Overcurrent bit set
    pub fn overcurrent(&self) -> bool {
        self.0 & Self::OVERCURRENT != 0
    }

    /// Overload bit set
    pub fn overload(&self) -> bool {
        self.0 & Self::OVERLOAD != 0
    }
}

/// A validated response packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Response {
    /// Address of the answering servo
    pub address: u8,
    /// Status / error byte
    pub status: u8,
    /// Response parameters
    pub params: Vec<u8>,
}

impl Response {
    /// Decode the status byte
    pub fn flags(&self) -> StatusFlags {
        StatusFlags(self.status)
    }
}

/// Encode a response packet the way a servo would send it
pub fn build_response(address: u8, status: u8, params: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(6 + params.len());
    bytes.extend_from_slice(&HEADER);
    bytes.push(address);
    bytes.push((params.len() + 2) as u8);
    bytes.push(status);
    bytes.extend_from_slice(params);
    bytes.push(checksum(&bytes[2..]));
    bytes
}

/// Read the header and address byte of a response
///
/// Returns the address found on the wire; nothing beyond it is consumed.
pub fn read_frame_head<T: ByteTransport + ?Sized>(
    reader: &mut TimedReader<'_, T>,
) -> Result<u8, ProtocolError> {
    let first = reader.next_byte(ResponseField::HeaderFirst)?;
    let second = reader.next_byte(ResponseField::HeaderSecond)?;
    if [first, second] != HEADER {
        return Err(ProtocolError::HeaderMismatch { first, second });
    }
    reader.next_byte(ResponseField::Address)
}

/// Read length, status, parameters and checksum of a response from `address`
pub fn read_frame_body<T: ByteTransport + ?Sized>(
    reader: &mut TimedReader<'_, T>,
    address: u8,
) -> Result<Response, ProtocolError> {
    let length = reader.next_byte(ResponseField::Length)?;
    // Length covers at least the status byte and the checksum
    if length < 2 {
        return Err(ProtocolError::MalformedPacket);
    }
    let status = reader.next_byte(ResponseField::Status)?;

    let param_count = (length - 2) as usize;
    let mut params = Vec::with_capacity(param_count);
    for i in 0..param_count {
        params.push(reader.next_byte(ResponseField::Param(i))?);
    }

    let got = reader.next_byte(ResponseField::Checksum)?;
    let expected = checksum_of([address, length, status].iter().chain(&params));
    if expected != got {
        return Err(ProtocolError::ChecksumError { expected, got });
    }

    Ok(Response {
        address,
        status,
        params,
    })
}

/// Read one complete response that must come from `expected`
///
/// On an address mismatch the bytes following the address are left unread.
pub fn read_response<T: ByteTransport + ?Sized>(
    reader: &mut TimedReader<'_, T>,
    expected: u8,
) -> Result<Response, ProtocolError> {
    let got = read_frame_head(reader)?;
    if got != expected {
        return Err(ProtocolError::AddressMismatch { expected, got });
    }
    read_frame_body(reader, got)
}

/// Parse one response from `transport` within `timeout`
pub fn parse_response<T: ByteTransport + ?Sized>(
    expected: u8,
    transport: &mut T,
    timeout: Duration,
) -> Result<Response, ProtocolError> {
    let mut reader = TimedReader::new(
        transport,
        timeout,
        Duration::from_micros(DEFAULT_POLL_INTERVAL_US),
    );
    read_response(&mut reader, expected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MemoryTransport;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_ping_packet_bytes() {
        let packet = Packet::new(1, Instruction::Ping, vec![]);
        // 255 - (1 + 2 + 1) = 0xFB
        assert_eq!(packet.to_bytes(), vec![0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]);
    }

    #[test]
    fn test_action_packet_bytes() {
        let packet = Packet::new(0xFE, Instruction::Action, vec![]);
        assert_eq!(packet.to_bytes(), vec![0xFF, 0xFF, 0xFE, 0x02, 0x05, 0xFA]);
    }

    #[test]
    fn test_read_packet_bytes() {
        let packet = PacketBuilder::new(3, Instruction::Read)
            .byte(0x38)
            .byte(6)
            .build();
        let bytes = packet.to_bytes();
        assert_eq!(bytes[3], 4);
        assert_eq!(bytes.len(), packet.encoded_size());
        assert_eq!(*bytes.last().unwrap(), packet.checksum());
        assert!(verify_checksum(&bytes[2..bytes.len() - 1], packet.checksum()));
    }

    #[test]
    fn test_builder_u16_is_little_endian() {
        let packet = PacketBuilder::new(1, Instruction::Write)
            .byte(0x2A)
            .u16_le(0x0800)
            .build();
        assert_eq!(packet.params, vec![0x2A, 0x00, 0x08]);
    }

    #[test]
    fn test_checksum_roundtrip() {
        let samples: [&[u8]; 4] = [
            &[1, 2, 3],
            &[0xFE, 0x09, 0x83, 0x2A, 0x02, 0x01, 0x00, 0x08],
            &[0xFF; 40],
            &[0, 0, 0],
        ];
        for s in samples {
            assert!(verify_checksum(s, checksum(s)));
        }
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let original = Packet::new(7, Instruction::Write, vec![0x2A, 0x00, 0x08]);
        let decoded = Packet::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_from_bytes_rejects_corruption() {
        let mut bytes = Packet::new(7, Instruction::Ping, vec![]).to_bytes();
        bytes[2] ^= 0x01;
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(ProtocolError::ChecksumError { .. })
        ));
    }

    #[test]
    fn test_response_roundtrip() {
        let mut transport = MemoryTransport::new();
        transport.push_inbound(&build_response(3, 0x20, &[1, 2, 3]));
        let response = parse_response(3, &mut transport, Duration::ZERO).unwrap();
        assert_eq!(response.status, 0x20);
        assert_eq!(response.params, vec![1, 2, 3]);
        assert!(response.flags().overload());
    }

    #[test]
    fn test_header_mismatch() {
        let mut transport = MemoryTransport::new();
        transport.push_inbound(&[0xFF, 0x00, 0x03, 0x02, 0x00, 0xFA]);
        let err = parse_response(3, &mut transport, Duration::ZERO).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::HeaderMismatch {
                first: 0xFF,
                second: 0x00
            }
        ));
    }

    #[test]
    fn test_short_length_byte_rejected() {
        for length in [0u8, 1] {
            let mut transport = MemoryTransport::new();
            transport.push_inbound(&[0xFF, 0xFF, 0x01, length, 0x00, 0xFE]);
            let err = parse_response(1, &mut transport, Duration::ZERO).unwrap_err();
            assert!(matches!(err, ProtocolError::MalformedPacket));
        }
    }

    #[test]
    fn test_timeout_tags_field() {
        let mut transport = MemoryTransport::new();
        let mut partial = build_response(5, 0, &[1, 2]);
        partial.truncate(6); // header, id, len, status, first param
        transport.push_inbound(&partial);

        let err = parse_response(5, &mut transport, Duration::from_millis(2)).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Timeout {
                during: ResponseField::Param(1)
            }
        ));
    }

    #[test]
    fn test_status_flags() {
        let flags = StatusFlags(StatusFlags::VOLTAGE | StatusFlags::OVERHEAT);
        assert!(!flags.is_ok());
        assert!(flags.voltage());
        assert!(flags.overheat());
        assert!(!flags.angle());
        assert!(StatusFlags::default().is_ok());
    }
}
