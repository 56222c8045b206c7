//! Typed servo operations
//!
//! Built on the raw [`Bus`] calls: registers are looked up in the active
//! model's map and every value is checked before the first byte is sent.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::BaudRate;
use crate::protocol::{Bus, ByteTransport, ProtocolError, Response, BROADCAST_ADDRESS};
use crate::registers::Register;
use crate::values::{
    check_position, decode_correction, decode_u16_le, encode_correction, encode_u16_le,
    PositionSample, ServoStatus,
};

/// Largest acceleration the servo accepts
pub const MAX_ACCELERATION: u8 = 254;

/// Operating mode stored in the MODE register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Closed-loop position control
    Position,
    /// Continuous rotation at a set speed
    Wheel,
    /// Open-loop duty cycle
    Pwm,
    /// Multi-turn stepping
    Step,
}

impl Mode {
    /// Value stored in the mode register
    pub fn code(&self) -> u8 {
        match self {
            Mode::Position => 0,
            Mode::Wheel => 1,
            Mode::Pwm => 2,
            Mode::Step => 3,
        }
    }

    /// Decode a mode register value
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Mode::Position),
            1 => Some(Mode::Wheel),
            2 => Some(Mode::Pwm),
            3 => Some(Mode::Step),
            _ => None,
        }
    }
}

/// Torque output state stored in the TORQUE_SWITCH register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TorqueMode {
    /// Output stage off, shaft turns freely
    Free,
    /// Holding torque
    Enable,
    /// Passive braking
    Damped,
}

impl TorqueMode {
    /// Value stored in the torque switch register
    pub fn code(&self) -> u8 {
        match self {
            TorqueMode::Free => 0,
            TorqueMode::Enable => 1,
            TorqueMode::Damped => 2,
        }
    }
}

/// Seven-byte record written at ACC: acceleration, position, time (unused), speed
fn move_record(position: u16, speed: u16, acceleration: u8) -> [u8; 7] {
    let (pos_lo, pos_hi) = encode_u16_le(position);
    let (spd_lo, spd_hi) = encode_u16_le(speed);
    [acceleration, pos_lo, pos_hi, 0, 0, spd_lo, spd_hi]
}

fn check_acceleration(acceleration: u8) -> Result<u8, ProtocolError> {
    if acceleration > MAX_ACCELERATION {
        return Err(ProtocolError::RangeError {
            what: "acceleration",
            value: acceleration as i64,
            min: 0,
            max: MAX_ACCELERATION as i64,
        });
    }
    Ok(acceleration)
}

impl<T: ByteTransport> Bus<T> {
    /// Move one servo to `position` with the given speed and acceleration
    pub fn move_to_position(
        &mut self,
        address: u8,
        position: u16,
        speed: u16,
        acceleration: u8,
    ) -> Result<Response, ProtocolError> {
        let record = move_record(check_position(position)?, speed, check_acceleration(acceleration)?);
        let register = self.register(Register::Acceleration)?;
        self.write(address, register, &record)
    }

    /// Move several servos at once with a shared speed and acceleration
    pub fn sync_move_to_position(
        &mut self,
        addresses: &[u8],
        positions: &[u16],
        speed: u16,
        acceleration: u8,
    ) -> Result<(), ProtocolError> {
        if addresses.len() != positions.len() {
            return Err(ProtocolError::ArityMismatch(format!(
                "{} devices but {} positions",
                addresses.len(),
                positions.len()
            )));
        }
        let acceleration = check_acceleration(acceleration)?;
        let records = positions
            .iter()
            .map(|&p| check_position(p).map(|p| move_record(p, speed, acceleration)))
            .collect::<Result<Vec<_>, _>>()?;

        let register = self.register(Register::Acceleration)?;
        self.sync_write(addresses, register, &records)
    }

    /// Set the acceleration of several servos, one value per servo
    pub fn sync_set_acceleration(
        &mut self,
        addresses: &[u8],
        accelerations: &[u8],
    ) -> Result<(), ProtocolError> {
        let records = accelerations
            .iter()
            .map(|&a| check_acceleration(a).map(|a| [a]))
            .collect::<Result<Vec<_>, _>>()?;

        let register = self.register(Register::Acceleration)?;
        self.sync_write(addresses, register, &records)
    }

    /// Read the acceleration of several servos in one exchange
    ///
    /// Servos that did not answer are missing from the map.
    pub fn sync_read_acceleration(
        &mut self,
        addresses: &[u8],
    ) -> Result<BTreeMap<u8, u8>, ProtocolError> {
        let register = self.register(Register::Acceleration)?;
        let raw = self.sync_read(addresses, register, 1)?;
        Ok(raw
            .into_iter()
            .map(|(address, bytes)| (address, bytes[0]))
            .collect())
    }

    /// Read position, velocity and load
    pub fn read_position(&mut self, address: u8) -> Result<PositionSample, ProtocolError> {
        let register = self.register(Register::PresentPosition)?;
        let response = self.read(address, register, PositionSample::SIZE as u8)?;
        PositionSample::from_bytes(&response.params)
    }

    /// Read position, velocity and load from several servos in one exchange
    ///
    /// Servos that did not answer are missing from the map.
    pub fn sync_read_positions(
        &mut self,
        addresses: &[u8],
    ) -> Result<BTreeMap<u8, PositionSample>, ProtocolError> {
        let register = self.register(Register::PresentPosition)?;
        let raw = self.sync_read(addresses, register, PositionSample::SIZE as u8)?;

        let mut samples = BTreeMap::new();
        for (address, bytes) in raw {
            match PositionSample::from_bytes(&bytes) {
                Ok(sample) => {
                    samples.insert(address, sample);
                }
                Err(e) => warn!(device = address, "dropping position sample: {}", e),
            }
        }
        Ok(samples)
    }

    /// Read a full status snapshot
    pub fn read_status(&mut self, address: u8) -> Result<ServoStatus, ProtocolError> {
        let sample = self.read_position(address)?;
        let voltage = self.read_u8(address, self.register(Register::PresentVoltage)?)?;
        let temperature = self.read_u8(address, self.register(Register::PresentTemperature)?)?;
        let current = self.read_u16(address, self.register(Register::PresentCurrent)?)?;
        let moving = self.read_u8(address, self.register(Register::Moving)?)?;

        Ok(ServoStatus {
            position: sample.position,
            velocity: sample.velocity,
            load: sample.load,
            voltage,
            temperature,
            current,
            moving: moving != 0,
        })
    }

    /// Select the operating mode
    pub fn set_mode(&mut self, address: u8, mode: Mode) -> Result<Response, ProtocolError> {
        let register = self.register(Register::Mode)?;
        self.write_u8(address, register, mode.code())
    }

    /// Read the operating mode back
    pub fn get_mode(&mut self, address: u8) -> Result<Mode, ProtocolError> {
        let register = self.register(Register::Mode)?;
        let code = self.read_u8(address, register)?;
        Mode::from_code(code).ok_or_else(|| ProtocolError::range("mode", code as i64, 0, 3))
    }

    /// Switch torque output
    pub fn set_torque_mode(&mut self, address: u8, mode: TorqueMode) -> Result<Response, ProtocolError> {
        let register = self.register(Register::TorqueSwitch)?;
        self.write_u8(address, register, mode.code())
    }

    /// Give a servo a new bus address
    ///
    /// The EPROM is unlocked on the old address and locked again on the new
    /// one, since the servo answers there as soon as the ID is written.
    pub fn change_id(&mut self, old: u8, new: u8) -> Result<(), ProtocolError> {
        if new >= BROADCAST_ADDRESS {
            return Err(ProtocolError::range(
                "new device address",
                new as i64,
                0,
                (BROADCAST_ADDRESS - 1) as i64,
            ));
        }
        let lock = self.register(Register::EpromLock)?;
        let id = self.register(Register::Id)?;

        self.write_u8(old, lock, 0)?;
        self.write_u8(old, id, new)?;
        self.write_u8(new, lock, 1)?;
        debug!(old, new, "servo address changed");
        Ok(())
    }

    /// Set the zero-position correction, persisting it to EPROM when `save` is set
    pub fn set_position_correction(
        &mut self,
        address: u8,
        correction: i16,
        save: bool,
    ) -> Result<Response, ProtocolError> {
        let register = self.register(Register::StepCorrection)?;
        let raw = encode_correction(correction)?;

        if save {
            self.with_eprom_unlocked(address, |bus| bus.write_u16(address, register, raw))
        } else {
            self.write_u16(address, register, raw)
        }
    }

    /// Read the zero-position correction back as a signed step count
    pub fn get_position_correction(&mut self, address: u8) -> Result<i16, ProtocolError> {
        let register = self.register(Register::StepCorrection)?;
        let response = self.read(address, register, 2)?;
        decode_correction(decode_u16_le(response.params[0], response.params[1]))
    }

    /// Store a new line speed; the servo switches once the write is acknowledged
    pub fn set_baud_rate(&mut self, address: u8, baud: BaudRate) -> Result<Response, ProtocolError> {
        let register = self.register(Register::BaudRate)?;
        self.with_eprom_unlocked(address, |bus| bus.write_u8(address, register, baud.code()))
    }

    /// Run `f` between an EPROM unlock and lock on `address`
    ///
    /// The lock is written back even if `f` fails; the first error wins.
    fn with_eprom_unlocked<R, F>(&mut self, address: u8, f: F) -> Result<R, ProtocolError>
    where
        F: FnOnce(&mut Self) -> Result<R, ProtocolError>,
    {
        let lock = self.register(Register::EpromLock)?;
        self.write_u8(address, lock, 0)?;
        let result = f(self);
        let relock = self.write_u8(address, lock, 1);
        match (result, relock) {
            (Ok(value), Ok(_)) => Ok(value),
            (Err(e), _) | (Ok(_), Err(e)) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_response, MemoryTransport, Packet};
    use crate::registers::Model;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn bus(replies: usize, address: u8) -> Bus<MemoryTransport> {
        let mut transport = MemoryTransport::new();
        for _ in 0..replies {
            transport.queue_reply(build_response(address, 0, &[]));
        }
        let mut bus = Bus::new(transport, Model::Sts);
        bus.set_timeout(Duration::from_millis(20));
        bus
    }

    fn sent_packets(bus: &Bus<MemoryTransport>) -> Vec<Packet> {
        let mut packets = Vec::new();
        let mut rest = bus.transport().written();
        while rest.len() >= 4 {
            let size = 4 + rest[3] as usize;
            packets.push(Packet::from_bytes(&rest[..size]).unwrap());
            rest = &rest[size..];
        }
        packets
    }

    #[test]
    fn test_move_record() {
        let mut bus = bus(1, 1);
        bus.move_to_position(1, 2048, 1000, 50).unwrap();
        let packets = sent_packets(&bus);
        assert_eq!(packets[0].params, vec![0x29, 50, 0x00, 0x08, 0, 0, 0xE8, 0x03]);
    }

    #[test]
    fn test_move_rejects_out_of_range() {
        let mut bus = bus(0, 1);
        assert!(bus.move_to_position(1, 4096, 0, 0).is_err());
        assert!(bus.move_to_position(1, 100, 0, 255).is_err());
        assert!(bus.transport().written().is_empty());
    }

    #[test]
    fn test_sync_move_checks_every_position() {
        let mut bus = bus(0, 1);
        let err = bus
            .sync_move_to_position(&[1, 2], &[100, 5000], 500, 10)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::RangeError { value: 5000, .. }));
        assert!(bus.transport().written().is_empty());

        let err = bus.sync_move_to_position(&[1, 2], &[100], 500, 10).unwrap_err();
        assert!(matches!(err, ProtocolError::ArityMismatch(_)));
    }

    #[test]
    fn test_change_id_brackets_eprom() {
        let mut transport = MemoryTransport::new();
        transport.queue_reply(build_response(1, 0, &[]));
        transport.queue_reply(build_response(1, 0, &[]));
        transport.queue_reply(build_response(9, 0, &[]));
        let mut bus = Bus::new(transport, Model::Sts);
        bus.set_timeout(Duration::from_millis(20));

        bus.change_id(1, 9).unwrap();
        let packets = sent_packets(&bus);
        assert_eq!(packets.len(), 3);
        assert_eq!((packets[0].address, packets[0].params.clone()), (1, vec![0x37, 0]));
        assert_eq!((packets[1].address, packets[1].params.clone()), (1, vec![0x05, 9]));
        assert_eq!((packets[2].address, packets[2].params.clone()), (9, vec![0x37, 1]));
    }

    #[test]
    fn test_change_id_rejects_broadcast() {
        let mut bus = bus(0, 1);
        assert!(bus.change_id(1, BROADCAST_ADDRESS).unwrap_err().is_validation());
        assert_eq!(bus.transport().write_count(), 0);
    }

    #[test]
    fn test_correction_saved() {
        let mut bus = bus(3, 2);
        bus.set_position_correction(2, -1500, true).unwrap();
        let packets = sent_packets(&bus);
        let raw = 0x800u16 + 1500;
        assert_eq!(packets[0].params, vec![0x37, 0]);
        assert_eq!(packets[1].params, vec![0x1F, (raw & 0xFF) as u8, (raw >> 8) as u8]);
        assert_eq!(packets[2].params, vec![0x37, 1]);
    }

    #[test]
    fn test_correction_relocks_after_failure() {
        let mut transport = MemoryTransport::new();
        transport.queue_reply(build_response(2, 0, &[]));
        transport.queue_reply(Vec::new());
        transport.queue_reply(build_response(2, 0, &[]));
        let mut bus = Bus::new(transport, Model::Sts);
        bus.set_timeout(Duration::from_millis(10));

        let err = bus.set_position_correction(2, 10, true).unwrap_err();
        assert!(err.is_timeout());
        let packets = sent_packets(&bus);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[2].params, vec![0x37, 1]);
    }

    #[test]
    fn test_scs_rejects_sts_only_operations() {
        let mut bus = bus(0, 1);
        bus.set_model(Model::Scs);
        assert!(matches!(
            bus.set_mode(1, Mode::Wheel),
            Err(ProtocolError::UnsupportedOnModel { .. })
        ));
        assert!(matches!(
            bus.set_position_correction(1, 5, false),
            Err(ProtocolError::UnsupportedOnModel { .. })
        ));
        assert!(bus.transport().written().is_empty());
    }

    #[test]
    fn test_get_mode() {
        let mut transport = MemoryTransport::new();
        transport.queue_reply(build_response(1, 0, &[1]));
        transport.queue_reply(build_response(1, 0, &[9]));
        let mut bus = Bus::new(transport, Model::Sts);
        bus.set_timeout(Duration::from_millis(20));

        assert_eq!(bus.get_mode(1).unwrap(), Mode::Wheel);
        assert!(matches!(bus.get_mode(1), Err(ProtocolError::RangeError { value: 9, .. })));
    }

    #[test]
    fn test_baud_rate_write() {
        let mut bus = bus(3, 1);
        bus.set_baud_rate(1, BaudRate::B115200).unwrap();
        let packets = sent_packets(&bus);
        assert_eq!(packets[1].params, vec![0x06, 4]);
    }
}
