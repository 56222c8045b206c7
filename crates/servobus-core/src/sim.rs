//! Simulated servo bus
//!
//! A [`ByteTransport`] that behaves like a chain of servos on the wire.
//! Instruction packets written to it are decoded and answered with status
//! packets, so the whole engine can run without hardware.

use std::collections::{BTreeMap, VecDeque};

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;
use tracing::trace;

use crate::protocol::{
    build_response, ByteTransport, Instruction, Packet, ProtocolError, BROADCAST_ADDRESS, HEADER,
};
use crate::registers::{Model, Register, RegisterMap};
use crate::values::{decode_u16_le, encode_u16_le, MAX_POSITION};

/// Model number reported by simulated servos
pub const SIM_MODEL_NUMBER: u16 = 0x0309;

const MEMORY_SIZE: usize = 256;

/// One simulated servo
#[derive(Debug, Clone)]
struct SimServo {
    /// Control table
    memory: [u8; MEMORY_SIZE],
    /// Write waiting for ACTION
    staged: Option<(u8, Vec<u8>)>,
    /// Answers requests
    responsive: bool,
    /// Status byte sent with every reply
    status: u8,
}

/// Sensor noise applied to reads of the present position and voltage
#[derive(Debug)]
struct Jitter {
    rng: StdRng,
    amplitude: i32,
}

/// In-memory bus populated with simulated servos
#[derive(Debug)]
pub struct SimulatedBus {
    registers: RegisterMap,
    servos: BTreeMap<u8, SimServo>,
    /// Bytes written by the host that do not yet form a full packet
    pending: Vec<u8>,
    /// Replies waiting to be read by the host
    outbound: VecDeque<u8>,
    jitter: Option<Jitter>,
}

impl SimulatedBus {
    /// Create an empty bus for servos of `model`
    pub fn new(model: Model) -> Self {
        Self {
            registers: RegisterMap::for_model(model),
            servos: BTreeMap::new(),
            pending: Vec::new(),
            outbound: VecDeque::new(),
            jitter: None,
        }
    }

    /// Create a bus with one servo per address
    pub fn with_servos(model: Model, addresses: &[u8]) -> Self {
        let mut bus = Self::new(model);
        for &address in addresses {
            bus.add_servo(address);
        }
        bus
    }

    /// Add noise of up to `amplitude` steps to position reads, reproducible from `seed`
    pub fn with_jitter(mut self, seed: u64, amplitude: u16) -> Self {
        self.jitter = Some(Jitter {
            rng: StdRng::seed_from_u64(seed),
            amplitude: amplitude as i32,
        });
        self
    }

    /// Attach a servo with factory defaults at `address`
    pub fn add_servo(&mut self, address: u8) {
        let mut memory = [0u8; MEMORY_SIZE];
        let registers = &self.registers;
        let mut set = |register: Register, value: u16| {
            if let Some(at) = registers.get(register) {
                let (low, high) = encode_u16_le(value);
                memory[at as usize] = low;
                if register.size() == 2 {
                    memory[at as usize + 1] = high;
                }
            }
        };

        set(Register::ModelNumber, SIM_MODEL_NUMBER);
        set(Register::Id, address as u16);
        set(Register::EpromLock, 1);
        set(Register::TorqueSwitch, 1);
        set(Register::GoalPosition, 2048);
        set(Register::PresentPosition, 2048);
        set(Register::PresentVoltage, 120);
        set(Register::PresentTemperature, 30);

        self.servos.insert(
            address,
            SimServo {
                memory,
                staged: None,
                responsive: true,
                status: 0,
            },
        );
    }

    /// Addresses of all attached servos
    pub fn addresses(&self) -> Vec<u8> {
        self.servos.keys().copied().collect()
    }

    /// Make a servo ignore (or answer again) every request
    pub fn set_responsive(&mut self, address: u8, responsive: bool) {
        if let Some(servo) = self.servos.get_mut(&address) {
            servo.responsive = responsive;
        }
    }

    /// Status byte a servo reports with every reply
    pub fn set_status(&mut self, address: u8, status: u8) {
        if let Some(servo) = self.servos.get_mut(&address) {
            servo.status = status;
        }
    }

    /// Raw control-table bytes of a servo
    pub fn memory(&self, address: u8, start: u8, len: usize) -> Option<Vec<u8>> {
        let servo = self.servos.get(&address)?;
        let start = start as usize;
        servo.memory.get(start..start + len).map(|s| s.to_vec())
    }

    /// Overwrite control-table bytes directly, bypassing the EPROM lock
    pub fn poke(&mut self, address: u8, start: u8, data: &[u8]) {
        if let Some(servo) = self.servos.get_mut(&address) {
            let start = start as usize;
            if let Some(slot) = servo.memory.get_mut(start..start + data.len()) {
                slot.copy_from_slice(data);
            }
        }
    }

    /// Check if a write was staged and not yet applied
    pub fn has_staged(&self, address: u8) -> bool {
        self.servos
            .get(&address)
            .map(|s| s.staged.is_some())
            .unwrap_or(false)
    }

    fn reply(&mut self, address: u8, params: &[u8]) {
        if let Some(servo) = self.servos.get(&address) {
            if servo.responsive {
                let bytes = build_response(address, servo.status, params);
                trace!(device = address, "sim reply {:02X?}", bytes);
                self.outbound.extend(bytes);
            }
        }
    }

    fn is_responsive(&self, address: u8) -> bool {
        self.servos
            .get(&address)
            .map(|s| s.responsive)
            .unwrap_or(false)
    }

    /// Pull complete packets out of the pending buffer
    fn drain_packets(&mut self) {
        loop {
            let Some(start) = self.pending.windows(2).position(|w| w == HEADER) else {
                // Keep a trailing 0xFF, it may start the next header
                let keep = usize::from(self.pending.last() == Some(&0xFF));
                self.pending.drain(..self.pending.len() - keep);
                return;
            };
            self.pending.drain(..start);
            if self.pending.len() < 4 {
                return;
            }

            let size = 4 + self.pending[3] as usize;
            if self.pending.len() < size {
                return;
            }

            let frame: Vec<u8> = self.pending.drain(..size).collect();
            match Packet::from_bytes(&frame) {
                Ok(packet) => self.handle(packet),
                Err(e) => trace!("sim dropped packet: {}", e),
            }
        }
    }

    fn handle(&mut self, packet: Packet) {
        trace!(
            device = packet.address,
            instruction = ?packet.instruction,
            "sim request {:02X?}",
            packet.params
        );

        let targets: Vec<u8> = if packet.address == BROADCAST_ADDRESS {
            self.servos
                .iter()
                .filter(|(_, s)| s.responsive)
                .map(|(&a, _)| a)
                .collect()
        } else if self.is_responsive(packet.address) {
            vec![packet.address]
        } else {
            Vec::new()
        };
        let answers = packet.address != BROADCAST_ADDRESS;

        match packet.instruction {
            Instruction::Ping => {
                for address in targets.into_iter().filter(|_| answers) {
                    self.reply(address, &[]);
                }
            }
            Instruction::Read => {
                let [register, len] = packet.params[..] else {
                    return;
                };
                for address in targets.into_iter().filter(|_| answers) {
                    if let Some(data) = self.read_memory(address, register, len as usize) {
                        self.reply(address, &data);
                    }
                }
            }
            Instruction::Write => {
                let Some((&register, data)) = packet.params.split_first() else {
                    return;
                };
                for address in targets {
                    let new_address = self.write_memory(address, register, data);
                    if answers {
                        self.reply(address, &[]);
                    }
                    if let Some(new_address) = new_address {
                        self.rekey(address, new_address);
                    }
                }
            }
            Instruction::RegWrite => {
                let Some((&register, data)) = packet.params.split_first() else {
                    return;
                };
                for address in targets {
                    if let Some(servo) = self.servos.get_mut(&address) {
                        servo.staged = Some((register, data.to_vec()));
                    }
                    if answers {
                        self.reply(address, &[]);
                    }
                }
            }
            Instruction::Action => {
                for address in targets {
                    let staged = self.servos.get_mut(&address).and_then(|s| s.staged.take());
                    if let Some((register, data)) = staged {
                        if let Some(new_address) = self.write_memory(address, register, &data) {
                            self.rekey(address, new_address);
                        }
                    }
                }
            }
            Instruction::SyncWrite => {
                let [register, record_len, ref records @ ..] = packet.params[..] else {
                    return;
                };
                let stride = record_len as usize + 1;
                if record_len == 0 || records.len() % stride != 0 {
                    return;
                }
                for record in records.chunks(stride) {
                    let address = record[0];
                    if self.is_responsive(address) {
                        if let Some(new_address) = self.write_memory(address, register, &record[1..]) {
                            self.rekey(address, new_address);
                        }
                    }
                }
            }
            Instruction::SyncRead => {
                let [register, len, ref ids @ ..] = packet.params[..] else {
                    return;
                };
                for &address in ids {
                    if let Some(data) = self.read_memory(address, register, len as usize) {
                        self.reply(address, &data);
                    }
                }
            }
        }
    }

    fn read_memory(&mut self, address: u8, register: u8, len: usize) -> Option<Vec<u8>> {
        let mut data = self.memory(address, register, len)?;

        if let Some(jitter) = self.jitter.as_mut() {
            let start = register as usize;
            let covers = |at: Option<u8>, width: usize| {
                at.map(|at| at as usize)
                    .filter(|&at| at >= start && at + width <= start + len)
                    .map(|at| at - start)
            };

            if let Some(i) = covers(self.registers.get(Register::PresentPosition), 2) {
                let raw = decode_u16_le(data[i], data[i + 1]) as i32;
                let noise = jitter.rng.gen_range(-jitter.amplitude..=jitter.amplitude);
                let value = (raw + noise).clamp(0, MAX_POSITION as i32) as u16;
                let (low, high) = encode_u16_le(value);
                data[i] = low;
                data[i + 1] = high;
            }
            if let Some(i) = covers(self.registers.get(Register::PresentVoltage), 1) {
                let noise = jitter.rng.gen_range(-1i32..=1);
                data[i] = (data[i] as i32 + noise).clamp(0, u8::MAX as i32) as u8;
            }
        }
        Some(data)
    }

    /// Apply a write the way the servo would; returns the new address if the ID changed
    fn write_memory(&mut self, address: u8, register: u8, data: &[u8]) -> Option<u8> {
        let registers = &self.registers;
        let servo = self.servos.get_mut(&address)?;
        let start = register as usize;
        let end = start + data.len();
        if end > MEMORY_SIZE {
            return None;
        }

        let locked = registers
            .get(Register::EpromLock)
            .map(|at| servo.memory[at as usize] != 0)
            .unwrap_or(false);
        let touches_protected = [Register::Id, Register::BaudRate, Register::StepCorrection]
            .iter()
            .filter_map(|r| registers.get(*r))
            .any(|at| (start..end).contains(&(at as usize)));
        if locked && touches_protected {
            trace!(device = address, register, "sim ignored write to locked EPROM");
            return None;
        }

        servo.memory[start..end].copy_from_slice(data);

        // Moves complete instantly
        if let (Some(goal), Some(present)) = (
            registers.get(Register::GoalPosition),
            registers.get(Register::PresentPosition),
        ) {
            let goal = goal as usize;
            if goal >= start && goal + 2 <= end {
                let present = present as usize;
                servo.memory[present] = servo.memory[goal];
                servo.memory[present + 1] = servo.memory[goal + 1];
            }
        }

        let id_at = registers.get(Register::Id)? as usize;
        if (start..end).contains(&id_at) && servo.memory[id_at] != address {
            return Some(servo.memory[id_at]);
        }
        None
    }

    fn rekey(&mut self, old: u8, new: u8) {
        if new == BROADCAST_ADDRESS || self.servos.contains_key(&new) {
            return;
        }
        if let Some(servo) = self.servos.remove(&old) {
            trace!(old, new, "sim servo changed address");
            self.servos.insert(new, servo);
        }
    }
}

impl ByteTransport for SimulatedBus {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.pending.extend_from_slice(data);
        self.drain_packets();
        Ok(())
    }

    fn read_byte(&mut self) -> Result<Option<u8>, ProtocolError> {
        Ok(self.outbound.pop_front())
    }

    fn clear_input(&mut self) -> Result<(), ProtocolError> {
        self.outbound.clear();
        Ok(())
    }
}
