//! Servo register map
//!
//! Each servo family lays out its control table differently. A [`RegisterMap`]
//! is resolved once per model so that every later lookup is a plain index.

use serde::{Deserialize, Serialize};

use crate::protocol::ProtocolError;

/// Servo family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// STS series (e.g. ST3215), 12-bit magnetic encoder
    #[default]
    Sts,
    /// SCS series
    Scs,
}

/// Logical registers of the control table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Register {
    /// Model number, read-only
    ModelNumber,
    /// Bus address
    Id,
    /// Line speed code
    BaudRate,
    /// Zero-position correction
    StepCorrection,
    /// Operating mode
    Mode,
    /// Torque output switch
    TorqueSwitch,
    /// Acceleration, start of the move block
    Acceleration,
    /// Target position
    GoalPosition,
    /// Move time, unused by STS
    GoalTime,
    /// Move speed
    GoalSpeed,
    /// EPROM write lock
    EpromLock,
    /// Current position, start of the feedback block
    PresentPosition,
    /// Current speed
    PresentSpeed,
    /// Current load
    PresentLoad,
    /// Supply voltage
    PresentVoltage,
    /// Temperature
    PresentTemperature,
    /// Error status bits
    ServoStatus,
    /// Non-zero while moving
    Moving,
    /// Current draw
    PresentCurrent,
}

impl Register {
    /// Number of logical registers
    pub const COUNT: usize = 19;

    /// Every register, in table order
    pub const ALL: [Register; Register::COUNT] = [
        Register::ModelNumber,
        Register::Id,
        Register::BaudRate,
        Register::StepCorrection,
        Register::Mode,
        Register::TorqueSwitch,
        Register::Acceleration,
        Register::GoalPosition,
        Register::GoalTime,
        Register::GoalSpeed,
        Register::EpromLock,
        Register::PresentPosition,
        Register::PresentSpeed,
        Register::PresentLoad,
        Register::PresentVoltage,
        Register::PresentTemperature,
        Register::ServoStatus,
        Register::Moving,
        Register::PresentCurrent,
    ];

    fn index(self) -> usize {
        self as usize
    }

    /// Width of the register in bytes
    pub fn size(self) -> u8 {
        match self {
            Register::ModelNumber
            | Register::StepCorrection
            | Register::GoalPosition
            | Register::GoalTime
            | Register::GoalSpeed
            | Register::PresentPosition
            | Register::PresentSpeed
            | Register::PresentLoad
            | Register::PresentCurrent => 2,
            _ => 1,
        }
    }

    /// Persistent registers that only accept writes while the EPROM is unlocked
    pub fn requires_unlock(self) -> bool {
        matches!(
            self,
            Register::Id | Register::BaudRate | Register::StepCorrection
        )
    }
}

const STS_TABLE: &[(Register, u8)] = &[
    // EPROM, read only
    (Register::ModelNumber, 0x03),
    // EPROM, read/write
    (Register::Id, 0x05),
    (Register::BaudRate, 0x06),
    (Register::StepCorrection, 0x1F),
    (Register::Mode, 0x21),
    // SRAM, read/write
    (Register::TorqueSwitch, 0x28),
    (Register::Acceleration, 0x29),
    (Register::GoalPosition, 0x2A),
    (Register::GoalTime, 0x2C),
    (Register::GoalSpeed, 0x2E),
    (Register::EpromLock, 0x37),
    // SRAM, read only
    (Register::PresentPosition, 0x38),
    (Register::PresentSpeed, 0x3A),
    (Register::PresentLoad, 0x3C),
    (Register::PresentVoltage, 0x3E),
    (Register::PresentTemperature, 0x3F),
    (Register::ServoStatus, 0x41),
    (Register::Moving, 0x42),
    (Register::PresentCurrent, 0x45),
];

const SCS_TABLE: &[(Register, u8)] = &[(Register::EpromLock, 0x30)];

/// Register addresses resolved for one servo model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterMap {
    model: Model,
    table: [Option<u8>; Register::COUNT],
}

impl RegisterMap {
    /// Resolve the full table for `model`
    pub fn for_model(model: Model) -> Self {
        let source = match model {
            Model::Sts => STS_TABLE,
            Model::Scs => SCS_TABLE,
        };

        let mut table = [None; Register::COUNT];
        for &(register, address) in source {
            table[register.index()] = Some(address);
        }

        Self { model, table }
    }

    /// Model this map was resolved for
    pub fn model(&self) -> Model {
        self.model
    }

    /// Protocol address of `register`, if the model has it
    pub fn get(&self, register: Register) -> Option<u8> {
        self.table[register.index()]
    }

    /// Protocol address of `register`, or `UnsupportedOnModel`
    pub fn resolve(&self, register: Register) -> Result<u8, ProtocolError> {
        self.get(register)
            .ok_or(ProtocolError::UnsupportedOnModel {
                register,
                model: self.model,
            })
    }

    /// Check if the model has `register`
    pub fn supports(&self, register: Register) -> bool {
        self.get(register).is_some()
    }

    /// Reverse lookup of a protocol address
    pub fn register_at(&self, address: u8) -> Option<Register> {
        Register::ALL
            .iter()
            .copied()
            .find(|r| self.get(*r) == Some(address))
    }

    /// Iterate over supported registers and their addresses
    pub fn iter(&self) -> impl Iterator<Item = (Register, u8)> + '_ {
        Register::ALL
            .iter()
            .filter_map(move |r| self.get(*r).map(|addr| (*r, addr)))
    }
}

impl Default for RegisterMap {
    fn default() -> Self {
        Self::for_model(Model::default())
    }
}

/// Resolve a single register for `model`
pub fn resolve(model: Model, register: Register) -> Result<u8, ProtocolError> {
    RegisterMap::for_model(model).resolve(register)
}
