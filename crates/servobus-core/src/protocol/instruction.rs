//! Protocol instructions
//!
//! Defines the instruction set understood by STS/SCS servos.

use serde::{Deserialize, Serialize};

/// Instruction opcodes for servo communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Instruction {
    /// Presence check (0x01)
    Ping,

    /// Read a register block (0x02)
    Read,

    /// Write a register block, applied immediately (0x03)
    Write,

    /// Stage a register write until the next ACTION (0x04)
    RegWrite,

    /// Apply all staged writes (0x05, broadcast only)
    Action,

    /// Read the same register block from several servos (0x82, broadcast only)
    SyncRead,

    /// Write per-servo records to the same register block (0x83, broadcast only)
    SyncWrite,
}

impl Instruction {
    /// Get the opcode byte sent on the wire
    pub fn code(&self) -> u8 {
        match self {
            Instruction::Ping => 0x01,
            Instruction::Read => 0x02,
            Instruction::Write => 0x03,
            Instruction::RegWrite => 0x04,
            Instruction::Action => 0x05,
            Instruction::SyncRead => 0x82,
            Instruction::SyncWrite => 0x83,
        }
    }

    /// Look up an instruction from its opcode byte
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Instruction::Ping),
            0x02 => Some(Instruction::Read),
            0x03 => Some(Instruction::Write),
            0x04 => Some(Instruction::RegWrite),
            0x05 => Some(Instruction::Action),
            0x82 => Some(Instruction::SyncRead),
            0x83 => Some(Instruction::SyncWrite),
            _ => None,
        }
    }

    /// Check if the addressed servo(s) answer this instruction
    pub fn expects_response(&self) -> bool {
        !matches!(self, Instruction::Action | Instruction::SyncWrite)
    }

    /// Check if this instruction is only ever sent to the broadcast address
    pub fn is_broadcast(&self) -> bool {
        matches!(
            self,
            Instruction::Action | Instruction::SyncRead | Instruction::SyncWrite
        )
    }
}
