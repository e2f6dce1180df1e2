// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Register names and the five operand shapes decoded instructions carry.

use std::fmt;

/// One of the 16 register identifiers this machine permits: the eight
/// 32-bit general-purpose registers in standard IA-32 ModR/M encoding
/// order, plus the eight byte registers in the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegName {
    Eax,
    Ecx,
    Edx,
    Ebx,
    Esp,
    Ebp,
    Esi,
    Edi,
    Al,
    Cl,
    Dl,
    Bl,
    Ah,
    Ch,
    Dh,
    Bh,
}

impl RegName {
    /// Width in bytes: 4 for the 32-bit registers, 1 for the byte registers.
    pub fn width(self) -> u8 {
        use RegName::*;
        match self {
            Eax | Ecx | Edx | Ebx | Esp | Ebp | Esi | Edi => 4,
            Al | Cl | Dl | Bl | Ah | Ch | Dh | Bh => 1,
        }
    }

    /// Decode a 3-bit ModR/M register code as a 32-bit register.
    pub fn from_code32(code: u8) -> Self {
        use RegName::*;
        match code & 0x7 {
            0 => Eax,
            1 => Ecx,
            2 => Edx,
            3 => Ebx,
            4 => Esp,
            5 => Ebp,
            6 => Esi,
            7 => Edi,
            _ => unreachable!("code & 0x7 is always in 0..8"),
        }
    }

    /// Decode a 3-bit ModR/M register code as an 8-bit register.
    pub fn from_code8(code: u8) -> Self {
        use RegName::*;
        match code & 0x7 {
            0 => Al,
            1 => Cl,
            2 => Dl,
            3 => Bl,
            4 => Ah,
            5 => Ch,
            6 => Dh,
            7 => Bh,
            _ => unreachable!("code & 0x7 is always in 0..8"),
        }
    }

    /// Decode a register of the given operand width (1 or 4 bytes).
    pub fn from_code(code: u8, width: u8) -> Self {
        if width == 4 {
            Self::from_code32(code)
        } else {
            Self::from_code8(code)
        }
    }

    /// Index of the underlying 32-bit register this name reads/writes
    /// through, in `GeneralRegisters`' storage order (which matches the
    /// ModR/M encoding order above).
    pub fn parent_index(self) -> usize {
        use RegName::*;
        match self {
            Eax | Al | Ah => 0,
            Ecx | Cl | Ch => 1,
            Edx | Dl | Dh => 2,
            Ebx | Bl | Bh => 3,
            Esp => 4,
            Ebp => 5,
            Esi => 6,
            Edi => 7,
        }
    }

    /// For an 8-bit register name, whether it addresses the second-lowest
    /// byte (`AH`/`CH`/`DH`/`BH`) rather than the lowest (`AL`/`CL`/`DL`/`BL`).
    pub fn is_high_byte(self) -> bool {
        matches!(self, RegName::Ah | RegName::Ch | RegName::Dh | RegName::Bh)
    }
}

impl fmt::Display for RegName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use RegName::*;
        let s = match self {
            Eax => "EAX",
            Ecx => "ECX",
            Edx => "EDX",
            Ebx => "EBX",
            Esp => "ESP",
            Ebp => "EBP",
            Esi => "ESI",
            Edi => "EDI",
            Al => "AL",
            Cl => "CL",
            Dl => "DL",
            Bl => "BL",
            Ah => "AH",
            Ch => "CH",
            Dh => "DH",
            Bh => "BH",
        };
        f.write_str(s)
    }
}

/// A decoded instruction operand.
///
/// Matches spec.md's five shapes (`REGISTER`, `IMMEDIATE`, `MEMORY`,
/// `REGISTER_INDIRECT`, `REGISTER_INDIRECT_DISPLACEMENT`); every variant
/// here additionally carries the access width the decoder resolved for
/// it, since the instruction's operand size (1 or 4 bytes) is not
/// otherwise recoverable from a bare address or base register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    /// A named register, width implied by the register name itself.
    Register(RegName),
    /// An immediate value embedded in the instruction stream.
    Immediate { value: u32, width: u8 },
    /// A direct (absolute) memory address, as produced by ModR/M `mod=00,
    /// rm=101` or by the `MOV [imm32], EAX` opcode.
    Memory { address: u32, width: u8 },
    /// `[reg]` addressing.
    RegisterIndirect { reg: RegName, width: u8 },
    /// `[reg + disp]` addressing. `disp_width` distinguishes an 8-bit from
    /// a 32-bit displacement; `displacement` holds the raw bits as read
    /// from the instruction stream (not sign-extended at decode time).
    RegisterIndirectDisplacement {
        reg: RegName,
        displacement: u32,
        disp_width: u8,
        width: u8,
    },
}

impl Operand {
    /// Access width in bytes for this operand.
    pub fn width(&self) -> u8 {
        match self {
            Operand::Register(r) => r.width(),
            Operand::Immediate { width, .. }
            | Operand::Memory { width, .. }
            | Operand::RegisterIndirect { width, .. }
            | Operand::RegisterIndirectDisplacement { width, .. } => *width,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(r) => write!(f, "{}", r),
            Operand::Immediate { value, .. } => write!(f, "{:#x}", value),
            Operand::Memory { address, .. } => write!(f, "[{:#x}]", address),
            Operand::RegisterIndirect { reg, .. } => write!(f, "[{}]", reg),
            Operand::RegisterIndirectDisplacement {
                reg,
                displacement,
                disp_width,
                ..
            } => {
                let signed = if *disp_width == 1 {
                    (*displacement as u8 as i8) as i32
                } else {
                    *displacement as i32
                };
                if signed >= 0 {
                    write!(f, "[{} + {:#x}]", reg, signed)
                } else {
                    write!(f, "[{} - {:#x}]", reg, -signed)
                }
            }
        }
    }
}
