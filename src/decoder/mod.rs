// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Instruction decoder for the simulated IA-32-style byte stream.
//!
//! Decoding reads through [`Mmu`] like any other memory access, so a
//! decode warms the TLB and cache exactly as an instruction fetch on real
//! hardware would; this is intentional, not an oversight, and the MMU's
//! statistics reflect it.
//!
//! The opcode table is closed: any byte sequence not covered by one of
//! the arms below produces [`Error::Decode`] rather than silently
//! treating the byte as a no-op.

mod instruction;
mod operand;

pub use instruction::{Instruction, Mnemonic};
pub use operand::{Operand, RegName};

use crate::error::{Error, Result};
use crate::mmu::Mmu;

/// Sequentially pulls opcode/ModR/M/displacement/immediate bytes out of
/// the MMU while tracking how many bytes the instruction has consumed.
struct Reader<'a> {
    mmu: &'a mut Mmu,
    start: u32,
    pos: u32,
}

impl<'a> Reader<'a> {
    fn new(mmu: &'a mut Mmu, start: u32) -> Self {
        Self { mmu, start, pos: start }
    }

    fn u8(&mut self) -> Result<u8> {
        let v = self.mmu.read_byte(self.pos)?;
        self.pos = self.pos.wrapping_add(1);
        Ok(v)
    }

    fn u32(&mut self) -> Result<u32> {
        let v = self.mmu.read_dword(self.pos)?;
        self.pos = self.pos.wrapping_add(4);
        Ok(v)
    }

    fn size(&self) -> u32 {
        self.pos - self.start
    }

    fn fail(&self, byte: u8, detail: &'static str) -> Error {
        Error::Decode {
            address: self.start,
            byte,
            detail,
        }
    }

    /// Decode a ModR/M byte at the current position, returning the
    /// resolved `r/m` operand, the register named by the `reg` field (at
    /// the given operand width), and the raw 3-bit `reg` field (used as a
    /// sub-opcode selector by the group opcodes).
    fn modrm(&mut self, operand_width: u8) -> Result<(Operand, RegName, u8)> {
        let byte = self.u8()?;
        let md = byte >> 6;
        let reg_field = (byte >> 3) & 0x7;
        let rm_field = byte & 0x7;
        let reg = RegName::from_code(reg_field, operand_width);

        let rm = match md {
            0b11 => Operand::Register(RegName::from_code(rm_field, operand_width)),
            0b00 if rm_field == 5 => {
                let address = self.u32()?;
                Operand::Memory {
                    address,
                    width: operand_width,
                }
            }
            0b00 => Operand::RegisterIndirect {
                reg: RegName::from_code32(rm_field),
                width: operand_width,
            },
            0b01 => {
                let displacement = self.u8()? as u32;
                Operand::RegisterIndirectDisplacement {
                    reg: RegName::from_code32(rm_field),
                    displacement,
                    disp_width: 1,
                    width: operand_width,
                }
            }
            0b10 => {
                let displacement = self.u32()?;
                Operand::RegisterIndirectDisplacement {
                    reg: RegName::from_code32(rm_field),
                    displacement,
                    disp_width: 4,
                    width: operand_width,
                }
            }
            _ => unreachable!("mod field is always 0..4"),
        };
        Ok((rm, reg, reg_field))
    }
}

/// Mnemonic for ModR/M-group subopcode 0 (`ADD`) through 7 (`CMP`), used
/// by the `0x81`/`0x83` arithmetic group.
fn alu_group_mnemonic(subop: u8) -> Option<Mnemonic> {
    use Mnemonic::*;
    match subop & 0x7 {
        0 => Some(Add),
        1 => Some(Or),
        2 => Some(Adc),
        3 => Some(Sbb),
        4 => Some(And),
        5 => Some(Sub),
        6 => Some(Xor),
        7 => Some(Cmp),
        _ => None,
    }
}

/// Stateless decoder: decoding takes the MMU by `&mut` on each call rather
/// than this type owning one, since the MMU's lifetime is tied to the CPU
/// that also executes what gets decoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Decoder;

impl Decoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode one instruction starting at `vaddr`. Reads go through `mmu`,
    /// so a decode affects TLB/cache occupancy just like any other access.
    pub fn decode(&self, mmu: &mut Mmu, vaddr: u32) -> Result<Instruction> {
        let mut r = Reader::new(mmu, vaddr);
        let opcode = r.u8()?;

        let (mnemonic, operands) = match opcode {
            // ADD/OR/AND/SUB/XOR/CMP r/m, r (dest = r/m) and the reversed
            // ADD r, r/m (dest = reg) pair.
            0x00 => Self::decode_alu_rm_r(&mut r, Mnemonic::Add, 1, false)?,
            0x01 => Self::decode_alu_rm_r(&mut r, Mnemonic::Add, 4, false)?,
            0x02 => Self::decode_alu_rm_r(&mut r, Mnemonic::Add, 1, true)?,
            0x03 => Self::decode_alu_rm_r(&mut r, Mnemonic::Add, 4, true)?,
            0x08 => Self::decode_alu_rm_r(&mut r, Mnemonic::Or, 1, false)?,
            0x09 => Self::decode_alu_rm_r(&mut r, Mnemonic::Or, 4, false)?,
            0x20 => Self::decode_alu_rm_r(&mut r, Mnemonic::And, 1, false)?,
            0x21 => Self::decode_alu_rm_r(&mut r, Mnemonic::And, 4, false)?,
            0x25 => {
                let imm = r.u32()?;
                (
                    Mnemonic::And,
                    vec![
                        Operand::Register(RegName::Eax),
                        Operand::Immediate { value: imm, width: 4 },
                    ],
                )
            }
            0x28 => Self::decode_alu_rm_r(&mut r, Mnemonic::Sub, 1, false)?,
            0x29 => Self::decode_alu_rm_r(&mut r, Mnemonic::Sub, 4, false)?,
            0x30 => Self::decode_alu_rm_r(&mut r, Mnemonic::Xor, 1, false)?,
            0x31 => Self::decode_alu_rm_r(&mut r, Mnemonic::Xor, 4, false)?,
            0x35 => {
                let imm = r.u32()?;
                (
                    Mnemonic::Xor,
                    vec![
                        Operand::Register(RegName::Eax),
                        Operand::Immediate { value: imm, width: 4 },
                    ],
                )
            }
            0x38 => Self::decode_alu_rm_r(&mut r, Mnemonic::Cmp, 1, false)?,
            0x39 => Self::decode_alu_rm_r(&mut r, Mnemonic::Cmp, 4, false)?,
            0x3D => {
                let imm = r.u32()?;
                (
                    Mnemonic::Cmp,
                    vec![
                        Operand::Register(RegName::Eax),
                        Operand::Immediate { value: imm, width: 4 },
                    ],
                )
            }

            0x40..=0x47 => (
                Mnemonic::Inc,
                vec![Operand::Register(RegName::from_code32(opcode - 0x40))],
            ),
            0x48..=0x4F => (
                Mnemonic::Dec,
                vec![Operand::Register(RegName::from_code32(opcode - 0x48))],
            ),
            0x50..=0x57 => (
                Mnemonic::Push,
                vec![Operand::Register(RegName::from_code32(opcode - 0x50))],
            ),
            0x58..=0x5F => (
                Mnemonic::Pop,
                vec![Operand::Register(RegName::from_code32(opcode - 0x58))],
            ),

            // MOVSXD r32, r/m32 — dest is always the reg field.
            0x63 => {
                let (rm, reg, _) = r.modrm(4)?;
                (Mnemonic::Movsxd, vec![Operand::Register(reg), rm])
            }

            0x70..=0x7F => {
                let rel = r.u8()? as u32;
                (
                    Mnemonic::from_condition_code(opcode - 0x70),
                    vec![Operand::Immediate { value: rel, width: 1 }],
                )
            }

            // Arithmetic group: r/m32, imm32 and r/m32, imm8 (stored raw,
            // not sign-extended).
            0x81 => {
                let (rm, _, subop) = r.modrm(4)?;
                let mnemonic = alu_group_mnemonic(subop)
                    .ok_or_else(|| r.fail(opcode, "0x81 subopcode not in the closed ALU group"))?;
                let imm = r.u32()?;
                (mnemonic, vec![rm, Operand::Immediate { value: imm, width: 4 }])
            }
            0x83 => {
                let (rm, _, subop) = r.modrm(4)?;
                let mnemonic = alu_group_mnemonic(subop)
                    .ok_or_else(|| r.fail(opcode, "0x83 subopcode not in the closed ALU group"))?;
                let imm = r.u8()? as u32;
                (mnemonic, vec![rm, Operand::Immediate { value: imm, width: 1 }])
            }

            0x85 => {
                let (rm, reg, _) = r.modrm(4)?;
                (Mnemonic::Test, vec![rm, Operand::Register(reg)])
            }
            0x87 => {
                let (rm, reg, _) = r.modrm(4)?;
                (Mnemonic::Xchg, vec![rm, Operand::Register(reg)])
            }
            0x88 => Self::decode_alu_rm_r(&mut r, Mnemonic::Mov, 1, false)?,
            0x89 => Self::decode_alu_rm_r(&mut r, Mnemonic::Mov, 4, false)?,
            0x90 => (Mnemonic::Nop, vec![]),
            0x9C => (Mnemonic::Pushf, vec![]),
            0x9D => (Mnemonic::Popf, vec![]),

            0xA3 => {
                let address = r.u32()?;
                (
                    Mnemonic::Mov,
                    vec![
                        Operand::Memory { address, width: 4 },
                        Operand::Register(RegName::Eax),
                    ],
                )
            }

            0xB0..=0xB7 => {
                let reg = RegName::from_code8(opcode - 0xB0);
                let imm = r.u8()? as u32;
                (
                    Mnemonic::Mov,
                    vec![Operand::Register(reg), Operand::Immediate { value: imm, width: 1 }],
                )
            }
            0xB8..=0xBF => {
                let reg = RegName::from_code32(opcode - 0xB8);
                let imm = r.u32()?;
                (
                    Mnemonic::Mov,
                    vec![Operand::Register(reg), Operand::Immediate { value: imm, width: 4 }],
                )
            }

            0xC1 => {
                let (rm, _, subop) = r.modrm(4)?;
                let mnemonic = Self::shift_group_mnemonic(&r, opcode, subop)?;
                let imm = r.u8()? as u32;
                (mnemonic, vec![rm, Operand::Immediate { value: imm, width: 1 }])
            }
            0xC3 => (Mnemonic::Ret, vec![]),
            0xCD => {
                let imm = r.u8()? as u32;
                (Mnemonic::Int, vec![Operand::Immediate { value: imm, width: 1 }])
            }
            0xD1 => {
                let (rm, _, subop) = r.modrm(4)?;
                let mnemonic = Self::shift_group_mnemonic(&r, opcode, subop)?;
                (mnemonic, vec![rm, Operand::Immediate { value: 1, width: 1 }])
            }

            0xE8 => {
                let rel = r.u32()?;
                (Mnemonic::Call, vec![Operand::Immediate { value: rel, width: 4 }])
            }
            0xE9 => {
                let rel = r.u32()?;
                (Mnemonic::Jmp, vec![Operand::Immediate { value: rel, width: 4 }])
            }
            0xEB => {
                let rel = r.u8()? as u32;
                (Mnemonic::Jmp, vec![Operand::Immediate { value: rel, width: 1 }])
            }

            0xF4 => (Mnemonic::Hlt, vec![]),

            0xF7 => {
                let (rm, _, subop) = r.modrm(4)?;
                match subop & 0x7 {
                    0 | 1 => {
                        let imm = r.u32()?;
                        (Mnemonic::Test, vec![rm, Operand::Immediate { value: imm, width: 4 }])
                    }
                    2 => (Mnemonic::Not, vec![rm]),
                    3 => (Mnemonic::Neg, vec![rm]),
                    4 => (Mnemonic::Mul, vec![rm]),
                    5 => (Mnemonic::Imul, vec![rm]),
                    6 => (Mnemonic::Div, vec![rm]),
                    7 => (Mnemonic::Idiv, vec![rm]),
                    _ => unreachable!("subop & 0x7 is always in 0..8"),
                }
            }

            0xFA => (Mnemonic::Cli, vec![]),
            0xFB => (Mnemonic::Sti, vec![]),
            0xFC => (Mnemonic::Cld, vec![]),
            0xFD => (Mnemonic::Std, vec![]),

            0x0F => {
                let second = r.u8()?;
                match second {
                    0x31 => (Mnemonic::Rdtsc, vec![]),
                    0xAF => {
                        let (rm, reg, _) = r.modrm(4)?;
                        (Mnemonic::Imul, vec![Operand::Register(reg), rm])
                    }
                    0x8C => {
                        let rel = r.u32()?;
                        (Mnemonic::Jl, vec![Operand::Immediate { value: rel, width: 4 }])
                    }
                    0xC7 => {
                        let (rm, _, subop) = r.modrm(4)?;
                        match subop & 0x7 {
                            6 => (Mnemonic::Rdrand, vec![rm]),
                            7 => (Mnemonic::Rdseed, vec![rm]),
                            _ => {
                                return Err(r.fail(second, "0x0F 0xC7 subopcode not RDRAND/RDSEED"))
                            }
                        }
                    }
                    _ => return Err(r.fail(second, "unrecognized 0x0F-prefixed opcode")),
                }
            }

            _ => return Err(r.fail(opcode, "opcode not present in the closed table")),
        };

        Ok(Instruction {
            address: vaddr,
            mnemonic,
            operands,
            size: r.size(),
        })
    }

    /// Decode the `r/m, reg` ModR/M pair shared by ADD/OR/AND/SUB/XOR/CMP/
    /// MOV's two-operand forms. `reversed` swaps which side is the
    /// destination, matching the opcode table's direction-bit convention.
    fn decode_alu_rm_r(
        r: &mut Reader<'_>,
        mnemonic: Mnemonic,
        width: u8,
        reversed: bool,
    ) -> Result<(Mnemonic, Vec<Operand>)> {
        let (rm, reg, _) = r.modrm(width)?;
        let operands = if reversed {
            vec![Operand::Register(reg), rm]
        } else {
            vec![rm, Operand::Register(reg)]
        };
        Ok((mnemonic, operands))
    }

    fn shift_group_mnemonic(r: &Reader<'_>, opcode: u8, subop: u8) -> Result<Mnemonic> {
        match subop & 0x7 {
            4 => Ok(Mnemonic::Shl),
            5 => Ok(Mnemonic::Shr),
            _ => Err(r.fail(opcode, "shift group subopcode is not SHL/SHR")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mmu::Mmu;

    fn mmu_with(bytes: &[u8]) -> Mmu {
        let mut mmu = Mmu::new(crate::mmu::DEFAULT_MEMORY_SIZE);
        mmu.load_program(bytes, 0).unwrap();
        mmu
    }

    #[test]
    fn decodes_mov_r32_imm32() {
        let mut mmu = mmu_with(&[0xB8, 0x78, 0x56, 0x34, 0x12]);
        let inst = Decoder::new().decode(&mut mmu, 0).unwrap();
        assert_eq!(inst.mnemonic, Mnemonic::Mov);
        assert_eq!(inst.size, 5);
        assert_eq!(
            inst.operands,
            vec![
                Operand::Register(RegName::Eax),
                Operand::Immediate { value: 0x12345678, width: 4 },
            ]
        );
    }

    #[test]
    fn decodes_add_rm_r_with_disp8_addressing() {
        // ADD [EBX+0x10], ECX -> 01 /r with mod=01, reg=ECX(1), rm=EBX(3)
        let modrm = 0b01_001_011;
        let mut mmu = mmu_with(&[0x01, modrm, 0x10]);
        let inst = Decoder::new().decode(&mut mmu, 0).unwrap();
        assert_eq!(inst.mnemonic, Mnemonic::Add);
        assert_eq!(inst.size, 3);
        assert_eq!(
            inst.operands[0],
            Operand::RegisterIndirectDisplacement {
                reg: RegName::Ebx,
                displacement: 0x10,
                disp_width: 1,
                width: 4,
            }
        );
        assert_eq!(inst.operands[1], Operand::Register(RegName::Ecx));
    }

    #[test]
    fn decodes_group1_0x83_subop_as_immediate_not_sign_extended() {
        // SUB EAX, 0xFF -> 83 /5 ib, mod=11 reg=5(SUB) rm=0(EAX)
        let modrm = 0b11_101_000;
        let mut mmu = mmu_with(&[0x83, modrm, 0xFF]);
        let inst = Decoder::new().decode(&mut mmu, 0).unwrap();
        assert_eq!(inst.mnemonic, Mnemonic::Sub);
        assert_eq!(inst.operands[1], Operand::Immediate { value: 0xFF, width: 1 });
    }

    #[test]
    fn decodes_direct_address_operand_for_mod00_rm5() {
        // MOV EAX, [0x00001000] -> 8B /r with mod=00 rm=101
        let modrm = 0b00_000_101;
        let mut mmu = mmu_with(&[0x89, modrm, 0x00, 0x10, 0x00, 0x00]);
        let inst = Decoder::new().decode(&mut mmu, 0).unwrap();
        assert_eq!(inst.size, 6);
        assert_eq!(
            inst.operands[0],
            Operand::Memory { address: 0x1000, width: 4 }
        );
    }

    #[test]
    fn unrecognized_opcode_is_a_decode_error() {
        let mut mmu = mmu_with(&[0x0A]);
        let err = Decoder::new().decode(&mut mmu, 0).unwrap_err();
        assert!(matches!(err, Error::Decode { address: 0, byte: 0x0A, .. }));
    }

    #[test]
    fn unrecognized_group1_subopcode_is_a_decode_error() {
        // mod=11 reg=0 is ADD, which is valid for 0x81 — use an invalid
        // shift-group subopcode on 0xC1 instead (only 4/5 are legal).
        let modrm = 0b11_000_000;
        let mut mmu = mmu_with(&[0xC1, modrm, 0x01]);
        let err = Decoder::new().decode(&mut mmu, 0).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn decodes_conditional_jump_rel8() {
        let mut mmu = mmu_with(&[0x74, 0x05]); // JZ +5
        let inst = Decoder::new().decode(&mut mmu, 0).unwrap();
        assert_eq!(inst.mnemonic, Mnemonic::Jz);
        assert_eq!(inst.size, 2);
    }

    #[test]
    fn decodes_two_byte_imul_opcode() {
        // IMUL ECX, EAX -> 0F AF /r, mod=11 reg=ECX(1) rm=EAX(0)
        let modrm = 0b11_001_000;
        let mut mmu = mmu_with(&[0x0F, 0xAF, modrm]);
        let inst = Decoder::new().decode(&mut mmu, 0).unwrap();
        assert_eq!(inst.mnemonic, Mnemonic::Imul);
        assert_eq!(inst.size, 3);
        assert_eq!(inst.operands[0], Operand::Register(RegName::Ecx));
    }

    #[test]
    fn decode_reads_through_the_mmu_and_warms_its_cache() {
        let mut mmu = mmu_with(&[0x90]);
        let before = mmu.get_statistics().cache_misses;
        Decoder::new().decode(&mut mmu, 0).unwrap();
        assert!(mmu.get_statistics().cache_misses > before);
    }
}
