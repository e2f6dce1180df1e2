// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The CPU: architectural state plus the fetch-decode-execute step loop.
//!
//! A [`Cpu`] owns its [`Mmu`] and [`Decoder`] by composition (spec.md §9:
//! "the CPU owns the MMU and Decoder by composition") — there is exactly
//! one path to memory, through `self.mmu`.

pub mod registers;
pub mod stats;

use std::collections::BTreeSet;
use std::time::Instant;

use crate::decoder::{Decoder, Instruction, Mnemonic, Operand, RegName};
use crate::error::{Error, Result};
use crate::mmu::Mmu;
use registers::{ControlRegisters, Flags, GeneralRegisters, SegmentRegisters};
use stats::CpuStatistics;

/// A deep-copy snapshot of architectural state, independent of the live
/// `Cpu` it was taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuState {
    pub registers: GeneralRegisters,
    pub flags: Flags,
    pub eip: u32,
    pub halted: bool,
    pub interrupt_enabled: bool,
    pub segment_registers: SegmentRegisters,
    pub control_registers: ControlRegisters,
}

/// Static cycle cost per mnemonic (spec.md §4.4): an approximation kept
/// stable across runs, not a timing contract.
fn cycle_cost(mnemonic: Mnemonic) -> u64 {
    use Mnemonic::*;
    match mnemonic {
        Shl | Shr | Push | Pop => 2,
        Call | Ret => 3,
        Int => 10,
        _ => 1,
    }
}

fn width_mask(width: u8) -> u64 {
    if width == 1 {
        0xFF
    } else {
        0xFFFF_FFFF
    }
}

/// The processor core: registers, flags, EIP, the halted bit, a
/// breakpoint set, execution counters, and the owned MMU/decoder.
pub struct Cpu {
    registers: GeneralRegisters,
    flags: Flags,
    eip: u32,
    halted: bool,
    interrupt_enabled: bool,
    segment_registers: SegmentRegisters,
    control_registers: ControlRegisters,
    breakpoints: BTreeSet<u32>,
    instruction_count: u64,
    cycle_count: u64,
    interrupts: u64,
    mmu: Mmu,
    decoder: Decoder,
    started_at: Instant,
}

impl Cpu {
    pub fn new(memory_size: u32) -> Self {
        Self {
            registers: GeneralRegisters::reset(),
            flags: Flags::default(),
            eip: 0,
            halted: false,
            interrupt_enabled: false,
            segment_registers: SegmentRegisters::default(),
            control_registers: ControlRegisters::default(),
            breakpoints: BTreeSet::new(),
            instruction_count: 0,
            cycle_count: 0,
            interrupts: 0,
            mmu: Mmu::new(memory_size),
            decoder: Decoder::new(),
            started_at: Instant::now(),
        }
    }

    /// Reinitialize registers, flags, EIP, halted, `interruptEnabled`, and
    /// every counter; reset the MMU (dropping all mappings, unprotecting
    /// every page, and clearing the TLB/cache hierarchy). Breakpoints are
    /// debugger configuration, not architectural state, and survive reset.
    pub fn reset(&mut self) {
        self.registers = GeneralRegisters::reset();
        self.flags = Flags::default();
        self.eip = 0;
        self.halted = false;
        self.interrupt_enabled = false;
        self.segment_registers = SegmentRegisters::default();
        self.control_registers = ControlRegisters::default();
        self.instruction_count = 0;
        self.cycle_count = 0;
        self.interrupts = 0;
        self.mmu.reset();
    }

    pub fn load_program(&mut self, bytes: &[u8], addr: u32) -> Result<()> {
        self.mmu.load_program(bytes, addr)
    }

    // -----------------------------------------------------------------
    // Step loop
    // -----------------------------------------------------------------

    /// Decode and execute one instruction at the current EIP. A no-op if
    /// already halted. On error, the CPU is left exactly as the failing
    /// instruction left it: EIP unchanged unless the instruction already
    /// wrote it, counters not incremented for the failed instruction.
    pub fn step(&mut self) -> Result<()> {
        if self.halted {
            return Ok(());
        }
        let eip0 = self.eip;
        let instr = self.decoder.decode(&mut self.mmu, eip0)?;
        self.execute(&instr)?;
        self.instruction_count += 1;
        self.cycle_count += cycle_cost(instr.mnemonic);
        if self.eip == eip0 {
            self.eip = eip0.wrapping_add(instr.size);
        }
        Ok(())
    }

    /// Step repeatedly until halted or EIP lands on a breakpoint (checked
    /// *before* executing the instruction there).
    pub fn run_until_breakpoint(&mut self) -> Result<()> {
        while !self.halted && !self.breakpoints.contains(&self.eip) {
            self.step()?;
        }
        Ok(())
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn is_at_breakpoint(&self) -> bool {
        self.breakpoints.contains(&self.eip)
    }

    pub fn set_breakpoint(&mut self, addr: u32) {
        self.breakpoints.insert(addr);
    }

    pub fn remove_breakpoint(&mut self, addr: u32) {
        self.breakpoints.remove(&addr);
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
    }

    // -----------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------

    pub fn get_state(&self) -> CpuState {
        CpuState {
            registers: self.registers,
            flags: self.flags,
            eip: self.eip,
            halted: self.halted,
            interrupt_enabled: self.interrupt_enabled,
            segment_registers: self.segment_registers,
            control_registers: self.control_registers,
        }
    }

    pub fn get_statistics(&self) -> CpuStatistics {
        let mmu_stats = self.mmu.get_statistics();
        CpuStatistics {
            instruction_count: self.instruction_count,
            cycle_count: self.cycle_count,
            interrupts: self.interrupts,
            tlb_hits: mmu_stats.tlb_hits,
            tlb_misses: mmu_stats.tlb_misses,
            page_faults: mmu_stats.page_faults,
            cache_hits: mmu_stats.cache_hits,
            cache_misses: mmu_stats.cache_misses,
        }
    }

    pub fn get_instruction_at(&mut self, addr: u32) -> Result<Instruction> {
        self.decoder.decode(&mut self.mmu, addr)
    }

    /// Decode up to `count` consecutive instructions starting at `addr`,
    /// stopping early (without erroring) on the first decode failure.
    pub fn get_instructions_at(&mut self, addr: u32, count: usize) -> Vec<Instruction> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = addr;
        for _ in 0..count {
            match self.decoder.decode(&mut self.mmu, cursor) {
                Ok(instr) => {
                    cursor = cursor.wrapping_add(instr.size);
                    out.push(instr);
                }
                Err(_) => break,
            }
        }
        out
    }

    pub fn get_mmu(&self) -> &Mmu {
        &self.mmu
    }

    pub fn get_mmu_mut(&mut self) -> &mut Mmu {
        &mut self.mmu
    }

    pub fn get_decoder(&self) -> &Decoder {
        &self.decoder
    }

    // -----------------------------------------------------------------
    // Register/operand access
    // -----------------------------------------------------------------

    fn read_reg(&self, name: RegName) -> u32 {
        let parent = self.registers.get(name.parent_index());
        if name.width() == 4 {
            parent
        } else if name.is_high_byte() {
            (parent >> 8) & 0xFF
        } else {
            parent & 0xFF
        }
    }

    fn write_reg(&mut self, name: RegName, value: u32) {
        if name.width() == 4 {
            self.registers.set(name.parent_index(), value);
            return;
        }
        let parent = self.registers.get(name.parent_index());
        let byte = value & 0xFF;
        let merged = if name.is_high_byte() {
            (parent & !0xFF00) | (byte << 8)
        } else {
            (parent & !0xFF) | byte
        };
        self.registers.set(name.parent_index(), merged);
    }

    fn effective_address(&self, operand: &Operand) -> Option<u32> {
        match *operand {
            Operand::Memory { address, .. } => Some(address),
            Operand::RegisterIndirect { reg, .. } => Some(self.read_reg(reg)),
            Operand::RegisterIndirectDisplacement {
                reg,
                displacement,
                disp_width,
                ..
            } => {
                let base = self.read_reg(reg);
                let disp = if disp_width == 1 {
                    (displacement as u8 as i8) as i32
                } else {
                    displacement as i32
                };
                Some((base as i32).wrapping_add(disp) as u32)
            }
            _ => None,
        }
    }

    fn read_operand(&mut self, operand: &Operand) -> Result<u32> {
        match *operand {
            Operand::Register(r) => Ok(self.read_reg(r)),
            Operand::Immediate { value, .. } => Ok(value),
            Operand::Memory { width, .. }
            | Operand::RegisterIndirect { width, .. }
            | Operand::RegisterIndirectDisplacement { width, .. } => {
                let addr = self.effective_address(operand).expect("memory-shaped operand");
                if width == 1 {
                    Ok(self.mmu.read_byte(addr)? as u32)
                } else {
                    self.mmu.read_dword(addr)
                }
            }
        }
    }

    fn write_operand(&mut self, operand: &Operand, value: u32) -> Result<()> {
        match *operand {
            Operand::Register(r) => {
                self.write_reg(r, value);
                Ok(())
            }
            Operand::Immediate { .. } => {
                unreachable!("the decoder never emits an immediate as a write destination")
            }
            Operand::Memory { width, .. }
            | Operand::RegisterIndirect { width, .. }
            | Operand::RegisterIndirectDisplacement { width, .. } => {
                let addr = self.effective_address(operand).expect("memory-shaped operand");
                if width == 1 {
                    self.mmu.write_byte(addr, value as u8)
                } else {
                    self.mmu.write_dword(addr, value)
                }
            }
        }
    }

    fn push(&mut self, value: u32) -> Result<()> {
        let esp = self.registers.esp.wrapping_sub(4);
        self.mmu.write_dword(esp, value)?;
        self.registers.esp = esp;
        Ok(())
    }

    fn pop(&mut self) -> Result<u32> {
        let esp = self.registers.esp;
        let value = self.mmu.read_dword(esp)?;
        self.registers.esp = esp.wrapping_add(4);
        Ok(value)
    }

    // -----------------------------------------------------------------
    // Flags
    // -----------------------------------------------------------------

    fn set_zsp(&mut self, result: u32, width: u8) {
        let mask = width_mask(width) as u32;
        let r = result & mask;
        self.flags.zf = r == 0;
        let sign_bit = if width == 1 { 7 } else { 31 };
        self.flags.sf = (r >> sign_bit) & 1 == 1;
        self.flags.pf = (r as u8).count_ones() % 2 == 0;
    }

    /// Shared ZF/SF/PF + OF/AF tail of ADD/ADC/SUB/SBB/CMP/INC/DEC/NEG.
    /// `carry` is supplied by the caller since ADC/SBB fold an incoming
    /// carry/borrow into the 33rd-bit computation before this is called.
    fn apply_arith_flags(&mut self, a: u32, b: u32, result: u32, width: u8, carry: bool, is_sub: bool) {
        self.set_zsp(result, width);
        let bit = if width == 1 { 7 } else { 31 };
        let sa = (a >> bit) & 1 == 1;
        let sb = (b >> bit) & 1 == 1;
        let sr = (result >> bit) & 1 == 1;
        if is_sub {
            self.flags.of = sa != sb && sr != sa;
            self.flags.af = (a & 0xF) < (b & 0xF);
        } else {
            self.flags.of = sa == sb && sr != sa;
            self.flags.af = (a & 0xF) + (b & 0xF) > 0xF;
        }
        self.flags.cf = carry;
    }

    fn flags_logic(&mut self, result: u32, width: u8) {
        self.flags.cf = false;
        self.flags.of = false;
        self.flags.af = false;
        self.set_zsp(result, width);
    }

    fn add_width(a: u32, b: u32, width: u8) -> u32 {
        if width == 1 {
            (a as u8).wrapping_add(b as u8) as u32
        } else {
            a.wrapping_add(b)
        }
    }

    fn sub_width(a: u32, b: u32, width: u8) -> u32 {
        if width == 1 {
            (a as u8).wrapping_sub(b as u8) as u32
        } else {
            a.wrapping_sub(b)
        }
    }

    // -----------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------

    fn exec_jmp(&mut self, target: &Operand) {
        match *target {
            Operand::Immediate { value, width: 1 } => {
                let rel = (value as u8 as i8) as i32;
                self.eip = (self.eip as i32).wrapping_add(rel) as u32;
            }
            Operand::Immediate { value, width: 4 } => {
                self.eip = value;
            }
            _ => unreachable!("JMP/CALL/Jcc targets are always an immediate"),
        }
    }

    fn condition_holds(&self, mnemonic: Mnemonic) -> bool {
        let f = &self.flags;
        use Mnemonic::*;
        match mnemonic {
            Jo => f.of,
            Jno => !f.of,
            Jc => f.cf,
            Jnc => !f.cf,
            Jz => f.zf,
            Jnz => !f.zf,
            Jbe => f.cf || f.zf,
            Ja => !f.cf && !f.zf,
            Js => f.sf,
            Jns => !f.sf,
            Jp => f.pf,
            Jnp => !f.pf,
            Jl => f.sf != f.of,
            Jge => f.sf == f.of,
            Jle => f.zf || (f.sf != f.of),
            Jg => !f.zf && (f.sf == f.of),
            _ => unreachable!("only conditional-jump mnemonics are checked"),
        }
    }

    fn exec_shift(&mut self, dst: &Operand, count: u32, is_left: bool) -> Result<()> {
        let original = self.read_operand(dst)?;
        let c = count % 32;
        if c == 0 {
            return Ok(());
        }
        let result = if is_left {
            original.wrapping_shl(c)
        } else {
            original.wrapping_shr(c)
        };
        self.write_operand(dst, result)?;
        self.set_zsp(result, 4);
        self.flags.cf = if is_left {
            (original >> (32 - c)) & 1 == 1
        } else {
            (original >> (c - 1)) & 1 == 1
        };
        if c == 1 {
            self.flags.of = if is_left {
                (original >> 31) & 1 != (original >> 30) & 1
            } else {
                (original >> 31) & 1 == 1
            };
        }
        Ok(())
    }

    fn execute(&mut self, instr: &Instruction) -> Result<()> {
        use Mnemonic::*;
        match instr.mnemonic {
            Add | Mov | Movsxd | And | Or | Xor | Sub | Cmp | Test | Adc | Sbb => {
                self.execute_two_operand(instr.mnemonic, &instr.operands)
            }
            Inc | Dec => self.execute_inc_dec(instr.mnemonic, &instr.operands[0]),
            Push => {
                let value = self.read_operand(&instr.operands[0])?;
                self.push(value)
            }
            Pop => {
                let value = self.pop()?;
                self.write_operand(&instr.operands[0], value)
            }
            Jo | Jno | Jc | Jnc | Jz | Jnz | Jbe | Ja | Js | Jns | Jp | Jnp | Jl | Jge | Jle | Jg => {
                if self.condition_holds(instr.mnemonic) {
                    self.exec_jmp(&instr.operands[0]);
                }
                Ok(())
            }
            Xchg => {
                let a = self.read_operand(&instr.operands[0])?;
                let b = self.read_operand(&instr.operands[1])?;
                self.write_operand(&instr.operands[0], b)?;
                self.write_operand(&instr.operands[1], a)?;
                Ok(())
            }
            Nop => Ok(()),
            Pushf => {
                let packed = self.flags.pack();
                self.push(packed)
            }
            Popf => {
                let word = self.pop()?;
                self.flags = Flags::unpack(word);
                self.interrupt_enabled = self.flags.interrupt;
                Ok(())
            }
            Shl => self.exec_shift(&instr.operands[0], self.read_operand(&instr.operands[1])?, true),
            Shr => self.exec_shift(&instr.operands[0], self.read_operand(&instr.operands[1])?, false),
            Ret => {
                self.eip = self.pop()?;
                Ok(())
            }
            Int => {
                self.interrupts += 1;
                Ok(())
            }
            Call => {
                let return_addr = instr.address.wrapping_add(instr.size);
                self.push(return_addr)?;
                self.exec_jmp(&instr.operands[0]);
                Ok(())
            }
            Jmp => {
                self.exec_jmp(&instr.operands[0]);
                Ok(())
            }
            Hlt => {
                self.halted = true;
                Ok(())
            }
            Not => {
                let width = instr.operands[0].width();
                let v = self.read_operand(&instr.operands[0])?;
                let result = !v & width_mask(width) as u32;
                self.write_operand(&instr.operands[0], result)
            }
            Neg => {
                let width = instr.operands[0].width();
                let v = self.read_operand(&instr.operands[0])?;
                let result = Self::sub_width(0, v, width);
                self.apply_arith_flags(0, v, result, width, v != 0, true);
                self.write_operand(&instr.operands[0], result)
            }
            Mul => self.execute_mul(&instr.operands[0]),
            Imul if instr.operands.len() == 1 => self.execute_imul1(&instr.operands[0]),
            Imul => self.execute_imul2(&instr.operands[0], &instr.operands[1]),
            Div => self.execute_div(&instr.operands[0]),
            Idiv => self.execute_idiv(&instr.operands[0]),
            Cli => {
                self.flags.interrupt = false;
                self.interrupt_enabled = false;
                Ok(())
            }
            Sti => {
                self.flags.interrupt = true;
                self.interrupt_enabled = true;
                Ok(())
            }
            Cld => {
                self.flags.df = false;
                Ok(())
            }
            Std => {
                self.flags.df = true;
                Ok(())
            }
            Rdtsc => {
                let micros = self.started_at.elapsed().as_micros() as u64;
                self.registers.eax = micros as u32;
                self.registers.edx = (micros >> 32) as u32;
                Ok(())
            }
            Rdrand | Rdseed => {
                let value: u32 = rand::random();
                self.write_operand(&instr.operands[0], value)?;
                self.flags.cf = true;
                self.flags.of = false;
                self.flags.sf = false;
                self.flags.zf = false;
                self.flags.af = false;
                self.flags.pf = false;
                Ok(())
            }
        }
    }

    fn execute_two_operand(&mut self, mnemonic: Mnemonic, operands: &[Operand]) -> Result<()> {
        let (dst, src) = (&operands[0], &operands[1]);
        let width = dst.width();

        match mnemonic {
            Mnemonic::Mov | Mnemonic::Movsxd => {
                let value = self.read_operand(src)?;
                self.write_operand(dst, value)
            }
            Mnemonic::Add => {
                let a = self.read_operand(dst)?;
                let b = self.read_operand(src)?;
                let result = Self::add_width(a, b, width);
                let carry = (a as u64 & width_mask(width)) + (b as u64 & width_mask(width)) > width_mask(width);
                self.apply_arith_flags(a, b, result, width, carry, false);
                self.write_operand(dst, result)
            }
            Mnemonic::Adc => {
                let a = self.read_operand(dst)?;
                let b = self.read_operand(src)?;
                let cf_in = self.flags.cf as u64;
                let mask = width_mask(width);
                let sum = (a as u64 & mask) + (b as u64 & mask) + cf_in;
                let result = (sum & mask) as u32;
                self.apply_arith_flags(a, b, result, width, sum > mask, false);
                self.write_operand(dst, result)
            }
            Mnemonic::Sub | Mnemonic::Cmp => {
                let a = self.read_operand(dst)?;
                let b = self.read_operand(src)?;
                let result = Self::sub_width(a, b, width);
                let carry = (a as u64 & width_mask(width)) < (b as u64 & width_mask(width));
                self.apply_arith_flags(a, b, result, width, carry, true);
                if mnemonic == Mnemonic::Sub {
                    self.write_operand(dst, result)
                } else {
                    Ok(())
                }
            }
            Mnemonic::Sbb => {
                let a = self.read_operand(dst)?;
                let b = self.read_operand(src)?;
                let cf_in = self.flags.cf as i64;
                let diff = (a as i64) - (b as i64) - cf_in;
                let mask = width_mask(width);
                let result = (diff as u64 & mask) as u32;
                self.apply_arith_flags(a, b, result, width, diff < 0, true);
                self.write_operand(dst, result)
            }
            Mnemonic::And | Mnemonic::Test => {
                let a = self.read_operand(dst)?;
                let b = self.read_operand(src)?;
                let result = a & b;
                self.flags_logic(result, width);
                if mnemonic == Mnemonic::And {
                    self.write_operand(dst, result)
                } else {
                    Ok(())
                }
            }
            Mnemonic::Or => {
                let a = self.read_operand(dst)?;
                let b = self.read_operand(src)?;
                let result = a | b;
                self.flags_logic(result, width);
                self.write_operand(dst, result)
            }
            Mnemonic::Xor => {
                let a = self.read_operand(dst)?;
                let b = self.read_operand(src)?;
                let result = a ^ b;
                self.flags_logic(result, width);
                self.write_operand(dst, result)
            }
            _ => unreachable!("execute_two_operand is only called for the arms listed above"),
        }
    }

    fn execute_inc_dec(&mut self, mnemonic: Mnemonic, dst: &Operand) -> Result<()> {
        let width = dst.width();
        let a = self.read_operand(dst)?;
        if mnemonic == Mnemonic::Inc {
            let result = Self::add_width(a, 1, width);
            let carry = (a as u64 & width_mask(width)) + 1 > width_mask(width);
            self.apply_arith_flags(a, 1, result, width, carry, false);
            self.write_operand(dst, result)
        } else {
            let result = Self::sub_width(a, 1, width);
            let carry = (a as u64 & width_mask(width)) < 1;
            self.apply_arith_flags(a, 1, result, width, carry, true);
            self.write_operand(dst, result)
        }
    }

    fn execute_mul(&mut self, src: &Operand) -> Result<()> {
        let src_val = self.read_operand(src)? as u64;
        let eax = self.registers.eax as u64;
        let product = eax * src_val;
        self.registers.eax = (product & 0xFFFF_FFFF) as u32;
        self.registers.edx = (product >> 32) as u32;
        let overflow = product > 0xFFFF_FFFF;
        self.flags.cf = overflow;
        self.flags.of = overflow;
        Ok(())
    }

    fn execute_imul1(&mut self, src: &Operand) -> Result<()> {
        let src_val = self.read_operand(src)? as i32 as i64;
        let eax = self.registers.eax as i32 as i64;
        let product = eax * src_val;
        self.registers.eax = (product as u64 & 0xFFFF_FFFF) as u32;
        self.registers.edx = ((product as u64) >> 32) as u32;
        let overflow = product < i32::MIN as i64 || product > i32::MAX as i64;
        self.flags.cf = overflow;
        self.flags.of = overflow;
        Ok(())
    }

    fn execute_imul2(&mut self, dst: &Operand, src: &Operand) -> Result<()> {
        let a = self.read_operand(dst)? as i32 as i64;
        let b = self.read_operand(src)? as i32 as i64;
        let product = a * b;
        let result = (product as u64 & 0xFFFF_FFFF) as u32;
        let overflow = product < i32::MIN as i64 || product > i32::MAX as i64;
        self.flags.cf = overflow;
        self.flags.of = overflow;
        self.set_zsp(result, 4);
        self.write_operand(dst, result)
    }

    fn execute_div(&mut self, src: &Operand) -> Result<()> {
        let divisor = self.read_operand(src)? as u64;
        if divisor == 0 {
            return Err(Error::DivideByZero);
        }
        let dividend = self.registers.eax as u64;
        let quotient = dividend / divisor;
        let remainder = dividend % divisor;
        self.registers.eax = quotient as u32;
        self.registers.edx = remainder as u32;
        Ok(())
    }

    fn execute_idiv(&mut self, src: &Operand) -> Result<()> {
        let divisor = self.read_operand(src)? as i32 as i64;
        if divisor == 0 {
            return Err(Error::DivideByZero);
        }
        let dividend = (((self.registers.edx as u64) << 32) | self.registers.eax as u64) as i64;
        let quotient = dividend / divisor;
        let remainder = dividend % divisor;
        if quotient < i32::MIN as i64 || quotient > i32::MAX as i64 {
            return Err(Error::DivideOverflow);
        }
        self.registers.eax = quotient as u32;
        self.registers.edx = remainder as u32;
        Ok(())
    }
}
