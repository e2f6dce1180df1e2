// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Core simulator for an IA-32-style processor.
//!
//! This crate implements the fetch-decode-execute pipeline and the memory
//! management unit (paging, TLB, two-level cache) of a small, bit-exact
//! IA-32-style machine. It is deliberately scoped to the CPU/MMU core: a
//! graphical dashboard, program loaders beyond [`mmu::Mmu::load_program`],
//! persistent storage, real interrupt delivery, segmentation enforcement,
//! floating point, and SIMD are all external collaborators this crate does
//! not model.
//!
//! # Organization
//!
//! - [`error`] - the crate-wide error and result types
//! - [`mmu`] - physical memory, paging, TLB, and the L1/L2 cache hierarchy
//! - [`decoder`] - the byte-stream instruction decoder
//! - [`cpu`] - architectural state and the step loop

pub mod cpu;
pub mod decoder;
pub mod error;
pub mod mmu;

pub use cpu::registers::{ControlRegisters, Flags, GeneralRegisters, SegmentRegisters};
pub use cpu::stats::CpuStatistics;
pub use cpu::{Cpu, CpuState};
pub use decoder::{Decoder, Instruction, Mnemonic, Operand, RegName};
pub use error::{Error, Result};
pub use mmu::stats::MmuStatistics;
pub use mmu::Mmu;
