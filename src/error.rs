// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Error codes used throughout the simulator core.
//!
//! Mirrors the reference kernel's preference for a small, `Copy`-able enum
//! over a boxed/dynamic error type: every fallible operation in [`crate::mmu`]
//! and [`crate::cpu`] returns [`Result<T>`], never `anyhow::Result` or a
//! trait object.

use std::fmt;

/// The error type returned from the APIs of this crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The decoder encountered a byte sequence with no mapping in the
    /// closed opcode table (unknown opcode, unknown two-byte extension, or
    /// an undefined ModR/M.reg subop for an opcode group).
    Decode {
        /// Virtual address of the opcode byte that failed to decode.
        address: u32,
        /// The offending byte.
        byte: u8,
        /// Human-readable detail (e.g. "unknown opcode", "0x0F 0xC7 /n").
        detail: &'static str,
    },
    /// A physical memory access fell outside `[0, memory_size)`.
    MemoryAccessViolation {
        /// Physical address of the access.
        address: u32,
        /// Width of the access in bytes.
        size: u8,
    },
    /// Frame allocation could not proceed: every resident page is
    /// protected and no free frames remain.
    OutOfPhysicalMemory,
    /// DIV/IDIV with a zero divisor.
    DivideByZero,
    /// IDIV whose quotient does not fit in a signed 32-bit range.
    DivideOverflow,
    /// A requested register name was not one of the 16 permitted
    /// identifiers (8 general-purpose 32-bit registers, 8 byte registers).
    UnknownRegister(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Decode { address, byte, detail } => write!(
                f,
                "decode error at {:#010x}: byte {:#04x}: {}",
                address, byte, detail
            ),
            Error::MemoryAccessViolation { address, size } => write!(
                f,
                "memory access violation: {}-byte access at physical address {:#010x}",
                size, address
            ),
            Error::OutOfPhysicalMemory => {
                write!(f, "out of physical memory: every resident page is protected")
            }
            Error::DivideByZero => write!(f, "division by zero"),
            Error::DivideOverflow => write!(f, "division overflow"),
            Error::UnknownRegister(name) => write!(f, "unknown register: {}", name),
        }
    }
}

impl std::error::Error for Error {}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
