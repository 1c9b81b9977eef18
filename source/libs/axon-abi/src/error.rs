// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Kernel error namespace shared with user mode.
//!
//! Syscalls return a 32-bit signed value; failures are the negated codes
//! below, successes are zero or positive payloads.

use core::fmt;

/// Errors surfaced across the syscall boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i32)]
pub enum Error {
    /// Unspecified failure.
    Unspecified = 1,
    /// Environment id is stale, free, or outside the caller's authority.
    BadEnv = 2,
    /// Argument validation failed.
    Inval = 3,
    /// Out of physical frames.
    NoMem = 4,
    /// The environment table is full.
    NoFreeEnv = 5,
    /// IPC target is not waiting, or another sender won the race.
    IpcNotRecv = 6,
    /// Transmit DMA ring has no free slot; the frame was dropped.
    CblFull = 7,
    /// Transmit DMA ring has nothing to reclaim.
    CblEmpty = 8,
    /// Receive DMA ring has no free descriptor.
    RfaFull = 9,
    /// Receive DMA ring is drained; retry after a yield.
    RfaEmpty = 10,
}

impl Error {
    /// Negative wire representation of this error.
    pub const fn code(self) -> i32 {
        -(self as i32)
    }

    /// Decodes a negative return value; `None` for non-errors or unknown codes.
    pub const fn from_code(code: i32) -> Option<Error> {
        match -code {
            1 => Some(Error::Unspecified),
            2 => Some(Error::BadEnv),
            3 => Some(Error::Inval),
            4 => Some(Error::NoMem),
            5 => Some(Error::NoFreeEnv),
            6 => Some(Error::IpcNotRecv),
            7 => Some(Error::CblFull),
            8 => Some(Error::CblEmpty),
            9 => Some(Error::RfaFull),
            10 => Some(Error::RfaEmpty),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Error::Unspecified => "unspecified error",
            Error::BadEnv => "bad environment",
            Error::Inval => "invalid parameter",
            Error::NoMem => "out of memory",
            Error::NoFreeEnv => "out of environments",
            Error::IpcNotRecv => "env is not recving",
            Error::CblFull => "transmit ring full",
            Error::CblEmpty => "transmit ring empty",
            Error::RfaFull => "receive ring full",
            Error::RfaEmpty => "receive ring empty",
        };
        f.write_str(name)
    }
}
