// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Syscall numbering, environment identity, and the user-context seam.

use crate::error::Error;
use crate::frames::UTrapframe;
use crate::layout::UENVS;

/// Number of environment-table slots; also the id index modulus.
pub const NENV: usize = 1024;
/// log2 of [`NENV`].
pub const LOG2NENV: u32 = 10;
/// Shift applied to the generation counter inside an id.
pub const ENVGENSHIFT: u32 = 12;

/// Generational environment id. Zero is never a valid id; in syscall
/// arguments it stands for "the calling environment".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct EnvId(
    /// Raw id bits: generation in the high bits, table index in the low.
    pub u32,
);

impl EnvId {
    /// The "none"/"current" sentinel.
    pub const NONE: EnvId = EnvId(0);

    /// Table index encoded in the low bits.
    pub const fn index(self) -> usize {
        (self.0 as usize) & (NENV - 1)
    }

    /// Raw wire representation.
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl core::fmt::LowerHex for EnvId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::LowerHex::fmt(&self.0, f)
    }
}

/// Lifecycle state of an environment slot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum EnvStatus {
    /// Slot is unused.
    #[default]
    Free = 0,
    /// Tear-down in progress.
    Dying = 1,
    /// Eligible to run.
    Runnable = 2,
    /// Alive but parked (exofork child, blocked receiver).
    NotRunnable = 3,
}

impl EnvStatus {
    /// Decodes a raw status word; `None` for out-of-range values.
    pub const fn from_raw(raw: u32) -> Option<EnvStatus> {
        match raw {
            0 => Some(EnvStatus::Free),
            1 => Some(EnvStatus::Dying),
            2 => Some(EnvStatus::Runnable),
            3 => Some(EnvStatus::NotRunnable),
            _ => None,
        }
    }
}

/// Stable syscall numbers. The dispatcher and the user library must agree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum Syscall {
    /// Print `n` bytes at `s` to the console.
    Cputs = 0,
    /// Non-blocking console read; zero when no input waits.
    Cgetc = 1,
    /// Caller's environment id.
    Getenvid = 2,
    /// Destroy a target environment.
    EnvDestroy = 3,
    /// Allocate and map a zeroed page in a target.
    PageAlloc = 4,
    /// Duplicate a mapping across address spaces.
    PageMap = 5,
    /// Drop a mapping; silent when nothing is mapped.
    PageUnmap = 6,
    /// Allocate a blank child carrying the caller's register state.
    Exofork = 7,
    /// Flip a target between runnable and parked.
    EnvSetStatus = 8,
    /// Install a full trap frame in a target.
    EnvSetTrapframe = 9,
    /// Register the page-fault upcall entry.
    EnvSetPgfaultUpcall = 10,
    /// Give up the CPU.
    Yield = 11,
    /// Non-blocking IPC send with optional page grant.
    IpcTrySend = 12,
    /// Blocking IPC receive.
    IpcRecv = 13,
    /// Milliseconds since boot.
    TimeMsec = 14,
    /// Hand a frame to the network driver.
    NetTrySend = 15,
    /// Pull a received frame from the network driver.
    NetTryRecv = 16,
}

impl Syscall {
    /// Decodes a raw syscall number.
    pub const fn from_raw(raw: u32) -> Option<Syscall> {
        match raw {
            0 => Some(Syscall::Cputs),
            1 => Some(Syscall::Cgetc),
            2 => Some(Syscall::Getenvid),
            3 => Some(Syscall::EnvDestroy),
            4 => Some(Syscall::PageAlloc),
            5 => Some(Syscall::PageMap),
            6 => Some(Syscall::PageUnmap),
            7 => Some(Syscall::Exofork),
            8 => Some(Syscall::EnvSetStatus),
            9 => Some(Syscall::EnvSetTrapframe),
            10 => Some(Syscall::EnvSetPgfaultUpcall),
            11 => Some(Syscall::Yield),
            12 => Some(Syscall::IpcTrySend),
            13 => Some(Syscall::IpcRecv),
            14 => Some(Syscall::TimeMsec),
            15 => Some(Syscall::NetTrySend),
            16 => Some(Syscall::NetTryRecv),
            _ => None,
        }
    }
}

/// User-visible slice of an environment record, as exposed through the
/// read-only UENVS window.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct EnvInfo {
    /// Generational id.
    pub id: u32,
    /// Creator's id; zero for boot-created environments.
    pub parent_id: u32,
    /// Raw [`EnvStatus`].
    pub status: u32,
    /// Number of times the environment has been resumed.
    pub runs: u32,
    /// Registered page-fault upcall entry; zero when none.
    pub pgfault_upcall: u32,
    /// Last delivered IPC value.
    pub ipc_value: u32,
    /// Sender of the last delivered IPC message.
    pub ipc_from: u32,
    /// Non-zero while parked in `ipc_recv`.
    pub ipc_recving: u32,
    /// Receive-window address, or `UTOP` and above for "no page".
    pub ipc_dstva: u32,
    /// Permissions of the last granted page; zero when none was transferred.
    pub ipc_perm: u32,
}

impl EnvInfo {
    /// Byte size of one record in the UENVS window.
    pub const SIZE: usize = core::mem::size_of::<EnvInfo>();

    /// Decodes one record from window bytes (little endian).
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> EnvInfo {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        EnvInfo {
            id: word(0),
            parent_id: word(4),
            status: word(8),
            runs: word(12),
            pgfault_upcall: word(16),
            ipc_value: word(20),
            ipc_from: word(24),
            ipc_recving: word(28),
            ipc_dstva: word(32),
            ipc_perm: word(36),
        }
    }

    /// Encodes the record into window bytes (little endian).
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        for (i, v) in [
            self.id,
            self.parent_id,
            self.status,
            self.runs,
            self.pgfault_upcall,
            self.ipc_value,
            self.ipc_from,
            self.ipc_recving,
            self.ipc_dstva,
            self.ipc_perm,
        ]
        .into_iter()
        .enumerate()
        {
            out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
        out
    }
}

/// Marker returned when the calling environment no longer exists: the kernel
/// destroyed it (fault without upcall, bad pointer, `env_destroy`), so no
/// further user-mode steps can be taken on its behalf.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Destroyed;

/// Result of a user-mode step.
pub type UserResult<T> = core::result::Result<T, Destroyed>;

/// A user page-fault handler, entered through the trampoline with the
/// synthesized exception-stack frame.
pub type PgfaultHandler = fn(&mut dyn UserContext, &mut UTrapframe);

/// Execution context of one environment: the seam between user-level library
/// code and the machine it runs on. On hardware this is the syscall
/// instruction plus plain loads and stores; the hosted machine implements it
/// against the software MMU.
pub trait UserContext {
    /// Id of the environment this context executes as.
    fn env_id(&self) -> EnvId;

    /// Traps into the kernel with `(num, a1..a5)` in the argument registers.
    fn syscall(&mut self, num: Syscall, args: [u32; 5]) -> UserResult<i32>;

    /// User-mode load of `buf.len()` bytes at `va`. Denied accesses take the
    /// page-fault path (upcall or destruction) before this returns.
    fn read_bytes(&mut self, va: u32, buf: &mut [u8]) -> UserResult<()>;

    /// User-mode store of `buf` at `va`, with the same fault behavior.
    fn write_bytes(&mut self, va: u32, buf: &[u8]) -> UserResult<()>;

    /// Binds handler code to a trampoline entry address, modelling the
    /// fault-entry stub linked into every user program.
    fn register_pgfault_entry(&mut self, entry: u32, handler: PgfaultHandler);

    /// User-mode load of one aligned word.
    fn read_u32(&mut self, va: u32) -> UserResult<u32> {
        let mut bytes = [0u8; 4];
        self.read_bytes(va, &mut bytes)?;
        Ok(u32::from_le_bytes(bytes))
    }

    /// User-mode store of one aligned word.
    fn write_u32(&mut self, va: u32, value: u32) -> UserResult<()> {
        self.write_bytes(va, &value.to_le_bytes())
    }

    /// Reads an environment record out of the UENVS window.
    fn env_record(&mut self, index: usize) -> UserResult<EnvInfo> {
        let mut bytes = [0u8; EnvInfo::SIZE];
        self.read_bytes(UENVS + (index * EnvInfo::SIZE) as u32, &mut bytes)?;
        Ok(EnvInfo::from_bytes(&bytes))
    }

    /// The caller's own record.
    fn thisenv(&mut self) -> UserResult<EnvInfo> {
        let index = self.env_id().index();
        self.env_record(index)
    }
}

/// Converts a raw syscall return into `Result<payload, Error>`.
pub fn sys_result(ret: i32) -> Result<i32, Error> {
    if ret < 0 {
        Err(Error::from_code(ret).unwrap_or(Error::Unspecified))
    } else {
        Ok(ret)
    }
}
