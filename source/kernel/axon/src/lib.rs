// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! AXON kernel library - no binary entry here.
//!
//! The kernel exports a minimal set of primitives: per-environment address
//! spaces, preemptive user scheduling, trap delivery with user-level
//! page-fault upcalls, a capability-checked syscall surface, and a
//! synchronous IPC rendezvous. Policy, including fork, lives in userspace.

#![cfg_attr(all(not(test), target_os = "none"), no_std)]

extern crate alloc;

mod config;
mod console;
mod env;
mod ipc;
mod kernel;
mod mm;
mod net;
mod sched;
mod syscall;
mod trap;

pub mod arch;
pub mod hal;

#[cfg(test)]
mod tests_prop;

pub use config::Config;
pub use console::Console;
pub use env::{Env, EnvTable, IpcState};
pub use kernel::{Kernel, KernelExit};
pub use mm::{AddressSpace, PhysMem, Ppn, PteRef};
pub use net::Nic;
pub use syscall::SysReturn;
pub use trap::{describe_trap, last_trap, IRQ_OFFSET, IRQ_SPURIOUS, IRQ_TIMER, T_BRKPT, T_PGFLT, T_SYSCALL};
