// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![no_std]

//! CONTEXT: User-level runtime for AXON environments
//! OWNERS: @userspace-team
//! PUBLIC API: fork, set_pgfault_handler, ipc_send/ipc_recv, sys_* wrappers
//! DEPENDS_ON: axon-abi only; executes over any axon_abi::UserContext
//! INVARIANTS: Policy lives here; the kernel only supplies the primitives
//!
//! Everything in this crate runs in user mode. The kernel gives out bare
//! primitives (exofork, page mapping, upcalls, a rendezvous); this library
//! builds the usable pieces on top: copy-on-write `fork`, the page-fault
//! handler that makes it work, and retrying IPC helpers.

mod fork;
mod ipc;
mod pgfault;
pub mod syscall;

pub use fork::fork;
pub use ipc::{ipc_recv, ipc_send, IpcMessage};
pub use pgfault::{cow_pgfault, set_pgfault_handler};
