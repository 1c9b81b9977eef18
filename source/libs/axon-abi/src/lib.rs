// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]

//! CONTEXT: Shared ABI definitions between the AXON kernel and user libraries
//! OWNERS: @kernel-team
//! PUBLIC API: layout constants, PteFlags, Error, Syscall, Trapframe/UTrapframe, UserContext
//! DEPENDS_ON: no_std, bitflags
//! INVARIANTS: Frame layouts are byte-stable; syscall numbers and error codes never change meaning

pub mod error;
pub mod frames;
pub mod layout;
pub mod net;
pub mod sys;

pub use error::Error;
pub use frames::{PushRegs, Trapframe, UTrapframe, FEC_PR, FEC_U, FEC_WR, FL_IF};
pub use layout::{PteFlags, PFENTRY, PFTEMP, PGSIZE, ULIM, UENVS, USTACKTOP, UTOP, UVPT, UXSTACKTOP};
pub use sys::{
    Destroyed, EnvId, EnvInfo, EnvStatus, PgfaultHandler, Syscall, UserContext, UserResult, NENV,
};
