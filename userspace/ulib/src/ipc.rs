// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! IPC helpers over the raw rendezvous syscalls.

use axon_abi::layout::{PteFlags, UTOP};
use axon_abi::sys::{sys_result, EnvId, Syscall, UserContext, UserResult};
use axon_abi::Error;

use crate::syscall::sys_yield;

/// A delivered message: the sender's value and identity, plus the
/// permissions of the granted page (zero when none came along).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpcMessage {
    /// The 32-bit payload.
    pub value: u32,
    /// Who sent it.
    pub from: EnvId,
    /// Permissions of the mapped page, zero if no page was transferred.
    pub perm: u32,
}

/// Blocks until a message arrives. `pg` is where a granted page should be
/// mapped; `None` refuses page transfer. The syscall itself only returns
/// directly on argument errors.
pub fn ipc_recv(ctx: &mut dyn UserContext, pg: Option<u32>) -> UserResult<Result<IpcMessage, Error>> {
    let dstva = pg.unwrap_or(UTOP);
    let ret = ctx.syscall(Syscall::IpcRecv, [dstva, 0, 0, 0, 0])?;
    if let Err(err) = sys_result(ret) {
        return Ok(Err(err));
    }
    let me = ctx.thisenv()?;
    Ok(Ok(IpcMessage {
        value: me.ipc_value,
        from: EnvId(me.ipc_from),
        perm: me.ipc_perm,
    }))
}

/// Sends `value` (plus the page at `pg`, if any) to `to`, retrying with a
/// yield for as long as the receiver is not ready. Any other failure is a
/// protocol bug.
pub fn ipc_send(
    ctx: &mut dyn UserContext,
    to: EnvId,
    value: u32,
    pg: Option<u32>,
    perm: PteFlags,
) -> UserResult<()> {
    let srcva = pg.unwrap_or(UTOP);
    loop {
        let ret = ctx.syscall(Syscall::IpcTrySend, [to.raw(), value, srcva, perm.bits(), 0])?;
        match sys_result(ret) {
            Ok(_) => return Ok(()),
            Err(Error::IpcNotRecv) => sys_yield(ctx)?,
            Err(err) => panic!("ipc_send: {}", err),
        }
    }
}
