// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Thin wrappers putting names and types on the raw syscall registers.

use axon_abi::layout::PteFlags;
use axon_abi::sys::{sys_result, EnvId, EnvStatus, Syscall, UserContext, UserResult};
use axon_abi::Error;

/// A syscall's outcome: destroyed-environment on the outside, the kernel's
/// own error namespace on the inside.
pub type SysCall<T> = UserResult<Result<T, Error>>;

fn call(ctx: &mut dyn UserContext, num: Syscall, args: [u32; 5]) -> SysCall<i32> {
    Ok(sys_result(ctx.syscall(num, args)?))
}

/// Prints `len` bytes mapped at `s` in the caller's space.
pub fn sys_cputs(ctx: &mut dyn UserContext, s: u32, len: u32) -> SysCall<()> {
    Ok(call(ctx, Syscall::Cputs, [s, len, 0, 0, 0])?.map(|_| ()))
}

/// Non-blocking console read.
pub fn sys_cgetc(ctx: &mut dyn UserContext) -> SysCall<i32> {
    call(ctx, Syscall::Cgetc, [0; 5])
}

/// The caller's environment id.
pub fn sys_getenvid(ctx: &mut dyn UserContext) -> UserResult<EnvId> {
    let raw = ctx.syscall(Syscall::Getenvid, [0; 5])?;
    Ok(EnvId(raw as u32))
}

/// Destroys `envid` (zero for self).
pub fn sys_env_destroy(ctx: &mut dyn UserContext, envid: EnvId) -> SysCall<()> {
    Ok(call(ctx, Syscall::EnvDestroy, [envid.raw(), 0, 0, 0, 0])?.map(|_| ()))
}

/// Gives up the CPU.
pub fn sys_yield(ctx: &mut dyn UserContext) -> UserResult<()> {
    ctx.syscall(Syscall::Yield, [0; 5])?;
    Ok(())
}

/// Allocates a zeroed page at `va` in `envid`.
pub fn sys_page_alloc(ctx: &mut dyn UserContext, envid: EnvId, va: u32, perm: PteFlags) -> SysCall<()> {
    Ok(call(ctx, Syscall::PageAlloc, [envid.raw(), va, perm.bits(), 0, 0])?.map(|_| ()))
}

/// Maps `src_va` of `src` at `dst_va` of `dst` with `perm`.
pub fn sys_page_map(
    ctx: &mut dyn UserContext,
    src: EnvId,
    src_va: u32,
    dst: EnvId,
    dst_va: u32,
    perm: PteFlags,
) -> SysCall<()> {
    Ok(call(ctx, Syscall::PageMap, [src.raw(), src_va, dst.raw(), dst_va, perm.bits()])?.map(|_| ()))
}

/// Unmaps `va` in `envid`; fine when nothing is mapped.
pub fn sys_page_unmap(ctx: &mut dyn UserContext, envid: EnvId, va: u32) -> SysCall<()> {
    Ok(call(ctx, Syscall::PageUnmap, [envid.raw(), va, 0, 0, 0])?.map(|_| ()))
}

/// Allocates a blank child carrying the caller's register state. Returns
/// the child id in the parent, zero in the child when it first runs.
pub fn sys_exofork(ctx: &mut dyn UserContext) -> SysCall<i32> {
    call(ctx, Syscall::Exofork, [0; 5])
}

/// Flips `envid` between runnable and parked.
pub fn sys_env_set_status(ctx: &mut dyn UserContext, envid: EnvId, status: EnvStatus) -> SysCall<()> {
    Ok(call(ctx, Syscall::EnvSetStatus, [envid.raw(), status as u32, 0, 0, 0])?.map(|_| ()))
}

/// Registers `entry` as the page-fault upcall of `envid`.
pub fn sys_env_set_pgfault_upcall(ctx: &mut dyn UserContext, envid: EnvId, entry: u32) -> SysCall<()> {
    Ok(call(ctx, Syscall::EnvSetPgfaultUpcall, [envid.raw(), entry, 0, 0, 0])?.map(|_| ()))
}

/// Milliseconds since boot.
pub fn sys_time_msec(ctx: &mut dyn UserContext) -> UserResult<u32> {
    Ok(ctx.syscall(Syscall::TimeMsec, [0; 5])? as u32)
}

/// Hands `len` bytes at `data` to the network driver.
pub fn sys_net_try_send(ctx: &mut dyn UserContext, data: u32, len: u32) -> SysCall<()> {
    Ok(call(ctx, Syscall::NetTrySend, [data, len, 0, 0, 0])?.map(|_| ()))
}

/// Pulls one received frame into the 1518-byte buffer at `data`; returns
/// its length.
pub fn sys_net_try_recv(ctx: &mut dyn UserContext, data: u32) -> SysCall<i32> {
    call(ctx, Syscall::NetTryRecv, [data, 0, 0, 0, 0])
}
