// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Capability-checked syscall surface
//! OWNERS: @kernel-team
//! PUBLIC API: SysReturn; dispatch via Kernel::syscall
//! DEPENDS_ON: env::EnvTable, mm, ipc, net, console
//! INVARIANTS: Stable numbers; every user va below UTOP and page aligned;
//!             permission masks fit the user-allowed set; foreign-env calls
//!             pass the descendant gate

use axon_abi::frames::{Trapframe, FL_IF, GD_UT};
use axon_abi::layout::{self, PteFlags, UTOP};
use axon_abi::net::PKT_DATA_MAX;
use axon_abi::sys::{EnvId, EnvStatus, Syscall};
use axon_abi::Error;

use crate::kernel::Kernel;

/// How a syscall leaves the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SysReturn {
    /// Write this into the caller's saved return register and resume it.
    Value(i32),
    /// The caller parked itself; the wake path returns for it.
    Blocked,
    /// The caller asked for the scheduler.
    Yield,
    /// The caller was destroyed during the call; nothing to resume.
    Gone,
}

fn value_of(result: Result<i32, Error>) -> SysReturn {
    SysReturn::Value(result.unwrap_or_else(|err| err.code()))
}

/// Validates a user-supplied permission mask: `P|U` required, nothing
/// outside the user-accessible set, and never writable and copy-on-write at
/// once.
pub(crate) fn checked_perm(raw: u32) -> Result<PteFlags, Error> {
    let perm = PteFlags::from_bits(raw).ok_or(Error::Inval)?;
    if !perm.contains(PteFlags::P | PteFlags::U) {
        return Err(Error::Inval);
    }
    if !perm.difference(PteFlags::SYSCALL_ALLOWED).is_empty() {
        return Err(Error::Inval);
    }
    if perm.contains(PteFlags::W) && perm.contains(PteFlags::COW) {
        return Err(Error::Inval);
    }
    Ok(perm)
}

/// Validates a user virtual address argument.
fn checked_user_va(va: u32) -> Result<u32, Error> {
    if va >= UTOP || !layout::page_aligned(va) {
        return Err(Error::Inval);
    }
    Ok(va)
}

impl Kernel {
    /// The numbered entry point. `num` arrives in the accumulator, the five
    /// arguments in the remaining registers.
    pub(crate) fn syscall(&mut self, idx: usize, num: u32, args: [u32; 5]) -> SysReturn {
        let Some(sys) = Syscall::from_raw(num) else {
            return SysReturn::Value(Error::Inval.code());
        };
        match sys {
            Syscall::Cputs => self.sys_cputs(idx, args[0], args[1]),
            Syscall::Cgetc => SysReturn::Value(self.console.getc()),
            Syscall::Getenvid => SysReturn::Value(self.envs.get(idx).id.raw() as i32),
            Syscall::EnvDestroy => self.sys_env_destroy(idx, EnvId(args[0])),
            Syscall::PageAlloc => value_of(self.sys_page_alloc(idx, EnvId(args[0]), args[1], args[2])),
            Syscall::PageMap => value_of(self.sys_page_map(
                idx,
                EnvId(args[0]),
                args[1],
                EnvId(args[2]),
                args[3],
                args[4],
            )),
            Syscall::PageUnmap => value_of(self.sys_page_unmap(idx, EnvId(args[0]), args[1])),
            Syscall::Exofork => value_of(self.sys_exofork(idx)),
            Syscall::EnvSetStatus => value_of(self.sys_env_set_status(idx, EnvId(args[0]), args[1])),
            Syscall::EnvSetTrapframe => self.sys_env_set_trapframe(idx, EnvId(args[0]), args[1]),
            Syscall::EnvSetPgfaultUpcall => {
                value_of(self.sys_env_set_pgfault_upcall(idx, EnvId(args[0]), args[1]))
            }
            Syscall::Yield => SysReturn::Yield,
            Syscall::IpcTrySend => {
                value_of(self.sys_ipc_try_send(idx, EnvId(args[0]), args[1], args[2], args[3]))
            }
            Syscall::IpcRecv => self.sys_ipc_recv(idx, args[0]),
            Syscall::TimeMsec => SysReturn::Value(self.time_msec() as i32),
            Syscall::NetTrySend => self.sys_net_try_send(idx, args[0], args[1]),
            Syscall::NetTryRecv => self.sys_net_try_recv(idx, args[0]),
        }
    }

    fn sys_cputs(&mut self, idx: usize, s: u32, len: u32) -> SysReturn {
        if self.user_mem_assert(idx, s, len, PteFlags::empty()).is_err() {
            return SysReturn::Gone;
        }
        let bytes = self
            .copy_from_user(idx, s, len as usize)
            .expect("range was just checked readable");
        self.console.puts(&bytes);
        SysReturn::Value(0)
    }

    fn sys_env_destroy(&mut self, idx: usize, envid: EnvId) -> SysReturn {
        let target = match self.envs.lookup(envid, Some(idx), true) {
            Ok(target) => target,
            Err(err) => return SysReturn::Value(err.code()),
        };
        self.destroy_env(target);
        if target == idx {
            SysReturn::Gone
        } else {
            SysReturn::Value(0)
        }
    }

    fn sys_page_alloc(&mut self, idx: usize, envid: EnvId, va: u32, perm: u32) -> Result<i32, Error> {
        let va = checked_user_va(va)?;
        let perm = checked_perm(perm)?;
        let target = self.envs.lookup(envid, Some(idx), true)?;
        let page = self.mem.page_alloc(true)?;
        let aspace = self.envs.get(target).aspace.expect("live env has a directory");
        if let Err(err) = aspace.insert(&mut self.mem, page, va, perm) {
            self.mem.page_release(page);
            return Err(err);
        }
        Ok(0)
    }

    fn sys_page_map(
        &mut self,
        idx: usize,
        src_id: EnvId,
        src_va: u32,
        dst_id: EnvId,
        dst_va: u32,
        perm: u32,
    ) -> Result<i32, Error> {
        let src_va = checked_user_va(src_va)?;
        let dst_va = checked_user_va(dst_va)?;
        let perm = checked_perm(perm)?;
        let src = self.envs.lookup(src_id, Some(idx), true)?;
        let dst = self.envs.lookup(dst_id, Some(idx), true)?;

        let src_aspace = self.envs.get(src).aspace.expect("live env has a directory");
        let (page, pte) = src_aspace.lookup_page(&self.mem, src_va).ok_or(Error::Inval)?;
        if perm.contains(PteFlags::W) && !pte.flags().contains(PteFlags::W) {
            return Err(Error::Inval);
        }

        let dst_aspace = self.envs.get(dst).aspace.expect("live env has a directory");
        dst_aspace.insert(&mut self.mem, page, dst_va, perm)?;
        Ok(0)
    }

    fn sys_page_unmap(&mut self, idx: usize, envid: EnvId, va: u32) -> Result<i32, Error> {
        let va = checked_user_va(va)?;
        let target = self.envs.lookup(envid, Some(idx), true)?;
        let aspace = self.envs.get(target).aspace.expect("live env has a directory");
        aspace.remove(&mut self.mem, va);
        Ok(0)
    }

    fn sys_exofork(&mut self, idx: usize) -> Result<i32, Error> {
        let parent_id = self.envs.get(idx).id;
        let parent_tf = self.envs.get(idx).tf;
        let child = self.envs.alloc(&mut self.mem, parent_id)?;
        let env = self.envs.get_mut(child);
        env.tf = parent_tf;
        // The child wakes up inside this very call and must see it succeed
        // with "you are the child".
        env.tf.regs.eax = 0;
        Ok(env.id.raw() as i32)
    }

    fn sys_env_set_status(&mut self, idx: usize, envid: EnvId, status: u32) -> Result<i32, Error> {
        let status = match EnvStatus::from_raw(status) {
            Some(status @ (EnvStatus::Runnable | EnvStatus::NotRunnable)) => status,
            _ => return Err(Error::Inval),
        };
        let target = self.envs.lookup(envid, Some(idx), true)?;
        self.envs.get_mut(target).status = status;
        Ok(0)
    }

    fn sys_env_set_trapframe(&mut self, idx: usize, envid: EnvId, tf_va: u32) -> SysReturn {
        let target = match self.envs.lookup(envid, Some(idx), true) {
            Ok(target) => target,
            Err(err) => return SysReturn::Value(err.code()),
        };
        if self
            .user_mem_assert(idx, tf_va, Trapframe::SIZE, PteFlags::empty())
            .is_err()
        {
            return SysReturn::Gone;
        }
        let bytes = self
            .copy_from_user(idx, tf_va, Trapframe::SIZE as usize)
            .expect("range was just checked readable");
        let mut tf = Trapframe::from_bytes(&bytes.try_into().expect("exact frame size"));
        // User code may hand over any register image, but never privilege:
        // it runs at CPL 3 and cannot mask interrupts.
        tf.cs = GD_UT | 3;
        tf.eflags |= FL_IF;
        self.envs.get_mut(target).tf = tf;
        SysReturn::Value(0)
    }

    fn sys_env_set_pgfault_upcall(&mut self, idx: usize, envid: EnvId, func: u32) -> Result<i32, Error> {
        let target = self.envs.lookup(envid, Some(idx), true)?;
        self.envs.get_mut(target).pgfault_upcall = func;
        Ok(0)
    }

    fn sys_net_try_send(&mut self, idx: usize, data: u32, len: u32) -> SysReturn {
        if self.nic.is_none() || len as usize > PKT_DATA_MAX {
            return SysReturn::Value(Error::Inval.code());
        }
        if self.user_mem_assert(idx, data, len, PteFlags::empty()).is_err() {
            return SysReturn::Gone;
        }
        let frame = self
            .copy_from_user(idx, data, len as usize)
            .expect("range was just checked readable");
        let Kernel { nic, mem, .. } = self;
        value_of(nic.as_mut().expect("checked above").xmit(mem, &frame).map(|()| 0))
    }

    fn sys_net_try_recv(&mut self, idx: usize, data: u32) -> SysReturn {
        if self.nic.is_none() {
            return SysReturn::Value(Error::Inval.code());
        }
        if self
            .user_mem_assert(idx, data, PKT_DATA_MAX as u32, PteFlags::W)
            .is_err()
        {
            return SysReturn::Gone;
        }
        let mut frame = [0u8; PKT_DATA_MAX];
        let received = {
            let Kernel { nic, mem, .. } = self;
            nic.as_mut().expect("checked above").rx(mem, &mut frame)
        };
        match received {
            Ok(len) => {
                self.copy_to_user(idx, data, &frame[..len])
                    .expect("range was just checked writable");
                SysReturn::Value(len as i32)
            }
            Err(err) => SysReturn::Value(err.code()),
        }
    }
}
