// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Synchronous IPC rendezvous: the receiver blocks, the sender never does.
//!
//! There is no queue. A receiver opens the slot by parking itself; exactly
//! one sender closes it. `ipc_from != 0` is the one-shot guard catching the
//! race where two senders both observed `recving`.

use axon_abi::layout::{self, PteFlags, UTOP};
use axon_abi::sys::{EnvId, EnvStatus};
use axon_abi::Error;

use crate::kernel::Kernel;
use crate::syscall::SysReturn;

impl Kernel {
    /// Parks the caller until a sender delivers. A `dstva` below `UTOP`
    /// accepts a page grant at that address. This path never returns
    /// through the caller's syscall exit: the zero preloaded into the saved
    /// return register is what the caller sees when a sender wakes it.
    pub(crate) fn sys_ipc_recv(&mut self, idx: usize, dstva: u32) -> SysReturn {
        let dstva = if dstva < UTOP {
            if !layout::page_aligned(dstva) {
                return SysReturn::Value(Error::Inval.code());
            }
            Some(dstva)
        } else {
            None
        };

        let env = self.envs.get_mut(idx);
        env.ipc.recving = true;
        env.ipc.dstva = dstva;
        env.ipc.from = EnvId::NONE;
        env.ipc.value = 0;
        env.ipc.perm = 0;
        env.status = EnvStatus::NotRunnable;
        env.tf.regs.eax = 0;
        SysReturn::Blocked
    }

    /// Delivers `value` (and optionally the page at `srcva`) to `to`. Open
    /// across the whole table: no descendant gate. Loses the race with
    /// `IPC_NOT_RECV`; on any error nothing is delivered.
    pub(crate) fn sys_ipc_try_send(
        &mut self,
        idx: usize,
        to: EnvId,
        value: u32,
        srcva: u32,
        perm: u32,
    ) -> Result<i32, Error> {
        let target = self.envs.lookup(to, Some(idx), false)?;
        {
            let dst = self.envs.get(target);
            if !dst.ipc.recving || dst.ipc.from != EnvId::NONE {
                return Err(Error::IpcNotRecv);
            }
        }

        let mut grant = None;
        if srcva < UTOP {
            if !layout::page_aligned(srcva) {
                return Err(Error::Inval);
            }
            let perm = crate::syscall::checked_perm(perm)?;
            let src_aspace = self.envs.get(idx).aspace.expect("live env has a directory");
            let (page, pte) = src_aspace.lookup_page(&self.mem, srcva).ok_or(Error::Inval)?;
            if perm.contains(PteFlags::W) && !pte.flags().contains(PteFlags::W) {
                return Err(Error::Inval);
            }
            // The transfer happens only when the receiver asked for a page.
            if let Some(dstva) = self.envs.get(target).ipc.dstva {
                let dst_aspace = self.envs.get(target).aspace.expect("live env has a directory");
                dst_aspace.insert(&mut self.mem, page, dstva, perm)?;
                grant = Some(perm);
            }
        }

        let from = self.envs.get(idx).id;
        let dst = self.envs.get_mut(target);
        dst.ipc.perm = grant.map_or(0, |perm| perm.bits());
        dst.ipc.recving = false;
        dst.ipc.from = from;
        dst.ipc.value = value;
        dst.tf.regs.eax = 0;
        dst.status = EnvStatus::Runnable;
        Ok(0)
    }
}
