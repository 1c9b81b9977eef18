// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Environment table and lifecycle for the AXON kernel
//! OWNERS: @kernel-team
//! PUBLIC API: EnvTable (alloc/lookup/free), Env, IpcState
//! DEPENDS_ON: mm::{PhysMem, AddressSpace}, axon_abi::{EnvId, EnvStatus, Trapframe}
//! INVARIANTS: Generational ids never repeat for a slot; a RUNNABLE env owns
//!             a directory whose kernel region matches the boot directory

use alloc::vec::Vec;

use axon_abi::frames::{Trapframe, FL_IF, GD_UD, GD_UT};
use axon_abi::layout::USTACKTOP;
use axon_abi::sys::{EnvId, EnvInfo, EnvStatus, ENVGENSHIFT, NENV};
use axon_abi::Error;

use crate::mm::{AddressSpace, PhysMem};

/// IPC rendezvous state carried by each environment.
#[derive(Clone, Copy, Debug, Default)]
pub struct IpcState {
    /// Parked in `ipc_recv`, open for a sender.
    pub recving: bool,
    /// Where a granted page should land; `None` refuses page transfer.
    pub dstva: Option<u32>,
    /// Sender of the last delivered message; doubles as the one-shot guard.
    pub from: EnvId,
    /// Last delivered value.
    pub value: u32,
    /// Raw permission bits of the last granted page, zero when none.
    pub perm: u32,
}

/// One protected execution context.
pub struct Env {
    /// Generational id; retained after free so the next allocation bumps it.
    pub id: EnvId,
    /// Creator, or [`EnvId::NONE`] for boot-created environments.
    pub parent_id: EnvId,
    /// Lifecycle state.
    pub status: EnvStatus,
    /// State at which the environment resumes.
    pub tf: Trapframe,
    /// Owning handle on the page directory.
    pub aspace: Option<AddressSpace>,
    /// Registered page-fault upcall entry; zero when none.
    pub pgfault_upcall: u32,
    /// Resume counter.
    pub runs: u32,
    /// Rendezvous state.
    pub ipc: IpcState,
}

impl Env {
    fn empty() -> Self {
        Self {
            id: EnvId::NONE,
            parent_id: EnvId::NONE,
            status: EnvStatus::Free,
            tf: Trapframe::default(),
            aspace: None,
            pgfault_upcall: 0,
            runs: 0,
            ipc: IpcState::default(),
        }
    }

    /// User-visible snapshot, as served through the UENVS window.
    pub fn info(&self) -> EnvInfo {
        EnvInfo {
            id: self.id.raw(),
            parent_id: self.parent_id.raw(),
            status: self.status as u32,
            runs: self.runs,
            pgfault_upcall: self.pgfault_upcall,
            ipc_value: self.ipc.value,
            ipc_from: self.ipc.from.raw(),
            ipc_recving: self.ipc.recving as u32,
            ipc_dstva: self.ipc.dstva.unwrap_or(axon_abi::layout::UTOP),
            ipc_perm: self.ipc.perm,
        }
    }
}

/// Fixed-size table of environment records.
pub struct EnvTable {
    slots: Vec<Env>,
    base: AddressSpace,
}

impl EnvTable {
    /// Builds the table and the boot directory whose kernel region every
    /// environment adopts.
    pub fn new(mem: &mut PhysMem) -> Result<Self, Error> {
        let base = AddressSpace::new(mem)?;
        Ok(Self {
            slots: (0..NENV).map(|_| Env::empty()).collect(),
            base,
        })
    }

    /// The boot directory.
    pub fn base(&self) -> &AddressSpace {
        &self.base
    }

    /// Shared view of a slot.
    pub fn get(&self, idx: usize) -> &Env {
        &self.slots[idx]
    }

    /// Mutable view of a slot.
    pub fn get_mut(&mut self, idx: usize) -> &mut Env {
        &mut self.slots[idx]
    }

    /// Iterates the live slots.
    pub fn iter(&self) -> impl Iterator<Item = &Env> {
        self.slots.iter()
    }

    fn mkenvid(&self, idx: usize) -> EnvId {
        let prev = self.slots[idx].id.raw();
        let mut generation = prev.wrapping_add(1 << ENVGENSHIFT) & !((NENV as u32) - 1);
        if generation as i32 <= 0 {
            generation = 1 << ENVGENSHIFT;
        }
        EnvId(generation | idx as u32)
    }

    /// Allocates a fresh environment: lowest free slot, bumped generation,
    /// new directory sharing the kernel region, `NOT_RUNNABLE`, cleared IPC
    /// state, user segments with interrupts enabled.
    pub fn alloc(&mut self, mem: &mut PhysMem, parent: EnvId) -> Result<usize, Error> {
        let idx = self
            .slots
            .iter()
            .position(|env| env.status == EnvStatus::Free)
            .ok_or(Error::NoFreeEnv)?;

        let aspace = AddressSpace::new(mem)?;
        aspace.adopt_kernel_region(mem, &self.base);

        let id = self.mkenvid(idx);
        let env = &mut self.slots[idx];
        env.id = id;
        env.parent_id = parent;
        env.status = EnvStatus::NotRunnable;
        env.aspace = Some(aspace);
        env.pgfault_upcall = 0;
        env.runs = 0;
        env.ipc = IpcState::default();
        env.tf = Trapframe::default();
        env.tf.cs = GD_UT | 3;
        env.tf.ds = GD_UD | 3;
        env.tf.es = GD_UD | 3;
        env.tf.ss = GD_UD | 3;
        env.tf.esp = USTACKTOP;
        env.tf.eflags = FL_IF;

        log::info!(target: "env", "[{:08x}] new env, parent {:08x}", id.raw(), parent.raw());
        Ok(idx)
    }

    /// Resolves an id to a slot. Id zero names the caller. With `checkperm`
    /// the target must be the caller or a descendant of it through live
    /// `parent_id` links.
    pub fn lookup(&self, id: EnvId, cur: Option<usize>, checkperm: bool) -> Result<usize, Error> {
        if id == EnvId::NONE {
            return cur.ok_or(Error::BadEnv);
        }
        let idx = id.index();
        let env = &self.slots[idx];
        if env.status == EnvStatus::Free || env.id != id {
            return Err(Error::BadEnv);
        }
        if checkperm {
            let cur_id = self.slots[cur.ok_or(Error::BadEnv)?].id;
            let mut probe = idx;
            for _ in 0..NENV {
                if self.slots[probe].id == cur_id {
                    return Ok(idx);
                }
                let parent = self.slots[probe].parent_id;
                if parent == EnvId::NONE {
                    return Err(Error::BadEnv);
                }
                let pidx = parent.index();
                if self.slots[pidx].status == EnvStatus::Free || self.slots[pidx].id != parent {
                    return Err(Error::BadEnv);
                }
                probe = pidx;
            }
            return Err(Error::BadEnv);
        }
        Ok(idx)
    }

    /// Slot index of `id` if it is still live.
    pub fn resolve(&self, id: EnvId) -> Option<usize> {
        let idx = id.index();
        let env = &self.slots[idx];
        (env.status != EnvStatus::Free && env.id == id).then_some(idx)
    }

    /// Tears a slot down: unmap the whole user region, free its tables and
    /// directory, mark the slot free. The generation survives in `id`.
    pub fn free(&mut self, mem: &mut PhysMem, idx: usize) {
        let env = &mut self.slots[idx];
        log::info!(target: "env", "[{:08x}] free env", env.id.raw());
        env.status = EnvStatus::Dying;
        if let Some(aspace) = env.aspace.take() {
            aspace.free_user_pages(mem);
            aspace.release(mem);
        }
        env.ipc = IpcState::default();
        env.pgfault_upcall = 0;
        env.status = EnvStatus::Free;
    }

    /// Serves a byte range of the read-only UENVS window.
    pub fn window_read(&self, offset: usize, buf: &mut [u8]) {
        for (i, byte) in buf.iter_mut().enumerate() {
            let pos = offset + i;
            let slot = pos / EnvInfo::SIZE;
            *byte = if slot < self.slots.len() {
                self.slots[slot].info().to_bytes()[pos % EnvInfo::SIZE]
            } else {
                0
            };
        }
    }
}
