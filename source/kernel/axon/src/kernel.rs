// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The kernel state machine: one structure owning every subsystem, entered
//! through [`Kernel::handle_trap`] and left through a [`KernelExit`].
//!
//! There is exactly one logical execution stream in here. On hardware that
//! is enforced by running with interrupts disabled from trap entry to
//! resume; the hosted machine wraps the whole structure in a giant lock.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use axon_abi::frames::Trapframe;
use axon_abi::layout::{PteFlags, PGSIZE};
use axon_abi::sys::{EnvId, EnvStatus};

use crate::config::Config;
use crate::console::Console;
use crate::env::EnvTable;
use crate::hal::NetBackend;
use crate::mm::PhysMem;
use crate::net::Nic;
use crate::syscall::SysReturn;
use crate::trap::{self, IRQ_OFFSET, IRQ_SPURIOUS, IRQ_TIMER, T_BRKPT, T_PGFLT, T_SYSCALL};

/// How a kernel entry hands the CPU back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KernelExit {
    /// Resume this environment from its saved trap frame.
    Run(usize),
    /// Nothing is runnable; drop into the monitor.
    Monitor,
}

/// The kernel.
pub struct Kernel {
    /// Physical frame pool.
    pub mem: PhysMem,
    /// Environment table.
    pub envs: EnvTable,
    /// Slot of the running environment, if any.
    pub cur: Option<usize>,
    /// Timer ticks since boot (one tick per timer IRQ, 10 ms each).
    pub ticks: u64,
    /// System console.
    pub console: Console,
    /// Network driver, when a device was attached at boot.
    pub nic: Option<Nic>,
    monitor_entries: u64,
}

impl Kernel {
    /// Brings the kernel up over `config.npages` frames, no NIC attached.
    pub fn new(config: Config) -> Self {
        let mut mem = PhysMem::new(config.npages);
        let envs = EnvTable::new(&mut mem).expect("boot frame pool too small");
        Self {
            mem,
            envs,
            cur: None,
            ticks: 0,
            console: Console::default(),
            nic: None,
            monitor_entries: 0,
        }
    }

    /// Brings the kernel up with a network device attached.
    pub fn with_net(config: Config, backend: Box<dyn NetBackend>) -> Self {
        let mut kernel = Self::new(config);
        let nic = Nic::new(&mut kernel.mem, backend).expect("boot frame pool too small for NIC rings");
        kernel.nic = Some(nic);
        kernel
    }

    /// Creates a runnable boot environment (parent id zero).
    pub fn boot_env(&mut self) -> EnvId {
        let idx = self
            .envs
            .alloc(&mut self.mem, EnvId::NONE)
            .expect("boot environment allocation");
        self.envs.get_mut(idx).status = EnvStatus::Runnable;
        self.envs.get(idx).id
    }

    /// Times the monitor has been invoked (breakpoints, dead scheduler).
    pub fn monitor_entries(&self) -> u64 {
        self.monitor_entries
    }

    /// Milliseconds since boot, derived from the tick counter.
    pub fn time_msec(&self) -> u32 {
        (self.ticks * 10) as u32
    }

    /// Destroys an environment and forgets it as current if it was.
    pub fn destroy_env(&mut self, idx: usize) {
        self.envs.free(&mut self.mem, idx);
        if self.cur == Some(idx) {
            self.cur = None;
        }
    }

    /// Translates one user access in the context of environment `idx`.
    pub fn translate_user(&self, idx: usize, va: u32, write: bool) -> Result<u32, u32> {
        let aspace = self.envs.get(idx).aspace.expect("live env has a directory");
        aspace.translate_user(&self.mem, va, write)
    }

    /// Checks user access to `[va, va+len)` and destroys the environment on
    /// violation, reporting back that it is gone.
    pub(crate) fn user_mem_assert(
        &mut self,
        idx: usize,
        va: u32,
        len: u32,
        perm: PteFlags,
    ) -> Result<(), ()> {
        let aspace = self.envs.get(idx).aspace.expect("live env has a directory");
        match aspace.user_mem_check(&self.mem, va, len, perm | PteFlags::U) {
            Ok(()) => Ok(()),
            Err(bad_va) => {
                log::warn!(
                    target: "trap",
                    "[{:08x}] user_mem_check assertion failure for va {:08x}",
                    self.envs.get(idx).id.raw(),
                    bad_va
                );
                self.destroy_env(idx);
                Err(())
            }
        }
    }

    /// Kernel-privilege copy out of an environment's address space. `None`
    /// when a page in the range is unmapped; callers assert first.
    pub fn copy_from_user(&self, idx: usize, va: u32, len: usize) -> Option<Vec<u8>> {
        let aspace = self.envs.get(idx).aspace?;
        let mut out = vec![0u8; len];
        let mut done = 0;
        while done < len {
            let cursor = va.wrapping_add(done as u32);
            let chunk = (PGSIZE - (cursor as usize & (PGSIZE - 1))).min(len - done);
            let pa = aspace.translate_kernel(&self.mem, cursor)?;
            self.mem.read_bytes(pa, &mut out[done..done + chunk]);
            done += chunk;
        }
        Some(out)
    }

    /// Kernel-privilege copy into an environment's address space.
    pub fn copy_to_user(&mut self, idx: usize, va: u32, bytes: &[u8]) -> Option<()> {
        let aspace = self.envs.get(idx).aspace?;
        let mut done = 0;
        while done < bytes.len() {
            let cursor = va.wrapping_add(done as u32);
            let chunk = (PGSIZE - (cursor as usize & (PGSIZE - 1))).min(bytes.len() - done);
            let pa = aspace.translate_kernel(&self.mem, cursor)?;
            self.mem.write_bytes(pa, &bytes[done..done + chunk]);
            done += chunk;
        }
        Some(())
    }

    /// Common trap path. The frame was captured by the entry stubs (or
    /// synthesized by the virtual CPU); `cr2` carries the faulting address
    /// for page faults. Never falls through to user mode: the exit value
    /// names the environment to resume or requests the monitor.
    pub fn handle_trap(&mut self, idx: usize, tf: &Trapframe, cr2: u32) -> KernelExit {
        trap::record(tf);

        if !tf.from_user() {
            if tf.trapno == T_BRKPT {
                self.monitor_entries += 1;
                return KernelExit::Monitor;
            }
            panic!("unhandled trap in kernel: {}", trap::describe_trap(tf.trapno));
        }

        // Persist the in-stack frame; everything below works on the copy.
        self.cur = Some(idx);
        self.envs.get_mut(idx).tf = *tf;

        match tf.trapno {
            T_PGFLT => self.page_fault_handler(idx, cr2),
            T_BRKPT => {
                self.monitor_entries += 1;
                log::debug!(target: "trap", "[{:08x}] breakpoint, entering monitor", self.envs.get(idx).id.raw());
            }
            T_SYSCALL => {
                let regs = self.envs.get(idx).tf.regs;
                let args = [regs.edx, regs.ecx, regs.ebx, regs.edi, regs.esi];
                match self.syscall(idx, regs.eax, args) {
                    SysReturn::Value(value) => {
                        self.envs.get_mut(idx).tf.regs.eax = value as u32;
                    }
                    SysReturn::Yield => {
                        self.envs.get_mut(idx).tf.regs.eax = 0;
                        return self.sched_yield();
                    }
                    // A blocked receiver resumes through the wake path; a
                    // destroyed caller has nothing to resume.
                    SysReturn::Blocked | SysReturn::Gone => {}
                }
            }
            t if t == IRQ_OFFSET + IRQ_TIMER => {
                self.ticks += 1;
                return self.sched_yield();
            }
            t if t == IRQ_OFFSET + IRQ_SPURIOUS => {
                log::warn!(target: "trap", "spurious interrupt on irq 7");
            }
            other => {
                log::warn!(
                    target: "trap",
                    "[{:08x}] unhandled trap {} ({})",
                    self.envs.get(idx).id.raw(),
                    other,
                    trap::describe_trap(other)
                );
                self.destroy_env(idx);
            }
        }

        match self.cur {
            Some(c) if self.envs.get(c).status == EnvStatus::Runnable => {
                self.envs.get_mut(c).runs += 1;
                KernelExit::Run(c)
            }
            _ => self.sched_yield(),
        }
    }
}
