// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hosted machine model executing user environments
//! OWNERS: @kernel-team
//! PUBLIC API: VirtMachine, UserEnv (axon_abi::UserContext)
//! DEPENDS_ON: kernel::Kernel, parking_lot
//! INVARIANTS: Every kernel entry holds the giant lock; faults synthesize
//!             the architectural error code and retry through the upcall
//!
//! The hosted stand-in for the CPU and MMU. Each [`UserEnv`] performs
//! user-mode loads, stores, and syscalls against the real kernel state:
//! accesses walk the live page tables, denied accesses take the page-fault
//! path (upcall or destruction) exactly as the hardware would, and a parked
//! receiver blocks its host thread until the wake path marks it runnable.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use axon_abi::frames::UTrapframe;
use axon_abi::layout::{PGSIZE, UENVS};
use axon_abi::sys::{Destroyed, EnvId, EnvInfo, EnvStatus, PgfaultHandler, Syscall, UserContext, UserResult, NENV};

use crate::config::Config;
use crate::hal::NetBackend;
use crate::kernel::Kernel;
use crate::trap::{T_PGFLT, T_SYSCALL};

/// The machine: the kernel behind a giant lock, a wake channel for parked
/// receivers, and the registry binding trampoline entry addresses to
/// handler code (the modelled fault-entry text, shared like real text).
pub struct VirtMachine {
    kernel: Mutex<Kernel>,
    wake: Condvar,
    trampolines: Mutex<BTreeMap<u32, PgfaultHandler>>,
}

impl VirtMachine {
    /// Boots a machine without a network device.
    pub fn new(config: Config) -> Arc<Self> {
        Arc::new(Self {
            kernel: Mutex::new(Kernel::new(config)),
            wake: Condvar::new(),
            trampolines: Mutex::new(BTreeMap::new()),
        })
    }

    /// Boots a machine with a network device attached.
    pub fn with_net(config: Config, backend: Box<dyn NetBackend>) -> Arc<Self> {
        Arc::new(Self {
            kernel: Mutex::new(Kernel::with_net(config, backend)),
            wake: Condvar::new(),
            trampolines: Mutex::new(BTreeMap::new()),
        })
    }

    /// Creates a runnable boot environment and hands back its context.
    pub fn boot_env(self: &Arc<Self>) -> UserEnv {
        let id = self.kernel.lock().boot_env();
        self.user(id)
    }

    /// Context for an existing environment (for example a fork child).
    pub fn user(self: &Arc<Self>, id: EnvId) -> UserEnv {
        UserEnv { machine: Arc::clone(self), id }
    }

    /// Direct kernel access for assertions and device plumbing.
    pub fn kernel(&self) -> MutexGuard<'_, Kernel> {
        self.kernel.lock()
    }
}

/// One environment's execution context on the hosted machine.
pub struct UserEnv {
    machine: Arc<VirtMachine>,
    id: EnvId,
}

type ArmedFault = (PgfaultHandler, u32, UTrapframe);

impl UserEnv {
    fn resolve(&self, kernel: &Kernel) -> UserResult<usize> {
        kernel.envs.resolve(self.id).ok_or(Destroyed)
    }

    /// Enters the kernel fault path for a denied access and reports either
    /// destruction or the armed upcall to run.
    fn raise_fault(
        &self,
        kernel: &mut Kernel,
        idx: usize,
        fault_va: u32,
        err: u32,
    ) -> UserResult<ArmedFault> {
        let mut tf = kernel.envs.get(idx).tf;
        tf.trapno = T_PGFLT;
        tf.err = err;
        let _ = kernel.handle_trap(idx, &tf, fault_va);
        self.machine.wake.notify_all();

        let idx = self.resolve(kernel)?;
        let env = kernel.envs.get(idx);
        assert!(
            env.pgfault_upcall != 0 && env.tf.eip == env.pgfault_upcall,
            "fault survived without entering the upcall"
        );
        let entry = env.pgfault_upcall;
        let utf_va = env.tf.esp;
        let bytes = kernel
            .copy_from_user(idx, utf_va, UTrapframe::SIZE as usize)
            .expect("exception frame was checked writable");
        let utf = UTrapframe::from_bytes(&bytes.try_into().expect("exact frame size"));
        let handler = *self
            .machine
            .trampolines
            .lock()
            .get(&entry)
            .unwrap_or_else(|| panic!("no trampoline bound at {entry:#x}"));
        Ok((handler, utf_va, utf))
    }

    /// The trampoline's restore sequence: the interrupted context comes
    /// back out of the exception-stack frame.
    fn trampoline_return(&mut self, utf_va: u32, utf: UTrapframe) -> UserResult<()> {
        let mut kernel = self.machine.kernel.lock();
        let idx = self.resolve(&kernel)?;
        kernel
            .copy_to_user(idx, utf_va, &utf.to_bytes())
            .expect("exception frame stays mapped through the handler");
        let env = kernel.envs.get_mut(idx);
        env.tf.regs = utf.regs;
        env.tf.eip = utf.eip;
        env.tf.eflags = utf.eflags;
        env.tf.esp = utf.esp;
        Ok(())
    }

    /// One page-bounded load, retried through the fault path.
    fn read_chunk(&mut self, va: u32, out: &mut [u8]) -> UserResult<()> {
        loop {
            let armed = {
                let mut kernel = self.machine.kernel.lock();
                let idx = self.resolve(&kernel)?;
                let window_end = UENVS + (NENV * EnvInfo::SIZE) as u32;
                if va >= UENVS && va.wrapping_add(out.len() as u32) <= window_end {
                    kernel.envs.window_read((va - UENVS) as usize, out);
                    return Ok(());
                }
                match kernel.translate_user(idx, va, false) {
                    Ok(pa) => {
                        kernel.mem.read_bytes(pa, out);
                        return Ok(());
                    }
                    Err(err) => self.raise_fault(&mut kernel, idx, va, err)?,
                }
            };
            let (handler, utf_va, mut utf) = armed;
            handler(self, &mut utf);
            self.trampoline_return(utf_va, utf)?;
        }
    }

    /// One page-bounded store, retried through the fault path.
    fn write_chunk(&mut self, va: u32, data: &[u8]) -> UserResult<()> {
        loop {
            let armed = {
                let mut kernel = self.machine.kernel.lock();
                let idx = self.resolve(&kernel)?;
                match kernel.translate_user(idx, va, true) {
                    Ok(pa) => {
                        kernel.mem.write_bytes(pa, data);
                        return Ok(());
                    }
                    Err(err) => self.raise_fault(&mut kernel, idx, va, err)?,
                }
            };
            let (handler, utf_va, mut utf) = armed;
            handler(self, &mut utf);
            self.trampoline_return(utf_va, utf)?;
        }
    }
}

impl UserContext for UserEnv {
    fn env_id(&self) -> EnvId {
        self.id
    }

    fn syscall(&mut self, num: Syscall, args: [u32; 5]) -> UserResult<i32> {
        let mut kernel = self.machine.kernel.lock();
        let idx = self.resolve(&kernel)?;

        let mut tf = kernel.envs.get(idx).tf;
        tf.trapno = T_SYSCALL;
        tf.regs.eax = num as u32;
        tf.regs.edx = args[0];
        tf.regs.ecx = args[1];
        tf.regs.ebx = args[2];
        tf.regs.edi = args[3];
        tf.regs.esi = args[4];
        let _ = kernel.handle_trap(idx, &tf, 0);
        self.machine.wake.notify_all();

        if num == Syscall::Yield {
            // Give other environment threads a real chance at the lock.
            MutexGuard::unlocked(&mut kernel, std::thread::yield_now);
        }

        // A parked receiver resumes only when a sender (on another thread)
        // flips it runnable; its return value then sits in the saved frame.
        loop {
            let Some(idx) = kernel.envs.resolve(self.id) else {
                return Err(Destroyed);
            };
            let (status, recving, eax) = {
                let env = kernel.envs.get(idx);
                (env.status, env.ipc.recving, env.tf.regs.eax)
            };
            match status {
                EnvStatus::Runnable => return Ok(eax as i32),
                EnvStatus::NotRunnable if recving => {
                    self.machine.wake.wait(&mut kernel);
                }
                // Parked by choice (env_set_status); the call itself is done.
                EnvStatus::NotRunnable => return Ok(eax as i32),
                EnvStatus::Free | EnvStatus::Dying => return Err(Destroyed),
            }
        }
    }

    fn read_bytes(&mut self, va: u32, buf: &mut [u8]) -> UserResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let cursor = va.wrapping_add(done as u32);
            let chunk = (PGSIZE - (cursor as usize & (PGSIZE - 1))).min(buf.len() - done);
            self.read_chunk(cursor, &mut buf[done..done + chunk])?;
            done += chunk;
        }
        Ok(())
    }

    fn write_bytes(&mut self, va: u32, buf: &[u8]) -> UserResult<()> {
        let mut done = 0;
        while done < buf.len() {
            let cursor = va.wrapping_add(done as u32);
            let chunk = (PGSIZE - (cursor as usize & (PGSIZE - 1))).min(buf.len() - done);
            self.write_chunk(cursor, &buf[done..done + chunk])?;
            done += chunk;
        }
        Ok(())
    }

    fn register_pgfault_entry(&mut self, entry: u32, handler: PgfaultHandler) {
        self.machine.trampolines.lock().insert(entry, handler);
    }
}
