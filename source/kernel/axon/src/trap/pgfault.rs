// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Re-injection of user page faults onto the user exception stack.

use axon_abi::frames::UTrapframe;
use axon_abi::layout::{PteFlags, PGSIZE, UXSTACKTOP, UXSTACK_SCRATCH};

use crate::kernel::Kernel;

impl Kernel {
    /// Reflects a user-mode page fault into the registered upcall, or
    /// destroys the environment when no upcall (or no usable exception
    /// stack) exists. The saved frame already holds the trap-time state.
    pub(crate) fn page_fault_handler(&mut self, idx: usize, fault_va: u32) {
        let env = self.envs.get(idx);
        let id = env.id;
        let upcall = env.pgfault_upcall;

        if upcall == 0 {
            log::warn!(
                target: "trap",
                "[{:08x}] user fault va {:08x} ip {:08x}",
                id.raw(),
                fault_va,
                env.tf.eip
            );
            let mut dump = alloc::string::String::new();
            let _ = super::fmt_trap(&env.tf, &mut dump);
            log::debug!(target: "trap", "{}", dump);
            self.destroy_env(idx);
            return;
        }

        // A trap-time stack pointer already inside the exception stack means
        // the handler itself faulted; nest below it, leaving the scratch
        // word the trampoline's return sequence needs.
        let trap_esp = env.tf.esp;
        let utf_va = if (UXSTACKTOP - PGSIZE as u32..UXSTACKTOP).contains(&trap_esp) {
            trap_esp - UXSTACK_SCRATCH - UTrapframe::SIZE
        } else {
            UXSTACKTOP - UTrapframe::SIZE
        };

        if self
            .user_mem_assert(idx, utf_va, UTrapframe::SIZE, PteFlags::U | PteFlags::W)
            .is_err()
        {
            return;
        }

        let env = self.envs.get(idx);
        let utf = UTrapframe {
            fault_va,
            err: env.tf.err,
            regs: env.tf.regs,
            eip: env.tf.eip,
            eflags: env.tf.eflags,
            esp: env.tf.esp,
        };
        self.copy_to_user(idx, utf_va, &utf.to_bytes())
            .expect("exception stack was just checked writable");

        let env = self.envs.get_mut(idx);
        env.tf.esp = utf_va;
        env.tf.eip = upcall;
    }
}
