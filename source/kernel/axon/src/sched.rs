// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Round-robin scheduler.

use axon_abi::sys::{EnvStatus, NENV};

use crate::kernel::{Kernel, KernelExit};

impl Kernel {
    /// Picks the next environment to run, scanning the table circularly
    /// starting just past the previously running slot. Slot 0 is the idle
    /// environment and is chosen only when nothing else is runnable; when
    /// not even idle can run, the kernel drops into the monitor.
    pub fn sched_yield(&mut self) -> KernelExit {
        let k = self.cur.unwrap_or(0);
        for offset in 0..NENV {
            let idx = (k + 1 + offset) % NENV;
            if idx == 0 {
                continue;
            }
            if self.envs.get(idx).status == EnvStatus::Runnable {
                return self.run(idx);
            }
        }
        if self.envs.get(0).status == EnvStatus::Runnable {
            return self.run(0);
        }
        log::warn!(target: "sched", "destroyed all environments - nothing more to do!");
        self.cur = None;
        KernelExit::Monitor
    }

    fn run(&mut self, idx: usize) -> KernelExit {
        self.cur = Some(idx);
        self.envs.get_mut(idx).runs += 1;
        KernelExit::Run(idx)
    }
}
