// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot-time configuration handed to the kernel by the bring-up code.

/// Machine parameters fixed before the kernel starts.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    /// Physical frames managed by the page allocator.
    pub npages: usize,
}

impl Config {
    /// Smallest machine the self-tests use; handy for exhaustion scenarios.
    pub const fn tiny(npages: usize) -> Self {
        Self { npages }
    }
}

impl Default for Config {
    fn default() -> Self {
        // 4 MiB of managed frames.
        Self { npages: 1024 }
    }
}
