// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Physical frames and two-level page tables.

mod page_table;
mod phys;

pub use page_table::{AddressSpace, PteRef};
pub use phys::{PhysMem, Ppn};

/// Invalidates the cached translation for `va` in the live address space.
///
/// The hosted machine walks the tables on every access, so there is nothing
/// to shoot down; the bare-metal build issues the architectural invalidate.
pub fn tlb_invalidate(va: u32) {
    #[cfg(all(target_arch = "x86", target_os = "none"))]
    crate::arch::x86::invlpg(va);
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    let _ = va;
}
