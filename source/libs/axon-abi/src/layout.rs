// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Virtual-address-space layout and page-table entry bits.
//!
//! The machine is a 32-bit paged architecture with two translation levels of
//! 1024 entries each. Everything user-writable lies strictly below [`UTOP`];
//! the window between `UTOP` and [`ULIM`] is visible to user mode read-only.

use bitflags::bitflags;

/// Bytes per page.
pub const PGSIZE: usize = 4096;
/// log2 of [`PGSIZE`].
pub const PGSHIFT: u32 = 12;
/// Entries per page directory.
pub const NPDENTRIES: usize = 1024;
/// Entries per page table.
pub const NPTENTRIES: usize = 1024;
/// Bytes mapped by one page-directory entry.
pub const PTSIZE: usize = PGSIZE * NPTENTRIES;
/// Shift of the directory index inside a virtual address.
pub const PDXSHIFT: u32 = 22;

/// Top of the user-readable window; nothing below the kernel proper.
pub const ULIM: u32 = 0xef80_0000;
/// Read-only self-mapping of the current page tables.
pub const UVPT: u32 = 0xef40_0000;
/// Read-only window for physical-page bookkeeping (reserved).
pub const UPAGES: u32 = 0xef00_0000;
/// Read-only window onto the environment table.
pub const UENVS: u32 = 0xeec0_0000;
/// Everything at or above this address is off limits to user mappings.
pub const UTOP: u32 = UENVS;
/// Top of the one-page user exception stack.
pub const UXSTACKTOP: u32 = UTOP;
/// Top of the normal user stack; the page between the two stacks stays
/// unmapped so a runaway exception stack faults instead of corrupting data.
pub const USTACKTOP: u32 = UTOP - 2 * PGSIZE as u32;
/// Scratch window used by user libraries for transient mappings.
pub const UTEMP: u32 = 0x0040_0000;
/// Scratch page the copy-on-write fault handler stages copies in.
pub const PFTEMP: u32 = 0x007f_f000;
/// Fixed entry address of the user page-fault trampoline.
pub const PFENTRY: u32 = 0x0010_0020;

/// Scratch bytes left above a nested exception-stack frame so the trampoline
/// restore sequence has one word to work with. Must match the trampoline.
pub const UXSTACK_SCRATCH: u32 = 4;

/// Virtual address of the page-directory view inside the self-map.
pub const UVPD: u32 = UVPT + ((pdx(UVPT) as u32) << PGSHIFT);

/// Directory index of a virtual address.
pub const fn pdx(va: u32) -> usize {
    (va >> PDXSHIFT) as usize & (NPDENTRIES - 1)
}

/// Table index of a virtual address.
pub const fn ptx(va: u32) -> usize {
    (va >> PGSHIFT) as usize & (NPTENTRIES - 1)
}

/// Virtual page number of a virtual address.
pub const fn vpn(va: u32) -> usize {
    (va >> PGSHIFT) as usize
}

/// Offset of a virtual address inside its page.
pub const fn pgoff(va: u32) -> u32 {
    va & (PGSIZE as u32 - 1)
}

/// Whether `va` sits on a page boundary.
pub const fn page_aligned(va: u32) -> bool {
    pgoff(va) == 0
}

/// Address of the self-mapped PTE covering virtual page `pn`.
pub const fn vpt_entry(pn: usize) -> u32 {
    UVPT + (pn * 4) as u32
}

/// Address of the self-mapped PDE with directory index `pdeno`.
pub const fn vpd_entry(pdeno: usize) -> u32 {
    UVPD + (pdeno * 4) as u32
}

bitflags! {
    /// Page-table entry bits. The low twelve bits of an entry; the rest is
    /// the physical page number.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        /// Present.
        const P = 1 << 0;
        /// Writable.
        const W = 1 << 1;
        /// User-accessible.
        const U = 1 << 2;
        /// Write-through.
        const PWT = 1 << 3;
        /// Cache-disable.
        const PCD = 1 << 4;
        /// Accessed.
        const A = 1 << 5;
        /// Dirty.
        const D = 1 << 6;
        /// Large page.
        const PS = 1 << 7;
        /// Global.
        const G = 1 << 8;
        /// Software bits ignored by the MMU.
        const AVAIL = 0xe00;
        /// Copy-on-write marker, carried inside [`PteFlags::AVAIL`]. A page
        /// with this bit set is mapped read-only; a write fault clones it.
        const COW = 0x800;
    }
}

impl PteFlags {
    /// Bits a user may pass through the syscall surface.
    pub const SYSCALL_ALLOWED: PteFlags =
        PteFlags::P.union(PteFlags::W).union(PteFlags::U).union(PteFlags::AVAIL);

    /// Mask selecting the flag bits of a raw entry.
    pub const MASK: u32 = 0xfff;

    /// Flag bits of a raw page-table entry.
    pub const fn of_entry(entry: u32) -> PteFlags {
        PteFlags::from_bits_truncate(entry & Self::MASK)
    }
}
