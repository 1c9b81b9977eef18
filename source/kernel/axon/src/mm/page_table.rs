// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Two-level page tables stored inside physical frames.
//!
//! An [`AddressSpace`] is a copyable handle on a root directory frame; the
//! frames themselves hold the 32-bit entries, so the self-map at `UVPT`
//! exposes live tables to user mode with no extra bookkeeping.

use axon_abi::frames::{FEC_PR, FEC_U, FEC_WR};
use axon_abi::layout::{self, PteFlags, NPDENTRIES, NPTENTRIES, PGSIZE, ULIM, UTOP, UVPT};
use axon_abi::Error;

use super::phys::{PhysMem, Ppn};
use super::tlb_invalidate;

/// Location and snapshot of one page-table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PteRef {
    /// Physical address of the entry itself.
    pub pa: u32,
    /// Entry value at lookup time.
    pub entry: u32,
}

impl PteRef {
    /// Whether the entry maps a page.
    pub fn present(&self) -> bool {
        self.entry & PteFlags::P.bits() != 0
    }

    /// Frame named by the entry.
    pub fn ppn(&self) -> Ppn {
        Ppn::of_pa(self.entry & !PteFlags::MASK)
    }

    /// Flag bits of the entry.
    pub fn flags(&self) -> PteFlags {
        PteFlags::of_entry(self.entry)
    }
}

/// Handle on one root page directory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressSpace {
    pgdir: Ppn,
}

impl AddressSpace {
    /// Allocates a zeroed directory, takes the ownership reference, and
    /// installs the read-only self-map.
    pub fn new(mem: &mut PhysMem) -> Result<Self, Error> {
        let pgdir = mem.page_alloc(true)?;
        mem.page_incref(pgdir);
        let aspace = Self { pgdir };
        mem.write_u32(
            aspace.pde_pa(UVPT),
            pgdir.pa() | (PteFlags::P | PteFlags::U).bits(),
        );
        Ok(aspace)
    }

    /// Root directory frame.
    pub fn pgdir(&self) -> Ppn {
        self.pgdir
    }

    fn pde_pa(&self, va: u32) -> u32 {
        self.pgdir.pa() + (layout::pdx(va) * 4) as u32
    }

    /// Walks to the PTE covering `va`, allocating the intermediate table
    /// when `create` is set. `Ok(None)` means the table is absent and was
    /// not created.
    pub fn walk(&self, mem: &mut PhysMem, va: u32, create: bool) -> Result<Option<u32>, Error> {
        let pde_pa = self.pde_pa(va);
        let pde = mem.read_u32(pde_pa);
        let table = if pde & PteFlags::P.bits() != 0 {
            Ppn::of_pa(pde & !PteFlags::MASK)
        } else {
            if !create {
                return Ok(None);
            }
            let table = mem.page_alloc(true)?;
            mem.page_incref(table);
            mem.write_u32(
                pde_pa,
                table.pa() | (PteFlags::P | PteFlags::W | PteFlags::U).bits(),
            );
            table
        };
        Ok(Some(table.pa() + (layout::ptx(va) * 4) as u32))
    }

    /// Reports the PTE covering `va`, present or not; `None` when even the
    /// containing table is absent.
    pub fn lookup(&self, mem: &PhysMem, va: u32) -> Option<PteRef> {
        let pde = mem.read_u32(self.pde_pa(va));
        if pde & PteFlags::P.bits() == 0 {
            return None;
        }
        let table = Ppn::of_pa(pde & !PteFlags::MASK);
        let pa = table.pa() + (layout::ptx(va) * 4) as u32;
        Some(PteRef { pa, entry: mem.read_u32(pa) })
    }

    /// Resolves `va` to its mapped frame, if any.
    pub fn lookup_page(&self, mem: &PhysMem, va: u32) -> Option<(Ppn, PteRef)> {
        let pte = self.lookup(mem, va)?;
        pte.present().then(|| (pte.ppn(), pte))
    }

    /// Maps `ppn` at `va` with `perm | P`, replacing any previous mapping.
    /// The new frame's reference is taken before the old mapping drops, so
    /// remapping a frame over itself is safe. On table-allocation failure
    /// the directory is left unchanged.
    pub fn insert(&self, mem: &mut PhysMem, ppn: Ppn, va: u32, perm: PteFlags) -> Result<(), Error> {
        let pte_pa = self
            .walk(mem, va, true)?
            .expect("walk(create) always yields an entry");
        mem.page_incref(ppn);
        let old = mem.read_u32(pte_pa);
        if old & PteFlags::P.bits() != 0 {
            self.remove_entry(mem, va, PteRef { pa: pte_pa, entry: old });
        }
        mem.write_u32(pte_pa, ppn.pa() | (perm | PteFlags::P).bits());
        tlb_invalidate(va);
        Ok(())
    }

    /// Unmaps `va` if mapped, dropping the frame reference.
    pub fn remove(&self, mem: &mut PhysMem, va: u32) {
        if let Some(pte) = self.lookup(mem, va) {
            if pte.present() {
                self.remove_entry(mem, va, pte);
            }
        }
    }

    fn remove_entry(&self, mem: &mut PhysMem, va: u32, pte: PteRef) {
        mem.page_decref(pte.ppn());
        mem.write_u32(pte.pa, 0);
        tlb_invalidate(va);
    }

    /// Translates a user-mode access, or reports the architectural fault
    /// error code. Both levels must grant `U`, and `W` for writes.
    pub fn translate_user(&self, mem: &PhysMem, va: u32, write: bool) -> Result<u32, u32> {
        let base = FEC_U | if write { FEC_WR } else { 0 };
        let pde = mem.read_u32(self.pde_pa(va));
        let pa_of = |entry: u32| entry & !PteFlags::MASK;
        if pde & PteFlags::P.bits() == 0 {
            return Err(base);
        }
        if pde & PteFlags::U.bits() == 0 || (write && pde & PteFlags::W.bits() == 0) {
            return Err(base | FEC_PR);
        }
        let pte = mem.read_u32(pa_of(pde) + (layout::ptx(va) * 4) as u32);
        if pte & PteFlags::P.bits() == 0 {
            return Err(base);
        }
        if pte & PteFlags::U.bits() == 0 || (write && pte & PteFlags::W.bits() == 0) {
            return Err(base | FEC_PR);
        }
        Ok(pa_of(pte) + layout::pgoff(va))
    }

    /// Kernel-privilege translation: only presence is required.
    pub fn translate_kernel(&self, mem: &PhysMem, va: u32) -> Option<u32> {
        let pte = self.lookup(mem, va)?;
        pte.present().then(|| pte.ppn().pa() + layout::pgoff(va))
    }

    /// Checks that `[va, va+len)` lies below `ULIM` and every covering PTE
    /// carries `perm | P`. Returns the first offending address.
    pub fn user_mem_check(&self, mem: &PhysMem, va: u32, len: u32, perm: PteFlags) -> Result<(), u32> {
        let required = (perm | PteFlags::P).bits();
        let end = va.checked_add(len).ok_or(va)?;
        let mut page = va & !(PGSIZE as u32 - 1);
        let mut probe = va;
        while probe < end {
            if probe >= ULIM {
                return Err(probe);
            }
            match self.lookup(mem, page) {
                Some(pte) if pte.entry & required == required => {}
                _ => return Err(probe),
            }
            page = match page.checked_add(PGSIZE as u32) {
                Some(next) => next,
                None => break,
            };
            probe = page;
        }
        Ok(())
    }

    /// Copies the kernel-region PDEs from `base`, leaving the self-map slot
    /// alone. Every address space shares the kernel mapping this way.
    pub fn adopt_kernel_region(&self, mem: &mut PhysMem, base: &AddressSpace) {
        for pdeno in layout::pdx(UTOP)..NPDENTRIES {
            if pdeno == layout::pdx(UVPT) {
                continue;
            }
            let entry = mem.read_u32(base.pgdir.pa() + (pdeno * 4) as u32);
            mem.write_u32(self.pgdir.pa() + (pdeno * 4) as u32, entry);
        }
    }

    /// Unmaps the whole user region and frees its page tables, leaving the
    /// kernel region and the self-map intact.
    pub fn free_user_pages(&self, mem: &mut PhysMem) {
        for pdeno in 0..layout::pdx(UTOP) {
            let pde_pa = self.pgdir.pa() + (pdeno * 4) as u32;
            let pde = mem.read_u32(pde_pa);
            if pde & PteFlags::P.bits() == 0 {
                continue;
            }
            let table = Ppn::of_pa(pde & !PteFlags::MASK);
            for pteno in 0..NPTENTRIES {
                let va = ((pdeno as u32) << 22) | ((pteno as u32) << 12);
                let pte_pa = table.pa() + (pteno * 4) as u32;
                let pte = mem.read_u32(pte_pa);
                if pte & PteFlags::P.bits() != 0 {
                    self.remove_entry(mem, va, PteRef { pa: pte_pa, entry: pte });
                }
            }
            mem.write_u32(pde_pa, 0);
            mem.page_decref(table);
        }
    }

    /// Releases the directory itself. The user region must already be empty.
    pub fn release(self, mem: &mut PhysMem) {
        mem.page_decref(self.pgdir);
    }
}
