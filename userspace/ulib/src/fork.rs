// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Copy-on-write fork, built entirely from exported kernel primitives.

use axon_abi::layout::{self, PteFlags, NPTENTRIES, PFENTRY, PGSIZE, UTOP, UXSTACKTOP};
use axon_abi::sys::{EnvId, EnvStatus, UserContext, UserResult};

use crate::pgfault::{cow_pgfault, set_pgfault_handler};
use crate::syscall::{
    sys_env_set_pgfault_upcall, sys_env_set_status, sys_exofork, sys_page_alloc, sys_page_map,
};

const RW: PteFlags = PteFlags::P.union(PteFlags::U).union(PteFlags::W);
const RO: PteFlags = PteFlags::P.union(PteFlags::U);
const COW: PteFlags = RO.union(PteFlags::COW);

/// Shares virtual page `pn` with the child at the same address. Writable or
/// copy-on-write pages go over as copy-on-write - child first, then our own
/// mapping is downgraded the same way, so neither side writes through a
/// mapping the other still trusts.
fn duppage(ctx: &mut dyn UserContext, child: EnvId, pn: usize) -> UserResult<()> {
    let pte = ctx.read_u32(layout::vpt_entry(pn))?;
    let addr = (pn as u32) << 12;
    let flags = PteFlags::of_entry(pte);

    if flags.intersects(PteFlags::W | PteFlags::COW) {
        if let Err(err) = sys_page_map(ctx, EnvId::NONE, addr, child, addr, COW)? {
            panic!("duppage: sys_page_map: {}", err);
        }
        if let Err(err) = sys_page_map(ctx, EnvId::NONE, addr, EnvId::NONE, addr, COW)? {
            panic!("duppage: sys_page_map: {}", err);
        }
    } else if let Err(err) = sys_page_map(ctx, EnvId::NONE, addr, child, addr, RO)? {
        panic!("duppage: sys_page_map: {}", err);
    }
    Ok(())
}

/// Copy-on-write fork. Returns the child's id to the parent and
/// [`EnvId::NONE`] to the child, which resumes inside its copied register
/// state the first time it is scheduled.
pub fn fork(ctx: &mut dyn UserContext) -> UserResult<EnvId> {
    set_pgfault_handler(ctx, cow_pgfault)?;

    let child = match sys_exofork(ctx)? {
        Ok(child) => child,
        Err(err) => panic!("fork: sys_exofork: {}", err),
    };
    if child == 0 {
        // We are the child: the cached environment view still describes the
        // parent, so rebind before touching anything else.
        let _ = ctx.thisenv()?;
        return Ok(EnvId::NONE);
    }
    let child = EnvId(child as u32);

    // Every present page strictly below UTOP and below the exception stack
    // moves over; the exception stack itself must stay private.
    let xstack_pn = layout::vpn(UXSTACKTOP - PGSIZE as u32);
    for pdeno in 0..layout::pdx(UTOP) {
        let pde = ctx.read_u32(layout::vpd_entry(pdeno))?;
        if PteFlags::of_entry(pde).contains(PteFlags::P) {
            for pteno in 0..NPTENTRIES {
                let pn = (pdeno << 10) + pteno;
                if pn >= xstack_pn {
                    break;
                }
                let pte = ctx.read_u32(layout::vpt_entry(pn))?;
                if PteFlags::of_entry(pte).contains(PteFlags::P) {
                    duppage(ctx, child, pn)?;
                }
            }
        }
    }

    // The fault handler runs on the exception stack, so that one page can
    // never be copy-on-write: give the child a fresh writable one.
    if let Err(err) = sys_page_alloc(ctx, child, UXSTACKTOP - PGSIZE as u32, RW)? {
        panic!("fork: sys_page_alloc: {}", err);
    }
    if let Err(err) = sys_env_set_pgfault_upcall(ctx, child, PFENTRY)? {
        panic!("fork: sys_env_set_pgfault_upcall: {}", err);
    }
    if let Err(err) = sys_env_set_status(ctx, child, EnvStatus::Runnable)? {
        panic!("fork: sys_env_set_status: {}", err);
    }
    Ok(child)
}
