// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! User-side page-fault handling: registration and the copy-on-write fixer.

use axon_abi::frames::{UTrapframe, FEC_WR};
use axon_abi::layout::{self, PteFlags, PFENTRY, PFTEMP, PGSIZE, UXSTACKTOP};
use axon_abi::sys::{EnvId, PgfaultHandler, UserContext, UserResult};

use crate::syscall::{sys_env_set_pgfault_upcall, sys_page_alloc, sys_page_map, sys_page_unmap};

const RW: PteFlags = PteFlags::P.union(PteFlags::U).union(PteFlags::W);

/// Installs `handler` behind the fixed trampoline entry. The first
/// installation also allocates the caller's exception stack and registers
/// the upcall with the kernel; later calls just swap the handler.
pub fn set_pgfault_handler(ctx: &mut dyn UserContext, handler: PgfaultHandler) -> UserResult<()> {
    let me = ctx.thisenv()?;
    if me.pgfault_upcall == 0 {
        if let Err(err) = sys_page_alloc(ctx, EnvId::NONE, UXSTACKTOP - PGSIZE as u32, RW)? {
            panic!("set_pgfault_handler: sys_page_alloc: {}", err);
        }
        ctx.register_pgfault_entry(PFENTRY, handler);
        if let Err(err) = sys_env_set_pgfault_upcall(ctx, EnvId::NONE, PFENTRY)? {
            panic!("set_pgfault_handler: sys_env_set_pgfault_upcall: {}", err);
        }
    } else {
        ctx.register_pgfault_entry(PFENTRY, handler);
    }
    Ok(())
}

/// The copy-on-write fault handler `fork` installs: a write fault on a COW
/// page clones the page behind the faulting address. Anything else is a
/// genuine fault and there is nothing sane left to do.
pub fn cow_pgfault(ctx: &mut dyn UserContext, utf: &mut UTrapframe) {
    assert!(utf.err & FEC_WR != 0, "pgfault: faulting access not a write");
    let addr = utf.fault_va & !(PGSIZE as u32 - 1);
    let pn = layout::vpn(addr);
    let Ok(pte) = ctx.read_u32(layout::vpt_entry(pn)) else { return };
    assert!(
        PteFlags::of_entry(pte).contains(PteFlags::COW),
        "pgfault: faulting access not to a copy-on-write page"
    );

    // Stage a private copy at the scratch address and swing it over the
    // faulting page; the old mapping drops with the remap.
    let Ok(alloc) = sys_page_alloc(ctx, EnvId::NONE, PFTEMP, RW) else { return };
    if let Err(err) = alloc {
        panic!("pgfault: sys_page_alloc: {}", err);
    }
    let mut copy = [0u8; PGSIZE];
    if ctx.read_bytes(addr, &mut copy).is_err() || ctx.write_bytes(PFTEMP, &copy).is_err() {
        return;
    }
    match sys_page_map(ctx, EnvId::NONE, PFTEMP, EnvId::NONE, addr, RW) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => panic!("pgfault: sys_page_map: {}", err),
        Err(_) => return,
    }
    match sys_page_unmap(ctx, EnvId::NONE, PFTEMP) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => panic!("pgfault: sys_page_unmap: {}", err),
        Err(_) => {}
    }
}
