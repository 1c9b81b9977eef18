// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests over randomized syscall sequences
//! OWNERS: @kernel-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Frame refcounts equal the number of mappings plus directory owners
//!   - No user PTE ever carries WRITE and COW together
//!   - Ids observed by userspace never resolve to a different environment
//!
//! TEST_SCENARIOS:
//!   - mapping_ops_preserve_refcounts(): random page/env ops, full check
//!   - ids_are_never_recycled_silently(): destroyed ids stay dead

use alloc::collections::BTreeMap;
use alloc::vec;
use alloc::vec::Vec;

use proptest::prelude::*;

use axon_abi::layout::{self, PteFlags, PGSIZE, UTOP, UXSTACKTOP};
use axon_abi::sys::{EnvId, EnvStatus, Syscall};

use crate::config::Config;
use crate::kernel::Kernel;
use crate::mm::Ppn;
use crate::syscall::SysReturn;

const VAS: [u32; 6] = [
    0x1000,
    0x0040_0000,
    0x0040_1000,
    0x0080_0000,
    UXSTACKTOP - 2 * PGSIZE as u32,
    UXSTACKTOP - PGSIZE as u32,
];

// A mix of valid masks, a COW mask, and two the kernel must reject.
const PERMS: [u32; 5] = [0x7, 0x5, 0x805, 0x807, 0x17];

#[derive(Clone, Debug)]
enum Op {
    Alloc { actor: usize, va: usize, perm: usize },
    Map { actor: usize, src_va: usize, dst: usize, dst_va: usize, perm: usize },
    Unmap { actor: usize, va: usize },
    Exofork { actor: usize },
    Destroy { actor: usize, target: usize },
    SetStatus { actor: usize, target: usize, runnable: bool },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<usize>(), 0..VAS.len(), 0..PERMS.len())
            .prop_map(|(actor, va, perm)| Op::Alloc { actor, va, perm }),
        (any::<usize>(), 0..VAS.len(), any::<usize>(), 0..VAS.len(), 0..PERMS.len()).prop_map(
            |(actor, src_va, dst, dst_va, perm)| Op::Map { actor, src_va, dst, dst_va, perm }
        ),
        (any::<usize>(), 0..VAS.len()).prop_map(|(actor, va)| Op::Unmap { actor, va }),
        any::<usize>().prop_map(|actor| Op::Exofork { actor }),
        (any::<usize>(), any::<usize>()).prop_map(|(actor, target)| Op::Destroy { actor, target }),
        (any::<usize>(), any::<usize>(), any::<bool>())
            .prop_map(|(actor, target, runnable)| Op::SetStatus { actor, target, runnable }),
    ]
}

struct Harness {
    kernel: Kernel,
    issued: Vec<EnvId>,
}

impl Harness {
    fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut kernel = Kernel::new(Config::tiny(128));
        let issued = vec![kernel.boot_env(), kernel.boot_env()];
        Self { kernel, issued }
    }

    fn live(&self) -> Vec<usize> {
        self.issued
            .iter()
            .filter_map(|id| self.kernel.envs.resolve(*id))
            .collect()
    }

    fn pick_id(&self, sel: usize) -> EnvId {
        self.issued[sel % self.issued.len()]
    }

    fn apply(&mut self, op: &Op) {
        let live = self.live();
        if live.is_empty() {
            return;
        }
        let actor_of = |sel: usize| live[sel % live.len()];
        match *op {
            Op::Alloc { actor, va, perm } => {
                let idx = actor_of(actor);
                self.kernel
                    .syscall(idx, Syscall::PageAlloc as u32, [0, VAS[va], PERMS[perm], 0, 0]);
            }
            Op::Map { actor, src_va, dst, dst_va, perm } => {
                let idx = actor_of(actor);
                let dst_id = self.pick_id(dst);
                self.kernel.syscall(
                    idx,
                    Syscall::PageMap as u32,
                    [0, VAS[src_va], dst_id.raw(), VAS[dst_va], PERMS[perm]],
                );
            }
            Op::Unmap { actor, va } => {
                let idx = actor_of(actor);
                self.kernel
                    .syscall(idx, Syscall::PageUnmap as u32, [0, VAS[va], 0, 0, 0]);
            }
            Op::Exofork { actor } => {
                let idx = actor_of(actor);
                if let SysReturn::Value(child) =
                    self.kernel.syscall(idx, Syscall::Exofork as u32, [0; 5])
                {
                    if child > 0 {
                        self.issued.push(EnvId(child as u32));
                    }
                }
            }
            Op::Destroy { actor, target } => {
                let idx = actor_of(actor);
                let target_id = self.pick_id(target);
                self.kernel
                    .syscall(idx, Syscall::EnvDestroy as u32, [target_id.raw(), 0, 0, 0, 0]);
            }
            Op::SetStatus { actor, target, runnable } => {
                let idx = actor_of(actor);
                let target_id = self.pick_id(target);
                let status = if runnable { EnvStatus::Runnable } else { EnvStatus::NotRunnable };
                self.kernel.syscall(
                    idx,
                    Syscall::EnvSetStatus as u32,
                    [target_id.raw(), status as u32, 0, 0, 0],
                );
            }
        }
    }

    /// Walks every live directory and rebuilds the expected refcount of
    /// every frame: one per data PTE, one per table PDE, one per directory
    /// owner. Verifies the COW/WRITE exclusion along the way.
    fn check(&self) {
        let kernel = &self.kernel;
        let mut expected: BTreeMap<u32, u16> = BTreeMap::new();

        let mut directories = vec![*kernel.envs.base()];
        for env in kernel.envs.iter() {
            if let Some(aspace) = env.aspace {
                directories.push(aspace);
            }
        }

        for aspace in &directories {
            *expected.entry(aspace.pgdir().0).or_default() += 1;
            for pdeno in 0..layout::pdx(UTOP) {
                let pde = kernel.mem.read_u32(aspace.pgdir().pa() + (pdeno * 4) as u32);
                if pde & PteFlags::P.bits() == 0 {
                    continue;
                }
                let table = Ppn::of_pa(pde & !PteFlags::MASK);
                *expected.entry(table.0).or_default() += 1;
                for pteno in 0..1024 {
                    let pte = kernel.mem.read_u32(table.pa() + (pteno * 4) as u32);
                    if pte & PteFlags::P.bits() == 0 {
                        continue;
                    }
                    let flags = PteFlags::of_entry(pte);
                    assert!(
                        !(flags.contains(PteFlags::W) && flags.contains(PteFlags::COW)),
                        "mapping both writable and copy-on-write: {pte:#x}"
                    );
                    *expected.entry((pte & !PteFlags::MASK) >> 12).or_default() += 1;
                }
            }
        }

        for ppn in 0..kernel.mem.npages() as u32 {
            let want = expected.get(&ppn).copied().unwrap_or(0);
            assert_eq!(
                kernel.mem.refcount(Ppn(ppn)),
                want,
                "frame {ppn} refcount drifted from its mapping count"
            );
        }

        for id in &self.issued {
            if let Some(idx) = kernel.envs.resolve(*id) {
                assert_eq!(kernel.envs.get(idx).id, *id);
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn mapping_ops_preserve_refcounts(ops in proptest::collection::vec(arb_op(), 1..40)) {
        let mut harness = Harness::new();
        for op in &ops {
            harness.apply(op);
            harness.check();
        }
    }

    #[test]
    fn ids_are_never_recycled_silently(ops in proptest::collection::vec(arb_op(), 1..60)) {
        let mut harness = Harness::new();
        let mut dead: Vec<EnvId> = Vec::new();
        for op in &ops {
            harness.apply(op);
            for id in &harness.issued {
                if harness.kernel.envs.resolve(*id).is_none() && !dead.contains(id) {
                    dead.push(*id);
                }
            }
            for id in &dead {
                prop_assert!(harness.kernel.envs.resolve(*id).is_none(),
                    "a destroyed id came back to life");
            }
        }
    }
}
