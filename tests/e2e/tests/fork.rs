// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Copy-on-write fork, end to end: divergence, exception-stack privacy,
//! and view isolation between parent and child.

use axon_e2e::{alloc_page, boot, peek, poke};
use axon_abi::layout::{PteFlags, PGSIZE, UTOP, UXSTACKTOP};
use axon_abi::sys::{EnvId, UserContext};
use libaxon::fork;

const DATA: u32 = 0x0040_0000;
const XSTACK_PAGE: u32 = UXSTACKTOP - PGSIZE as u32;

#[test]
fn fork_then_diverge() {
    let (machine, mut parent) = boot();
    alloc_page(&mut parent, DATA);
    poke(&mut parent, DATA, 0xaa);

    let child_id = fork(&mut parent).expect("parent survives fork");
    assert_ne!(child_id, EnvId::NONE);
    let mut child = machine.user(child_id);

    // The child would see the call return zero when scheduled.
    {
        let kernel = machine.kernel();
        let idx = kernel.envs.resolve(child_id).expect("child is live");
        assert_eq!(kernel.envs.get(idx).tf.regs.eax, 0);
    }

    // Parent writes through the COW mapping; the child's view is frozen.
    poke(&mut parent, DATA, 0xbb);
    assert_eq!(peek(&mut parent, DATA), 0xbb);
    assert_eq!(peek(&mut child, DATA), 0xaa);
}

#[test]
fn child_write_does_not_leak_into_parent() {
    let (machine, mut parent) = boot();
    alloc_page(&mut parent, DATA);
    poke(&mut parent, DATA, 0x11);

    let child_id = fork(&mut parent).expect("parent survives fork");
    let mut child = machine.user(child_id);

    poke(&mut child, DATA, 0x22);
    assert_eq!(peek(&mut child, DATA), 0x22);
    assert_eq!(peek(&mut parent, DATA), 0x11);
}

#[test]
fn exception_stacks_stay_writable_and_private() {
    let (machine, mut parent) = boot();
    alloc_page(&mut parent, DATA);
    poke(&mut parent, DATA, 1);

    let child_id = fork(&mut parent).expect("parent survives fork");
    let mut child = machine.user(child_id);

    // The freshly forked child takes a write fault and completes the copy.
    poke(&mut child, DATA, 2);

    // Both exception stacks: writable, never copy-on-write.
    let kernel = machine.kernel();
    for id in [parent.env_id(), child_id] {
        let idx = kernel.envs.resolve(id).expect("both live");
        let aspace = kernel.envs.get(idx).aspace.expect("live env has a directory");
        let (_, pte) = aspace
            .lookup_page(&kernel.mem, XSTACK_PAGE)
            .expect("exception stack is mapped");
        assert!(pte.flags().contains(PteFlags::W), "exception stack read-only for {id:x}");
        assert!(!pte.flags().contains(PteFlags::COW), "exception stack went COW for {id:x}");
    }
}

#[test]
fn forked_views_match_everywhere_below_utop() {
    let (machine, mut parent) = boot();
    for va in [DATA, DATA + PGSIZE as u32, 0x0080_0000] {
        alloc_page(&mut parent, va);
        poke(&mut parent, va, (va >> 20) as u8);
    }

    let child_id = fork(&mut parent).expect("parent survives fork");

    // Walk the parent's mapped pages below UTOP (exception stack excluded)
    // and compare contents page by page through kernel-privileged copies.
    let kernel = machine.kernel();
    let parent_idx = kernel.envs.resolve(parent.env_id()).unwrap();
    let child_idx = kernel.envs.resolve(child_id).unwrap();
    let parent_space = kernel.envs.get(parent_idx).aspace.unwrap();
    let mut compared = 0;
    let mut va = 0u32;
    while va < UTOP {
        if va != XSTACK_PAGE {
            if let Some((frame, _)) = parent_space.lookup_page(&kernel.mem, va) {
                let ours = kernel.copy_from_user(parent_idx, va, PGSIZE).unwrap();
                let theirs = kernel.copy_from_user(child_idx, va, PGSIZE).unwrap();
                assert_eq!(ours, theirs, "divergent view at {va:#x}");
                let _ = frame;
                compared += 1;
            }
        }
        va = match va.checked_add(PGSIZE as u32) {
            Some(next) => next,
            None => break,
        };
    }
    assert!(compared >= 3, "walk visited the mapped pages");
}
