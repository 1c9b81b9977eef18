// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared plumbing for the end-to-end scenarios: boot helpers and a few
//! user-memory conveniences on top of the virtual machine.

use std::sync::Arc;
use std::sync::Once;

use axon::hal::{LoopbackNet, UserEnv, VirtMachine};
use axon::Config;
use axon_abi::layout::PteFlags;
use axon_abi::sys::{sys_result, Syscall, UserContext};

/// User page writable mapping bits.
pub const RW: PteFlags = PteFlags::P.union(PteFlags::U).union(PteFlags::W);

/// Initialises logging once per test binary.
pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Boots a plain machine with one runnable environment.
pub fn boot() -> (Arc<VirtMachine>, UserEnv) {
    init_logging();
    let machine = VirtMachine::new(Config::default());
    let env = machine.boot_env();
    (machine, env)
}

/// Boots a machine with a loopback network device attached.
pub fn boot_with_net() -> (Arc<VirtMachine>, UserEnv) {
    init_logging();
    let machine = VirtMachine::with_net(Config::default(), Box::new(LoopbackNet::default()));
    let env = machine.boot_env();
    (machine, env)
}

/// Maps a fresh writable page at `va` in the calling environment.
pub fn alloc_page(env: &mut UserEnv, va: u32) {
    let ret = env
        .syscall(Syscall::PageAlloc, [0, va, RW.bits(), 0, 0])
        .expect("environment is alive");
    sys_result(ret).expect("page_alloc succeeds");
}

/// Reads one byte of user memory.
pub fn peek(env: &mut UserEnv, va: u32) -> u8 {
    let mut byte = [0u8];
    env.read_bytes(va, &mut byte).expect("environment is alive");
    byte[0]
}

/// Writes one byte of user memory.
pub fn poke(env: &mut UserEnv, va: u32, value: u8) {
    env.write_bytes(va, &[value]).expect("environment is alive");
}
