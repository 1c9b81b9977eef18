// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The IPC rendezvous through the user library, receivers on their own
//! threads the way real environments run concurrently.

use std::thread;

use axon_e2e::{alloc_page, boot, peek, poke, RW};
use axon_abi::layout::UTOP;
use axon_abi::sys::{sys_result, Syscall, UserContext};
use axon_abi::Error;
use libaxon::{ipc_recv, ipc_send};

const RECV_WINDOW: u32 = 0x0080_0000;
const SEND_PAGE: u32 = 0x00a0_0000;

#[test]
fn value_and_page_rendezvous() {
    let (machine, mut sender) = boot();
    let mut receiver = machine.boot_env();
    let receiver_id = receiver.env_id();
    let sender_id = sender.env_id();

    // S3: the receiver opens a window at RECV_WINDOW and parks.
    let listener = thread::spawn(move || {
        let message = ipc_recv(&mut receiver, Some(RECV_WINDOW))
            .expect("receiver survives")
            .expect("rendezvous succeeds");
        let seen = peek(&mut receiver, RECV_WINDOW);
        (message, seen)
    });

    alloc_page(&mut sender, SEND_PAGE);
    poke(&mut sender, SEND_PAGE, 0x5a);
    ipc_send(&mut sender, receiver_id, 42, Some(SEND_PAGE), RW).expect("sender survives");

    let (message, seen) = listener.join().expect("receiver thread exits cleanly");
    assert_eq!(message.value, 42);
    assert_eq!(message.from, sender_id);
    assert_eq!(message.perm, RW.bits());
    assert_eq!(seen, 0x5a);

    // Same frame, not a copy: the receiver's writes show up at the sender.
    let mut receiver = machine.user(receiver_id);
    poke(&mut receiver, RECV_WINDOW, 0xa5);
    assert_eq!(peek(&mut sender, SEND_PAGE), 0xa5);
}

#[test]
fn send_to_absent_receiver_loses() {
    let (machine, mut sender) = boot();
    let bystander = machine.boot_env();
    let bystander_id = bystander.env_id();

    // S4: nobody is receiving; the raw send loses immediately and the
    // target's state is untouched.
    let ret = sender
        .syscall(Syscall::IpcTrySend, [bystander_id.raw(), 7, UTOP, 0, 0])
        .expect("sender survives");
    assert_eq!(sys_result(ret), Err(Error::IpcNotRecv));

    let kernel = machine.kernel();
    let idx = kernel.envs.resolve(bystander_id).expect("still alive");
    assert_eq!(kernel.envs.get(idx).ipc.value, 0);
    assert!(!kernel.envs.get(idx).ipc.recving);
}

#[test]
fn retrying_send_wins_once_receiver_arrives() {
    let (machine, mut sender) = boot();
    let mut receiver = machine.boot_env();
    let receiver_id = receiver.env_id();

    // The sender starts before the receiver listens; ipc_send yields and
    // retries until the rendezvous completes.
    let pusher = thread::spawn(move || {
        ipc_send(&mut sender, receiver_id, 99, None, axon_abi::layout::PteFlags::empty())
            .expect("sender survives");
    });

    let message = ipc_recv(&mut receiver, None)
        .expect("receiver survives")
        .expect("rendezvous succeeds");
    pusher.join().expect("sender thread exits cleanly");
    assert_eq!(message.value, 99);
    assert_eq!(message.perm, 0);
}

#[test]
fn value_only_when_receiver_refuses_pages() {
    let (machine, mut sender) = boot();
    let mut receiver = machine.boot_env();
    let receiver_id = receiver.env_id();

    let listener = thread::spawn(move || {
        ipc_recv(&mut receiver, None).expect("receiver survives").expect("rendezvous succeeds")
    });

    alloc_page(&mut sender, SEND_PAGE);
    ipc_send(&mut sender, receiver_id, 17, Some(SEND_PAGE), RW).expect("sender survives");

    let message = listener.join().expect("receiver thread exits cleanly");
    assert_eq!(message.value, 17);
    assert_eq!(message.perm, 0);

    let kernel = machine.kernel();
    let idx = kernel.envs.resolve(receiver_id).unwrap();
    let aspace = kernel.envs.get(idx).aspace.unwrap();
    assert!(aspace.lookup_page(&kernel.mem, RECV_WINDOW).is_none());
}
