// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! The network helper flows: an output environment feeding the driver from
//! IPC messages, and an input environment pumping received frames back up
//! with a page per packet.

use std::thread;

use axon_e2e::{alloc_page, boot_with_net, RW};
use axon_abi::net::{NSREQ_INPUT, NSREQ_OUTPUT, PKT_DATA_OFFSET, PKT_LEN_OFFSET};
use axon_abi::sys::{sys_result, UserContext};
use axon_abi::Error;
use libaxon::syscall::{sys_net_try_recv, sys_net_try_send, sys_yield};
use libaxon::{ipc_recv, ipc_send};

const PKT_PAGE: u32 = 0x0060_0000;
const RX_BUF: u32 = 0x0061_0000;

/// Writes a `(length, data)` packet page the network-server way.
fn stage_packet(env: &mut axon::hal::UserEnv, page: u32, payload: &[u8]) {
    alloc_page(env, page);
    env.write_bytes(page + PKT_LEN_OFFSET, &(payload.len() as u32).to_le_bytes())
        .expect("alive");
    env.write_bytes(page + PKT_DATA_OFFSET, payload).expect("alive");
}

#[test]
fn output_helper_transmits_ipc_packets() {
    let (machine, mut server) = boot_with_net();
    let mut output = machine.boot_env();
    let output_id = output.env_id();

    // The output helper: receive one NSREQ_OUTPUT with a packet page, hand
    // the frame to the driver.
    let helper = thread::spawn(move || {
        let message = ipc_recv(&mut output, Some(PKT_PAGE))
            .expect("helper survives")
            .expect("rendezvous succeeds");
        assert_eq!(message.value, NSREQ_OUTPUT);
        let len = output.read_u32(PKT_PAGE + PKT_LEN_OFFSET).expect("alive");
        sys_net_try_send(&mut output, PKT_PAGE + PKT_DATA_OFFSET, len)
            .expect("helper survives")
            .expect("ring accepts the frame");
    });

    stage_packet(&mut server, PKT_PAGE, b"frame on the wire");
    ipc_send(&mut server, output_id, NSREQ_OUTPUT, Some(PKT_PAGE), RW).expect("server survives");
    helper.join().expect("helper exits cleanly");

    // The loopback wire hands the frame back through the receive ring.
    alloc_page(&mut server, RX_BUF);
    let len = sys_net_try_recv(&mut server, RX_BUF)
        .expect("server survives")
        .expect("a frame is waiting");
    assert_eq!(len as usize, b"frame on the wire".len());
    let mut data = vec![0u8; len as usize];
    server.read_bytes(RX_BUF, &mut data).expect("alive");
    assert_eq!(data, b"frame on the wire");
}

#[test]
fn input_helper_pumps_frames_with_a_page_each() {
    let (machine, mut driver_side) = boot_with_net();
    let mut input = machine.boot_env();
    let input_id = input.env_id();
    let server_id = driver_side.env_id();

    // The input helper: poll the driver (yielding while the ring is
    // drained), then push the frame to the server with a fresh page.
    let helper = thread::spawn(move || {
        alloc_page(&mut input, RX_BUF);
        let len = loop {
            match sys_net_try_recv(&mut input, RX_BUF).expect("helper survives") {
                Ok(len) => break len as usize,
                Err(Error::RfaEmpty) => sys_yield(&mut input).expect("helper survives"),
                Err(err) => panic!("net_try_recv: {}", err),
            }
        };
        let mut payload = vec![0u8; len];
        input.read_bytes(RX_BUF, &mut payload).expect("alive");
        stage_packet(&mut input, PKT_PAGE, &payload);
        ipc_send(&mut input, server_id, NSREQ_INPUT, Some(PKT_PAGE), RW).expect("helper survives");
    });

    // A frame appears on the wire: transmit over loopback so the receive
    // ring has something to hand the helper.
    stage_packet(&mut driver_side, PKT_PAGE, b"inbound");
    let len = driver_side.read_u32(PKT_PAGE + PKT_LEN_OFFSET).unwrap();
    sys_net_try_send(&mut driver_side, PKT_PAGE + PKT_DATA_OFFSET, len)
        .expect("server survives")
        .expect("ring accepts the frame");

    let message = ipc_recv(&mut driver_side, Some(RX_BUF))
        .expect("server survives")
        .expect("rendezvous succeeds");
    helper.join().expect("helper exits cleanly");

    assert_eq!(message.value, NSREQ_INPUT);
    assert_eq!(message.from, input_id);
    let got_len = driver_side.read_u32(RX_BUF + PKT_LEN_OFFSET).unwrap();
    assert_eq!(got_len, 7);
    let mut payload = [0u8; 7];
    driver_side.read_bytes(RX_BUF + PKT_DATA_OFFSET, &mut payload).unwrap();
    assert_eq!(&payload, b"inbound");
}
