// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction seams filled at boot.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

#[cfg(not(target_os = "none"))]
pub mod virt;

#[cfg(not(target_os = "none"))]
pub use virt::{UserEnv, VirtMachine};

/// Device side of the network driver. The kernel stages DMA descriptors;
/// an implementation moves frames between them and the outside world.
pub trait NetBackend: Send {
    /// Accepts one outgoing frame off a completed transmit block.
    fn transmit(&mut self, frame: &[u8]);

    /// Hands the next frame that arrived on the wire, if any.
    fn poll(&mut self) -> Option<Vec<u8>>;

    /// Whether the device is draining its command list right now. A stalled
    /// device leaves staged blocks incomplete and the ring fills up.
    fn tx_ready(&self) -> bool {
        true
    }
}

/// Wire that hands every transmitted frame straight back: the test-bench
/// device.
#[derive(Default)]
pub struct LoopbackNet {
    queue: VecDeque<Vec<u8>>,
}

impl NetBackend for LoopbackNet {
    fn transmit(&mut self, frame: &[u8]) {
        self.queue.push_back(frame.to_vec());
    }

    fn poll(&mut self) -> Option<Vec<u8>> {
        self.queue.pop_front()
    }
}
