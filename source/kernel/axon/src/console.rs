// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! System console: buffered output sink and non-blocking input queue.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

/// Console state owned by the kernel. The bare-metal build drains the output
/// buffer to the serial port; hosted tests read it directly.
#[derive(Default)]
pub struct Console {
    output: Vec<u8>,
    input: VecDeque<u8>,
}

impl Console {
    /// Writes user bytes to the console.
    pub fn puts(&mut self, bytes: &[u8]) {
        self.output.extend_from_slice(bytes);
        if let Ok(text) = core::str::from_utf8(bytes) {
            log::debug!(target: "console", "{}", text.trim_end_matches('\n'));
        }
    }

    /// Non-blocking read; zero when no input is pending.
    pub fn getc(&mut self) -> i32 {
        self.input.pop_front().map_or(0, i32::from)
    }

    /// Queues bytes as if typed on the console.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.input.extend(bytes.iter().copied());
    }

    /// Drains and returns everything written so far.
    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.output)
    }
}
