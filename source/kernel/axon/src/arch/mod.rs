// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Architecture-specific entry and exit paths. Only the bare-metal x86
//! build compiles anything here; the hosted machine model lives in `hal`.

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod x86;
