// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Trap numbering, diagnostics, and the page-fault upcall path.
//!
//! The entry stubs (see `arch`) normalize every vector onto one stack layout
//! before the common path in [`crate::Kernel::handle_trap`] runs; this module
//! carries what the common path shares.

mod pgfault;

use core::fmt::{self, Write};

use axon_abi::frames::{PushRegs, Trapframe};
use spin::Mutex;

/// Divide error.
pub const T_DIVIDE: u32 = 0;
/// Debug exception.
pub const T_DEBUG: u32 = 1;
/// Non-maskable interrupt.
pub const T_NMI: u32 = 2;
/// Breakpoint.
pub const T_BRKPT: u32 = 3;
/// Overflow.
pub const T_OFLOW: u32 = 4;
/// Bounds check.
pub const T_BOUND: u32 = 5;
/// Invalid opcode.
pub const T_ILLOP: u32 = 6;
/// Device not available.
pub const T_DEVICE: u32 = 7;
/// Double fault.
pub const T_DBLFLT: u32 = 8;
/// Invalid task switch segment.
pub const T_TSS: u32 = 10;
/// Segment not present.
pub const T_SEGNP: u32 = 11;
/// Stack exception.
pub const T_STACK: u32 = 12;
/// General protection fault.
pub const T_GPFLT: u32 = 13;
/// Page fault.
pub const T_PGFLT: u32 = 14;
/// Floating point error.
pub const T_FPERR: u32 = 16;
/// Alignment check.
pub const T_ALIGN: u32 = 17;
/// Machine check.
pub const T_MCHK: u32 = 18;
/// SIMD floating point error.
pub const T_SIMDERR: u32 = 19;
/// System call vector.
pub const T_SYSCALL: u32 = 0x30;

/// First external IRQ vector.
pub const IRQ_OFFSET: u32 = 32;
/// Clock line.
pub const IRQ_TIMER: u32 = 0;
/// Noise line; logged and ignored.
pub const IRQ_SPURIOUS: u32 = 7;

static LAST_TRAP: Mutex<Option<Trapframe>> = Mutex::new(None);

/// Records the frame for post-mortem inspection.
pub fn record(frame: &Trapframe) {
    *LAST_TRAP.lock() = Some(*frame);
}

/// Last recorded trap frame, if any.
pub fn last_trap() -> Option<Trapframe> {
    *LAST_TRAP.lock()
}

/// Human-readable vector name.
pub fn describe_trap(trapno: u32) -> &'static str {
    const EXCEPTIONS: [&str; 20] = [
        "Divide error",
        "Debug",
        "Non-Maskable Interrupt",
        "Breakpoint",
        "Overflow",
        "BOUND Range Exceeded",
        "Invalid Opcode",
        "Device Not Available",
        "Double Fault",
        "Coprocessor Segment Overrun",
        "Invalid TSS",
        "Segment Not Present",
        "Stack Fault",
        "General Protection",
        "Page Fault",
        "(unknown trap)",
        "x87 FPU Floating-Point Error",
        "Alignment Check",
        "Machine-Check",
        "SIMD Floating-Point Exception",
    ];
    if (trapno as usize) < EXCEPTIONS.len() {
        return EXCEPTIONS[trapno as usize];
    }
    if trapno == T_SYSCALL {
        return "System call";
    }
    if (IRQ_OFFSET..IRQ_OFFSET + 16).contains(&trapno) {
        return "Hardware Interrupt";
    }
    "(unknown trap)"
}

/// Formats the saved general registers.
pub fn fmt_regs<W: Write>(regs: &PushRegs, f: &mut W) -> fmt::Result {
    writeln!(f, "  edi  0x{:08x}", regs.edi)?;
    writeln!(f, "  esi  0x{:08x}", regs.esi)?;
    writeln!(f, "  ebp  0x{:08x}", regs.ebp)?;
    writeln!(f, "  ebx  0x{:08x}", regs.ebx)?;
    writeln!(f, "  edx  0x{:08x}", regs.edx)?;
    writeln!(f, "  ecx  0x{:08x}", regs.ecx)?;
    writeln!(f, "  eax  0x{:08x}", regs.eax)
}

/// Formats a whole frame the way the monitor prints it.
pub fn fmt_trap<W: Write>(frame: &Trapframe, f: &mut W) -> fmt::Result {
    fmt_regs(&frame.regs, f)?;
    writeln!(f, "  es   0x----{:04x}", frame.es)?;
    writeln!(f, "  ds   0x----{:04x}", frame.ds)?;
    writeln!(f, "  trap 0x{:08x} {}", frame.trapno, describe_trap(frame.trapno))?;
    writeln!(f, "  err  0x{:08x}", frame.err)?;
    writeln!(f, "  eip  0x{:08x}", frame.eip)?;
    writeln!(f, "  cs   0x----{:04x}", frame.cs)?;
    writeln!(f, "  flag 0x{:08x}", frame.eflags)?;
    writeln!(f, "  esp  0x{:08x}", frame.esp)?;
    writeln!(f, "  ss   0x----{:04x}", frame.ss)
}
