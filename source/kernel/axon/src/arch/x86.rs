// Copyright 2025 Axon OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! 32-bit x86 trap entry and resume.
//!
//! The vector stubs normalize the hardware's inconsistency (some exceptions
//! push an error code, some do not) so that `trap_entry` always finds the
//! same stack layout: segments, general registers, vector number, error
//! code, then the architectural return frame. `env_pop_tf` is the inverse.

use axon_abi::frames::{Trapframe, FL_IF};

// Vectors 8, 10-14 and 17 push a hardware error code; everything else gets
// a zero pushed by its stub so the common frame is uniform.
core::arch::global_asm!(
    r#"
    .macro TRAPHANDLER name, num
    .globl \name
    \name:
        pushl $\num
        jmp _alltraps
    .endm

    .macro TRAPHANDLER_NOEC name, num
    .globl \name
    \name:
        pushl $0
        pushl $\num
        jmp _alltraps
    .endm

    TRAPHANDLER_NOEC vec_divide, 0
    TRAPHANDLER_NOEC vec_debug, 1
    TRAPHANDLER_NOEC vec_nmi, 2
    TRAPHANDLER_NOEC vec_brkpt, 3
    TRAPHANDLER_NOEC vec_oflow, 4
    TRAPHANDLER_NOEC vec_bound, 5
    TRAPHANDLER_NOEC vec_illop, 6
    TRAPHANDLER_NOEC vec_device, 7
    TRAPHANDLER vec_dblflt, 8
    TRAPHANDLER vec_tss, 10
    TRAPHANDLER vec_segnp, 11
    TRAPHANDLER vec_stack, 12
    TRAPHANDLER vec_gpflt, 13
    TRAPHANDLER vec_pgflt, 14
    TRAPHANDLER_NOEC vec_fperr, 16
    TRAPHANDLER vec_align, 17
    TRAPHANDLER_NOEC vec_mchk, 18
    TRAPHANDLER_NOEC vec_simderr, 19
    TRAPHANDLER_NOEC vec_syscall, 0x30

    .globl _alltraps
    _alltraps:
        pushl %ds
        pushl %es
        pushal
        movw $0x10, %ax
        movw %ax, %ds
        movw %ax, %es
        pushl %esp
        call trap_entry
    "#,
    options(att_syntax)
);

extern "C" {
    /// Vector stub table head, installed into the IDT by the boot path.
    pub fn vec_divide();
}

/// Rust side of the common entry path. Interrupts stay masked from here to
/// the resume; the frame on the kernel stack is persisted by the common
/// dispatch before any rescheduling happens.
///
/// # Safety
///
/// Called only from `_alltraps` with a well-formed frame.
#[no_mangle]
pub unsafe extern "C" fn trap_entry(tf: *mut Trapframe) -> ! {
    assert!(read_eflags() & FL_IF == 0, "interrupts enabled in trap path");
    // The boot path wires this to the kernel singleton; the common dispatch
    // and the scheduler decide what to resume.
    unimplemented!("bare-metal bring-up supplies the kernel singleton: {:p}", tf)
}

/// Resumes an environment from its saved frame.
///
/// # Safety
///
/// `tf` must reference a frame whose segment selectors are user-mode valid.
pub unsafe fn env_pop_tf(tf: &Trapframe) -> ! {
    core::arch::asm!(
        "movl {0}, %esp",
        "popal",
        "popl %es",
        "popl %ds",
        "addl $8, %esp", // trapno and err
        "iret",
        in(reg) tf as *const Trapframe as u32,
        options(att_syntax, noreturn)
    );
}

/// Faulting linear address of the most recent page fault.
pub fn rcr2() -> u32 {
    let value: u32;
    unsafe {
        core::arch::asm!("mov {0}, cr2", out(reg) value, options(nomem, nostack));
    }
    value
}

/// Drops one translation from the TLB.
pub fn invlpg(va: u32) {
    unsafe {
        core::arch::asm!("invlpg [{0}]", in(reg) va, options(nostack));
    }
}

fn read_eflags() -> u32 {
    let value: u32;
    unsafe {
        core::arch::asm!("pushfd", "pop {0}", out(reg) value, options(nomem));
    }
    value
}
