//! x86_64 (System V AMD64 ABI) register-level context switch.
//!
//! `swap(out_rsp, new_rsp)` saves the six callee-saved registers of the
//! currently running context onto its own stack, stashes the resulting stack
//! pointer at `*out_rsp`, then restores `new_rsp` and pops its six
//! callee-saved registers back before returning (via `ret`) into whatever
//! instruction follows the spot that previously called `swap` to switch
//! *into* that stack.
//!
//! This is the same push-six/`ret`-via-stack trick used by minimal
//! green-thread schedulers (see e.g. the riscv64 `sd`/`ld` sequence in
//! `oscamp`'s `02_green_threads` exercise); here it is the x86_64 SysV
//! equivalent: `rbx, rbp, r12, r13, r14, r15` are the callee-saved GPRs.

use std::arch::global_asm;

extern "C" {
    fn weave_rt_swap_context(out_rsp: *mut usize, new_rsp: usize);
}

global_asm!(
    ".text",
    ".global weave_rt_swap_context",
    "weave_rt_swap_context:",
    "push rbp",
    "push rbx",
    "push r12",
    "push r13",
    "push r14",
    "push r15",
    "mov [rdi], rsp",
    "mov rsp, rsi",
    "pop r15",
    "pop r14",
    "pop r13",
    "pop r12",
    "pop rbx",
    "pop rbp",
    "ret",
);

/// Switches the CPU's stack from the caller's current context to `new_rsp`,
/// saving the caller's resulting stack pointer into `*out_rsp` first.
///
/// # Safety
///
/// `new_rsp` must be either:
/// - a value previously produced by [`init_stack`] that has never been
///   resumed, or
/// - a value previously written to an `out_rsp` slot by a prior call to
///   this function on a stack that is still live (i.e. the context that
///   owns it has not been destroyed).
///
/// `out_rsp` must point at valid, writable memory for a `usize`.
#[inline(always)]
pub(crate) unsafe fn swap(out_rsp: *mut usize, new_rsp: usize) {
    weave_rt_swap_context(out_rsp, new_rsp);
}

/// Lays out a fresh context at the top of `stack` so that the first `swap`
/// into the returned stack pointer jumps into `trampoline`.
///
/// The SysV ABI requires `rsp % 16 == 8` at function entry (the `call`
/// instruction having just pushed an 8-byte return address onto a
/// 16-aligned stack). We reproduce that by hand: the trampoline's "return
/// address" slot sits at a 16-aligned address, and the six callee-saved
/// slots `swap` will `pop` sit directly below it.
///
/// # Safety
///
/// `stack` must be at least 64 bytes and must not be accessed concurrently
/// while the returned stack pointer is in use.
pub(crate) unsafe fn init_stack(stack: &mut [u8], trampoline: unsafe extern "C" fn() -> !) -> usize {
    assert!(stack.len() >= 64, "stack too small for context bootstrap");
    let base = stack.as_mut_ptr() as usize;
    let top = (base + stack.len()) & !0xF_usize; // round down to 16-byte alignment
    let ret_slot = top - 16; // also 16-byte aligned
    std::ptr::write(ret_slot as *mut usize, trampoline as usize);
    // Six garbage callee-saved qwords sit directly below the return slot;
    // `swap`'s six `pop`s consume them (their initial values are never read
    // meaningfully by the trampoline, which never touches rbp/rbx/r12-r15
    // before establishing its own frame).
    for i in 1..=6 {
        std::ptr::write((ret_slot - i * 8) as *mut usize, 0);
    }
    ret_slot - 48
}
