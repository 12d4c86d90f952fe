// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Context primitives (component D): stack bootstrap and the raw
//! save/restore of a suspended thread's execution state.
//!
//! Only this module knows that the target is x86-64 and System V; the
//! scheduler above it only ever sees a [`Context`] and the two free
//! functions [`bootstrap`] and [`switch`].

use crate::config::STACK_SIZE;
use crate::error::SystemError;
use crate::thread::ThreadId;
use crate::{critical, runtime, scheduler};
use std::arch::global_asm;

global_asm!(include_str!("switch.s"));

extern "C" {
    /// Saves the callee-saved registers and stack pointer of the
    /// outgoing thread to `*old_sp`, then loads the stack pointer and
    /// callee-saved registers of the incoming thread from `new_sp` and
    /// returns into it.
    ///
    /// Implemented in `switch.s`. From the caller's perspective, this
    /// function returns only once some other thread switches back to
    /// the context that was current when it was called — i.e. it
    /// behaves like an ordinary blocking call, except that "blocking"
    /// may mean "this native stack is dormant for an arbitrarily long
    /// time while totally unrelated stacks run".
    fn uthreads_switch_stack(old_sp: *mut u64, new_sp: u64);
}

/// The entry point every freshly bootstrapped context's saved
/// instruction pointer points to. It is never called directly from
/// Rust; it is only ever reached by `uthreads_switch_stack`'s `ret`.
extern "C" fn trampoline() -> ! {
    // The real kernel signal mask is process-wide, not per-context, so
    // whatever switched us in is still holding the gate engaged at this
    // point. Take the entry closure while that protection is still in
    // effect, then open the gate ourselves before running user code —
    // this context has no `CriticalSection` guard of its own further up
    // its stack to do that for us later (§4.4).
    let id = runtime::current_id();
    let entry = runtime::with_runtime(|rt| rt.thread(id).take_entry())
        .expect("trampoline started with no entry closure to run");

    critical::force_open();

    entry();

    // The spec has no notion of a thread "returning" from its entry
    // point; we give it defined behavior by treating it exactly like a
    // self-terminate. terminate_current's own state mutations must run
    // gated like any other self-terminate caller's, so a fresh guard is
    // entered here rather than relying on the one `force_open` above,
    // which only covered running `entry()` itself.
    let _gate = critical::CriticalSection::enter();
    scheduler::terminate_current();

    // terminate_current() never returns — it always ends in a context
    // switch away from this (now-terminated) thread.
    SystemError::ReturnedAfterSwitch.fatal();
}

/// The register state and stack needed to resume a suspended thread
/// (§4.4): stack pointer, instruction pointer, and callee-saved
/// registers — captured on the thread's own stack rather than in this
/// struct, which only remembers where on that stack they live — plus the
/// signal mask, which genuinely does live here.
///
/// The mask can't be left to the kernel's own sigreturn bookkeeping the
/// way it would be for an ordinary signal handler: a switch may leave a
/// handler invocation stuck on an abandoned stack indefinitely (if that
/// thread blocks or sleeps before the handler frame ever gets to return
/// and the kernel's delivery bookkeeping along with it), which would
/// leave the preemption signal blocked process-wide until that thread
/// happens to run again. `switch` takes over that job explicitly,
/// mirroring what the original implementation's `sigsetjmp(env, 1)` /
/// `siglongjmp(env, 1)` pair did for it.
pub struct Context {
    /// The thread's saved stack pointer. Stale while the thread is
    /// running; valid once it has been switched out.
    stack_pointer: u64,

    /// The process signal mask in effect at the moment this context was
    /// last switched out.
    signal_mask: libc::sigset_t,

    /// The thread's stack, or `None` for the main thread, which runs on
    /// the process's own initial stack rather than one we allocated.
    stack: Option<Box<[u8]>>,
}

/// The exact layout `bootstrap` writes onto a fresh stack, and the
/// layout `switch.s` pushes to / pops from an existing one.
///
/// Field order mirrors memory order from low address to high, i.e. the
/// reverse of `switch.s`'s push sequence (`rbp, rbx, r12, r13, r14,
/// r15`): the last register pushed ends up at the lowest address, which
/// is where the saved stack pointer points. `rip` sits at the highest
/// address because it occupies the slot a `call` instruction (or, here,
/// the fabricated equivalent) writes to implicitly.
#[repr(C)]
struct SavedRegisters {
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbx: u64,
    rbp: u64,
    rip: u64,
}

fn empty_sigset() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        set
    }
}

impl Context {
    /// An empty context, used only for the main thread before its first
    /// switch-out (at which point `switch` fills in its real stack
    /// pointer and mask).
    pub fn empty() -> Context {
        Context {
            stack_pointer: 0,
            signal_mask: empty_sigset(),
            stack: None,
        }
    }

    fn stack_pointer_mut(&mut self) -> *mut u64 {
        &mut self.stack_pointer
    }
}

/// Allocates a fresh stack for `id` and prepares a context that, once
/// restored, begins executing [`trampoline`] with its stack pointer set
/// to the top of that stack and its saved signal mask empty, as §4.4
/// requires, so the preemption signal is deliverable from the new
/// thread's very first instruction once `trampoline` opens the gate.
///
pub fn bootstrap(_id: ThreadId) -> Context {
    let mut stack = vec![0u8; STACK_SIZE].into_boxed_slice();
    let base = stack.as_mut_ptr() as u64;
    let top = base + STACK_SIZE as u64;

    // Round down to a 16-byte boundary, then step back one machine word.
    // A `call` instruction requires rsp % 16 == 0 immediately before it
    // executes, leaving rsp % 16 == 8 at the callee's first instruction.
    // We reach `trampoline` via a `ret` rather than a `call`, so we
    // fabricate that same offset by hand — exactly the "- sizeof(word)"
    // adjustment the original implementation made to its own stack
    // pointer before storing it.
    let aligned_top = (top & !0xF) - 8;

    let frame = SavedRegisters {
        r15: 0,
        r14: 0,
        r13: 0,
        r12: 0,
        rbx: 0,
        rbp: 0,
        rip: trampoline as usize as u64,
    };

    let frame_addr = aligned_top - std::mem::size_of::<SavedRegisters>() as u64;
    debug_assert!(frame_addr >= base, "stack too small to hold the initial register frame");
    unsafe {
        (frame_addr as *mut SavedRegisters).write(frame);
    }

    Context {
        stack_pointer: frame_addr,
        signal_mask: empty_sigset(),
        stack: Some(stack),
    }
}

/// Switches from `*current` to `*next`: saves the outgoing context and
/// mask, restores the incoming one, and returns only when some later
/// switch brings `*current` back to life.
///
/// # Safety
///
/// Both pointers must reference live, distinct [`Context`]s belonging to
/// threads whose identity `current()` has already been updated to
/// reflect this switch (§4.4's contract on the scheduler).
///
pub unsafe fn switch(current: *mut Context, next: *const Context) {
    let mut previous_mask: libc::sigset_t = std::mem::zeroed();
    if libc::sigprocmask(0, std::ptr::null(), &mut previous_mask) != 0 {
        SystemError::MaskFailed(std::io::Error::last_os_error()).fatal();
    }
    (*current).signal_mask = previous_mask;

    if libc::sigprocmask(libc::SIG_SETMASK, &(*next).signal_mask, std::ptr::null_mut()) != 0 {
        SystemError::UnmaskFailed(std::io::Error::last_os_error()).fatal();
    }

    let old_sp = (*current).stack_pointer_mut();
    let new_sp = (*next).stack_pointer;
    uthreads_switch_stack(old_sp, new_sp);
}
