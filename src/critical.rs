// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The critical-section gate (component A): a scoped region in which the
//! preemption signal is masked at the kernel level so the scheduler's
//! state can be mutated without the timer handler running concurrently
//! with it.
//!
//! The gate is not reentrant: nesting two [`CriticalSection`] guards on
//! the same native stack is a programming error in the core and is
//! caught by a debug assertion rather than silently tolerated.

use crate::error::SystemError;
use std::sync::atomic::{AtomicBool, Ordering};

/// Tracks whether the gate is currently engaged. This mirrors the
/// `in_critical_section` flag kept by the original implementation: the
/// real defense is the signal mask below, but the flag lets the timer
/// handler take a cheap, branch-only fast path without inspecting the
/// kernel's signal mask itself, and lets us assert against accidental
/// re-entrance.
///
static ENGAGED: AtomicBool = AtomicBool::new(false);

/// Returns whether the gate is currently engaged.
///
/// Read by the preemption signal handler (§4.6 step 1) before it touches
/// any scheduler state.
///
pub fn is_engaged() -> bool {
    ENGAGED.load(Ordering::Acquire)
}

fn vtalrm_set() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGVTALRM);
        set
    }
}

/// Masks the preemption signal at the kernel level. A failure of the
/// underlying mask operation is fatal (§4.1).
///
fn mask() {
    let set = vtalrm_set();
    let ok = unsafe { libc::sigprocmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if ok != 0 {
        SystemError::MaskFailed(std::io::Error::last_os_error()).fatal();
    }
}

/// Unmasks the preemption signal at the kernel level. A failure of the
/// underlying mask operation is fatal (§4.1).
///
fn unmask() {
    let set = vtalrm_set();
    let ok = unsafe { libc::sigprocmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut()) };
    if ok != 0 {
        SystemError::UnmaskFailed(std::io::Error::last_os_error()).fatal();
    }
}

/// An RAII guard representing "the preemption signal is masked". Dropping
/// it unmasks the signal again.
///
/// Every public API entry point that inspects or mutates scheduler state
/// holds one of these for the duration of that work, exactly as §4.1
/// requires. A thread that calls `block`/`sleep`/`terminate` on itself
/// carries this guard across the context switch: the guard's storage
/// lives on that thread's own stack, so it is still "held" when the
/// thread is later resumed, and is only dropped when the original call
/// finally returns up its own call stack — at which point the signal is
/// unmasked again, just as it would have been had the thread never been
/// switched out at all.
///
pub struct CriticalSection {
    _private: (),
}

impl CriticalSection {
    /// Enters the gate. Panics in debug builds if the gate is already
    /// engaged on this call stack, since the gate is not reentrant.
    ///
    pub fn enter() -> CriticalSection {
        debug_assert!(!ENGAGED.load(Ordering::Relaxed), "critical section gate is not reentrant");
        mask();
        ENGAGED.store(true, Ordering::Release);
        CriticalSection { _private: () }
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        ENGAGED.store(false, Ordering::Release);
        unmask();
    }
}

/// Forces the gate fully open, without going through the usual
/// enter/drop pairing.
///
/// Two callers need this rather than an ordinary guard. The trampoline
/// that starts a freshly spawned thread (§4.4) calls it before running
/// the thread's entry point: a brand new thread's saved context was
/// fabricated out of thin air by [`crate::context::bootstrap`] while
/// *someone else* held the gate (`spawn` always runs inside one), so
/// unlike an existing thread being resumed, it has no [`CriticalSection`]
/// guard of its own sitting further up its call stack to drop and unmask
/// later — left alone, it would run forever with the preemption signal
/// masked. `scheduler::terminate_current` calls it for a related reason:
/// it never returns, so whatever guard its caller holds never runs its
/// `Drop` either.
///
pub fn force_open() {
    ENGAGED.store(false, Ordering::Release);
    unmask();
}
