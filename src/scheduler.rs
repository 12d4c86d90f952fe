// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The round-robin scheduler (component E): picks the next runnable
//! thread and performs the context switch into it (§4.5).

use crate::context;
use crate::critical;
use crate::error::SystemError;
use crate::runtime::{self, with_runtime};
use crate::thread::{ThreadId, ThreadState};

enum Decision {
    /// Nothing else is runnable; the calling thread simply keeps going,
    /// with no context switch at all.
    Continue,
    SwitchTo(ThreadId),
}

/// Implements steps 1-3 of §4.5 purely as a decision: whether to demote
/// and enqueue the prior running thread, drain stale ready-queue
/// entries, and choose who runs next (or to keep running as-is).
fn decide(rt: &mut runtime::RuntimeInner) -> Decision {
    let prior = rt.current();
    let prior_still_running = rt.thread(prior).state() == ThreadState::Running;

    if prior_still_running {
        // A self-suspending thread (block/sleep/terminate) has already
        // moved itself out of *Running* before calling here, bypassing
        // this demotion per §4.5's policy note. Only a preemption
        // reaches this branch.
        if rt.ready_mut().is_empty() {
            log::trace!("thread {} is the only runnable thread; continuing without a switch", prior);
            return Decision::Continue;
        }
        rt.thread(prior).set_state(ThreadState::Ready);
        rt.ready_mut().enqueue(prior);
    }

    loop {
        match rt.ready_mut().dequeue() {
            Some(id) if rt.thread(id).state() == ThreadState::Ready => return Decision::SwitchTo(id),
            Some(id) => {
                log::trace!("scheduler: discarding stale ready-queue entry for thread {}", id);
                continue;
            }
            None => SystemError::NoRunnableThread.fatal(),
        }
    }
}

/// Picks the next runnable thread and switches into it, or leaves the
/// current thread running if it is the only one (§4.5).
pub fn schedule_next() {
    let decision = with_runtime(decide);
    let next = match decision {
        Decision::Continue => return,
        Decision::SwitchTo(id) => id,
    };

    let (current_ctx, next_ctx) = with_runtime(|rt| {
        let prior = rt.current();
        let prior_ctx = rt.thread(prior).context_ptr();
        if rt.thread(next).state() != ThreadState::Ready {
            // `decide` only ever hands back an id it just found *Ready* at
            // the front of the queue; this is the defense-in-depth recheck
            // mirroring the original's own `context_switch` guard against
            // switching into a terminated or unused slot.
            SystemError::SwitchIntoDeadSlot.fatal();
        }
        rt.set_current(next);
        rt.thread(next).set_state(ThreadState::Running);
        let next_ctx = rt.thread(next).context_ptr();
        log::debug!("scheduler: switching from thread {} to thread {}", prior, next);
        (prior_ctx, next_ctx)
    });

    // Safety: both pointers come from live slots in the thread table,
    // which never reallocates after `runtime::reset`, and `current` was
    // already updated above, satisfying the contract in §4.4.
    unsafe {
        context::switch(current_ctx, next_ctx);
    }
}

/// Terminates the currently running thread and switches away for good.
///
/// Assumes the critical-section gate is already engaged by the caller
/// (every caller either is an API function that entered one at its own
/// top, or — for `context::trampoline`'s entry-returned case — entered
/// one itself immediately before calling here). This call never returns,
/// so whatever guard the caller entered never runs its `Drop` — there is
/// no stack left to unwind it on. Rather than rely on that being
/// harmless, the gate is forced open explicitly, right before the
/// switch, exactly as a freshly bootstrapped thread's trampoline forces
/// it open before running user code for the first time.
pub fn terminate_current() -> ! {
    with_runtime(|rt| {
        let id = rt.current();
        rt.thread(id).set_state(ThreadState::Terminated);
        log::debug!("thread {} terminated itself", id);
    });
    critical::force_open();
    schedule_next();
    SystemError::ReturnedAfterSwitch.fatal();
}
