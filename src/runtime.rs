// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The process-wide runtime singleton: the thread table, the ready
//! queue, and the bookkeeping the scheduler and timer need to reach
//! them (§9 "back-references from signal handler to scheduler state").
//!
//! Modeled as an explicit singleton with explicit initialization rather
//! than a lazily-built one, because `init()` must be able to reset all
//! state cleanly on a second call, which a one-shot `Once` cannot do.

use crate::config::MAX_THREAD_NUM;
use crate::queue::ReadyQueue;
use crate::thread::{Thread, ThreadId, ThreadState};
use std::cell::UnsafeCell;

/// The runtime's mutable state. Never accessed directly; always through
/// [`with_runtime`], which the API layer only ever calls from inside a
/// held [`crate::critical::CriticalSection`] (or, for the timer
/// handler, a point where delivery of the preemption signal is already
/// otherwise excluded).
pub(crate) struct RuntimeInner {
    threads: Vec<Thread>,
    ready: ReadyQueue,
    current: ThreadId,
    total_quantums: u64,
}

impl RuntimeInner {
    fn new() -> RuntimeInner {
        let mut threads = Vec::with_capacity(MAX_THREAD_NUM);
        threads.push(Thread::new_main());
        for index in 1..MAX_THREAD_NUM {
            threads.push(Thread::new_unused(ThreadId::new(index)));
        }
        RuntimeInner {
            threads,
            ready: ReadyQueue::new(MAX_THREAD_NUM),
            current: ThreadId::MAIN,
            total_quantums: 1,
        }
    }

    pub(crate) fn thread(&self, id: ThreadId) -> &Thread {
        &self.threads[id.index()]
    }

    pub(crate) fn threads(&self) -> &[Thread] {
        &self.threads
    }

    pub(crate) fn current(&self) -> ThreadId {
        self.current
    }

    pub(crate) fn set_current(&mut self, id: ThreadId) {
        self.current = id;
    }

    pub(crate) fn total_quantums(&self) -> u64 {
        self.total_quantums
    }

    pub(crate) fn tick_total(&mut self) {
        self.total_quantums += 1;
    }

    pub(crate) fn ready_mut(&mut self) -> &mut ReadyQueue {
        &mut self.ready
    }

    /// Returns the lowest-indexed *Unused* or *Terminated* slot, scanning
    /// from index 1 upward (§4.3). Slot 0 is never a candidate; it
    /// belongs permanently to the main thread.
    pub(crate) fn allocate_slot(&self) -> Option<ThreadId> {
        (1..MAX_THREAD_NUM)
            .map(ThreadId::new)
            .find(|&id| matches!(self.thread(id).state(), ThreadState::Unused | ThreadState::Terminated))
    }

    /// Whether `id` names a slot that currently exists as a live thread
    /// (anything but *Unused*), the precondition most API calls share.
    pub(crate) fn is_live(&self, id: ThreadId) -> bool {
        id.as_usize() < MAX_THREAD_NUM && self.thread(id).state() != ThreadState::Unused
    }
}

struct RuntimeCell(UnsafeCell<Option<RuntimeInner>>);

// Safety: every access goes through `with_runtime`, which is only ever
// called while the preemption signal cannot interrupt it — either
// because the critical-section gate masks it, or because the signal
// handler itself runs non-reentrantly. There is exactly one native
// thread in this process; "Sync" here means "safe to reach through a
// `'static` reference", not "safe under real parallel access".
unsafe impl Sync for RuntimeCell {}

static RUNTIME: RuntimeCell = RuntimeCell(UnsafeCell::new(None));

/// Builds a fresh runtime, discarding whatever was there before. Called
/// once by `init()`, and again by every subsequent `init()` call: §9
/// requires a second `init()` to reset all state cleanly.
pub(crate) fn reset() {
    unsafe {
        *RUNTIME.0.get() = Some(RuntimeInner::new());
    }
}

/// Runs `f` against the runtime's state.
///
/// # Panics
///
/// Panics if called before [`reset`] (i.e. before `init()`), which would
/// itself indicate a bug in this crate rather than a user error: every
/// public API function validates that the library has been initialized
/// before reaching here.
pub(crate) fn with_runtime<R>(f: impl FnOnce(&mut RuntimeInner) -> R) -> R {
    let slot = unsafe { &mut *RUNTIME.0.get() };
    let inner = slot.as_mut().expect("uthreads runtime used before init()");
    f(inner)
}

/// Whether the runtime has been initialized at all. Used by `init()`
/// itself (which is always valid to call) and has no other caller.
pub(crate) fn is_initialized() -> bool {
    unsafe { (*RUNTIME.0.get()).is_some() }
}

/// The identifier of the thread currently running. Only meaningful once
/// initialized; callers that might run before `init()` (there are none
/// in this crate besides `init` itself) must not call this.
pub(crate) fn current_id() -> ThreadId {
    with_runtime(|rt| rt.current())
}

/// Marks every slot *Terminated*, for the `terminate(0)` process-exit
/// path (§4.7).
pub(crate) fn terminate_all() {
    with_runtime(|rt| {
        for thread in rt.threads() {
            thread.set_state(ThreadState::Terminated);
        }
    });
}
