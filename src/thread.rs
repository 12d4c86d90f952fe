// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The thread control table (component C) and the lifecycle state
//! machine each control block moves through (§3).

use crate::context::Context;
use crossbeam_utils::atomic::AtomicCell;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Uniquely identifies a thread. A slot's identifier never changes; it is
/// simply the slot's index in the thread table (§3 invariant 3).
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(usize);

impl ThreadId {
    /// The main thread's identifier. It permanently occupies slot 0 and
    /// is never *Blocked* or present in the ready queue (§3 invariant 5).
    ///
    pub const MAIN: ThreadId = ThreadId(0);

    pub(crate) const fn new(id: usize) -> ThreadId {
        ThreadId(id)
    }

    pub(crate) const fn index(self) -> usize {
        self.0
    }

    /// Returns this identifier's numerical value.
    ///
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A thread's place in the lifecycle state machine (§3).
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// The slot is free for allocation.
    Unused,
    /// Runnable; enqueued in the ready queue exactly when in this state
    /// while not the running thread.
    Ready,
    /// Currently executing. Exactly one slot holds this state while the
    /// scheduler is active.
    Running,
    /// Not runnable: blocked by the API, sleeping, or both — see
    /// [`BlockReason`] for which.
    Blocked,
    /// The slot may be reclaimed by the next allocation.
    Terminated,
}

/// Distinguishes *why* a [`ThreadState::Blocked`] thread is blocked (§4.3).
///
/// Modeled as a single sum type rather than two independent booleans so
/// every transition in the table in §4.3 is exhaustively handled by a
/// `match` instead of relying on boolean algebra to stay consistent.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Not blocked for any reason (state is not *Blocked*, or the thread
    /// was just unblocked and hasn't re-entered the ready queue yet in
    /// the same step).
    None,
    /// Blocked on an unexpired sleep deadline only.
    Sleep,
    /// Blocked by an explicit `block` call only.
    UserBlock,
    /// Blocked by both an explicit `block` call and an unexpired sleep
    /// deadline. Both must clear before the thread becomes runnable
    /// again.
    Both,
}

impl BlockReason {
    /// Applies the `sleep()` transition from the table in §4.3.
    fn with_sleep(self) -> BlockReason {
        match self {
            BlockReason::None | BlockReason::Sleep => BlockReason::Sleep,
            BlockReason::UserBlock | BlockReason::Both => BlockReason::Both,
        }
    }

    /// Applies the `block()` transition from the table in §4.3.
    fn with_user_block(self) -> BlockReason {
        match self {
            BlockReason::None | BlockReason::UserBlock => BlockReason::UserBlock,
            BlockReason::Sleep | BlockReason::Both => BlockReason::Both,
        }
    }

    /// Applies the `resume()` transition from the table in §4.3. Returns
    /// the new reason and whether the thread becomes runnable as a
    /// result.
    fn resumed(self) -> (BlockReason, bool) {
        match self {
            BlockReason::UserBlock => (BlockReason::None, true),
            BlockReason::Both => (BlockReason::Sleep, false),
            // Resuming a thread that wasn't user-blocked is a no-op on
            // the reason (it is either not blocked, or blocked purely by
            // a sleep that only the wake-check can clear).
            other => (other, false),
        }
    }

    /// Applies the wake-check transition from the table in §4.3. Returns
    /// the new reason and whether the thread becomes runnable as a
    /// result.
    fn woken(self) -> (BlockReason, bool) {
        match self {
            BlockReason::Sleep => (BlockReason::None, true),
            BlockReason::Both => (BlockReason::UserBlock, false),
            other => (other, false),
        }
    }
}

/// The control block for a single thread slot (§3).
///
pub struct Thread {
    id: ThreadId,
    state: AtomicCell<ThreadState>,
    reason: AtomicCell<BlockReason>,

    /// How many quanta this thread has spent in *Running* state.
    quantums: AtomicU64,

    /// The total-quantum value at which a sleep expires, or 0 if the
    /// thread is not sleeping.
    wake_deadline: AtomicU64,

    /// The thread's saved execution context. Written when this thread is
    /// switched out, read when it is switched back in.
    ///
    /// Guarded entirely by the critical-section gate rather than a Rust
    /// lock: exactly one native stack is ever live at a time, and every
    /// read or write happens either from inside the gate or from the
    /// thread's own first instructions after being bootstrapped (see
    /// `context::trampoline`). A `Mutex` held across the context switch
    /// itself would simply never be released, so the gate — not a Rust
    /// lock type — is this field's real synchronization.
    context: UnsafeCell<Context>,

    /// The entry function, present until this thread's trampoline takes
    /// it to run it, for its first (and only) scheduling. A plain `fn()`
    /// rather than a boxed closure, mirroring the teacher's own
    /// `fn() -> !` thread-entry signature, and — being `Copy` — storable
    /// in an `AtomicCell` rather than needing its own interior-mutable
    /// cell.
    entry: AtomicCell<Option<fn()>>,
}

// Safety: `context` and `entry` are only ever touched while the
// critical-section gate is engaged, or by the thread's own trampoline
// before any other code can observe it, so there is never truly
// concurrent access despite the interior mutability.
unsafe impl Sync for Thread {}

impl Thread {
    /// Builds the permanent slot for the main thread, already *Running*.
    ///
    pub(crate) fn new_main() -> Thread {
        Thread {
            id: ThreadId::MAIN,
            state: AtomicCell::new(ThreadState::Running),
            reason: AtomicCell::new(BlockReason::None),
            quantums: AtomicU64::new(1),
            wake_deadline: AtomicU64::new(0),
            context: UnsafeCell::new(Context::empty()),
            entry: AtomicCell::new(None),
        }
    }

    /// Builds a fresh, *Unused* slot for the given identifier.
    ///
    pub(crate) fn new_unused(id: ThreadId) -> Thread {
        Thread {
            id,
            state: AtomicCell::new(ThreadState::Unused),
            reason: AtomicCell::new(BlockReason::None),
            quantums: AtomicU64::new(0),
            wake_deadline: AtomicU64::new(0),
            context: UnsafeCell::new(Context::empty()),
            entry: AtomicCell::new(None),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn state(&self) -> ThreadState {
        self.state.load()
    }

    pub(crate) fn set_state(&self, state: ThreadState) {
        self.state.store(state);
    }

    pub fn reason(&self) -> BlockReason {
        self.reason.load()
    }

    pub(crate) fn set_reason(&self, reason: BlockReason) {
        self.reason.store(reason);
    }

    pub fn quantums(&self) -> u64 {
        self.quantums.load(Ordering::Relaxed)
    }

    pub(crate) fn reset_quantums(&self) {
        self.quantums.store(0, Ordering::Relaxed);
    }

    pub(crate) fn tick(&self) {
        self.quantums.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wake_deadline(&self) -> u64 {
        self.wake_deadline.load(Ordering::Relaxed)
    }

    pub(crate) fn set_wake_deadline(&self, deadline: u64) {
        self.wake_deadline.store(deadline, Ordering::Relaxed);
    }

    /// Re-initializes this slot for reuse by a fresh spawn, allocating a
    /// new stack and bootstrapping a context that will start by running
    /// `entry`.
    ///
    pub(crate) fn respawn(&self, entry: fn()) {
        self.reset_quantums();
        self.set_wake_deadline(0);
        self.set_reason(BlockReason::None);
        self.entry.store(Some(entry));
        unsafe {
            *self.context.get() = Context::bootstrap(self.id);
        }
        self.set_state(ThreadState::Ready);
    }

    /// Takes this thread's entry function, leaving `None` behind. Called
    /// exactly once, by this thread's own trampoline, immediately after
    /// it starts running for the first time.
    pub(crate) fn take_entry(&self) -> Option<fn()> {
        self.entry.swap(None)
    }

    pub(crate) fn context_ptr(&self) -> *mut Context {
        self.context.get()
    }

    /// Applies the `sleep()` block-reason transition (§4.3) and marks
    /// the thread *Blocked*.
    pub(crate) fn mark_sleeping(&self, wake_deadline: u64) {
        self.set_reason(self.reason().with_sleep());
        self.set_wake_deadline(wake_deadline);
        self.set_state(ThreadState::Blocked);
    }

    /// Applies the `block()` block-reason transition (§4.3) and marks
    /// the thread *Blocked*. Returns whether the thread was already
    /// blocked (making this call a no-op on state, though the reason may
    /// still be promoted to `Both`).
    pub(crate) fn mark_user_blocked(&self) -> bool {
        let already_blocked = self.state() == ThreadState::Blocked;
        self.set_reason(self.reason().with_user_block());
        self.set_state(ThreadState::Blocked);
        already_blocked
    }

    /// Applies the `resume()` transition (§4.3). Returns whether the
    /// thread becomes runnable (*Ready*) as a result.
    pub(crate) fn mark_resumed(&self) -> bool {
        let (reason, runnable) = self.reason().resumed();
        self.set_reason(reason);
        if runnable {
            self.set_state(ThreadState::Ready);
        }
        runnable
    }

    /// Applies the wake-check transition (§4.3). Returns whether the
    /// thread becomes runnable (*Ready*) as a result.
    pub(crate) fn mark_woken(&self) -> bool {
        let (reason, runnable) = self.reason().woken();
        self.set_reason(reason);
        self.set_wake_deadline(0);
        if runnable {
            self.set_state(ThreadState::Ready);
        }
        runnable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_reason_round_trips() {
        // sleep then block then resume then wake: "both" must be
        // released by both parties, as §8's scenario 3 requires.
        let mut reason = BlockReason::None;
        reason = reason.with_sleep();
        assert_eq!(reason, BlockReason::Sleep);
        reason = reason.with_user_block();
        assert_eq!(reason, BlockReason::Both);

        let (reason_after_resume, runnable) = reason.resumed();
        assert_eq!(reason_after_resume, BlockReason::Sleep);
        assert!(!runnable);

        let (reason_after_wake, runnable) = reason_after_resume.woken();
        assert_eq!(reason_after_wake, BlockReason::None);
        assert!(runnable);
    }

    #[test]
    fn double_block_and_double_resume_are_idempotent() {
        let mut reason = BlockReason::None;
        reason = reason.with_user_block();
        reason = reason.with_user_block();
        assert_eq!(reason, BlockReason::UserBlock);

        let (reason, runnable) = reason.resumed();
        assert_eq!(reason, BlockReason::None);
        assert!(runnable);
        let (reason, runnable) = reason.resumed();
        assert_eq!(reason, BlockReason::None);
        assert!(!runnable);
    }
}
