// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! A cooperative-preemptive user-level threading library.
//!
//! A fixed-size pool of lightweight threads is multiplexed onto a
//! single kernel thread. Application code spawns threads and yields
//! them via explicit calls ([`block`], [`resume`], [`sleep`],
//! [`terminate`]); a virtual-time interval timer periodically preempts
//! whichever thread is running so a round-robin [`scheduler`] can
//! rotate the rest of the pool through it.
//!
//! Four pieces make up the core, in dependency order: the
//! [`critical`]-section gate around the preemption signal, the ready
//! [`queue`], the [`thread`] table and its lifecycle state machine, and
//! the [`context`] primitives that save and restore a suspended
//! thread's execution state. [`scheduler`] and [`timer`] sit on top of
//! all four; the functions below are the only public surface.
//!
//! Every operation returns `0` on success or `-1` on a recoverable
//! error, with a diagnostic written to stderr beginning `thread library
//! error: `. A handful of conditions — a failed `sigaction`/`setitimer`
//! call, or the scheduler finding no runnable thread at all — are
//! unrecoverable; they are logged with a `system error: ` prefix and
//! end the process immediately.

mod config;
mod context;
mod critical;
mod error;
mod queue;
mod runtime;
mod scheduler;
mod thread;
mod timer;

pub use config::{MAX_THREAD_NUM, STACK_SIZE};
pub use error::{LibraryError, SystemError};

use critical::CriticalSection;
use runtime::with_runtime;
use thread::{ThreadId, ThreadState};

/// Converts a public, possibly-invalid raw identifier into a [`ThreadId`],
/// or `None` if it is out of the table's range. Whether an in-range id
/// actually names a *live* slot is a separate check (`RuntimeInner::is_live`).
fn parse_id(id: i32) -> Option<ThreadId> {
    if id < 0 {
        return None;
    }
    let id = id as usize;
    if id >= MAX_THREAD_NUM {
        return None;
    }
    Some(ThreadId::new(id))
}

/// Initializes the library: builds the thread table (main thread = slot
/// 0, already *Running*), and arms the preemption timer at an interval
/// of `quantum_usecs` microseconds.
///
/// May be called more than once; each call discards all prior state and
/// starts over, as a fresh process would see it.
///
/// Returns `0` on success, `-1` if `quantum_usecs` is not positive.
///
pub fn init(quantum_usecs: i64) -> i32 {
    if quantum_usecs <= 0 {
        return LibraryError::InvalidQuantum.report();
    }
    runtime::reset();
    timer::install(quantum_usecs);
    log::info!("uthreads initialized with a {}us quantum", quantum_usecs);
    0
}

/// Spawns a new thread that will run `entry` once scheduled.
///
/// Returns the new thread's identifier on success, `-1` if `entry` is
/// `None` or if the thread table is full.
///
pub fn spawn(entry: Option<fn()>) -> i32 {
    let entry = match entry {
        Some(entry) => entry,
        None => return LibraryError::NullEntry.report(),
    };

    let _gate = CriticalSection::enter();
    with_runtime(|rt| match rt.allocate_slot() {
        Some(id) => {
            rt.thread(id).respawn(entry);
            rt.ready_mut().enqueue(id);
            log::debug!("spawned thread {}", id);
            id.as_usize() as i32
        }
        None => LibraryError::TableFull.report(),
    })
}

/// Terminates the thread named by `id`.
///
/// `id == 0` stops the preemption timer and exits the process
/// immediately, marking every slot *Terminated* on the way out — the
/// library's defined clean-shutdown path (§6). Terminating the calling
/// thread switches away and never returns to the caller. Terminating
/// any other live thread marks its slot *Terminated* and returns `0`;
/// stale entries it leaves behind in the ready queue are discarded by
/// the scheduler the next time it dequeues them, rather than being
/// purged here.
///
/// Returns `-1` if `id` does not name a live slot.
///
pub fn terminate(id: i32) -> i32 {
    let target = match parse_id(id) {
        Some(target) => target,
        None => return LibraryError::InvalidThreadId(id as i64).report(),
    };

    let _gate = CriticalSection::enter();
    if !with_runtime(|rt| rt.is_live(target)) {
        return LibraryError::InvalidThreadId(id as i64).report();
    }

    if target == ThreadId::MAIN {
        timer::stop();
        runtime::terminate_all();
        log::info!("main thread terminated; exiting process");
        // The gate guard above is never dropped, which is fine: the
        // process is about to exit entirely.
        std::process::exit(0);
    }

    if with_runtime(|rt| rt.current()) == target {
        scheduler::terminate_current();
    }

    with_runtime(|rt| rt.thread(target).set_state(ThreadState::Terminated));
    log::debug!("terminated thread {}", target);
    0
}

/// Blocks the thread named by `id`.
///
/// Promotes an already-sleeping thread's block-reason tag to *both*
/// rather than changing its state; a *Ready* or *Running* thread moves
/// to *Blocked*, tagged *user-block* (§4.3). Blocking the calling thread
/// switches away immediately.
///
/// Returns `-1` if `id` is `0` (the main thread may never be blocked),
/// does not name a live slot, or names a slot that has already
/// terminated.
///
pub fn block(id: i32) -> i32 {
    if id == 0 {
        return LibraryError::MainThreadBlock.report();
    }
    let target = match parse_id(id) {
        Some(target) => target,
        None => return LibraryError::InvalidThreadId(id as i64).report(),
    };

    let _gate = CriticalSection::enter();
    if !with_runtime(|rt| rt.is_live(target)) {
        return LibraryError::InvalidThreadId(id as i64).report();
    }
    if with_runtime(|rt| rt.thread(target).state()) == ThreadState::Terminated {
        return LibraryError::InvalidThreadId(id as i64).report();
    }

    let is_self = with_runtime(|rt| rt.current()) == target;
    with_runtime(|rt| {
        rt.thread(target).mark_user_blocked();
    });
    log::debug!("blocked thread {}", target);

    if is_self {
        scheduler::schedule_next();
    }
    0
}

/// Resumes the thread named by `id`.
///
/// Applies the resume transition from §4.3: a purely user-blocked
/// thread becomes *Ready* and is enqueued; a thread blocked on both a
/// sleep and a user-block only has the user-block cleared, and stays
/// *Blocked* until its sleep also expires. A no-op on an already
/// runnable thread.
///
/// Returns `-1` if `id` does not name a live slot, or names a slot that
/// has already terminated.
///
pub fn resume(id: i32) -> i32 {
    let target = match parse_id(id) {
        Some(target) => target,
        None => return LibraryError::InvalidThreadId(id as i64).report(),
    };

    let _gate = CriticalSection::enter();
    if !with_runtime(|rt| rt.is_live(target)) {
        return LibraryError::InvalidThreadId(id as i64).report();
    }
    if with_runtime(|rt| rt.thread(target).state()) == ThreadState::Terminated {
        return LibraryError::InvalidThreadId(id as i64).report();
    }

    with_runtime(|rt| {
        if rt.thread(target).mark_resumed() {
            rt.ready_mut().enqueue(target);
        }
    });
    log::debug!("resumed thread {}", target);
    0
}

/// Puts the calling thread to sleep for `n` quanta.
///
/// The deadline is `current total-quantums + n + 1`: the quantum during
/// which `sleep` was called does not count toward the `n` promised
/// (§4.7). Switches away immediately and returns `0` only once this
/// thread's sleep (and any concurrent user-block) has been released and
/// it has been scheduled again.
///
/// Returns `-1` if `n` is not positive, or if called from the main
/// thread, which may never sleep.
///
pub fn sleep(n: i64) -> i32 {
    if n <= 0 {
        return LibraryError::InvalidSleepCount.report();
    }

    let _gate = CriticalSection::enter();
    let current = with_runtime(|rt| rt.current());
    if current == ThreadId::MAIN {
        return LibraryError::MainThreadSleep.report();
    }

    with_runtime(|rt| {
        let deadline = rt.total_quantums() + n as u64 + 1;
        rt.thread(current).mark_sleeping(deadline);
    });
    log::debug!("thread {} sleeping for {} quanta", current, n);

    scheduler::schedule_next();
    0
}

/// Returns the identifier of the currently running thread. Never fails.
///
pub fn get_tid() -> i32 {
    let _gate = CriticalSection::enter();
    with_runtime(|rt| rt.current().as_usize() as i32)
}

/// Returns the process-wide total-quantum counter. Never fails.
///
pub fn get_total_quantums() -> u64 {
    let _gate = CriticalSection::enter();
    with_runtime(|rt| rt.total_quantums())
}

/// Returns the number of quanta the thread named by `id` has spent in
/// *Running* state.
///
/// Returns `-1` if `id` does not name a live slot.
///
pub fn get_quantums(id: i32) -> i64 {
    let target = match parse_id(id) {
        Some(target) => target,
        None => return LibraryError::InvalidThreadId(id as i64).report() as i64,
    };

    let _gate = CriticalSection::enter();
    if !with_runtime(|rt| rt.is_live(target)) {
        return LibraryError::InvalidThreadId(id as i64).report() as i64;
    }

    with_runtime(|rt| rt.thread(target).quantums() as i64)
}

// These tests exercise one process-wide singleton that installs a real
// `SIGVTALRM` handler and interval timer. `TEST_GUARD` keeps two test
// bodies from running at once, but a process-directed signal can still
// land on any unblocked thread in the process — so this module must be
// run with `cargo test -- --test-threads=1`, the standard way to test a
// crate that owns global OS-level state like a signal handler.
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    /// The library's state is one process-wide singleton; tests that
    /// call `init` cannot run concurrently with each other.
    static TEST_GUARD: Mutex<()> = Mutex::new(());

    fn reinit(quantum_usecs: i64) -> std::sync::MutexGuard<'static, ()> {
        let guard = TEST_GUARD.lock().unwrap_or_else(|poison| poison.into_inner());
        assert_eq!(init(quantum_usecs), 0);
        guard
    }

    #[test]
    fn boundaries_return_library_errors() {
        let _guard = reinit(10_000);
        assert_eq!(init(0), -1);
        assert_eq!(init(-1), -1);
        assert_eq!(sleep(0), -1);
        assert_eq!(sleep(-1), -1);
        assert_eq!(block(0), -1);
        assert_eq!(sleep(5), -1); // called from the main thread
        assert_eq!(spawn(None), -1);
        assert_eq!(block(MAX_THREAD_NUM as i32), -1);
        assert_eq!(resume(MAX_THREAD_NUM as i32), -1);
        assert_eq!(get_quantums(MAX_THREAD_NUM as i32), -1);
    }

    #[test]
    fn identifier_reuse_follows_lowest_free_slot() {
        let _guard = reinit(10_000);
        fn noop() {}

        assert_eq!(spawn(Some(noop)), 1);
        assert_eq!(terminate(1), 0);
        assert_eq!(spawn(Some(noop)), 1);
        assert_eq!(spawn(Some(noop)), 2);
        assert_eq!(spawn(Some(noop)), 3);
        assert_eq!(terminate(2), 0);
        assert_eq!(spawn(Some(noop)), 2);
        assert_eq!(spawn(Some(noop)), 4);
    }

    #[test]
    fn spawn_after_table_full_fails() {
        let _guard = reinit(10_000);
        fn noop() {}
        for expected in 1..MAX_THREAD_NUM as i32 {
            assert_eq!(spawn(Some(noop)), expected);
        }
        assert_eq!(spawn(Some(noop)), -1);
    }

    #[test]
    fn block_then_resume_round_trips_without_running() {
        let _guard = reinit(10_000);
        fn noop() {}

        let tid = spawn(Some(noop));
        assert!(tid > 0);
        assert_eq!(block(tid), 0);
        assert_eq!(block(tid), 0); // double-block is idempotent
        assert_eq!(resume(tid), 0);
        assert_eq!(resume(tid), 0); // double-resume is idempotent
        assert_eq!(terminate(tid), 0);
    }

    #[test]
    fn self_block_without_external_resumer_rejoins_on_resume() {
        // §8 scenario 4: a thread blocks itself; main (which never
        // blocks or sleeps, and so is always schedulable, keeping the
        // ready queue from ever running dry) busy-waits for the
        // preemption timer to give the worker a turn, then resumes it.
        let _guard = reinit(1_000);
        static BLOCKED_RAN: AtomicBool = AtomicBool::new(false);
        static RESUMED_RAN: AtomicBool = AtomicBool::new(false);
        BLOCKED_RAN.store(false, Ordering::SeqCst);
        RESUMED_RAN.store(false, Ordering::SeqCst);

        fn blocker() {
            BLOCKED_RAN.store(true, Ordering::SeqCst);
            block(get_tid());
            RESUMED_RAN.store(true, Ordering::SeqCst);
        }

        let tid = spawn(Some(blocker));
        assert!(tid > 0);

        for _ in 0..5_000_000u64 {
            if BLOCKED_RAN.load(Ordering::SeqCst) {
                break;
            }
        }
        assert!(BLOCKED_RAN.load(Ordering::SeqCst));
        assert!(!RESUMED_RAN.load(Ordering::SeqCst));

        assert_eq!(resume(tid), 0);

        for _ in 0..5_000_000u64 {
            if RESUMED_RAN.load(Ordering::SeqCst) {
                break;
            }
        }
        assert!(RESUMED_RAN.load(Ordering::SeqCst));

        assert_eq!(terminate(tid), 0);
    }
}
