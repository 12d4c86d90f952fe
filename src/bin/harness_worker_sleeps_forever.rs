// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Exercises a worker thread that sleeps on a deadline nothing will ever
//! reach, while the main thread keeps running. `sleep` rejects a call
//! from the main thread outright (`uthreads::sleep` on thread 0 is a
//! library error, not a valid way to self-suspend), so the self-suspend
//! has to come from a worker — main itself can never legally block,
//! sleep, or be terminated without the process exiting immediately, which
//! is exactly what keeps it schedulable for as long as the process runs.
//! Run as a subprocess by `tests/process_exit.rs`.

fn worker() {
    // Huge deadline: the preemption timer will tick many times before
    // this ever elapses, but nothing in this process ever calls `resume`
    // or lets that many quanta actually pass, so the wake-check never
    // fires for this thread.
    uthreads::sleep(1_000_000_000);
}

fn main() {
    assert_eq!(uthreads::init(1_000), 0);
    assert!(uthreads::spawn(Some(worker)) > 0);

    // Busy-wait so the virtual-time timer (which only counts this
    // process's own CPU time, not wall-clock time) actually advances far
    // enough to preempt main and hand control to `worker`, which sleeps
    // immediately. Control returns here because main's own ready-queue
    // entry, created the moment it was preempted, is the only thing left
    // once `worker` is blocked — the scheduler always finds it.
    for _ in 0..20_000_000u64 {
        std::hint::black_box(0);
    }
}
