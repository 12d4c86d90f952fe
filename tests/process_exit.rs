// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Covers behavior that can't be observed from within a normal test body
//! because it ends the process rather than returning a value. Each
//! scenario is driven out-of-process via one of the harness binaries
//! under `src/bin/`, with the assertion made on the child's exit status.

use std::process::Command;

fn run(path: &str) -> std::process::ExitStatus {
    Command::new(path).status().unwrap_or_else(|err| panic!("failed to run {path}: {err}"))
}

#[test]
fn terminating_the_main_thread_exits_cleanly() {
    let status = run(env!("CARGO_BIN_EXE_harness_terminate_main"));
    assert_eq!(status.code(), Some(0));
}

// The scheduler's "no runnable thread" and "switch into a dead slot"
// system errors (§7) are defensive invariants: the main thread can never
// legally block, sleep, or be terminated without the process exiting on
// the spot, which means it always has a valid, schedulable ready-queue
// entry for as long as the process is alive. There is no sequence of
// public API calls that starves the scheduler while main still exists, so
// there is no harness for either condition here — see DESIGN.md.
#[test]
fn a_worker_asleep_forever_does_not_block_the_process_from_exiting() {
    let status = run(env!("CARGO_BIN_EXE_harness_worker_sleeps_forever"));
    assert_eq!(status.code(), Some(0));
}
