// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Exercises `terminate(0)`, which ends the process via `std::process::exit`
//! rather than returning. Run as a subprocess by `tests/process_exit.rs`,
//! since a call that never returns can't be asserted on in-process.

fn worker() {
    // Never actually scheduled before main tears the process down; its
    // body doesn't matter.
}

fn main() {
    assert_eq!(uthreads::init(10_000), 0);
    assert!(uthreads::spawn(Some(worker)) > 0);
    assert!(uthreads::spawn(Some(worker)) > 0);

    // Never returns: the library stops the timer, marks every slot
    // terminated, and exits the process with status 0.
    uthreads::terminate(0);

    unreachable!("terminate(0) does not return");
}
