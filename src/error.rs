// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The two error strata described in the library's design: recoverable
//! [`LibraryError`]s, returned to the caller as `-1`, and unrecoverable
//! [`SystemError`]s, which are logged and end the process.

use std::fmt;

/// A recoverable failure of one of the public API calls.
///
/// Every variant's [`Display`](fmt::Display) output is exactly the
/// diagnostic text written to stderr, prefixed with `thread library
/// error: `.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LibraryError {
    #[error("quantum must be positive")]
    InvalidQuantum,

    #[error("entry point is null")]
    NullEntry,

    #[error("thread table is full")]
    TableFull,

    #[error("invalid thread id {0}")]
    InvalidThreadId(i64),

    #[error("the main thread cannot be blocked")]
    MainThreadBlock,

    #[error("the main thread cannot sleep")]
    MainThreadSleep,

    #[error("sleep count must be positive")]
    InvalidSleepCount,
}

impl LibraryError {
    /// Writes this error to stderr in the format the library's external
    /// interface guarantees (§6), then returns `-1` for the caller's
    /// convenience.
    ///
    pub(crate) fn report(self) -> i32 {
        eprintln!("thread library error: {}", self);
        log::warn!("api call failed: {}", self);
        -1
    }
}

/// A non-recoverable failure: a kernel primitive (signal handling, the
/// interval timer, signal masking) failed, or one of the scheduler's own
/// invariants was violated.
///
/// There is no path back from a [`SystemError`]; detecting one always
/// ends the process (§7).
///
#[derive(Debug, Clone, thiserror::Error)]
pub enum SystemError {
    #[error("failed to install the timer signal handler: {0}")]
    SigactionFailed(std::io::Error),

    #[error("failed to arm the virtual-time interval timer: {0}")]
    TimerSetupFailed(std::io::Error),

    #[error("failed to mask the preemption signal: {0}")]
    MaskFailed(std::io::Error),

    #[error("failed to unmask the preemption signal: {0}")]
    UnmaskFailed(std::io::Error),

    #[error("the scheduler found no runnable thread")]
    NoRunnableThread,

    #[error("attempted to context-switch into a terminated or unused slot")]
    SwitchIntoDeadSlot,

    #[error("control returned to a thread after it was scheduled away for good")]
    ReturnedAfterSwitch,
}

impl SystemError {
    /// Reports this error on stderr in the library's `system error: …`
    /// format and terminates the process immediately (§7). Never returns.
    ///
    pub(crate) fn fatal(self) -> ! {
        eprintln!("system error: {}", self);
        log::error!("fatal runtime error: {}", self);
        std::process::exit(1);
    }
}
