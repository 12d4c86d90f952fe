// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! The preemption timer (component F): a virtual-time interval timer
//! and the signal handler that increments quanta, wakes sleepers, and
//! invokes the scheduler (§4.6).

use crate::error::SystemError;
use crate::runtime::with_runtime;
use crate::scheduler;
use crate::thread::ThreadState;
use crate::critical;
use std::os::raw::c_int;

/// Configures `SIGVTALRM` delivery at `quantum_usecs` intervals and
/// installs [`handle_vtalrm`] as its handler. Any failure here is fatal
/// (§7): without a working timer the scheduler can never be preempted.
pub(crate) fn install(quantum_usecs: i64) {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handle_vtalrm as usize;
        libc::sigemptyset(&mut action.sa_mask);
        action.sa_flags = 0;

        if libc::sigaction(libc::SIGVTALRM, &action, std::ptr::null_mut()) != 0 {
            SystemError::SigactionFailed(std::io::Error::last_os_error()).fatal();
        }

        let interval = libc::timeval {
            tv_sec: quantum_usecs / 1_000_000,
            tv_usec: quantum_usecs % 1_000_000,
        };
        let timer = libc::itimerval {
            it_interval: interval,
            it_value: interval,
        };
        if libc::setitimer(libc::ITIMER_VIRTUAL, &timer, std::ptr::null_mut()) != 0 {
            SystemError::TimerSetupFailed(std::io::Error::last_os_error()).fatal();
        }
    }
}

/// Disarms the interval timer. Called on the `terminate(0)` path (§4.7)
/// so no further signal fires after the process begins exiting.
pub(crate) fn stop() {
    unsafe {
        let timer: libc::itimerval = std::mem::zeroed();
        libc::setitimer(libc::ITIMER_VIRTUAL, &timer, std::ptr::null_mut());
    }
}

/// The `SIGVTALRM` handler (§4.6). `SA_NODEFER` is deliberately not set,
/// so the kernel blocks this same signal for the duration of the
/// handler on its own — the one piece of re-entrancy protection this
/// code doesn't have to provide itself.
extern "C" fn handle_vtalrm(_signum: c_int) {
    if critical::is_engaged() {
        // The gate is held by ordinary API code right now; the signal
        // stays pending until that code unmasks it on its way out.
        return;
    }

    with_runtime(|rt| {
        rt.tick_total();
        let total = rt.total_quantums();

        let running = rt.current();
        rt.thread(running).tick();
        log::trace!("timer: thread {} used a quantum (total {})", running, total);

        for thread in rt.threads() {
            let deadline = thread.wake_deadline();
            if thread.state() == ThreadState::Blocked && deadline > 0 && deadline <= total {
                if thread.mark_woken() {
                    log::trace!("timer: waking thread {}", thread.id());
                    rt.ready_mut().enqueue(thread.id());
                }
            }
        }
    });

    scheduler::schedule_next();
}
