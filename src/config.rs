// Copyright 2021 The Firefly Authors.
//
// Use of this source code is governed by a BSD 3-clause
// license that can be found in the LICENSE file.

//! Compile-time limits published to API users.

/// The maximum number of threads that may exist at once, including the
/// main thread (which always occupies slot 0).
///
pub const MAX_THREAD_NUM: usize = 100;

/// The size, in bytes, of the stack allocated to each non-main thread.
///
pub const STACK_SIZE: usize = 64 * 1024;
