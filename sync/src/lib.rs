// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

//! # Synchronization primitives.
//!
//! Synchronization primitves like mutexes and read/write-locks that are
//! usable in bare-metal environments. For now, we simply re-export those
//! supported by the `spin` crate.
//!
//! Locks that may be contended while another CPU is parked in a TLB shootdown must never be
//! spun on indefinitely; `try_lock_bounded` gives up after a fixed number of attempts instead.
#![no_std]

pub use spin::{Mutex, MutexGuard, Once, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Attempts to acquire `mutex` at most `attempts` times, returning `None` if it stayed contended.
pub fn try_lock_bounded<T: ?Sized>(mutex: &Mutex<T>, attempts: usize) -> Option<MutexGuard<'_, T>> {
    for _ in 0..attempts.max(1) {
        if let Some(guard) = mutex.try_lock() {
            return Some(guard);
        }
        core::hint::spin_loop();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_lock_gives_up() {
        let m = Mutex::new(5u32);
        let held = m.lock();
        assert!(try_lock_bounded(&m, 16).is_none());
        drop(held);
        let guard = try_lock_bounded(&m, 16).unwrap();
        assert_eq!(*guard, 5);
    }
}
