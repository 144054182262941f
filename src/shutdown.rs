//! Process-wide quit request shared by the hosts and the stepping thread.
//!
//! SIGINT/SIGTERM only raise the flag. A running [`crate::session::Session`]
//! stops stepping on its own; the host then calls `stop` to release held keys
//! and exits with [`exit_code`].

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

static QUIT_REQUESTED: AtomicBool = AtomicBool::new(false);
static QUIT_SIGNAL: AtomicI32 = AtomicI32::new(0);
static EXIT_CODE: AtomicI32 = AtomicI32::new(0);

pub fn should_quit() -> bool {
    QUIT_REQUESTED.load(Ordering::SeqCst)
}

pub fn request_quit() {
    QUIT_REQUESTED.store(true, Ordering::SeqCst);
}

/// Signal that asked us to quit, if any.
pub fn quit_signal() -> Option<i32> {
    match QUIT_SIGNAL.load(Ordering::SeqCst) {
        0 => None,
        sig => Some(sig),
    }
}

/// Exit status for the process: the first recorded failure, else the
/// shell convention `128 + signal` after a signal-driven quit, else 0.
pub fn exit_code() -> i32 {
    match EXIT_CODE.load(Ordering::SeqCst) {
        0 => quit_signal().map_or(0, |sig| 128 + sig),
        code => code,
    }
}

/// Records a failure code; the first non-zero code wins.
pub fn set_exit_code(code: i32) {
    if code == 0 {
        return;
    }
    let _ = EXIT_CODE.compare_exchange(0, code, Ordering::SeqCst, Ordering::SeqCst);
}

fn on_signal(sig: i32) {
    let _ = QUIT_SIGNAL.compare_exchange(0, sig, Ordering::SeqCst, Ordering::SeqCst);
    request_quit();
}

#[cfg(unix)]
pub fn install() {
    extern "C" fn handler(sig: libc::c_int) {
        // Atomics only.
        on_signal(sig);
    }

    let handler: extern "C" fn(libc::c_int) = handler;
    // SAFETY: the handler only stores to atomics.
    unsafe {
        libc::signal(libc::SIGINT, handler as libc::sighandler_t);
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

#[cfg(not(unix))]
pub fn install() {}

#[cfg(test)]
pub(crate) fn clear() {
    QUIT_REQUESTED.store(false, Ordering::SeqCst);
    QUIT_SIGNAL.store(0, Ordering::SeqCst);
    EXIT_CODE.store(0, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_code_sticks() {
        let _serial = crate::test_lock();
        clear();
        set_exit_code(0);
        set_exit_code(3);
        set_exit_code(4);
        assert_eq!(exit_code(), 3);
        clear();
    }

    #[test]
    fn signal_quit_maps_to_shell_status() {
        let _serial = crate::test_lock();
        clear();
        assert_eq!(quit_signal(), None);
        on_signal(15);
        on_signal(2);
        assert!(should_quit());
        assert_eq!(quit_signal(), Some(15));
        assert_eq!(exit_code(), 143);
        set_exit_code(1);
        assert_eq!(exit_code(), 1);
        clear();
    }
}
