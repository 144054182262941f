//! Fault boundary around calls into the embedded engine.
//!
//! A protected region turns the two ways the engine can die into a returned
//! [`Fault`]:
//!
//! * the engine's own fatal-error path, which calls [`fatal`] instead of
//!   exiting the process, and
//! * an illegal memory access (`SIGSEGV`/`SIGBUS`) raised on the thread that
//!   armed the region.
//!
//! Both leave the region through an unwind caught at [`protect`]. The signal
//! handlers are only installed while a region is armed; the previous handlers
//! are put back on the way out, so faults anywhere else in the process keep
//! their default behaviour.

use std::any::Any;
use std::ffi::c_void;
use std::hint;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("engine fatal error: {0}")]
    Fatal(String),
    #[error("engine raised signal {0}")]
    Signal(i32),
    #[error("engine panicked: {0}")]
    Panic(String),
    #[error("a protected region is already armed")]
    AlreadyArmed,
}

/// Unwind payload of the engine's fatal-error path.
struct FatalError(String);

/// Unwind payload started by the memory-fault handler.
struct SignalFault(i32);

static ARMED: AtomicBool = AtomicBool::new(false);

/// Runs `f` inside a protected region.
///
/// Only one region can be armed at a time; a nested call returns
/// [`Fault::AlreadyArmed`] without running `f`.
pub fn protect<R, F: FnOnce() -> R>(f: F) -> Result<R, Fault> {
    let Some(region) = Region::arm() else {
        return Err(Fault::AlreadyArmed);
    };
    let mut call = Call {
        f: Some(f),
        out: None,
    };
    // The signal handler starts its unwind from an arbitrary instruction. An
    // opaque unwinding call keeps the catch below from being optimized out
    // when `f` inlines to code the compiler knows cannot panic.
    let trampoline = hint::black_box(run_call::<R, F> as extern "C-unwind" fn(*mut c_void));
    let data = (&mut call as *mut Call<R, F>).cast::<c_void>();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| trampoline(data)));
    drop(region);
    match outcome {
        Ok(()) => call
            .out
            .ok_or_else(|| Fault::Panic("protected call did not run".to_string())),
        Err(payload) => Err(classify(payload)),
    }
}

struct Call<R, F> {
    f: Option<F>,
    out: Option<R>,
}

#[inline(never)]
extern "C-unwind" fn run_call<R, F: FnOnce() -> R>(data: *mut c_void) {
    // SAFETY: `protect` passes a live, exclusively borrowed `Call<R, F>`.
    let call = unsafe { &mut *data.cast::<Call<R, F>>() };
    if let Some(f) = call.f.take() {
        call.out = Some(f());
    }
}

/// The engine's replacement for "print and exit".
///
/// Inside a protected region this unwinds back to [`protect`]. Outside of one
/// there is nothing to return to and the process aborts.
pub fn fatal(message: impl Into<String>) -> ! {
    let message = message.into();
    if armed_on_this_thread() {
        panic::resume_unwind(Box::new(FatalError(message)));
    }
    log::error!("fatal engine error outside a protected region: {message}");
    std::process::abort()
}

pub fn is_armed() -> bool {
    ARMED.load(Ordering::Acquire)
}

fn classify(payload: Box<dyn Any + Send>) -> Fault {
    let payload = match payload.downcast::<FatalError>() {
        Ok(fatal) => return Fault::Fatal(fatal.0),
        Err(other) => other,
    };
    let payload = match payload.downcast::<SignalFault>() {
        Ok(signal) => return Fault::Signal(signal.0),
        Err(other) => other,
    };
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        return Fault::Panic((*s).to_string());
    }
    match payload.downcast::<String>() {
        Ok(s) => Fault::Panic(*s),
        Err(_) => Fault::Panic("non-string panic payload".to_string()),
    }
}

#[cfg(unix)]
use unix::{armed_on_this_thread, Region};

#[cfg(not(unix))]
use portable::{armed_on_this_thread, Region};

#[cfg(unix)]
mod unix {
    use super::{SignalFault, ARMED};
    use std::mem;
    use std::os::raw::c_int;
    use std::panic;
    use std::ptr;
    use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

    const GUARDED: [c_int; 2] = [libc::SIGSEGV, libc::SIGBUS];

    static ARMED_THREAD: AtomicUsize = AtomicUsize::new(0);
    // Allocated when arming so the handler never allocates.
    static PAYLOAD: AtomicPtr<SignalFault> = AtomicPtr::new(ptr::null_mut());

    pub(super) fn armed_on_this_thread() -> bool {
        ARMED.load(Ordering::Acquire)
            && ARMED_THREAD.load(Ordering::Acquire) == current_thread()
    }

    fn current_thread() -> usize {
        // SAFETY: pthread_self has no preconditions and is async-signal-safe.
        unsafe { libc::pthread_self() as usize }
    }

    pub(super) struct Region {
        previous: [libc::sigaction; 2],
    }

    impl Region {
        pub(super) fn arm() -> Option<Region> {
            if ARMED
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return None;
            }
            ARMED_THREAD.store(current_thread(), Ordering::Release);
            let payload = Box::into_raw(Box::new(SignalFault(0)));
            PAYLOAD.store(payload, Ordering::Release);

            // SAFETY: the handler only touches atomics, the pre-allocated
            // payload and async-signal-safe libc calls.
            let previous = unsafe { GUARDED.map(|sig| install(sig)) };
            Some(Region { previous })
        }
    }

    impl Drop for Region {
        fn drop(&mut self) {
            for (sig, old) in GUARDED.iter().zip(self.previous.iter()) {
                // SAFETY: `old` was filled in by sigaction for this signal.
                unsafe {
                    libc::sigaction(*sig, old, ptr::null_mut());
                }
            }
            let payload = PAYLOAD.swap(ptr::null_mut(), Ordering::AcqRel);
            if !payload.is_null() {
                // SAFETY: produced by Box::into_raw in arm() and not taken by the handler.
                drop(unsafe { Box::from_raw(payload) });
            }
            ARMED_THREAD.store(0, Ordering::Release);
            ARMED.store(false, Ordering::Release);
        }
    }

    unsafe fn install(sig: c_int) -> libc::sigaction {
        let mut action: libc::sigaction = mem::zeroed();
        let handler: extern "C-unwind" fn(c_int) = on_fault_signal;
        action.sa_sigaction = handler as libc::sighandler_t;
        // Leaving the handler by unwinding skips sigreturn, so the signal
        // must not be masked while the handler runs.
        action.sa_flags = libc::SA_NODEFER;
        libc::sigemptyset(&mut action.sa_mask);
        let mut previous: libc::sigaction = mem::zeroed();
        libc::sigaction(sig, &action, &mut previous);
        previous
    }

    extern "C-unwind" fn on_fault_signal(sig: c_int) {
        if armed_on_this_thread() {
            let payload = PAYLOAD.swap(ptr::null_mut(), Ordering::AcqRel);
            if !payload.is_null() {
                // SAFETY: produced by Box::into_raw in arm(); the swap makes us the only owner.
                let mut payload = unsafe { Box::from_raw(payload) };
                payload.0 = sig;
                panic::resume_unwind(payload);
            }
        }
        // Not ours: fall back to the default action and let it kill the process.
        // SAFETY: signal and raise are async-signal-safe.
        unsafe {
            libc::signal(sig, libc::SIG_DFL);
            libc::raise(sig);
        }
    }

    #[cfg(test)]
    pub(super) fn current_handler(sig: c_int) -> libc::sighandler_t {
        // SAFETY: querying with a null new action only reads the current one.
        unsafe {
            let mut current: libc::sigaction = mem::zeroed();
            libc::sigaction(sig, ptr::null(), &mut current);
            current.sa_sigaction
        }
    }
}

#[cfg(not(unix))]
mod portable {
    use super::ARMED;
    use std::sync::atomic::Ordering;

    // Without POSIX signals only the fatal-error path is contained.
    pub(super) fn armed_on_this_thread() -> bool {
        ARMED.load(Ordering::Acquire)
    }

    pub(super) struct Region;

    impl Region {
        pub(super) fn arm() -> Option<Region> {
            ARMED
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| Region)
        }
    }

    impl Drop for Region {
        fn drop(&mut self) {
            ARMED.store(false, Ordering::Release);
        }
    }
}
