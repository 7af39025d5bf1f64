use std::sync::atomic::{AtomicBool, Ordering};

/// Set on the first SIGINT/SIGTERM. A running merge stops before its next file.
pub static SHUTDOWN: AtomicBool = AtomicBool::new(false);

/// Route SIGINT and SIGTERM to [`SHUTDOWN`]. The default handler comes back
/// after the first signal, so a second one kills the process.
pub fn install_signal_handlers() {
    #[cfg(unix)]
    {
        // Safety: the handler only stores to an atomic and resets its disposition.
        unsafe {
            for sig in [libc::SIGINT, libc::SIGTERM] {
                libc::signal(sig, on_signal as *const () as libc::sighandler_t);
            }
        }
    }
}

#[cfg(unix)]
extern "C" fn on_signal(sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
    }
}
