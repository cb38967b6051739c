//! SIGINT/SIGTERM handling.
//!
//! The handler only raises a flag. The running child gets the same signal
//! from the terminal and exits on its own; the engine sees the flag once the
//! child returns, releases any mount it holds and stops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

static INTERRUPTED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

fn flag() -> Arc<AtomicBool> {
    INTERRUPTED
        .get_or_init(|| Arc::new(AtomicBool::new(false)))
        .clone()
}

#[cfg(unix)]
extern "C" fn on_signal(_signal: nix::libc::c_int) {
    if let Some(flag) = INTERRUPTED.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

/// Installs the handlers and returns the flag they raise.
#[cfg(unix)]
pub fn install() -> anyhow::Result<Arc<AtomicBool>> {
    use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};

    let flag = flag();
    let action = SigAction::new(
        SigHandler::Handler(on_signal),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for signal in [Signal::SIGINT, Signal::SIGTERM] {
        // SAFETY: the handler only stores into an atomic that was
        // initialized above, which is async-signal-safe.
        unsafe { sigaction(signal, &action) }?;
    }
    Ok(flag)
}

#[cfg(not(unix))]
pub fn install() -> anyhow::Result<Arc<AtomicBool>> {
    Ok(flag())
}

pub fn is_interrupted(flag: &AtomicBool) -> bool {
    flag.load(Ordering::SeqCst)
}
