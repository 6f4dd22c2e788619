use parking_lot::{Condvar, Mutex};
use signal_hook::{
    consts::{SIGINT, SIGTERM},
    iterator::Signals,
};
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tracing::info;

/// Shared flag to stop the watchdog or the reconciler between two steps
///
/// Sleeping through the token wakes up as soon as it gets cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        *self.inner.cancelled.lock() = true;
        self.inner.signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// block for `duration`, returns `true` if the token was cancelled in the meantime
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.inner.cancelled.lock();

        while !*cancelled {
            if self
                .inner
                .signal
                .wait_until(&mut cancelled, deadline)
                .timed_out()
            {
                break;
            }
        }

        *cancelled
    }

    /// cancel the token on SIGINT or SIGTERM
    pub fn cancel_on_signals(&self) -> std::io::Result<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM])?;
        let token = self.clone();

        thread::Builder::new()
            .name("scr-signals".into())
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(signal = signal, "Received termination signal, stopping");
                    token.cancel();
                }
            })?;

        Ok(())
    }
}
