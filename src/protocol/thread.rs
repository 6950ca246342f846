use std::{
    io,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

use log::{debug, warn};
use mio::Waker;

/// Shared stop request for a multiplexing loop.
///
/// Loops check [`CancelToken::is_cancelled`] at every wait boundary. An
/// attached waker lets `cancel` interrupt a wait that has no timeout.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    waker: Arc<OnceLock<Arc<Waker>>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches the waker of the selector this token stops. Only the first
    /// waker is kept; returns false if one was already attached.
    pub fn attach(&self, waker: Arc<Waker>) -> bool {
        self.waker.set(waker).is_ok()
    }

    /// Raises the flag and wakes the attached selector. The flag is set even
    /// when the wake fails; the loop then notices it at its next timeout.
    pub fn cancel(&self) -> io::Result<()> {
        self.cancelled.store(true, Ordering::SeqCst);
        match self.waker.get() {
            Some(waker) => waker.wake(),
            None => Ok(()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A named background thread that can be asked to stop and joined.
#[derive(Debug)]
pub struct Worker {
    name: String,
    log_target: String,
    token: CancelToken,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    /// Spawns `job` on a thread called `name`. The worker's own records go
    /// to `log_target`.
    pub fn spawn<F>(
        name: impl Into<String>,
        log_target: impl Into<String>,
        token: CancelToken,
        job: F,
    ) -> io::Result<Self>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let name = name.into();
        let log_target = log_target.into();
        let thread_token = token.clone();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || job(thread_token))?;
        debug!(target: log_target.as_str(), "worker {name} started");

        Ok(Self {
            name,
            log_target,
            token,
            thread: Some(thread),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    pub fn cancel(&self) {
        if let Err(e) = self.token.cancel() {
            warn!(target: self.log_target.as_str(), "failed to wake worker {}: {e}", self.name);
        }
    }

    /// Waits for the thread to finish. Returns false if it panicked.
    pub fn join(&mut self) -> bool {
        let Some(thread) = self.thread.take() else {
            return true;
        };
        match thread.join() {
            Ok(()) => {
                debug!(target: self.log_target.as_str(), "worker {} finished", self.name);
                true
            }
            Err(_) => {
                warn!(target: self.log_target.as_str(), "worker {} panicked", self.name);
                false
            }
        }
    }

    pub fn stop(&mut self) -> bool {
        self.cancel();
        self.join()
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.thread.is_some() {
            debug!(target: self.log_target.as_str(), "shutting down worker {}", self.name);
            self.stop();
        }
    }
}
