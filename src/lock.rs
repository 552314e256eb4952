// src/lock.rs
//! Single-flight run gate and the "still working" liveness task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::Result;

/// At most one cycle per process. Never queues: a busy lock is reported to
/// the caller, who rejects the trigger.
#[derive(Clone, Default)]
pub struct RunLock {
    inner: Arc<Mutex<()>>,
}

/// Held for the duration of a cycle; releases on drop.
pub struct RunGuard {
    _guard: OwnedMutexGuard<()>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<RunGuard> {
        self.inner
            .clone()
            .try_lock_owned()
            .ok()
            .map(|g| RunGuard { _guard: g })
    }

    pub fn is_running(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

/// Receiver of periodic "still working" signals, e.g. a chat typing indicator.
#[async_trait]
pub trait ActivitySignal: Send + Sync {
    async fn still_working(&self) -> Result<()>;
}

/// Background task emitting [`ActivitySignal::still_working`] every `interval`.
pub struct Liveness {
    stop: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Liveness {
    pub fn spawn(signal: Arc<dyn ActivitySignal>, interval: Duration) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = signal.still_working().await {
                            debug!(error = %e, "liveness signal failed");
                        }
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the task and wait for it to finish.
    pub async fn stop(mut self) {
        let _ = self.stop.send(true);
        if let Some(h) = self.handle.take() {
            let _ = h.await;
        }
    }
}

impl Drop for Liveness {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
        }
    }
}
