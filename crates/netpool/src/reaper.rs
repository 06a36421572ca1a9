//! Background idle sweeps.
//!
//! Releases already sweep their own pool, but only when traffic flows. An
//! [`IdleReaper`] sweeps every pool of a manager on a fixed period so that
//! quiet endpoints give their idle connections back as well.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::connection::Connection;
use crate::manager::ConnectionManager;

/// Handle to a running idle sweep task.
///
/// The task stops when [`stop`](IdleReaper::stop) is called, when the
/// handle is dropped, or when the manager itself is dropped.
#[derive(Debug)]
pub struct IdleReaper {
    shutdown_tx: broadcast::Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl IdleReaper {
    /// Signal the task to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Stop the task and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    /// Check if the task has finished.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<C: Connection> ConnectionManager<C> {
    /// Sweep every pool for expired idle connections every `period`.
    ///
    /// The first sweep happens one period from now. Sweeps run on the
    /// blocking thread pool. The task only holds a weak reference to the
    /// manager.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime or if `period` is zero.
    pub fn spawn_reaper(self: &Arc<Self>, period: Duration) -> IdleReaper {
        let manager = Arc::downgrade(self);
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Pool locks can be held across a blocking connect.
                        let target = manager.clone();
                        let swept = tokio::task::spawn_blocking(move || {
                            target.upgrade().map(|manager| manager.check_idle())
                        })
                        .await;
                        match swept {
                            Ok(Some(evicted)) if evicted > 0 => {
                                tracing::debug!(evicted, "idle sweep");
                            }
                            Ok(Some(_)) => {}
                            Ok(None) => break,
                            Err(e) => tracing::warn!(error = %e, "idle sweep failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
            tracing::trace!("idle reaper stopped");
        });

        IdleReaper {
            shutdown_tx,
            handle: Some(handle),
        }
    }
}
