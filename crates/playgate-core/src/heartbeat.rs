//! Concurrency keepalive scheduler
//!
//! Periodically renews the reserved streaming slot. A slot-limit report
//! flips the shared concurrency state and notifies the session exactly once;
//! the timer keeps running (the server may free a slot later) until the
//! session explicitly stops it. Network failures never interrupt playback.

use crate::{ConcurrencyState, EntitlementApi, SlotStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Callback fired (once) when the slot limit is observed mid-playback
pub type LimitCallback = Arc<dyn Fn() + Send + Sync>;

pub struct HeartbeatScheduler {
    api: Arc<dyn EntitlementApi>,
    concurrency: Arc<RwLock<ConcurrencyState>>,
    task: Mutex<Option<JoinHandle<()>>>,
    limit_notified: Arc<AtomicBool>,
}

impl HeartbeatScheduler {
    pub fn new(api: Arc<dyn EntitlementApi>, concurrency: Arc<RwLock<ConcurrencyState>>) -> Self {
        Self {
            api,
            concurrency,
            task: Mutex::new(None),
            limit_notified: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Begins the periodic keepalive. A no-op while a timer is already live;
    /// one scheduler serves one playback session.
    pub fn start(&self, interval_ms: u64, on_limit: LimitCallback) {
        let mut slot = self.task.lock().expect("heartbeat task lock poisoned");
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Concurrency keepalive already running");
            return;
        }

        info!(interval_ms, "Concurrency keepalive calls scheduled");
        let api = Arc::clone(&self.api);
        let concurrency = Arc::clone(&self.concurrency);
        let notified = Arc::clone(&self.limit_notified);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial slot check
            // already happened during authorization.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match api.acquire_slot().await {
                    Ok(SlotStatus::LimitReached) => {
                        *concurrency.write().await = ConcurrencyState::LimitReached;
                        if !notified.swap(true, Ordering::SeqCst) {
                            warn!("Concurrency stream revoked mid-playback, notifying session");
                            on_limit();
                        }
                    }
                    Ok(SlotStatus::Granted) => {
                        let mut state = concurrency.write().await;
                        // LimitReached is terminal for the session
                        if *state != ConcurrencyState::LimitReached {
                            *state = ConcurrencyState::Granted;
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "Concurrency keepalive failed; disregarding to allow playback");
                    }
                }
            }
        });
        *slot = Some(handle);
    }

    /// Cancels the keepalive timer; safe to call repeatedly or when idle
    pub fn stop(&self, reason: &str) {
        let mut slot = self.task.lock().expect("heartbeat task lock poisoned");
        if let Some(task) = slot.take() {
            info!(reason, "Stopping concurrency keepalive calls");
            task.abort();
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .expect("heartbeat task lock poisoned")
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

impl Drop for HeartbeatScheduler {
    fn drop(&mut self) {
        self.stop("scheduler dropped");
    }
}
