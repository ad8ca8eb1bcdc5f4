use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tracing::info;

/// Shared run/stop switch for the autonomous loop.
///
/// `stop` may be called from any task (e.g. a Ctrl+C handler). The loop
/// observes it at the top of the next cycle, or immediately if it is
/// sleeping between cycles.
pub struct LoopController {
    is_running: AtomicBool,
    stop_requested: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    cycles_completed: AtomicU64,
    wake: Notify,
}

impl LoopController {
    pub fn new() -> Self {
        Self {
            is_running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            started_at: Mutex::new(None),
            cycles_completed: AtomicU64::new(0),
            wake: Notify::new(),
        }
    }

    pub fn start(&self) -> Result<(), String> {
        if self.is_running() {
            return Err("Loop is already running".to_string());
        }

        self.is_running.store(true, Ordering::Release);
        if let Ok(mut started) = self.started_at.lock() {
            *started = Some(Utc::now());
        }

        info!("Autonomous loop started");
        Ok(())
    }

    /// Ask the loop to finish. Idempotent; also valid before `start`.
    pub fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Stop requested");
        // notify_one stores a permit, so a loop that is not yet sleeping
        // still wakes on its next wait
        self.wake.notify_one();
    }

    pub(crate) fn mark_stopped(&self) {
        self.is_running.store(false, Ordering::Release);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Acquire)
    }

    pub fn record_cycle(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    /// Seconds since `start`, 0 if never started
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at
            .lock()
            .ok()
            .and_then(|s| *s)
            .map(|start| (Utc::now() - start).num_seconds().max(0) as u64)
            .unwrap_or(0)
    }

    /// Resolves when `stop` is called
    pub async fn stopped(&self) {
        if self.stop_requested() {
            return;
        }
        self.wake.notified().await;
    }
}

impl Default for LoopController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_lifecycle() {
        let controller = LoopController::new();
        assert!(!controller.is_running());
        assert_eq!(controller.uptime_seconds(), 0);

        controller.start().unwrap();
        assert!(controller.start().is_err());
        assert!(controller.is_running());

        controller.stop();
        controller.stop();
        assert!(controller.stop_requested());
        controller.mark_stopped();
        assert!(!controller.is_running());
    }

    #[tokio::test]
    async fn test_stop_wakes_waiter() {
        let controller = std::sync::Arc::new(LoopController::new());
        let waiter = controller.clone();
        let handle = tokio::spawn(async move { waiter.stopped().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.stop();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[test]
    fn test_cycle_counter() {
        let controller = LoopController::new();
        controller.record_cycle();
        controller.record_cycle();
        assert_eq!(controller.cycles_completed(), 2);
    }
}
