use async_trait::async_trait;
use carrier_core::Duration;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::watch;

/// Polling-delay policy for an idle or failing transport.
///
/// Waits observe the shutdown signal so a stopping bus is never stuck in a
/// sleep.
#[async_trait]
pub trait BackoffStrategy: Send + Sync {
    /// Called after a successful receive; clears any error escalation
    fn reset(&self);

    /// Wait before polling again after an empty receive
    async fn wait_idle(&self, shutdown: &mut watch::Receiver<bool>);

    /// Wait before polling again after a transport error
    async fn wait_error(&self, shutdown: &mut watch::Receiver<bool>);
}

/// Constant short waits when idle; exponential, capped waits after
/// consecutive transport errors.
#[derive(Debug)]
pub struct DefaultBackoffStrategy {
    idle_delay: Duration,
    error_delay: Duration,
    max_error_delay: Duration,
    consecutive_errors: AtomicU32,
}

impl DefaultBackoffStrategy {
    /// Create the default policy: 100 ms idle, 200 ms error base, 5 s cap
    pub fn new() -> Self {
        Self {
            idle_delay: Duration::from_millis(100),
            error_delay: Duration::from_millis(200),
            max_error_delay: Duration::from_secs(5),
            consecutive_errors: AtomicU32::new(0),
        }
    }

    /// Create a policy with custom delays
    pub fn with_delays(idle_delay: Duration, error_delay: Duration, max_error_delay: Duration) -> Self {
        Self {
            idle_delay,
            error_delay,
            max_error_delay,
            consecutive_errors: AtomicU32::new(0),
        }
    }

    fn next_error_delay(&self) -> Duration {
        let errors = self.consecutive_errors.fetch_add(1, Ordering::Relaxed);
        let factor = 2u32.saturating_pow(errors.min(16));
        self.error_delay
            .saturating_mul(factor)
            .min(self.max_error_delay)
    }
}

impl Default for DefaultBackoffStrategy {
    fn default() -> Self {
        Self::new()
    }
}

async fn cancellable_sleep(delay: Duration, shutdown: &mut watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(delay) => {}
        _ = shutdown.changed() => {}
    }
}

#[async_trait]
impl BackoffStrategy for DefaultBackoffStrategy {
    fn reset(&self) {
        self.consecutive_errors.store(0, Ordering::Relaxed);
    }

    async fn wait_idle(&self, shutdown: &mut watch::Receiver<bool>) {
        cancellable_sleep(self.idle_delay, shutdown).await;
    }

    async fn wait_error(&self, shutdown: &mut watch::Receiver<bool>) {
        cancellable_sleep(self.next_error_delay(), shutdown).await;
    }
}
