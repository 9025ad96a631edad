//! Reconnection supervisor.
//!
//! While active, a single background task ticks every `interval` and the
//! session answers each tick with a fresh connection attempt. Retries are
//! unbounded, fixed-interval, without backoff or jitter: on a LAN the server
//! is expected back quickly.
//!
//! Starting the supervisor cancels any loop already running. Ticks carry the
//! epoch of the loop that produced them so ones queued before a cancel are
//! recognised and ignored.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One scheduled reconnection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectTick {
    pub epoch: u64,
    /// 1-based attempt number within this loop.
    pub attempt: u32,
}

#[derive(Debug)]
pub struct Reconnector {
    interval: Duration,
    ticks: mpsc::UnboundedSender<ReconnectTick>,
    task: Option<JoinHandle<()>>,
    epoch: u64,
}

impl Reconnector {
    pub fn new(interval: Duration, ticks: mpsc::UnboundedSender<ReconnectTick>) -> Self {
        Self {
            interval,
            ticks,
            task: None,
            epoch: 0,
        }
    }

    /// Start a new loop, replacing any running one.
    pub fn start(&mut self) {
        self.cancel();
        let epoch = self.epoch;
        let interval = self.interval;
        let ticks = self.ticks.clone();
        tracing::info!(delay_secs = interval.as_secs(), "Reconnecting");
        self.task = Some(tokio::spawn(async move {
            let mut attempt = 0u32;
            loop {
                tokio::time::sleep(interval).await;
                attempt = attempt.saturating_add(1);
                if ticks.send(ReconnectTick { epoch, attempt }).is_err() {
                    break;
                }
            }
        }));
    }

    /// Stop the running loop, if any. Ticks already queued become stale.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.epoch += 1;
    }

    pub fn is_active(&self) -> bool {
        self.task.is_some()
    }

    /// Whether `tick` came from the currently running loop.
    pub fn accepts(&self, tick: &ReconnectTick) -> bool {
        self.is_active() && tick.epoch == self.epoch
    }
}

impl Drop for Reconnector {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn ticks_at_fixed_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rc = Reconnector::new(Duration::from_secs(5), tx);
        rc.start();

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(25_002)).await;
        let ticks: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(ticks.len(), 6);
        assert!(ticks.iter().all(|t| rc.accepts(t)));
        assert_eq!(ticks.last().map(|t| t.attempt), Some(6));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_ticks_and_stales_queued_ones() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rc = Reconnector::new(Duration::from_secs(5), tx);
        rc.start();
        tokio::time::sleep(Duration::from_millis(5001)).await;
        rc.cancel();
        assert!(!rc.is_active());

        let queued = rx.try_recv().unwrap();
        assert!(!rc.accepts(&queued));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_previous_loop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut rc = Reconnector::new(Duration::from_secs(5), tx);
        rc.start();
        tokio::time::sleep(Duration::from_millis(3000)).await;
        rc.start();
        tokio::time::sleep(Duration::from_millis(5001)).await;

        // Only the second loop ticked (at t=8000); the first was aborted before t=5000.
        let ticks: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(ticks.len(), 1);
        assert!(rc.accepts(&ticks[0]));
        assert_eq!(ticks[0].attempt, 1);
    }
}
