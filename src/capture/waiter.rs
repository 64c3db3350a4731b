//! Bridges an asynchronous capture to the orchestrator.
//!
//! The waiter checks the slot, sleeps through a settle delay, then polls on
//! an interval until the deadline. Sources that live in this process also
//! push a wake-up on every write, so a capture is seen without waiting for
//! the next tick.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::time::{sleep_until, timeout, Instant};

use super::slot::{Captured, SlotSource};
use crate::logging::{self, v_num, v_str, Domain};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub settle: Duration,
    pub deadline: Duration,
    pub poll_interval: Duration,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(5),
            deadline: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotCapturedReason {
    Timeout,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Captured(Captured),
    NotCaptured(NotCapturedReason),
}

impl CaptureOutcome {
    pub fn captured(self) -> Option<Captured> {
        match self {
            CaptureOutcome::Captured(c) => Some(c),
            CaptureOutcome::NotCaptured(_) => None,
        }
    }
}

/// Abandons a wait. Cancelling never touches requests already in flight.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as this token, so this only ends on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[derive(Debug, Clone)]
pub struct CaptureWaiter {
    config: WaitConfig,
}

impl CaptureWaiter {
    pub fn new(config: WaitConfig) -> Self {
        Self { config }
    }

    /// Wait for the slot to hold a capture.
    ///
    /// Returns no later than `deadline + poll_interval` after the call.
    pub async fn wait(&self, source: &dyn SlotSource, cancel: &CancelToken) -> CaptureOutcome {
        let started = Instant::now();
        let deadline = started + self.config.deadline;
        let mut push = source.subscribe();
        let mut polls = 0u32;

        let outcome = 'wait: {
            if cancel.is_cancelled() {
                break 'wait CaptureOutcome::NotCaptured(NotCapturedReason::Cancelled);
            }
            polls += 1;
            if let Some(c) = self.check(source, deadline).await {
                break 'wait CaptureOutcome::Captured(c);
            }

            let settle_end = (started + self.config.settle).min(deadline);
            if Self::pause_until(settle_end, &mut push, cancel).await {
                break 'wait CaptureOutcome::NotCaptured(NotCapturedReason::Cancelled);
            }

            loop {
                if cancel.is_cancelled() {
                    break 'wait CaptureOutcome::NotCaptured(NotCapturedReason::Cancelled);
                }
                polls += 1;
                if let Some(c) = self.check(source, deadline).await {
                    break 'wait CaptureOutcome::Captured(c);
                }
                let now = Instant::now();
                if now >= deadline {
                    break 'wait CaptureOutcome::NotCaptured(NotCapturedReason::Timeout);
                }
                let next = (now + self.config.poll_interval).min(deadline);
                if Self::pause_until(next, &mut push, cancel).await {
                    break 'wait CaptureOutcome::NotCaptured(NotCapturedReason::Cancelled);
                }
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &outcome {
            CaptureOutcome::Captured(c) => logging::info(
                Domain::Capture,
                "capture.received",
                &[
                    ("url", v_str(&c.url)),
                    ("seq", json!(c.seq)),
                    ("polls", json!(polls)),
                    ("elapsed_ms", v_num(elapsed_ms)),
                ],
            ),
            CaptureOutcome::NotCaptured(reason) => logging::warn(
                Domain::Capture,
                "capture.not_captured",
                &[
                    ("reason", v_str(&format!("{:?}", reason).to_lowercase())),
                    ("polls", json!(polls)),
                    ("elapsed_ms", v_num(elapsed_ms)),
                ],
            ),
        }
        outcome
    }

    /// A single read, bounded so that it cannot push the wait past
    /// `deadline + poll_interval`. Read errors count as an empty slot.
    async fn check(&self, source: &dyn SlotSource, deadline: Instant) -> Option<Captured> {
        let budget = deadline.saturating_duration_since(Instant::now()) + self.config.poll_interval;
        match timeout(budget, source.read_slot()).await {
            Ok(Ok(slot)) => slot,
            Ok(Err(err)) => {
                logging::warn(
                    Domain::Capture,
                    "capture.poll_error",
                    &[("error", v_str(&format!("{:#}", err)))],
                );
                None
            }
            Err(_) => {
                logging::warn(Domain::Capture, "capture.poll_timeout", &[]);
                None
            }
        }
    }

    /// Sleep until `until`, a push wake-up, or cancellation. Returns true when
    /// cancelled.
    async fn pause_until(
        until: Instant,
        push: &mut Option<watch::Receiver<Option<Captured>>>,
        cancel: &CancelToken,
    ) -> bool {
        let pushed = async {
            match push.as_mut() {
                Some(rx) => {
                    if rx.changed().await.is_err() {
                        // writer gone; fall back to plain polling
                        std::future::pending::<()>().await;
                    }
                }
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            _ = sleep_until(until) => false,
            _ = pushed => false,
            _ = cancel.cancelled() => true,
        }
    }
}
