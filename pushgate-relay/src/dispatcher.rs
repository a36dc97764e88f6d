//! Bounded-retry dispatch to the notification provider.

use std::{sync::Arc, time::Duration};

use ahash::AHashMap;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::{
    metrics::Metrics,
    parser::truncate_chars,
    provider::{Provider, PushPayload},
};

/// Fixed backoff schedule indexed by failure count. Three retries after
/// the initial attempt; no jitter. The whole sequence is bounded by
/// roughly the sum of the delays plus four provider timeouts, which the
/// protocol-level caller is expected to tolerate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: vec![
                Duration::from_millis(500),
                Duration::from_secs(2),
                Duration::from_secs(5),
            ],
        }
    }
}

impl RetryPolicy {
    /// A custom schedule; one entry per retry.
    #[must_use]
    pub const fn new(backoff: Vec<Duration>) -> Self {
        Self { backoff }
    }

    /// Retries allowed after the initial attempt
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        u32::try_from(self.backoff.len()).unwrap_or(u32::MAX)
    }

    /// Delay to sleep after the nth failure (1-based), or `None` once
    /// the budget is exhausted.
    fn delay_after_failure(&self, failures: u32) -> Option<Duration> {
        self.backoff.get(failures.checked_sub(1)? as usize).copied()
    }
}

/// What the pipeline asks the dispatcher to deliver.
#[derive(Debug, Clone, Default)]
pub struct Notification {
    pub user: String,
    pub title: String,
    pub message: String,
    pub directives: AHashMap<String, String>,
    pub device: Option<String>,
    /// Original recipient address, carried for log context only.
    pub recipient: Option<String>,
}

/// Terminal result of a dispatch, after all retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { status: u16, attempts: u32 },
    Exhausted { status: u16, attempts: u32 },
}

impl DispatchOutcome {
    #[must_use]
    pub const fn is_delivered(self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Retrying dispatcher with bounded provider concurrency.
pub struct Dispatcher {
    provider: Arc<dyn Provider>,
    policy: RetryPolicy,
    // Bounds concurrent provider calls; sessions queue on the permit
    // rather than fanning out unbounded work against a slow provider.
    inflight: Semaphore,
    metrics: Arc<Metrics>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        provider: Arc<dyn Provider>,
        policy: RetryPolicy,
        max_inflight: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            provider,
            policy,
            inflight: Semaphore::new(max_inflight),
            metrics,
        }
    }

    /// Attempt delivery, retrying per the policy. Success on any
    /// attempt returns immediately.
    pub async fn dispatch(&self, notification: &Notification) -> DispatchOutcome {
        // The semaphore is never closed, so acquisition cannot fail.
        let _permit = self.inflight.acquire().await.ok();

        let payload = payload_for(notification);
        let rcpt = notification.recipient.as_deref().unwrap_or_default();
        let mut failures = 0u32;

        loop {
            let response = self.provider.send(&payload).await;

            if response.accepted {
                self.metrics.incr_pushed_ok();
                info!(
                    event = "push_ok",
                    rcpt,
                    subject = %payload.title,
                    status = response.status,
                );
                return DispatchOutcome::Delivered {
                    status: response.status,
                    attempts: failures + 1,
                };
            }

            failures += 1;
            warn!(
                event = "push_attempt_failed",
                rcpt,
                subject = %payload.title,
                status = response.status,
                response = %response.body,
                retry = failures,
            );

            match self.policy.delay_after_failure(failures) {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    self.metrics.incr_pushed_failed();
                    error!(
                        event = "push_failed",
                        rcpt,
                        subject = %payload.title,
                        status = response.status,
                    );
                    return DispatchOutcome::Exhausted {
                        status: response.status,
                        attempts: failures,
                    };
                }
            }
        }
    }
}

/// Map a notification onto the provider payload. Title and message are
/// re-truncated here regardless of what the parser already did, and an
/// unparseable priority is omitted rather than failing the dispatch.
#[must_use]
pub fn payload_for(notification: &Notification) -> PushPayload {
    PushPayload {
        user: notification.user.clone(),
        title: truncate_chars(&notification.title, 250).to_string(),
        message: truncate_chars(&notification.message, 1024).to_string(),
        priority: notification
            .directives
            .get("priority")
            .and_then(|raw| raw.trim().parse().ok()),
        sound: notification.directives.get("sound").cloned(),
        url: notification.directives.get("url").cloned(),
        url_title: notification.directives.get("url_title").cloned(),
        device: notification.device.clone(),
    }
}
