//! The relay pipeline: parse, dedup, rate-limit, route, dispatch, queue.
//!
//! One [`Relay`] lives for the whole process and is shared across every
//! concurrent SMTP session; the stateful components (dedup map, rate
//! window, counters) are owned here and injected into each invocation,
//! never reached through globals.

use std::sync::Arc;

use async_trait::async_trait;
use pushgate_common::{
    config::Config,
    envelope::Envelope,
    handler::MessageHandler,
    reply::{Reply, Response},
};
use pushgate_queue::{FailureQueue, QueueError, QueueRecord};
use tracing::{error, info};

use crate::{
    dedup::DedupFilter,
    dispatcher::{DispatchOutcome, Dispatcher, Notification, RetryPolicy},
    metrics::{Metrics, MetricsSnapshot},
    parser,
    provider::Provider,
    rate_limit::RateLimiter,
    router::Router,
};

pub struct Relay {
    dedup: DedupFilter,
    limiter: RateLimiter,
    router: Router,
    dispatcher: Dispatcher,
    queue: Option<FailureQueue>,
    metrics: Arc<Metrics>,
    device: Option<String>,
}

impl Relay {
    /// Build the pipeline from resolved configuration and a provider.
    ///
    /// # Errors
    /// If the configured queue directory cannot be opened.
    pub fn new(config: &Config, provider: Arc<dyn Provider>) -> Result<Self, QueueError> {
        Self::with_retry_policy(config, provider, RetryPolicy::default())
    }

    /// Same as [`Relay::new`] with a custom retry schedule.
    ///
    /// # Errors
    /// If the configured queue directory cannot be opened.
    pub fn with_retry_policy(
        config: &Config,
        provider: Arc<dyn Provider>,
        policy: RetryPolicy,
    ) -> Result<Self, QueueError> {
        let metrics = Arc::new(Metrics::default());
        let queue = config
            .queue_dir
            .as_ref()
            .map(FailureQueue::open)
            .transpose()?;

        Ok(Self {
            dedup: DedupFilter::default(),
            limiter: RateLimiter::new(config.rate_limit_per_minute),
            router: Router::new(&config.recipient_map, config.default_user_key.clone()),
            dispatcher: Dispatcher::new(
                provider,
                policy,
                config.max_inflight_pushes,
                metrics.clone(),
            ),
            queue,
            metrics,
            device: config.pushover_device.clone(),
        })
    }

    /// The dedup filter, exposed for the periodic sweep task.
    #[must_use]
    pub const fn dedup(&self) -> &DedupFilter {
        &self.dedup
    }

    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Run one envelope through the pipeline.
    pub async fn handle(&self, envelope: &Envelope) -> Response {
        self.metrics.incr_received();

        let rcpt = envelope.recipients().first().map(String::as_str);
        let parsed = parser::parse(envelope.data());
        let title = parsed.title();
        let message = parsed.message();

        let fingerprint = format!("{title}:{message}");
        if self.dedup.is_duplicate(&fingerprint) {
            self.metrics.incr_dedup_dropped();
            info!(
                event = "dedup",
                rcpt = rcpt.unwrap_or_default(),
                subject = %title,
            );
            return Response::new(Reply::Ok, "Message deduplicated");
        }

        if !self.limiter.allow() {
            self.metrics.incr_rate_limited();
            info!(
                event = "rate_limit",
                rcpt = rcpt.unwrap_or_default(),
                subject = %title,
            );
            return Response::new(Reply::ActionUnavailable, "Rate limit exceeded, try later");
        }

        let user = self.router.route(rcpt).to_string();
        info!(
            event = "translated",
            rcpt = rcpt.unwrap_or_default(),
            subject = %title,
            message = %message,
            directives = ?parsed.directives,
            user = %user,
        );

        let notification = Notification {
            user,
            title: title.to_string(),
            message: message.to_string(),
            directives: parsed.directives.clone(),
            device: self.device.clone(),
            recipient: rcpt.map(str::to_string),
        };

        match self.dispatcher.dispatch(&notification).await {
            DispatchOutcome::Delivered { .. } => Response::new(Reply::Ok, "Message accepted"),
            DispatchOutcome::Exhausted { .. } => {
                if let Some(queue) = &self.queue {
                    let record = QueueRecord::new(
                        envelope.recipients().to_vec(),
                        envelope.sender().to_string(),
                        envelope.data(),
                        parsed.directives,
                    );

                    match queue.persist(&record).await {
                        Ok(()) => info!(
                            event = "queued",
                            rcpt = rcpt.unwrap_or_default(),
                            path = %queue.log_path().display(),
                        ),
                        // Both safety nets are gone for this message; say so
                        // loudly, the upstream MTA retry is all that is left.
                        Err(err) => error!(
                            event = "queue_error",
                            rcpt = rcpt.unwrap_or_default(),
                            error = %err,
                        ),
                    }
                }

                Response::new(Reply::ActionUnavailable, "Temporary failure, queued")
            }
        }
    }
}

#[async_trait]
impl MessageHandler for Relay {
    async fn handle_message(&self, envelope: Envelope) -> Response {
        self.handle(&envelope).await
    }
}
