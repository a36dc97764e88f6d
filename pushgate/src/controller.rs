//! Turns a resolved [`Config`] into a running gateway.

use std::{net::ToSocketAddrs, sync::Arc, time::Duration};

use anyhow::Context;
use pushgate_common::{Signal, config::Config, handler::MessageHandler, internal};
use pushgate_relay::{Relay, provider::PushoverClient};
use pushgate_smtp::{AuthConfig, Listener, load_tls_acceptor};
use tokio::sync::broadcast;

/// How often expired dedup fingerprints are swept out.
const DEDUP_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub struct Gateway {
    config: Config,
}

impl Gateway {
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until SIGINT/SIGTERM, then drain in-flight sessions.
    ///
    /// # Errors
    /// On invalid configuration or listener failure.
    pub async fn run(self) -> anyhow::Result<()> {
        let config = self.config;
        config.validate()?;

        let provider = Arc::new(
            PushoverClient::new(config.pushover_token.clone())
                .context("Failed to construct the provider client")?,
        );
        let relay = Arc::new(Relay::new(&config, provider)?);

        let socket = (config.listen_host.as_str(), config.listen_port)
            .to_socket_addrs()
            .with_context(|| format!("Cannot resolve {}", config.listen_host))?
            .next()
            .with_context(|| format!("No address for {}", config.listen_host))?;

        let auth = AuthConfig {
            required: !config.allow_nonauth,
            username: config.smtp_user.clone(),
            password: config.smtp_pass.clone(),
        };

        let tls = match (
            config.enable_starttls,
            &config.tls_cert_file,
            &config.tls_key_file,
        ) {
            (true, Some(cert), Some(key)) => Some(load_tls_acceptor(cert, key)?),
            _ => None,
        };

        let banner = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let handler: Arc<dyn MessageHandler> = relay.clone();
        let listener = Listener::new(socket, banner, handler, auth, tls);

        let (shutdown, _) = broadcast::channel(1);

        let mut listener_task = tokio::spawn({
            let shutdown = shutdown.subscribe();
            async move { listener.serve(shutdown).await }
        });

        let sweeper_task = tokio::spawn(sweep_dedup(relay.clone(), shutdown.subscribe()));

        tokio::select! {
            result = &mut listener_task => {
                let _ = shutdown.send(Signal::Shutdown);
                result??;
                anyhow::bail!("SMTP listener exited unexpectedly");
            }

            () = wait_for_shutdown_signal() => {
                internal!(level = INFO, "Shutdown signal received");
                let _ = shutdown.send(Signal::Shutdown);
                listener_task.await??;
            }
        }

        sweeper_task.await?;

        internal!(
            level = INFO,
            "Shutdown complete; final counters: {:?}",
            relay.metrics(),
        );
        Ok(())
    }
}

/// Periodically evict dedup fingerprints older than the suppression
/// window, so the seen-map is bounded by recent traffic.
async fn sweep_dedup(relay: Arc<Relay>, mut shutdown: broadcast::Receiver<Signal>) {
    let mut ticker = tokio::time::interval(DEDUP_SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = relay.dedup().sweep();
                if removed > 0 {
                    internal!(level = DEBUG, "Swept {removed} expired dedup entries");
                }
            }

            sig = shutdown.recv() => {
                if matches!(sig, Ok(Signal::Shutdown)) {
                    break;
                }
            }
        }
    }
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = ctrl_c.await;
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
