#[cfg(not(unix))]
compile_error!("Only unix-like targets are currently supported");

use std::sync::Arc;

use clap::{Parser, Subcommand};
use pushgate_common::config::Config;
use pushgate_queue::FailureQueue;
use pushgate_relay::{
    dispatcher::{Notification, payload_for},
    parser,
    provider::{Provider, PushoverClient},
    router::Router,
};

#[derive(Parser)]
#[command(name = "pushgatectl", about = "Operator tooling for the pushgate gateway")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the effective configuration and exit
    Check,
    /// Replay the failure queue through the provider.
    ///
    /// Replay bypasses deduplication and rate limiting and does not
    /// consume the queue: running it twice delivers twice.
    Replay,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pushgate_common::logging::init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Check => {
            config.validate()?;
            println!("Configuration OK");
        }
        Commands::Replay => replay(&config).await?,
    }

    Ok(())
}

async fn replay(config: &Config) -> anyhow::Result<()> {
    let Some(queue_dir) = &config.queue_dir else {
        anyhow::bail!("No queue directory configured; nothing to replay");
    };

    let provider = Arc::new(PushoverClient::new(config.pushover_token.clone())?);
    let router = Router::new(&config.recipient_map, config.default_user_key.clone());
    let device = config.pushover_device.clone();

    let queue = FailureQueue::open(queue_dir)?;
    let report = queue
        .replay(|record| {
            let provider = provider.clone();
            let device = device.clone();
            let router = &router;

            async move {
                // Subject and body come from re-parsing the stored raw
                // message; the directives recorded at failure time win.
                let parsed = parser::parse(record.content.as_bytes());
                let rcpt = record.rcpt_tos.first().map(String::as_str);

                let notification = Notification {
                    user: router.route(rcpt).to_string(),
                    title: parsed.title().to_string(),
                    message: parsed.message().to_string(),
                    directives: record.directives,
                    device,
                    recipient: rcpt.map(str::to_string),
                };

                provider.send(&payload_for(&notification)).await.accepted
            }
        })
        .await?;

    println!(
        "Replayed {} record(s): {} delivered, {} malformed line(s) skipped",
        report.replayed, report.delivered, report.skipped
    );

    Ok(())
}
