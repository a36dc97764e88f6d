#[cfg(not(unix))]
compile_error!("Only unix-like targets are currently supported");

use pushgate_common::config::Config;
use pushgate::controller::Gateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pushgate_common::logging::init();

    let config = Config::load()?;
    Gateway::new(config).run().await
}
