pub mod config;
pub mod envelope;
pub mod handler;
pub mod logging;
pub mod reply;

pub use tracing;

/// Control signal broadcast to long-running tasks.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    Shutdown,
}
