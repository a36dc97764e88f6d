use async_trait::async_trait;

use crate::{envelope::Envelope, reply::Response};

/// The seam between the SMTP ingest layer and the relay pipeline.
///
/// The session calls this once per completed `DATA` transaction; the
/// returned [`Response`] becomes the SMTP reply for that message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle_message(&self, envelope: Envelope) -> Response;
}
