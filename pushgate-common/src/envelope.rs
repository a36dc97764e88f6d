use std::net::SocketAddr;

/// A single inbound message as handed over by the SMTP session: the
/// envelope addresses from the transaction plus the raw DATA bytes.
///
/// An envelope is owned by exactly one pipeline invocation and is
/// dropped once the message has been pushed or queued.
#[derive(Debug, Clone)]
pub struct Envelope {
    sender: String,
    recipients: Vec<String>,
    data: Vec<u8>,
    peer: SocketAddr,
}

impl Envelope {
    #[must_use]
    pub fn new(sender: String, recipients: Vec<String>, data: Vec<u8>, peer: SocketAddr) -> Self {
        Self {
            sender,
            recipients,
            data,
            peer,
        }
    }

    /// The `MAIL FROM` address for this message
    #[must_use]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    /// The `RCPT TO` addresses, in the order they were accepted
    #[must_use]
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// The raw message bytes received during `DATA`
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The network address of the submitting peer
    #[must_use]
    pub const fn peer(&self) -> SocketAddr {
        self.peer
    }
}
