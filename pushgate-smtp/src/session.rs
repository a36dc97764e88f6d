//! One SMTP session, from greeting to QUIT.
//!
//! The session implements the minimal command set an alerting client
//! needs: HELO/EHLO, optional AUTH LOGIN, optional STARTTLS, MAIL FROM,
//! RCPT TO, DATA, RSET, NOOP, QUIT. Each completed DATA transaction is
//! handed to the [`MessageHandler`]; its response becomes the reply the
//! submitting client sees.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use pushgate_common::{
    envelope::Envelope, handler::MessageHandler, incoming, internal, outgoing, reply::Reply,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader},
    time::timeout,
};
use tokio_rustls::TlsAcceptor;

use crate::{command::Command, error::SessionError};

/// Idle limit per command (RFC 5321 recommends five minutes).
const COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// Object-safe alias for the connection stream, so a session can swap
/// its plain TCP stream for a TLS stream mid-connection without
/// recursive generics.
pub trait SessionStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<S: AsyncRead + AsyncWrite + Unpin + Send> SessionStream for S {}

/// AUTH LOGIN configuration for the listener.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Reject MAIL FROM until the peer has authenticated.
    pub required: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl AuthConfig {
    fn available(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }

    fn matches(&self, username: &str, password: &str) -> bool {
        match (&self.username, &self.password) {
            (Some(expected_user), Some(expected_pass)) => {
                expected_user == username && expected_pass == password
            }
            _ => false,
        }
    }
}

pub struct Session {
    stream: BufReader<Box<dyn SessionStream>>,
    peer: SocketAddr,
    banner: Arc<str>,
    handler: Arc<dyn MessageHandler>,
    auth: AuthConfig,
    /// Present until consumed by a successful STARTTLS.
    tls: Option<TlsAcceptor>,
    authenticated: bool,
    sender: Option<String>,
    recipients: Vec<String>,
}

impl Session {
    pub(crate) fn new(
        stream: Box<dyn SessionStream>,
        peer: SocketAddr,
        banner: Arc<str>,
        handler: Arc<dyn MessageHandler>,
        auth: AuthConfig,
        tls: Option<TlsAcceptor>,
    ) -> Self {
        Self {
            stream: BufReader::new(stream),
            peer,
            banner,
            handler,
            auth,
            tls,
            authenticated: false,
            sender: None,
            recipients: Vec::new(),
        }
    }

    /// Serve the session until QUIT or disconnect.
    ///
    /// # Errors
    /// On connection I/O failure, TLS negotiation failure, or command
    /// timeout. A clean disconnect is not an error.
    pub async fn run(mut self) -> Result<(), SessionError> {
        internal!(level = DEBUG, "Session started for {}", self.peer);

        let greeting = format!("{} pushgate service ready", self.banner);
        self.reply(Reply::ServiceReady, &greeting).await?;

        loop {
            let Some(line) = self.read_line().await? else {
                internal!(level = DEBUG, "Peer {} disconnected", self.peer);
                return Ok(());
            };

            incoming!(level = TRACE, "{line}");

            match Command::parse(&line) {
                Command::Helo(_) => {
                    self.reset_transaction();
                    let banner = self.banner.to_string();
                    self.reply(Reply::Ok, &banner).await?;
                }
                Command::Ehlo(_) => {
                    self.reset_transaction();
                    self.ehlo_reply().await?;
                }
                Command::StartTls => self.handle_starttls().await?,
                Command::AuthLogin(initial) => self.handle_auth(initial).await?,
                Command::MailFrom(address) => {
                    if self.auth.required && !self.authenticated {
                        self.reply(Reply::AuthRequired, "Authentication required")
                            .await?;
                    } else {
                        self.sender = Some(address);
                        self.recipients.clear();
                        self.reply(Reply::Ok, "Ok").await?;
                    }
                }
                Command::RcptTo(address) => {
                    if self.sender.is_none() {
                        self.reply(Reply::InvalidCommandSequence, "Need MAIL command")
                            .await?;
                    } else {
                        self.recipients.push(address);
                        self.reply(Reply::Ok, "Ok").await?;
                    }
                }
                Command::Data => self.handle_data().await?,
                Command::Rset => {
                    self.reset_transaction();
                    self.reply(Reply::Ok, "Ok").await?;
                }
                Command::Noop => self.reply(Reply::Ok, "Ok").await?,
                Command::Quit => {
                    self.reply(Reply::GoodBye, "Bye").await?;
                    return Ok(());
                }
                Command::Unknown(command) => {
                    internal!(level = DEBUG, "Unrecognized command from {}: {command}", self.peer);
                    self.reply(Reply::SyntaxError, "Command not recognized")
                        .await?;
                }
            }
        }
    }

    async fn ehlo_reply(&mut self) -> Result<(), SessionError> {
        let mut lines = vec![self.banner.to_string(), "8BITMIME".to_string()];
        if self.tls.is_some() {
            lines.push("STARTTLS".to_string());
        }
        if self.auth.available() {
            lines.push("AUTH LOGIN".to_string());
        }

        let mut response = String::new();
        for line in &lines[..lines.len() - 1] {
            response.push_str(&format!("250-{line}\r\n"));
        }
        response.push_str(&format!("250 {}\r\n", lines[lines.len() - 1]));

        outgoing!(level = TRACE, "{}", response.trim_end());
        self.stream.write_all(response.as_bytes()).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn handle_starttls(&mut self) -> Result<(), SessionError> {
        let Some(acceptor) = self.tls.take() else {
            return Ok(self
                .reply(Reply::InvalidCommandSequence, "STARTTLS not available")
                .await?);
        };

        self.reply(Reply::ServiceReady, "Ready to start TLS").await?;

        // Swap the plain stream out, handshake, swap the TLS stream in.
        // A failed handshake ends the session.
        let buffered = std::mem::replace(
            &mut self.stream,
            BufReader::new(Box::new(tokio::io::empty())),
        );
        let tls_stream = acceptor
            .accept(buffered.into_inner())
            .await
            .map_err(SessionError::Tls)?;

        self.stream = BufReader::new(Box::new(tls_stream));

        // RFC 3207: the session state resets after the TLS handshake.
        self.reset_transaction();
        self.authenticated = false;

        internal!(level = DEBUG, "TLS established with {}", self.peer);
        Ok(())
    }

    async fn handle_auth(&mut self, initial: Option<String>) -> Result<(), SessionError> {
        if !self.auth.available() {
            return Ok(self
                .reply(Reply::InvalidCommandSequence, "Authentication not enabled")
                .await?);
        }

        let username = match initial {
            Some(encoded) => decode_base64(&encoded),
            None => {
                // "Username:" / "Password:" prompts, base64 as the
                // LOGIN mechanism requires.
                self.reply(Reply::AuthContinue, "VXNlcm5hbWU6").await?;
                match self.read_line().await? {
                    Some(line) => decode_base64(&line),
                    None => return Ok(()),
                }
            }
        };

        self.reply(Reply::AuthContinue, "UGFzc3dvcmQ6").await?;
        let password = match self.read_line().await? {
            Some(line) => decode_base64(&line),
            None => return Ok(()),
        };

        match (username, password) {
            (Some(username), Some(password)) if self.auth.matches(&username, &password) => {
                self.authenticated = true;
                self.reply(Reply::AuthSuccessful, "Authentication successful")
                    .await?;
            }
            _ => {
                self.reply(Reply::AuthFailed, "Authentication failed")
                    .await?;
            }
        }

        Ok(())
    }

    async fn handle_data(&mut self) -> Result<(), SessionError> {
        if self.recipients.is_empty() {
            return Ok(self
                .reply(Reply::InvalidCommandSequence, "Need RCPT command")
                .await?);
        }

        self.reply(Reply::StartMailInput, "End data with <CR><LF>.<CR><LF>")
            .await?;

        let Some(data) = self.read_data().await? else {
            internal!(level = DEBUG, "Peer {} disconnected during DATA", self.peer);
            return Ok(());
        };

        let envelope = Envelope::new(
            self.sender.take().unwrap_or_default(),
            std::mem::take(&mut self.recipients),
            data,
            self.peer,
        );

        let response = self.handler.handle_message(envelope).await;
        self.reply(response.code, &response.text).await?;

        self.reset_transaction();
        Ok(())
    }

    /// Read the message body until the lone-dot terminator, undoing
    /// dot-stuffing. `None` means the peer disconnected mid-DATA.
    async fn read_data(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        let mut data = Vec::new();

        loop {
            let mut line = Vec::new();
            let read = timeout(COMMAND_TIMEOUT, self.stream.read_until(b'\n', &mut line))
                .await
                .map_err(|_| SessionError::Timeout(COMMAND_TIMEOUT.as_secs()))??;

            if read == 0 {
                return Ok(None);
            }

            if line == b".\r\n" || line == b".\n" {
                return Ok(Some(data));
            }

            if line.starts_with(b"..") {
                data.extend_from_slice(&line[1..]);
            } else {
                data.extend_from_slice(&line);
            }
        }
    }

    /// Read one command line. `None` means the peer disconnected.
    async fn read_line(&mut self) -> Result<Option<String>, SessionError> {
        let mut line = Vec::new();
        let read = timeout(COMMAND_TIMEOUT, self.stream.read_until(b'\n', &mut line))
            .await
            .map_err(|_| SessionError::Timeout(COMMAND_TIMEOUT.as_secs()))??;

        if read == 0 {
            return Ok(None);
        }

        let line = String::from_utf8_lossy(&line);
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    async fn reply(&mut self, code: Reply, text: &str) -> Result<(), SessionError> {
        outgoing!(level = TRACE, "{code} {text}");
        self.stream
            .write_all(format!("{code} {text}\r\n").as_bytes())
            .await?;
        self.stream.flush().await?;
        Ok(())
    }

    fn reset_transaction(&mut self) {
        self.sender = None;
        self.recipients.clear();
    }
}

fn decode_base64(encoded: &str) -> Option<String> {
    let bytes = BASE64.decode(encoded.trim()).ok()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use async_trait::async_trait;
    use pushgate_common::reply::Response;
    use std::sync::Mutex as StdMutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    use super::*;

    /// Handler double that records envelopes and replies 250.
    #[derive(Default)]
    struct RecordingHandler {
        envelopes: StdMutex<Vec<Envelope>>,
    }

    #[async_trait]
    impl MessageHandler for RecordingHandler {
        async fn handle_message(&self, envelope: Envelope) -> Response {
            self.envelopes.lock().unwrap().push(envelope);
            Response::new(Reply::Ok, "Message accepted")
        }
    }

    fn spawn_session(
        auth: AuthConfig,
        handler: Arc<RecordingHandler>,
    ) -> (DuplexStream, tokio::task::JoinHandle<Result<(), SessionError>>) {
        let (client, server) = tokio::io::duplex(16 * 1024);
        let session = Session::new(
            Box::new(server),
            "127.0.0.1:49152".parse().unwrap(),
            Arc::from("gateway.test"),
            handler,
            auth,
            None,
        );
        (client, tokio::spawn(session.run()))
    }

    async fn read_reply(client: &mut DuplexStream) -> String {
        let mut buf = [0u8; 1024];
        let n = client.read(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf[..n]).to_string()
    }

    async fn exchange(client: &mut DuplexStream, send: &str) -> String {
        client.write_all(send.as_bytes()).await.unwrap();
        read_reply(client).await
    }

    #[tokio::test]
    async fn full_transaction_delivers_an_envelope() {
        let handler = Arc::new(RecordingHandler::default());
        let (mut client, task) = spawn_session(AuthConfig::default(), handler.clone());

        assert!(read_reply(&mut client).await.starts_with("220 "));
        assert!(
            exchange(&mut client, "EHLO box\r\n")
                .await
                .starts_with("250-gateway.test")
        );
        assert!(
            exchange(&mut client, "MAIL FROM:<sensor@home.local>\r\n")
                .await
                .starts_with("250 ")
        );
        assert!(
            exchange(&mut client, "RCPT TO:<alerts@home.local>\r\n")
                .await
                .starts_with("250 ")
        );
        assert!(
            exchange(&mut client, "DATA\r\n")
                .await
                .starts_with("354 ")
        );
        let reply = exchange(
            &mut client,
            "Subject: Test\r\n\r\nBody line\r\n..stuffed\r\n.\r\n",
        )
        .await;
        assert!(reply.starts_with("250 Message accepted"));
        assert!(exchange(&mut client, "QUIT\r\n").await.starts_with("221 "));

        task.await.unwrap().unwrap();

        let envelopes = handler.envelopes.lock().unwrap();
        assert_eq!(envelopes.len(), 1);
        assert_eq!(envelopes[0].sender(), "sensor@home.local");
        assert_eq!(envelopes[0].recipients(), ["alerts@home.local"]);
        // Dot-stuffing undone, terminator excluded.
        assert_eq!(
            envelopes[0].data(),
            b"Subject: Test\r\n\r\nBody line\r\n.stuffed\r\n"
        );
    }

    #[tokio::test]
    async fn rcpt_without_mail_is_rejected() {
        let handler = Arc::new(RecordingHandler::default());
        let (mut client, _task) = spawn_session(AuthConfig::default(), handler);

        read_reply(&mut client).await;
        exchange(&mut client, "HELO box\r\n").await;
        assert!(
            exchange(&mut client, "RCPT TO:<a@x>\r\n")
                .await
                .starts_with("503 ")
        );
        assert!(
            exchange(&mut client, "DATA\r\n")
                .await
                .starts_with("503 ")
        );
    }

    #[tokio::test]
    async fn auth_login_accepts_valid_credentials() {
        let auth = AuthConfig {
            required: true,
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
        };
        let handler = Arc::new(RecordingHandler::default());
        let (mut client, _task) = spawn_session(auth, handler);

        read_reply(&mut client).await;
        let ehlo = exchange(&mut client, "EHLO box\r\n").await;
        assert!(ehlo.contains("AUTH LOGIN"));

        // Unauthenticated MAIL is refused.
        assert!(
            exchange(&mut client, "MAIL FROM:<a@x>\r\n")
                .await
                .starts_with("530 ")
        );

        // base64("user") / base64("secret")
        assert!(
            exchange(&mut client, "AUTH LOGIN\r\n")
                .await
                .starts_with("334 VXNlcm5hbWU6")
        );
        assert!(
            exchange(&mut client, "dXNlcg==\r\n")
                .await
                .starts_with("334 UGFzc3dvcmQ6")
        );
        assert!(
            exchange(&mut client, "c2VjcmV0\r\n")
                .await
                .starts_with("235 ")
        );
        assert!(
            exchange(&mut client, "MAIL FROM:<a@x>\r\n")
                .await
                .starts_with("250 ")
        );
    }

    #[tokio::test]
    async fn auth_login_rejects_bad_credentials() {
        let auth = AuthConfig {
            required: true,
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
        };
        let handler = Arc::new(RecordingHandler::default());
        let (mut client, _task) = spawn_session(auth, handler);

        read_reply(&mut client).await;
        exchange(&mut client, "EHLO box\r\n").await;

        // Initial-response form with the wrong password.
        assert!(
            exchange(&mut client, "AUTH LOGIN dXNlcg==\r\n")
                .await
                .starts_with("334 ")
        );
        assert!(
            exchange(&mut client, "d3Jvbmc=\r\n")
                .await
                .starts_with("535 ")
        );
    }

    #[tokio::test]
    async fn starttls_without_tls_configured_is_refused() {
        let handler = Arc::new(RecordingHandler::default());
        let (mut client, _task) = spawn_session(AuthConfig::default(), handler);

        read_reply(&mut client).await;
        let ehlo = exchange(&mut client, "EHLO box\r\n").await;
        assert!(!ehlo.contains("STARTTLS"));
        assert!(
            exchange(&mut client, "STARTTLS\r\n")
                .await
                .starts_with("503 ")
        );
    }

    #[tokio::test]
    async fn unknown_commands_get_a_500() {
        let handler = Arc::new(RecordingHandler::default());
        let (mut client, _task) = spawn_session(AuthConfig::default(), handler);

        read_reply(&mut client).await;
        assert!(
            exchange(&mut client, "VRFY someone\r\n")
                .await
                .starts_with("500 ")
        );
    }
}
