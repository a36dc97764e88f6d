//! TCP listener feeding SMTP sessions.

use std::{io::BufReader as StdBufReader, net::SocketAddr, path::Path, sync::Arc};

use futures_util::future::join_all;
use pushgate_common::{Signal, handler::MessageHandler, internal};
use tokio::net::TcpListener;
use tokio_rustls::{TlsAcceptor, rustls};

use crate::{
    error::ListenerError,
    session::{AuthConfig, Session},
};

pub struct Listener {
    socket: SocketAddr,
    banner: Arc<str>,
    handler: Arc<dyn MessageHandler>,
    auth: AuthConfig,
    tls: Option<TlsAcceptor>,
}

impl Listener {
    #[must_use]
    pub fn new(
        socket: SocketAddr,
        banner: impl Into<Arc<str>>,
        handler: Arc<dyn MessageHandler>,
        auth: AuthConfig,
        tls: Option<TlsAcceptor>,
    ) -> Self {
        Self {
            socket,
            banner: banner.into(),
            handler,
            auth,
            tls,
        }
    }

    /// Accept connections until a shutdown signal arrives, then wait
    /// for in-flight sessions to finish.
    ///
    /// # Errors
    /// If the socket cannot be bound or an accept fails.
    pub async fn serve(
        &self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ListenerError> {
        let listener =
            TcpListener::bind(self.socket)
                .await
                .map_err(|source| ListenerError::BindFailed {
                    address: self.socket.to_string(),
                    source,
                })?;

        internal!(level = INFO, "SMTP listener serving on {}", self.socket);
        let mut sessions = Vec::new();

        loop {
            tokio::select! {
                sig = shutdown.recv() => {
                    if matches!(sig, Ok(Signal::Shutdown)) {
                        internal!(
                            level = INFO,
                            "SMTP listener {} received shutdown signal, finishing sessions ...",
                            self.socket,
                        );
                        join_all(sessions).await;
                        break;
                    }
                }

                connection = listener.accept() => {
                    let (stream, peer) = connection?;
                    internal!(level = DEBUG, "Connection received from {peer}");

                    let session = Session::new(
                        Box::new(stream),
                        peer,
                        self.banner.clone(),
                        self.handler.clone(),
                        self.auth.clone(),
                        self.tls.clone(),
                    );

                    sessions.push(tokio::spawn(async move {
                        if let Err(err) = session.run().await {
                            internal!(level = WARN, "Session with {peer} ended with error: {err}");
                        }
                    }));
                }
            }
        }

        Ok(())
    }
}

/// Load a rustls acceptor from PEM certificate and key files.
///
/// # Errors
/// If either file is unreadable, empty, or rejected by rustls.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, ListenerError> {
    let cert_file =
        std::fs::File::open(cert_path).map_err(|err| tls_setup_error(cert_path, &err))?;
    let certs: Vec<_> = rustls_pemfile::certs(&mut StdBufReader::new(cert_file))
        .collect::<Result<_, _>>()
        .map_err(|err| tls_setup_error(cert_path, &err))?;

    let key_file = std::fs::File::open(key_path).map_err(|err| tls_setup_error(key_path, &err))?;
    let key = rustls_pemfile::private_key(&mut StdBufReader::new(key_file))
        .map_err(|err| tls_setup_error(key_path, &err))?
        .ok_or_else(|| tls_setup_error(key_path, &"no private key found"))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| tls_setup_error(cert_path, &err))?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn tls_setup_error(path: &Path, reason: &dyn std::fmt::Display) -> ListenerError {
    ListenerError::TlsSetup {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}
