//! Minimal SMTP ingest layer.
//!
//! Just enough SMTP to receive alert mail from local clients: listener,
//! session state machine, AUTH LOGIN, and STARTTLS. Completed messages
//! are handed to a [`pushgate_common::handler::MessageHandler`].

pub mod command;
pub mod error;
pub mod listener;
pub mod session;

pub use crate::{
    error::{ListenerError, SessionError},
    listener::{Listener, load_tls_acceptor},
    session::AuthConfig,
};
