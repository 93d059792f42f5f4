use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use openssl::error::ErrorStack;

use crate::endpoint::client::ClientState;

/// Errors from configuration, argument parsing and identity loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("key_exchange_mode must be either DHE or RSA, not {0:?}")]
    InvalidMode(String),

    #[error("require 1 argument but {0} were given; expected <key_exchange_mode> = DHE or RSA")]
    ArgumentCount(usize),

    #[error("{what} not found at {}", path.display())]
    MissingFile { what: &'static str, path: PathBuf },

    #[error("{what} at {} could not be read: {source}", path.display())]
    Unreadable {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{what} at {} is malformed: {source}", path.display())]
    Malformed {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: ErrorStack,
    },

    #[error("certificate file {} contains no certificates", .0.display())]
    EmptyCertificate(PathBuf),

    #[error("private key {} does not match certificate {}", key.display(), cert.display())]
    KeyMismatch { cert: PathBuf, key: PathBuf },

    #[error("no cipher suites configured")]
    NoCipherSuites,

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error("TLS context setup failed: {0}")]
    Context(#[from] ErrorStack),
}

/// Errors from the TCP layer beneath TLS.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to {addr} timed out after {timeout:?}")]
    Timeout { addr: String, timeout: Duration },

    #[error("could not listen on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

/// Errors from TLS negotiation.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("TLS session setup failed: {0}")]
    Setup(#[from] ErrorStack),

    #[error("peer certificate rejected: {0}")]
    CertificateRejected(String),

    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("negotiation failed: {0}")]
    Negotiation(String),

    #[error("negotiated unsupported cipher suite {0}")]
    UnexpectedCipher(String),
}

/// Errors on an established channel or a misused connector.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("connector is {0:?}; only an idle connector can connect")]
    NotIdle(ClientState),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("session closed by peer")]
    Closed,

    #[error("read timed out after {0:?}")]
    ReadTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from development PKI generation.
#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    #[error("certificate generation failed: {0}")]
    Crypto(#[from] ErrorStack),

    #[error("could not write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Coarse classification of a failure, used for reporting and by callers that
/// only care which layer gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Configuration,
    Transport,
    Handshake,
    Session,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Configuration => "configuration",
            FailureKind::Transport => "transport",
            FailureKind::Handshake => "handshake",
            FailureKind::Session => "session",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("server task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl Error {
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Config(_) => FailureKind::Configuration,
            Error::Transport(_) => FailureKind::Transport,
            Error::Handshake(_) => FailureKind::Handshake,
            Error::Session(_) => FailureKind::Session,
            Error::Task(_) => FailureKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_follows_variant() {
        let e: Error = ConfigError::InvalidMode("ecdhe".into()).into();
        assert_eq!(e.kind(), FailureKind::Configuration);

        let e: Error = TransportError::Timeout {
            addr: "10.0.0.1:1".into(),
            timeout: Duration::from_secs(1),
        }
        .into();
        assert_eq!(e.kind(), FailureKind::Transport);

        let e: Error = HandshakeError::Negotiation("no shared cipher".into()).into();
        assert_eq!(e.kind(), FailureKind::Handshake);

        let e: Error = SessionError::Closed.into();
        assert_eq!(e.kind(), FailureKind::Session);
    }

    #[test]
    fn invalid_mode_message_names_input() {
        let msg = ConfigError::InvalidMode("ecdhe".into()).to_string();
        assert!(msg.contains("\"ecdhe\""), "{msg}");
        assert!(msg.contains("DHE or RSA"), "{msg}");
    }

    #[test]
    fn argument_count_message_names_count() {
        let msg = ConfigError::ArgumentCount(3).to_string();
        assert!(msg.contains("but 3 were given"), "{msg}");
    }
}
