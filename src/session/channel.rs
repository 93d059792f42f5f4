use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use openssl::nid::Nid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use crate::context::suite::CipherSuite;
use crate::context::Role;
use crate::error::{HandshakeError, SessionError};

/// A TLS 1.2 channel whose handshake has completed.
///
/// Only constructed after both the TCP connection and the handshake
/// succeeded. Dropping the channel closes the socket; [`SecureChannel::close`]
/// additionally sends `close_notify` first.
pub struct SecureChannel {
    stream: SslStream<TcpStream>,
    role: Role,
    suite: CipherSuite,
    peer_addr: SocketAddr,
    max_message_size: usize,
}

impl SecureChannel {
    /// Wrap a handshaken stream, checking the negotiated suite is one of
    /// `allowed`.
    pub(crate) fn establish(
        stream: SslStream<TcpStream>,
        role: Role,
        allowed: &[CipherSuite],
        peer_addr: SocketAddr,
        max_message_size: usize,
    ) -> Result<Self, HandshakeError> {
        let name = stream
            .ssl()
            .current_cipher()
            .map(|c| c.name())
            .unwrap_or("(none)");
        let suite = CipherSuite::from_openssl_name(name)
            .filter(|s| allowed.contains(s))
            .ok_or_else(|| HandshakeError::UnexpectedCipher(name.to_string()))?;

        Ok(Self {
            stream,
            role,
            suite,
            peer_addr,
            max_message_size,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The negotiated cipher suite.
    pub fn cipher_suite(&self) -> CipherSuite {
        self.suite
    }

    /// OpenSSL's name for the negotiated suite, e.g. `DHE-RSA-AES128-SHA256`.
    pub fn cipher_name(&self) -> &'static str {
        self.suite.openssl_name()
    }

    /// Negotiated protocol version string, e.g. `TLSv1.2`.
    pub fn protocol_version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Common name of the peer certificate, if the peer presented one.
    pub fn peer_subject(&self) -> Option<String> {
        let cert = self.stream.ssl().peer_certificate()?;
        let entry = cert.subject_name().entries_by_nid(Nid::COMMONNAME).next()?;
        std::str::from_utf8(entry.data().as_slice())
            .ok()
            .map(str::to_owned)
    }

    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Send one application message.
    ///
    /// Payloads above the channel's maximum message size are rejected before
    /// anything is written.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        if payload.len() > self.max_message_size {
            return Err(SessionError::MessageTooLarge {
                size: payload.len(),
                max: self.max_message_size,
            });
        }
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Perform one read of at most the maximum message size.
    ///
    /// A single read returns at most one TLS record's worth of data; there is
    /// no framing, so callers must not assume a larger payload arrives whole.
    pub async fn recv(&mut self) -> Result<Bytes, SessionError> {
        let mut buf = vec![0u8; self.max_message_size];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Err(SessionError::Closed);
        }
        buf.truncate(n);
        Ok(Bytes::from(buf))
    }

    /// [`recv`](Self::recv) bounded by `timeout`.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Bytes, SessionError> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| SessionError::ReadTimeout(timeout))?
    }

    /// Send `close_notify` and shut the socket down.
    pub async fn close(mut self) -> Result<(), SessionError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("role", &self.role)
            .field("suite", &self.suite)
            .field("peer_addr", &self.peer_addr)
            .field("max_message_size", &self.max_message_size)
            .finish_non_exhaustive()
    }
}
