use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::context::suite::CipherSuite;
use crate::context::{Role, TlsContext};
use crate::error::{Error, FailureKind, TransportError};
use crate::session::channel::SecureChannel;
use crate::session::handshake;
use crate::transport::tcp;

/// Buffered events between the serve loop and a [`ServerHandle`].
const EVENT_CAPACITY: usize = 64;

/// Pause after a failed `accept()` so a persistent error (e.g. EMFILE) does
/// not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Where the accept loop currently is.
///
/// `Listening → Accepting → Handshaking → Secured | Failed`, then back to
/// `Listening`; `Stopped` once the loop has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Listening,
    Accepting,
    Handshaking,
    Secured,
    Failed,
    Stopped,
}

/// Outcome of one accept-loop iteration.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Handshake completed and one message was read.
    Received {
        peer: SocketAddr,
        suite: CipherSuite,
        payload: Bytes,
    },
    /// The iteration failed; the loop carries on.
    Failed { kind: FailureKind, error: String },
}

impl SessionEvent {
    fn failed(e: &Error) -> Self {
        SessionEvent::Failed {
            kind: e.kind(),
            error: e.to_string(),
        }
    }
}

/// A bound listening socket plus the configuration every accepted
/// connection's TLS context is built from.
pub struct Listener {
    listener: TcpListener,
    config: Arc<ServerConfig>,
    local_addr: SocketAddr,
    state: watch::Sender<ServerState>,
}

impl Listener {
    /// Validate the server identity and DH parameters, then bind.
    ///
    /// Configuration problems surface here, before any client connects.
    pub async fn open(config: ServerConfig) -> Result<Self, Error> {
        TlsContext::server(&config)?;

        let bind_addr = config.bind_addr();
        let listener = tcp::listen(bind_addr, config.backlog)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| crate::error::TransportError::Listen {
                addr: bind_addr,
                source,
            })?;
        let (state, _) = watch::channel(ServerState::Listening);

        tracing::info!(
            addr = %local_addr,
            backlog = config.backlog,
            suites = %CipherSuite::cipher_list(&config.suites),
            "server listening"
        );
        Ok(Self {
            listener,
            config: Arc::new(config),
            local_addr,
            state,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ServerState) {
        self.state.send_replace(state);
    }

    /// Wait for one connection and complete the handshake on it.
    ///
    /// Every accepted connection gets a freshly built TLS context, so no DH
    /// material is shared between sessions.
    pub async fn accept(&self) -> Result<SecureChannel, Error> {
        match self.accept_inner().await {
            Ok(channel) => {
                self.set_state(ServerState::Secured);
                tracing::info!(
                    peer = %channel.peer_addr(),
                    cipher = channel.cipher_name(),
                    client = channel.peer_subject().as_deref().unwrap_or("-"),
                    "handshake succeeded"
                );
                Ok(channel)
            }
            Err(e) => {
                let stage = self.state();
                self.set_state(ServerState::Failed);
                tracing::warn!(?stage, kind = %e.kind(), error = %e, "connection attempt failed");
                Err(e)
            }
        }
    }

    async fn accept_inner(&self) -> Result<SecureChannel, Error> {
        self.set_state(ServerState::Accepting);
        tracing::debug!(addr = %self.local_addr, "waiting for connection");
        let (transport, peer) = tcp::accept(&self.listener).await?;

        tracing::info!(%peer, "connection succeeded, attempting handshake");
        let context = TlsContext::server(&self.config)?;

        self.set_state(ServerState::Handshaking);
        let stream = handshake::respond(&context, transport, self.config.handshake_timeout).await?;

        let channel = SecureChannel::establish(
            stream,
            Role::Server,
            context.suites(),
            peer,
            self.config.max_message_size,
        )?;
        Ok(channel)
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Sequential accept loop with an explicit lifecycle.
///
/// One connection is served at a time: the next accept is only issued after
/// the current session's handshake and read have finished.
#[derive(Debug)]
pub struct Server {
    listener: Listener,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, Error> {
        Ok(Self {
            listener: Listener::open(config).await?,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    /// Serve a single session: accept, handshake, read one message, close.
    pub async fn serve_one(&self) -> SessionEvent {
        let event = self.serve_session().await;
        self.listener.set_state(ServerState::Listening);
        event
    }

    async fn serve_session(&self) -> SessionEvent {
        let mut channel = match self.listener.accept().await {
            Ok(channel) => channel,
            Err(e) => {
                if let Some(pause) = accept_backoff(&e) {
                    tokio::time::sleep(pause).await;
                }
                return SessionEvent::failed(&e);
            }
        };
        let peer = channel.peer_addr();
        let suite = channel.cipher_suite();

        match channel.recv_timeout(self.listener.config.read_timeout).await {
            Ok(payload) => {
                tracing::info!(
                    %peer,
                    message = %String::from_utf8_lossy(&payload),
                    bytes = payload.len(),
                    "server receives"
                );
                if let Err(e) = channel.close().await {
                    tracing::debug!(%peer, error = %e, "close after receive failed");
                }
                SessionEvent::Received {
                    peer,
                    suite,
                    payload,
                }
            }
            Err(e) => {
                let e = Error::from(e);
                self.listener.set_state(ServerState::Failed);
                tracing::warn!(%peer, kind = %e.kind(), error = %e, "receive failed");
                SessionEvent::failed(&e)
            }
        }
    }

    /// Run the accept loop until `shutdown` is cancelled.
    ///
    /// Failures end only the current iteration. Events are offered to
    /// `events` without blocking; they are dropped if the receiver lags.
    pub async fn serve(self, shutdown: CancellationToken, events: Option<mpsc::Sender<SessionEvent>>) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                event = self.serve_one() => {
                    if let Some(tx) = &events {
                        if let Err(e) = tx.try_send(event) {
                            tracing::debug!(error = %e, "session event dropped");
                        }
                    }
                }
            }
        }
        self.listener.set_state(ServerState::Stopped);
        tracing::info!(addr = %self.local_addr(), "server stopped");
    }

    /// Spawn the accept loop on the current runtime.
    pub fn start(self) -> ServerHandle {
        let local_addr = self.local_addr();
        let state = self.listener.subscribe();
        let shutdown = CancellationToken::new();
        let (tx, events) = mpsc::channel(EVENT_CAPACITY);
        let task = tokio::spawn(self.serve(shutdown.clone(), Some(tx)));
        ServerHandle {
            local_addr,
            shutdown,
            state,
            events,
            task,
        }
    }
}

fn accept_backoff(e: &Error) -> Option<Duration> {
    match e {
        Error::Transport(TransportError::Accept(_)) => Some(ACCEPT_BACKOFF),
        _ => None,
    }
}

/// Handle to a running [`Server`].
///
/// Dropping the handle cancels the loop without waiting for it.
#[derive(Debug)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    state: watch::Receiver<ServerState>,
    events: mpsc::Receiver<SessionEvent>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Next per-session outcome, or `None` once the loop has exited.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Cancel the loop, dropping any in-flight session, and wait for it to
    /// exit. The listening socket is closed on return.
    pub async fn stop(mut self) -> Result<(), Error> {
        self.shutdown.cancel();
        (&mut self.task).await?;
        Ok(())
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::*;
    use crate::error::{HandshakeError, SessionError};

    #[test]
    fn only_accept_errors_back_off() {
        let accept: Error = TransportError::Accept(io::Error::from_raw_os_error(24)).into();
        assert_eq!(accept_backoff(&accept), Some(ACCEPT_BACKOFF));

        let handshake: Error = HandshakeError::Negotiation("no shared cipher".into()).into();
        assert_eq!(accept_backoff(&handshake), None);

        let session: Error = SessionError::Closed.into();
        assert_eq!(accept_backoff(&session), None);
    }
}
