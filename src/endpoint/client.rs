use crate::config::ClientConfig;
use crate::context::suite::CipherSuite;
use crate::context::{Role, TlsContext};
use crate::error::{Error, SessionError};
use crate::session::channel::SecureChannel;
use crate::session::handshake;
use crate::transport::tcp;

/// Where a [`Connector`] is in its single connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Idle,
    TransportConnecting,
    Handshaking,
    Secured,
    Failed,
}

impl ClientState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ClientState::Secured | ClientState::Failed)
    }
}

/// One-shot client connection attempt.
///
/// `Idle → TransportConnecting → Handshaking → Secured | Failed`. There is
/// no reconnection: once terminal, the connector refuses further attempts.
#[derive(Debug)]
pub struct Connector {
    config: ClientConfig,
    state: ClientState,
}

impl Connector {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            state: ClientState::Idle,
        }
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the configured server and complete the handshake.
    ///
    /// The returned channel is bound to exactly the suite selected by the
    /// configured key-exchange mode.
    pub async fn connect(&mut self) -> Result<SecureChannel, Error> {
        if self.state != ClientState::Idle {
            return Err(SessionError::NotIdle(self.state).into());
        }

        match self.establish().await {
            Ok(channel) => {
                self.state = ClientState::Secured;
                tracing::info!(
                    addr = %self.config.address(),
                    cipher = channel.cipher_name(),
                    version = channel.protocol_version(),
                    "handshake succeeded"
                );
                Ok(channel)
            }
            Err(e) => {
                let stage = self.state;
                self.state = ClientState::Failed;
                tracing::error!(
                    addr = %self.config.address(),
                    ?stage,
                    kind = %e.kind(),
                    error = %e,
                    "connection attempt failed"
                );
                Err(e)
            }
        }
    }

    async fn establish(&mut self) -> Result<SecureChannel, Error> {
        let context = TlsContext::client(&self.config)?;

        self.state = ClientState::TransportConnecting;
        let addr = self.config.address();
        tracing::info!(%addr, mode = %self.config.mode, "connecting");
        let transport = tcp::connect(
            &self.config.host,
            self.config.port,
            self.config.connect_timeout,
        )
        .await?;
        let peer_addr = transport
            .peer_addr()
            .map_err(|source| crate::error::TransportError::Connect {
                addr: addr.clone(),
                source,
            })?;

        self.state = ClientState::Handshaking;
        tracing::info!(%addr, "connection succeeded, attempting handshake");
        let stream =
            handshake::initiate(&context, transport, self.config.handshake_timeout).await?;

        let channel = SecureChannel::establish(
            stream,
            Role::Client,
            context.suites(),
            peer_addr,
            self.config.max_message_size,
        )?;
        Ok(channel)
    }
}

/// Connect once with a fresh [`Connector`].
pub async fn connect(config: ClientConfig) -> Result<SecureChannel, Error> {
    Connector::new(config).connect().await
}

/// Connect, send `message`, and close. Returns the negotiated suite.
///
/// On a failed send the channel is dropped, which closes the socket.
pub async fn send_once(config: ClientConfig, message: &[u8]) -> Result<CipherSuite, Error> {
    let mut channel = connect(config).await?;
    let suite = channel.cipher_suite();

    tracing::info!(
        message = %String::from_utf8_lossy(message),
        bytes = message.len(),
        "client sends"
    );
    channel.send(message).await?;
    channel.close().await?;
    Ok(suite)
}
