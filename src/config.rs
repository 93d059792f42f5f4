use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::context::suite::CipherSuite;
use crate::error::ConfigError;

/// Port the server listens on unless configured otherwise.
pub const DEFAULT_PORT: u16 = 50001;

/// Upper bound on the client's TCP connect step.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(100);

/// Upper bound on the TLS handshake, both sides.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound on the server's single read after the handshake.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Pending-connection queue length for the listening socket.
pub const DEFAULT_BACKLOG: u32 = 1;

/// Largest application message, in bytes.
///
/// The server performs exactly one read of this size per session, so the
/// client refuses to send anything larger rather than have it truncated.
pub const MAX_MESSAGE_SIZE: usize = 1024;

/// Key-exchange mode selecting the single cipher suite a client offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyExchangeMode {
    /// Ephemeral finite-field Diffie-Hellman, RSA-signed.
    Dhe,
    /// Static RSA key transport.
    Rsa,
}

impl KeyExchangeMode {
    pub const ALL: [KeyExchangeMode; 2] = [KeyExchangeMode::Dhe, KeyExchangeMode::Rsa];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyExchangeMode::Dhe => "DHE",
            KeyExchangeMode::Rsa => "RSA",
        }
    }

    /// The cipher suite this mode restricts a client to.
    pub fn cipher_suite(self) -> CipherSuite {
        match self {
            KeyExchangeMode::Dhe => CipherSuite::DheRsaAes128CbcSha256,
            KeyExchangeMode::Rsa => CipherSuite::RsaAes128CbcSha256,
        }
    }

    /// Parse the mode from command-line arguments, excluding the program name.
    ///
    /// Exactly one argument is accepted.
    pub fn from_args<I, S>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<S> = args.into_iter().collect();
        match args.as_slice() {
            [mode] => mode.as_ref().parse(),
            _ => Err(ConfigError::ArgumentCount(args.len())),
        }
    }
}

impl FromStr for KeyExchangeMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DHE" => Ok(KeyExchangeMode::Dhe),
            "RSA" => Ok(KeyExchangeMode::Rsa),
            _ => Err(ConfigError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for KeyExchangeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Certificate chain and private key, both PEM files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

impl Identity {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }
}

/// Configuration for the initiating side.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,

    /// Server port (default: 50001).
    pub port: u16,

    /// Key-exchange mode; decides the one suite offered.
    pub mode: KeyExchangeMode,

    /// Client certificate and key (default: `client.pem` / `client.key`).
    pub identity: Identity,

    /// CA bundle used to verify the server. Without one the server
    /// certificate is not verified.
    pub trust_anchor: Option<PathBuf>,

    /// Name (DNS or IP) the server certificate must carry. Only checked when a
    /// trust anchor is set.
    pub server_name: Option<String>,

    /// Bound on the TCP connect step (default: 100s).
    pub connect_timeout: Duration,

    /// Bound on the TLS handshake (default: 30s).
    pub handshake_timeout: Duration,

    /// Largest payload `send` accepts (default: 1024).
    pub max_message_size: usize,
}

impl ClientConfig {
    pub fn builder(mode: KeyExchangeMode) -> ClientConfigBuilder {
        ClientConfigBuilder::new(mode)
    }

    /// `host:port`, as used in log lines and errors.
    pub fn address(&self) -> String {
        crate::transport::tcp::display_addr(&self.host, self.port)
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug, Clone)]
pub struct ClientConfigBuilder {
    host: String,
    port: u16,
    mode: KeyExchangeMode,
    identity: Identity,
    trust_anchor: Option<PathBuf>,
    server_name: Option<String>,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    max_message_size: usize,
}

impl ClientConfigBuilder {
    fn new(mode: KeyExchangeMode) -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST.to_string(),
            port: DEFAULT_PORT,
            mode,
            identity: Identity::new("client.pem", "client.key"),
            trust_anchor: None,
            server_name: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn server_addr(self, addr: SocketAddr) -> Self {
        self.host(addr.ip().to_string()).port(addr.port())
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn trust_anchor(mut self, ca_path: impl Into<PathBuf>) -> Self {
        self.trust_anchor = Some(ca_path.into());
        self
    }

    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Build the `ClientConfig`, validating that all values are sensible.
    ///
    /// Identity files are not touched here; they are loaded when the TLS
    /// context is built.
    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::InvalidSetting("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::InvalidSetting("port must be > 0".into()));
        }
        check_timeout("connect_timeout", self.connect_timeout)?;
        check_timeout("handshake_timeout", self.handshake_timeout)?;
        check_message_size(self.max_message_size)?;
        Ok(ClientConfig {
            host: self.host,
            port: self.port,
            mode: self.mode,
            identity: self.identity,
            trust_anchor: self.trust_anchor,
            server_name: self.server_name,
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
            max_message_size: self.max_message_size,
        })
    }
}

/// Configuration for the responding side.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind (default: 0.0.0.0).
    pub bind_ip: IpAddr,

    /// Port to listen on (default: 50001). Zero picks an ephemeral port.
    pub port: u16,

    /// Server certificate and key (default: `server.pem` / `server.key`).
    pub identity: Identity,

    /// DH parameters, PEM (default: `dh.pem`).
    pub dh_params: PathBuf,

    /// CA bundle used to verify clients. When set, clients must present a
    /// certificate that verifies against it.
    pub trust_anchor: Option<PathBuf>,

    /// Suites offered, in preference order (default: both).
    pub suites: Vec<CipherSuite>,

    /// Listen backlog (default: 1).
    pub backlog: u32,

    /// Bound on the TLS handshake (default: 30s).
    pub handshake_timeout: Duration,

    /// Bound on the single read after the handshake (default: 30s).
    pub read_timeout: Duration,

    /// Size of the single read (default: 1024).
    pub max_message_size: usize,
}

impl ServerConfig {
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.port)
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfigBuilder {
    bind_ip: IpAddr,
    port: u16,
    identity: Identity,
    dh_params: PathBuf,
    trust_anchor: Option<PathBuf>,
    suites: Vec<CipherSuite>,
    backlog: u32,
    handshake_timeout: Duration,
    read_timeout: Duration,
    max_message_size: usize,
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            identity: Identity::new("server.pem", "server.key"),
            dh_params: PathBuf::from("dh.pem"),
            trust_anchor: None,
            suites: CipherSuite::ALL.to_vec(),
            backlog: DEFAULT_BACKLOG,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

impl ServerConfigBuilder {
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn identity(mut self, identity: Identity) -> Self {
        self.identity = identity;
        self
    }

    pub fn dh_params(mut self, path: impl Into<PathBuf>) -> Self {
        self.dh_params = path.into();
        self
    }

    pub fn trust_anchor(mut self, ca_path: impl Into<PathBuf>) -> Self {
        self.trust_anchor = Some(ca_path.into());
        self
    }

    pub fn suites(mut self, suites: impl IntoIterator<Item = CipherSuite>) -> Self {
        self.suites = suites.into_iter().collect();
        self
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Build the `ServerConfig`, validating that all values are sensible.
    pub fn build(mut self) -> Result<ServerConfig, ConfigError> {
        if self.suites.is_empty() {
            return Err(ConfigError::NoCipherSuites);
        }
        let mut seen = Vec::with_capacity(self.suites.len());
        self.suites.retain(|s| {
            let fresh = !seen.contains(s);
            seen.push(*s);
            fresh
        });
        if self.backlog == 0 {
            return Err(ConfigError::InvalidSetting("backlog must be > 0".into()));
        }
        check_timeout("handshake_timeout", self.handshake_timeout)?;
        check_timeout("read_timeout", self.read_timeout)?;
        check_message_size(self.max_message_size)?;
        Ok(ServerConfig {
            bind_ip: self.bind_ip,
            port: self.port,
            identity: self.identity,
            dh_params: self.dh_params,
            trust_anchor: self.trust_anchor,
            suites: self.suites,
            backlog: self.backlog,
            handshake_timeout: self.handshake_timeout,
            read_timeout: self.read_timeout,
            max_message_size: self.max_message_size,
        })
    }
}

fn check_timeout(name: &str, timeout: Duration) -> Result<(), ConfigError> {
    if timeout.is_zero() {
        return Err(ConfigError::InvalidSetting(format!("{name} must be > 0")));
    }
    Ok(())
}

fn check_message_size(size: usize) -> Result<(), ConfigError> {
    if size == 0 {
        return Err(ConfigError::InvalidSetting(
            "max_message_size must be > 0".into(),
        ));
    }
    Ok(())
}
