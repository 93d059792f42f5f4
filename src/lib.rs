pub mod config;
pub mod context;
pub mod endpoint;
pub mod error;
pub mod pki;
pub mod session;
pub mod transport;

// Re-export key types at crate root for convenience.
pub use config::{ClientConfig, Identity, KeyExchangeMode, ServerConfig};
pub use context::suite::CipherSuite;
pub use context::{Role, TlsContext};
pub use endpoint::client::{ClientState, Connector};
pub use endpoint::server::{Listener, Server, ServerHandle, ServerState, SessionEvent};
pub use error::{Error, FailureKind, Result};
pub use session::channel::SecureChannel;
