//! TLS context construction for both roles.
//!
//! A context is built per connection attempt and never mutated afterwards.
//! Both roles pin the protocol to TLS 1.2 and restrict the cipher list to the
//! suites in [`suite::CipherSuite`].

pub mod suite;

use std::fs;
use std::io;
use std::net::IpAddr;
use std::path::Path;

use openssl::dh::Dh;
use openssl::pkey::PKey;
use openssl::ssl::{
    Ssl, SslContext, SslContextBuilder, SslMethod, SslOptions, SslSessionCacheMode, SslVerifyMode,
    SslVersion,
};
use openssl::x509::X509;

use crate::config::{ClientConfig, Identity, ServerConfig};
use crate::error::ConfigError;

use self::suite::CipherSuite;

/// Which side of the handshake a context is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Initiating party.
    Client,
    /// Responding party.
    Server,
}

/// An immutable OpenSSL context bound to one role and a fixed suite set.
pub struct TlsContext {
    role: Role,
    suites: Vec<CipherSuite>,
    verify_peer: bool,
    server_name: Option<String>,
    inner: SslContext,
}

impl TlsContext {
    /// Build a client context offering exactly the suite selected by
    /// `config.mode`.
    pub fn client(config: &ClientConfig) -> Result<Self, ConfigError> {
        let suites = vec![config.mode.cipher_suite()];
        let mut builder = base_builder(&suites)?;
        load_identity(&mut builder, &config.identity)?;

        let verify_peer = match &config.trust_anchor {
            Some(ca) => {
                load_trust_anchor(&mut builder, ca)?;
                builder.set_verify(SslVerifyMode::PEER);
                true
            }
            None => {
                tracing::warn!("no trust anchor configured; server certificate will not be verified");
                builder.set_verify(SslVerifyMode::NONE);
                false
            }
        };

        Ok(Self {
            role: Role::Client,
            suites,
            verify_peer,
            server_name: config.server_name.clone(),
            inner: builder.build(),
        })
    }

    /// Build a server context offering `config.suites`, with DH parameters
    /// loaded and a fresh DH key forced for every handshake.
    pub fn server(config: &ServerConfig) -> Result<Self, ConfigError> {
        if config.suites.is_empty() {
            return Err(ConfigError::NoCipherSuites);
        }
        let suites = config.suites.clone();
        let mut builder = base_builder(&suites)?;
        load_identity(&mut builder, &config.identity)?;

        let dh_pem = read_file("DH parameters", &config.dh_params)?;
        let dh = Dh::params_from_pem(&dh_pem).map_err(|source| ConfigError::Malformed {
            what: "DH parameters",
            path: config.dh_params.clone(),
            source,
        })?;
        builder.set_tmp_dh(&dh)?;
        builder.set_options(
            SslOptions::SINGLE_DH_USE | SslOptions::CIPHER_SERVER_PREFERENCE | SslOptions::NO_TICKET,
        );
        builder.set_session_cache_mode(SslSessionCacheMode::OFF);

        let verify_peer = match &config.trust_anchor {
            Some(ca) => {
                load_trust_anchor(&mut builder, ca)?;
                builder.set_verify(SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT);
                true
            }
            None => {
                builder.set_verify(SslVerifyMode::NONE);
                false
            }
        };

        Ok(Self {
            role: Role::Server,
            suites,
            verify_peer,
            server_name: None,
            inner: builder.build(),
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Suites this context allows, in preference order.
    pub fn suites(&self) -> &[CipherSuite] {
        &self.suites
    }

    /// Whether the peer's certificate is verified against a trust anchor.
    pub fn verifies_peer(&self) -> bool {
        self.verify_peer
    }

    /// Create per-connection TLS state, applying the expected server name on
    /// the client side.
    pub(crate) fn new_ssl(&self) -> Result<Ssl, openssl::error::ErrorStack> {
        let mut ssl = Ssl::new(&self.inner)?;
        if let (Role::Client, Some(name)) = (self.role, &self.server_name) {
            match name.parse::<IpAddr>() {
                Ok(ip) => {
                    if self.verify_peer {
                        ssl.param_mut().set_ip(ip)?;
                    }
                }
                Err(_) => {
                    ssl.set_hostname(name)?;
                    if self.verify_peer {
                        ssl.param_mut().set_host(name)?;
                    }
                }
            }
        }
        Ok(ssl)
    }
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("role", &self.role)
            .field("suites", &self.suites)
            .field("verify_peer", &self.verify_peer)
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

fn base_builder(suites: &[CipherSuite]) -> Result<SslContextBuilder, ConfigError> {
    let mut builder = SslContext::builder(SslMethod::tls())?;
    builder.set_min_proto_version(Some(SslVersion::TLS1_2))?;
    builder.set_max_proto_version(Some(SslVersion::TLS1_2))?;
    builder.set_cipher_list(&CipherSuite::cipher_list(suites))?;
    Ok(builder)
}

fn load_identity(builder: &mut SslContextBuilder, identity: &Identity) -> Result<(), ConfigError> {
    let cert_pem = read_file("certificate", &identity.cert_path)?;
    let key_pem = read_file("private key", &identity.key_path)?;

    let malformed = |what: &'static str, path: &Path| {
        let path = path.to_path_buf();
        move |source| ConfigError::Malformed { what, path, source }
    };

    let chain = X509::stack_from_pem(&cert_pem)
        .map_err(malformed("certificate", &identity.cert_path))?;
    let mut chain = chain.into_iter();
    let leaf = chain
        .next()
        .ok_or_else(|| ConfigError::EmptyCertificate(identity.cert_path.clone()))?;
    builder.set_certificate(&leaf)?;
    for intermediate in chain {
        builder.add_extra_chain_cert(intermediate)?;
    }

    let key = PKey::private_key_from_pem(&key_pem)
        .map_err(malformed("private key", &identity.key_path))?;
    let mismatch = || ConfigError::KeyMismatch {
        cert: identity.cert_path.clone(),
        key: identity.key_path.clone(),
    };
    builder.set_private_key(&key).map_err(|_| mismatch())?;
    builder.check_private_key().map_err(|_| mismatch())?;
    Ok(())
}

fn load_trust_anchor(builder: &mut SslContextBuilder, ca: &Path) -> Result<(), ConfigError> {
    read_file("trust anchor", ca)?;
    builder
        .set_ca_file(ca)
        .map_err(|source| ConfigError::Malformed {
            what: "trust anchor",
            path: ca.to_path_buf(),
            source,
        })
}

fn read_file(what: &'static str, path: &Path) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => ConfigError::MissingFile {
            what,
            path: path.to_path_buf(),
        },
        _ => ConfigError::Unreadable {
            what,
            path: path.to_path_buf(),
            source,
        },
    })
}
