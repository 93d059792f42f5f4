//! Shared fixtures: a throwaway PKI per test and configs pointing at it.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tls12_mutual::pki::{self, DevPki, PkiOptions};
use tls12_mutual::{ClientConfig, KeyExchangeMode, ServerConfig};

/// A generated PKI living in its own temp directory, removed on drop.
pub struct TestPki {
    pub pki: DevPki,
    dir: PathBuf,
}

impl TestPki {
    pub fn new() -> Self {
        let dir = std::env::temp_dir().join(format!("tls12-it-{:016x}", rand::random::<u64>()));
        let pki = pki::generate(&dir, &PkiOptions::default()).expect("PKI generation failed");
        Self { pki, dir }
    }

    /// Server config on an ephemeral loopback port, requiring client
    /// certificates signed by this PKI's CA.
    pub fn server_config(&self) -> ServerConfig {
        self.server_builder().build().unwrap()
    }

    pub fn server_builder(&self) -> tls12_mutual::config::ServerConfigBuilder {
        ServerConfig::builder()
            .bind_ip("127.0.0.1".parse().unwrap())
            .port(0)
            .identity(self.pki.server_identity())
            .dh_params(self.pki.dh_params())
            .trust_anchor(self.pki.ca_cert())
            .handshake_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(5))
    }

    /// Client config for `addr`, trusting this PKI's CA and checking the
    /// server name.
    pub fn client_config(&self, mode: KeyExchangeMode, addr: SocketAddr) -> ClientConfig {
        self.client_builder(mode, addr).build().unwrap()
    }

    pub fn client_builder(
        &self,
        mode: KeyExchangeMode,
        addr: SocketAddr,
    ) -> tls12_mutual::config::ClientConfigBuilder {
        ClientConfig::builder(mode)
            .server_addr(addr)
            .identity(self.pki.client_identity())
            .trust_anchor(self.pki.ca_cert())
            .server_name("localhost")
            .connect_timeout(Duration::from_secs(5))
            .handshake_timeout(Duration::from_secs(5))
    }
}

impl Drop for TestPki {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

/// Upper bound for awaiting anything in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A loopback listener that never accepts and whose accept queue is full, so
/// the kernel drops further SYNs and new connects hang until they time out.
pub struct SaturatedListener {
    pub addr: SocketAddr,
    _listener: tokio::net::TcpListener,
    _queued: Vec<tokio::net::TcpStream>,
}

impl SaturatedListener {
    pub async fn new() -> Self {
        let listener = tls12_mutual::transport::tcp::listen("127.0.0.1:0".parse().unwrap(), 1)
            .expect("listen failed");
        let addr = listener.local_addr().unwrap();

        let mut queued = Vec::new();
        for _ in 0..32 {
            let attempt = tokio::time::timeout(
                Duration::from_millis(200),
                tokio::net::TcpStream::connect(addr),
            )
            .await;
            match attempt {
                Ok(Ok(stream)) => queued.push(stream),
                Ok(Err(e)) => panic!("filling accept queue failed: {e}"),
                Err(_) => {
                    return Self {
                        addr,
                        _listener: listener,
                        _queued: queued,
                    }
                }
            }
        }
        panic!("accept queue never filled after {} connections", queued.len());
    }
}
