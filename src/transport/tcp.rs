use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};

use crate::error::TransportError;

/// Connect to `host:port`, giving up after `timeout`.
///
/// Name resolution counts against the same bound.
pub async fn connect(host: &str, port: u16, timeout: Duration) -> Result<TcpStream, TransportError> {
    let addr = display_addr(host, port);
    let stream = match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(TransportError::Connect { addr, source }),
        Err(_) => return Err(TransportError::Timeout { addr, timeout }),
    };
    stream
        .set_nodelay(true)
        .map_err(|source| TransportError::Connect { addr, source })?;
    Ok(stream)
}

/// Bind a TCP listener with an explicit backlog and return it.
///
/// Must be called from within a tokio runtime.
pub fn listen(addr: SocketAddr, backlog: u32) -> Result<TcpListener, TransportError> {
    let listen_err = |source| TransportError::Listen { addr, source };
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4(),
        SocketAddr::V6(_) => TcpSocket::new_v6(),
    }
    .map_err(listen_err)?;
    socket.set_reuseaddr(true).map_err(listen_err)?;
    socket.bind(addr).map_err(listen_err)?;
    socket.listen(backlog).map_err(listen_err)
}

/// Accept a single connection from a listener.
pub async fn accept(listener: &TcpListener) -> Result<(TcpStream, SocketAddr), TransportError> {
    let (stream, addr) = listener.accept().await.map_err(TransportError::Accept)?;
    stream.set_nodelay(true).map_err(TransportError::Accept)?;
    Ok((stream, addr))
}

pub(crate) fn display_addr(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
