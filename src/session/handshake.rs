//! Driving the OpenSSL handshake over a connected TCP stream.

use std::pin::Pin;
use std::time::Duration;

use openssl::ssl::ErrorCode;
use openssl::x509::X509VerifyResult;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use crate::context::{Role, TlsContext};
use crate::error::HandshakeError;

/// Run the handshake as the initiating party.
pub async fn initiate(
    context: &TlsContext,
    transport: TcpStream,
    timeout: Duration,
) -> Result<SslStream<TcpStream>, HandshakeError> {
    debug_assert_eq!(context.role(), Role::Client);
    drive(context, transport, timeout).await
}

/// Run the handshake as the responding party.
pub async fn respond(
    context: &TlsContext,
    transport: TcpStream,
    timeout: Duration,
) -> Result<SslStream<TcpStream>, HandshakeError> {
    debug_assert_eq!(context.role(), Role::Server);
    drive(context, transport, timeout).await
}

// On every error path the stream, and with it the socket, is dropped here.
async fn drive(
    context: &TlsContext,
    transport: TcpStream,
    timeout: Duration,
) -> Result<SslStream<TcpStream>, HandshakeError> {
    let ssl = context.new_ssl()?;
    let mut stream = SslStream::new(ssl, transport)?;

    let role = context.role();
    let handshake = async {
        match role {
            Role::Client => Pin::new(&mut stream).connect().await,
            Role::Server => Pin::new(&mut stream).accept().await,
        }
    };

    let outcome = tokio::time::timeout(timeout, handshake).await;
    match outcome {
        Ok(Ok(())) => Ok(stream),
        Ok(Err(e)) => Err(classify(&stream, &e, context.verifies_peer())),
        Err(_) => Err(HandshakeError::Timeout(timeout)),
    }
}

// OpenSSL records a chain result even under SSL_VERIFY_NONE, so it only
// explains the failure when this side actually verifies its peer.
fn classify(
    stream: &SslStream<TcpStream>,
    err: &openssl::ssl::Error,
    verifies_peer: bool,
) -> HandshakeError {
    let verify = stream.ssl().verify_result();
    if verifies_peer && verify != X509VerifyResult::OK {
        return HandshakeError::CertificateRejected(verify.error_string().to_string());
    }
    if err.code() == ErrorCode::SYSCALL && err.ssl_error().is_none() {
        let detail = err
            .io_error()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unexpected EOF".to_string());
        return HandshakeError::Negotiation(format!("peer closed the connection: {detail}"));
    }
    HandshakeError::Negotiation(err.to_string())
}
