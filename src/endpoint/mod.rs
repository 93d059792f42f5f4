/// Initiating side: connect, handshake, send one message.
pub mod client;
/// Responding side: listen, accept, handshake, receive one message.
pub mod server;
