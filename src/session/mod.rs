pub mod channel;
pub mod handshake;
