/// TCP transport helpers (connect, listen, accept).
pub mod tcp;
