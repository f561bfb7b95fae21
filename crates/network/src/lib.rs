pub mod channel;
pub mod handshake;
pub mod message;
pub mod protocol;
