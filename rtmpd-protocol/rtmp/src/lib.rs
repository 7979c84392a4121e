pub mod chunk;
pub mod codec;
pub mod connection;
pub mod handshake;
pub mod message;
