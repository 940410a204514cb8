pub mod dedup;
pub mod handler;
pub mod handshake;
pub mod message;
pub mod peer;
