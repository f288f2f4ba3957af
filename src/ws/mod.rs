pub mod fanout;
pub mod handshake;
pub mod session;
