pub mod announcer;
pub mod server;
pub mod sync;
pub mod transport;
