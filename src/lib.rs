pub mod common;
pub mod handler;
pub mod server;
pub mod storage;
pub mod traits;

pub use server::server::{coordinator_start, node_start};
