pub mod clock;
pub mod config;
pub mod duration;
pub mod message;
pub mod node;
pub mod timestamp;
