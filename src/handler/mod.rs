pub mod node_request;
pub mod registration;
