pub mod client;
pub mod debug;
