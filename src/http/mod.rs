pub mod client;
pub mod proxy;
