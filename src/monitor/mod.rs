pub mod blacklist;
pub mod event;
pub mod factory;
pub mod listener;
pub mod locality;
pub mod logger;
pub mod metrics;
pub mod phase;
pub mod sink;
pub mod sniffer;
