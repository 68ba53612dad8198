#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate tracing;

pub mod app;
pub mod cli;
pub mod error;
pub mod http;
pub mod monitor;
pub mod tls;

pub use crate::error::CallError;
pub use crate::http::client::InstrumentedClient;
pub use crate::monitor::event::{Call, CallEventListener, EventListenerFactory};
pub use crate::monitor::factory::MonitorFactory;
pub use crate::monitor::listener::CallInstrumentationListener;
pub use crate::monitor::metrics::CallMetrics;
