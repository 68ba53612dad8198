use crate::monitor::blacklist::Blacklist;
use crate::monitor::event::{Call, CallEventListener, EventListenerFactory};
use crate::monitor::listener::CallInstrumentationListener;
use crate::monitor::locality::is_local;
use crate::monitor::sink::MetricsSink;
use std::sync::Arc;

/// Wires a fresh [`CallInstrumentationListener`] for every call.
///
/// Calls to local or loopback targets get a listener without a sink: their
/// events still reach the upstream listener but nothing is reported.
#[derive(Clone)]
pub struct MonitorFactory {
    upstream: Option<Arc<dyn EventListenerFactory>>,
    sink: Arc<dyn MetricsSink>,
    blacklist: Arc<dyn Blacklist>,
}

impl MonitorFactory {
    pub fn new(sink: Arc<dyn MetricsSink>, blacklist: Arc<dyn Blacklist>) -> Self {
        Self {
            upstream: None,
            sink,
            blacklist,
        }
    }

    /// Chains listeners built by `upstream` behind every monitor listener.
    pub fn with_upstream(mut self, upstream: Arc<dyn EventListenerFactory>) -> Self {
        self.upstream = Some(upstream);
        self
    }

    pub fn build(&self, call: &Call) -> CallInstrumentationListener {
        let next = self.upstream.as_ref().map(|f| f.create(call));
        let url = call.url();
        let sink = if is_local(&url) {
            debug!("Local target {}, metrics reporting disabled", url);
            None
        } else {
            Some(self.sink.clone())
        };
        CallInstrumentationListener::new(next, sink, self.blacklist.clone())
    }
}

impl EventListenerFactory for MonitorFactory {
    fn create(&self, call: &Call) -> Box<dyn CallEventListener> {
        Box::new(self.build(call))
    }
}
