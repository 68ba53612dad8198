use crate::error::CallError;
use crate::monitor::event::{
    Call, CallEventListener, Connection, EventListenerFactory, Handshake, Proxy,
};
use bytes::Bytes;
use http::{Request, Response, Version};
use std::net::SocketAddr;
use std::time::Instant;

/// Chained listener that logs every lifecycle event with its offset from
/// the first event it saw.
#[derive(Debug, Default)]
pub struct EventLogger {
    started: Option<Instant>,
}

impl EventLogger {
    fn offset_ms(&mut self) -> u128 {
        self.started.get_or_insert_with(Instant::now).elapsed().as_millis()
    }
}

impl CallEventListener for EventLogger {
    fn call_start(&mut self, call: &Call) {
        let t = self.offset_ms();
        info!("[{:>5}ms] call start: {} {}", t, call.method(), call.url());
    }

    fn dns_start(&mut self, _call: &Call, domain: &str) {
        let t = self.offset_ms();
        debug!("[{:>5}ms] dns start: {}", t, domain);
    }

    fn dns_end(&mut self, _call: &Call, domain: &str, addrs: &[SocketAddr]) {
        let t = self.offset_ms();
        debug!("[{:>5}ms] dns end: {} -> {:?}", t, domain, addrs);
    }

    fn connect_start(&mut self, _call: &Call, addr: SocketAddr, proxy: &Proxy) {
        let t = self.offset_ms();
        debug!("[{:>5}ms] connect start: {} via {}", t, addr, proxy);
    }

    fn secure_connect_start(&mut self, _call: &Call) {
        let t = self.offset_ms();
        debug!("[{:>5}ms] secure connect start", t);
    }

    fn secure_connect_end(&mut self, _call: &Call, handshake: Option<&Handshake>) {
        let t = self.offset_ms();
        match handshake {
            Some(h) => debug!(
                "[{:>5}ms] secure connect end: {} {}",
                t,
                h.tls_version.as_deref().unwrap_or("?"),
                h.cipher_suite.as_deref().unwrap_or("?")
            ),
            None => debug!("[{:>5}ms] secure connect end", t),
        }
    }

    fn connect_end(
        &mut self,
        _call: &Call,
        addr: SocketAddr,
        proxy: &Proxy,
        protocol: Option<Version>,
    ) {
        let t = self.offset_ms();
        debug!(
            "[{:>5}ms] connect end: {} via {} ({:?})",
            t, addr, proxy, protocol
        );
    }

    fn connect_failed(
        &mut self,
        _call: &Call,
        addr: SocketAddr,
        proxy: &Proxy,
        _protocol: Option<Version>,
        error: &CallError,
    ) {
        let t = self.offset_ms();
        warn!(
            "[{:>5}ms] connect failed: {} via {}: {}",
            t, addr, proxy, error
        );
    }

    fn connection_acquired(&mut self, _call: &Call, connection: &Connection) {
        let t = self.offset_ms();
        debug!(
            "[{:>5}ms] connection acquired: {} -> {}",
            t,
            connection
                .local_addr
                .map(|a| a.to_string())
                .unwrap_or_default(),
            connection.peer_addr
        );
    }

    fn connection_released(&mut self, _call: &Call, connection: &Connection) {
        let t = self.offset_ms();
        debug!("[{:>5}ms] connection released: {}", t, connection.peer_addr);
    }

    fn request_headers_start(&mut self, _call: &Call) {
        let t = self.offset_ms();
        debug!("[{:>5}ms] request headers start", t);
    }

    fn request_headers_end(&mut self, _call: &Call, request: &Request<Bytes>) {
        let t = self.offset_ms();
        debug!("[{:>5}ms] request headers end", t);
        for (key, value) in request.headers().iter() {
            trace!("> {}: {}", key, String::from_utf8_lossy(value.as_bytes()));
        }
    }

    fn request_body_start(&mut self, _call: &Call) {
        let t = self.offset_ms();
        debug!("[{:>5}ms] request body start", t);
    }

    fn request_body_end(&mut self, _call: &Call, byte_count: u64) {
        let t = self.offset_ms();
        debug!("[{:>5}ms] request body end: {} bytes", t, byte_count);
    }

    fn response_headers_start(&mut self, _call: &Call) {
        let t = self.offset_ms();
        debug!("[{:>5}ms] response headers start", t);
    }

    fn response_headers_end(&mut self, _call: &Call, response: &Response<Bytes>) {
        let t = self.offset_ms();
        debug!(
            "[{:>5}ms] response headers end: {:?} {}",
            t,
            response.version(),
            response.status()
        );
        for (key, value) in response.headers().iter() {
            trace!("< {}: {}", key, String::from_utf8_lossy(value.as_bytes()));
        }
    }

    fn response_body_start(&mut self, _call: &Call) {
        let t = self.offset_ms();
        debug!("[{:>5}ms] response body start", t);
    }

    fn response_body_end(&mut self, _call: &Call, byte_count: u64) {
        let t = self.offset_ms();
        debug!("[{:>5}ms] response body end: {} bytes", t, byte_count);
    }

    fn call_end(&mut self, call: &Call) {
        let t = self.offset_ms();
        info!("[{:>5}ms] call end: {}", t, call.url());
    }

    fn call_failed(&mut self, call: &Call, error: &CallError) {
        let t = self.offset_ms();
        warn!("[{:>5}ms] call failed: {}: {}", t, call.url(), error);
    }
}

/// Builds an [`EventLogger`] per call.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventLoggerFactory;

impl EventListenerFactory for EventLoggerFactory {
    fn create(&self, _call: &Call) -> Box<dyn CallEventListener> {
        Box::new(EventLogger::default())
    }
}
