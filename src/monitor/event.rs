use crate::error::CallError;
use bytes::Bytes;
use http::{Method, Request, Response, Version};
use std::fmt;
use std::net::SocketAddr;

/// Request header carrying the end-to-end trace identifier.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// One logical HTTP exchange, as seen by listeners.
///
/// The request body is held as `Bytes`, so observers can re-read it without
/// disturbing what the client sends.
#[derive(Debug)]
pub struct Call {
    request: Request<Bytes>,
}

impl Call {
    pub fn new(request: Request<Bytes>) -> Self {
        Self { request }
    }

    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    pub fn url(&self) -> String {
        self.request.uri().to_string()
    }

    pub fn scheme(&self) -> &str {
        self.request.uri().scheme_str().unwrap_or("http")
    }

    pub fn host(&self) -> Option<&str> {
        self.request.uri().host()
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn path(&self) -> &str {
        self.request.uri().path()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.request
            .headers()
            .get(TRACE_ID_HEADER)
            .and_then(|v| v.to_str().ok())
    }
}

/// Route used to reach the origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Proxy {
    Direct,
    Http(String),
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proxy::Direct => write!(f, "DIRECT"),
            Proxy::Http(addr) => write!(f, "HTTP @ {}", addr),
        }
    }
}

/// Negotiated TLS parameters.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub tls_version: Option<String>,
    pub cipher_suite: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Connection {
    pub peer_addr: SocketAddr,
    pub local_addr: Option<SocketAddr>,
    pub version: Version,
}

/// Observer of a call's lifecycle.
///
/// Events for one call arrive sequentially on the thread executing it and end
/// with exactly one of `call_end` or `call_failed`. Every method is a no-op by
/// default.
#[allow(unused_variables)]
pub trait CallEventListener: Send {
    fn call_start(&mut self, call: &Call) {}

    fn dns_start(&mut self, call: &Call, domain: &str) {}

    fn dns_end(&mut self, call: &Call, domain: &str, addrs: &[SocketAddr]) {}

    fn connect_start(&mut self, call: &Call, addr: SocketAddr, proxy: &Proxy) {}

    fn secure_connect_start(&mut self, call: &Call) {}

    fn secure_connect_end(&mut self, call: &Call, handshake: Option<&Handshake>) {}

    fn connect_end(
        &mut self,
        call: &Call,
        addr: SocketAddr,
        proxy: &Proxy,
        protocol: Option<Version>,
    ) {
    }

    fn connect_failed(
        &mut self,
        call: &Call,
        addr: SocketAddr,
        proxy: &Proxy,
        protocol: Option<Version>,
        error: &CallError,
    ) {
    }

    fn connection_acquired(&mut self, call: &Call, connection: &Connection) {}

    fn connection_released(&mut self, call: &Call, connection: &Connection) {}

    fn request_headers_start(&mut self, call: &Call) {}

    fn request_headers_end(&mut self, call: &Call, request: &Request<Bytes>) {}

    fn request_body_start(&mut self, call: &Call) {}

    fn request_body_end(&mut self, call: &Call, byte_count: u64) {}

    fn response_headers_start(&mut self, call: &Call) {}

    /// `response` carries whatever body the client has buffered so far.
    fn response_headers_end(&mut self, call: &Call, response: &Response<Bytes>) {}

    fn response_body_start(&mut self, call: &Call) {}

    fn response_body_end(&mut self, call: &Call, byte_count: u64) {}

    fn call_end(&mut self, call: &Call) {}

    fn call_failed(&mut self, call: &Call, error: &CallError) {}
}

/// Builds one listener per call.
pub trait EventListenerFactory: Send + Sync {
    fn create(&self, call: &Call) -> Box<dyn CallEventListener>;
}

impl<F> EventListenerFactory for F
where
    F: Fn(&Call) -> Box<dyn CallEventListener> + Send + Sync,
{
    fn create(&self, call: &Call) -> Box<dyn CallEventListener> {
        self(call)
    }
}
