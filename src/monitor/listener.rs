use crate::error::CallError;
use crate::monitor::blacklist::Blacklist;
use crate::monitor::event::{Call, CallEventListener, Connection, Handshake, Proxy};
use crate::monitor::metrics::CallMetrics;
use crate::monitor::phase::LifecyclePhase;
use crate::monitor::sink::MetricsSink;
use crate::monitor::sniffer::{decode_text, form_url_decode};
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, Request, Response, StatusCode, Version};
use std::any::Any;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Per-call state touched by instrumentation, kept apart from the chained
/// listener so a failure here cannot reach it.
struct Recorder {
    metrics: CallMetrics,
    clock: Arc<dyn Clock>,
    reporting: bool,
    call_started_at: Instant,
    dns_started_at: Option<Instant>,
    connect_started_at: Option<Instant>,
    acquired_at: Option<Instant>,
}

impl Recorder {
    fn new(clock: Arc<dyn Clock>, reporting: bool) -> Self {
        Self {
            metrics: CallMetrics::new(),
            call_started_at: clock.now(),
            clock,
            reporting,
            dns_started_at: None,
            connect_started_at: None,
            acquired_at: None,
        }
    }

    /// Milliseconds since `start`; `None` if the clock went backwards.
    fn elapsed_ms(&self, start: Instant) -> Option<u64> {
        let elapsed = self.clock.now().checked_duration_since(start)?;
        Some(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
    }

    fn positive_elapsed_ms(&self, start: Instant) -> Option<u64> {
        self.elapsed_ms(start).filter(|ms| *ms > 0)
    }

    fn enter(&mut self, phase: LifecyclePhase) {
        self.metrics.phase = phase;
    }

    fn on_call_start(&mut self) {
        self.enter(LifecyclePhase::CallStart);
        self.call_started_at = self.clock.now();
    }

    fn on_dns_start(&mut self) {
        self.enter(LifecyclePhase::DnsStart);
        self.dns_started_at = Some(self.clock.now());
    }

    fn on_dns_end(&mut self) {
        let Some(start) = self.dns_started_at.take() else {
            return;
        };
        if let Some(ms) = self.elapsed_ms(start) {
            if self.reporting && self.metrics.dns_cost.is_none() {
                self.metrics.dns_cost = Some(ms);
            }
        }
    }

    fn on_connect_start(&mut self) {
        self.enter(LifecyclePhase::ConnectStart);
        self.connect_started_at = Some(self.clock.now());
    }

    fn on_connect_end(&mut self, addr: SocketAddr, proxy: &Proxy, protocol: Option<Version>) {
        let Some(start) = self.connect_started_at else {
            return;
        };
        let Some(ms) = self.positive_elapsed_ms(start) else {
            return;
        };
        if self.reporting && self.metrics.connect_cost.is_none() {
            self.metrics.proxy = Some(proxy.to_string());
            self.metrics.socket_address = Some(addr.to_string());
            self.metrics.protocol = protocol.map(|v| format!("{:?}", v));
            self.metrics.connect_cost = Some(ms);
        }
    }

    fn on_connection_acquired(&mut self) {
        self.enter(LifecyclePhase::ConnectionAcquired);
        self.acquired_at = Some(self.clock.now());
    }

    fn on_connection_released(&mut self) {
        let Some(start) = self.acquired_at else {
            return;
        };
        let Some(ms) = self.positive_elapsed_ms(start) else {
            return;
        };
        if self.reporting && self.metrics.response_cost == 0 {
            self.metrics.response_cost = ms;
        }
        self.acquired_at = None;
    }

    fn on_request_headers_end(&mut self, request: &Request<Bytes>) {
        self.metrics.request_headers = Some(dump_headers(request.headers()));
    }

    fn on_response_headers_end(&mut self, response: &Response<Bytes>) {
        let status = response.status();
        self.metrics.response_code = Some(status.as_u16());
        self.metrics.response_headers = Some(dump_headers(response.headers()));
        if status == StatusCode::OK {
            return;
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        let body = response.body().clone();
        if let Some(text) = decode_text(&body, content_type).filter(|t| !t.is_empty()) {
            self.metrics.error_code = parse_error_code(&text);
            self.metrics.error_msg = Some(text);
        }
    }

    fn capture_request_params(&mut self, call: &Call) {
        let request = call.request();
        if request.body().is_empty() {
            return;
        }
        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok());
        self.metrics.request_params =
            decode_text(request.body(), content_type).and_then(|text| form_url_decode(&text));
    }

    fn record_total(&mut self) {
        if let Some(ms) = self.positive_elapsed_ms(self.call_started_at) {
            self.metrics.total_cost = ms;
        }
    }
}

/// Collects timing and diagnostics for one call and reports them once.
///
/// Every event is first forwarded to the chained listener, then recorded.
/// Recording failures are contained here and only logged. Without a sink the
/// listener still forwards but never measures or reports.
pub struct CallInstrumentationListener {
    next: Option<Box<dyn CallEventListener>>,
    sink: Option<Arc<dyn MetricsSink>>,
    blacklist: Arc<dyn Blacklist>,
    recorder: Recorder,
    finished: bool,
}

impl CallInstrumentationListener {
    pub fn new(
        next: Option<Box<dyn CallEventListener>>,
        sink: Option<Arc<dyn MetricsSink>>,
        blacklist: Arc<dyn Blacklist>,
    ) -> Self {
        Self::with_clock(next, sink, blacklist, Arc::new(SystemClock))
    }

    pub fn with_clock(
        next: Option<Box<dyn CallEventListener>>,
        sink: Option<Arc<dyn MetricsSink>>,
        blacklist: Arc<dyn Blacklist>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let reporting = sink.is_some();
        Self {
            next,
            sink,
            blacklist,
            recorder: Recorder::new(clock, reporting),
            finished: false,
        }
    }

    pub fn metrics(&self) -> &CallMetrics {
        &self.recorder.metrics
    }

    pub fn is_reporting(&self) -> bool {
        self.sink.is_some()
    }

    fn instrument<F>(&mut self, event: &'static str, f: F)
    where
        F: FnOnce(&mut Recorder),
    {
        let recorder = &mut self.recorder;
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| f(recorder))) {
            warn!(
                "Instrumentation failed on {}: {}",
                event,
                panic_message(panic.as_ref())
            );
        }
    }

    fn finish(&mut self, call: &Call, failure: Option<&CallError>) {
        if self.finished {
            warn!("Ignoring second terminal event for {}", call.url());
            return;
        }
        self.finished = true;

        let Some(sink) = self.sink.clone() else {
            return;
        };
        let blacklist = self.blacklist.clone();
        self.instrument("finish", move |recorder| {
            recorder.metrics.snapshot_from_call(call);
            let url = recorder.metrics.url.clone().unwrap_or_default();
            if blacklist.in_blacklist(&url) {
                debug!("Skipping metrics for blacklisted url {}", url);
                return;
            }
            recorder.record_total();
            match failure {
                Some(error) => {
                    recorder.metrics.error_msg =
                        Some(failure_message(recorder.metrics.phase, error));
                }
                None => {
                    recorder.metrics.method = Some(call.method().to_string());
                    recorder.metrics.path = Some(call.path().to_string());
                    recorder.capture_request_params(call);
                }
            }
            let metrics = std::mem::take(&mut recorder.metrics);
            debug!(
                "Reporting {} {} status={} total={}ms",
                metrics.method.as_deref().unwrap_or("-"),
                url,
                metrics.status_code(),
                metrics.total_cost
            );
            sink.report(metrics);
        });
    }
}

impl CallEventListener for CallInstrumentationListener {
    fn call_start(&mut self, call: &Call) {
        if let Some(next) = &mut self.next {
            next.call_start(call);
        }
        self.instrument("call_start", Recorder::on_call_start);
    }

    fn dns_start(&mut self, call: &Call, domain: &str) {
        if let Some(next) = &mut self.next {
            next.dns_start(call, domain);
        }
        self.instrument("dns_start", Recorder::on_dns_start);
    }

    fn dns_end(&mut self, call: &Call, domain: &str, addrs: &[SocketAddr]) {
        if let Some(next) = &mut self.next {
            next.dns_end(call, domain, addrs);
        }
        self.instrument("dns_end", Recorder::on_dns_end);
    }

    fn connect_start(&mut self, call: &Call, addr: SocketAddr, proxy: &Proxy) {
        if let Some(next) = &mut self.next {
            next.connect_start(call, addr, proxy);
        }
        self.instrument("connect_start", Recorder::on_connect_start);
    }

    fn secure_connect_start(&mut self, call: &Call) {
        if let Some(next) = &mut self.next {
            next.secure_connect_start(call);
        }
        self.instrument("secure_connect_start", |r| {
            r.enter(LifecyclePhase::SecureConnectStart)
        });
    }

    fn secure_connect_end(&mut self, call: &Call, handshake: Option<&Handshake>) {
        if let Some(next) = &mut self.next {
            next.secure_connect_end(call, handshake);
        }
    }

    fn connect_end(
        &mut self,
        call: &Call,
        addr: SocketAddr,
        proxy: &Proxy,
        protocol: Option<Version>,
    ) {
        if let Some(next) = &mut self.next {
            next.connect_end(call, addr, proxy, protocol);
        }
        self.instrument("connect_end", |r| r.on_connect_end(addr, proxy, protocol));
    }

    fn connect_failed(
        &mut self,
        call: &Call,
        addr: SocketAddr,
        proxy: &Proxy,
        protocol: Option<Version>,
        error: &CallError,
    ) {
        if let Some(next) = &mut self.next {
            next.connect_failed(call, addr, proxy, protocol, error);
        }
    }

    fn connection_acquired(&mut self, call: &Call, connection: &Connection) {
        if let Some(next) = &mut self.next {
            next.connection_acquired(call, connection);
        }
        self.instrument("connection_acquired", Recorder::on_connection_acquired);
    }

    fn connection_released(&mut self, call: &Call, connection: &Connection) {
        if let Some(next) = &mut self.next {
            next.connection_released(call, connection);
        }
        self.instrument("connection_released", Recorder::on_connection_released);
    }

    fn request_headers_start(&mut self, call: &Call) {
        if let Some(next) = &mut self.next {
            next.request_headers_start(call);
        }
        self.instrument("request_headers_start", |r| {
            r.enter(LifecyclePhase::RequestHeadersStart)
        });
    }

    fn request_headers_end(&mut self, call: &Call, request: &Request<Bytes>) {
        if let Some(next) = &mut self.next {
            next.request_headers_end(call, request);
        }
        self.instrument("request_headers_end", |r| r.on_request_headers_end(request));
    }

    fn request_body_start(&mut self, call: &Call) {
        if let Some(next) = &mut self.next {
            next.request_body_start(call);
        }
        self.instrument("request_body_start", |r| {
            r.enter(LifecyclePhase::RequestBodyStart)
        });
    }

    fn request_body_end(&mut self, call: &Call, byte_count: u64) {
        if let Some(next) = &mut self.next {
            next.request_body_end(call, byte_count);
        }
        self.instrument("request_body_end", |r| {
            r.metrics.request_byte_count = byte_count
        });
    }

    fn response_headers_start(&mut self, call: &Call) {
        if let Some(next) = &mut self.next {
            next.response_headers_start(call);
        }
        self.instrument("response_headers_start", |r| {
            r.enter(LifecyclePhase::ResponseHeadersStart)
        });
    }

    fn response_headers_end(&mut self, call: &Call, response: &Response<Bytes>) {
        if let Some(next) = &mut self.next {
            next.response_headers_end(call, response);
        }
        self.instrument("response_headers_end", |r| {
            r.on_response_headers_end(response)
        });
    }

    fn response_body_start(&mut self, call: &Call) {
        if let Some(next) = &mut self.next {
            next.response_body_start(call);
        }
        self.instrument("response_body_start", |r| {
            r.enter(LifecyclePhase::ResponseBodyStart)
        });
    }

    fn response_body_end(&mut self, call: &Call, byte_count: u64) {
        if let Some(next) = &mut self.next {
            next.response_body_end(call, byte_count);
        }
        self.instrument("response_body_end", |r| {
            r.metrics.response_byte_count = byte_count
        });
    }

    fn call_end(&mut self, call: &Call) {
        if let Some(next) = &mut self.next {
            next.call_end(call);
        }
        self.finish(call, None);
    }

    fn call_failed(&mut self, call: &Call, error: &CallError) {
        if let Some(next) = &mut self.next {
            next.call_failed(call, error);
        }
        self.finish(call, Some(error));
    }
}

/// `{phase},Ex:{kind},Msg:{message},trace:{root cause}`
fn failure_message(phase: LifecyclePhase, error: &CallError) -> String {
    let mut message = format!("{},Ex:{},Msg:{},trace:", phase, error.kind_name(), error);
    if let Some(cause) = error.root_cause() {
        message.push_str(&cause.to_string());
    }
    message
}

/// Reads an integer `errorCode` from a JSON object body, 0 when absent.
fn parse_error_code(body: &str) -> i64 {
    let value = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(value) => value,
        Err(e) => {
            debug!("Error body is not JSON: {}", e);
            return 0;
        }
    };
    match value.get("errorCode") {
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Some(serde_json::Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64))
            .unwrap_or(0),
        _ => 0,
    }
}

fn dump_headers(headers: &HeaderMap) -> String {
    let mut dump = String::new();
    for (name, value) in headers {
        dump.push_str(name.as_str());
        dump.push_str(": ");
        dump.push_str(&String::from_utf8_lossy(value.as_bytes()));
        dump.push('\n');
    }
    dump
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
