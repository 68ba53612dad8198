use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use netmon::monitor::blacklist::Blacklist;
use netmon::monitor::event::{Connection, Handshake, Proxy};
use netmon::monitor::sink::MetricsSink;
use netmon::tls::config::build_tls_config;
use netmon::{
    Call, CallError, CallEventListener, CallInstrumentationListener, CallMetrics,
    EventListenerFactory, InstrumentedClient, MonitorFactory,
};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

async fn route(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/ok" => {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Response::new(Full::new(Bytes::from_static(b"hello")))
        }
        "/missing" => {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Response::builder()
                .status(StatusCode::NOT_FOUND)
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from_static(
                    br#"{"errorCode":4040,"message":"no such item"}"#,
                )))
                .unwrap()
        }
        "/echo" => {
            let body = req.into_body().collect().await.unwrap().to_bytes();
            tokio::time::sleep(Duration::from_millis(20)).await;
            Response::new(Full::new(body))
        }
        "/slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Response::new(Full::new(Bytes::from_static(b"late")))
        }
        _ => Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(Full::new(Bytes::new()))
            .unwrap(),
    };
    Ok(response)
}

async fn serve() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(route))
                    .await;
            });
        }
    });
    addr
}

type Events = Arc<Mutex<Vec<&'static str>>>;

/// Records event names in arrival order.
struct Recording(Events);

impl Recording {
    fn push(&self, event: &'static str) {
        self.0.lock().unwrap().push(event);
    }
}

impl CallEventListener for Recording {
    fn call_start(&mut self, _: &Call) {
        self.push("call_start");
    }
    fn dns_start(&mut self, _: &Call, _: &str) {
        self.push("dns_start");
    }
    fn dns_end(&mut self, _: &Call, _: &str, _: &[SocketAddr]) {
        self.push("dns_end");
    }
    fn connect_start(&mut self, _: &Call, _: SocketAddr, _: &Proxy) {
        self.push("connect_start");
    }
    fn secure_connect_start(&mut self, _: &Call) {
        self.push("secure_connect_start");
    }
    fn secure_connect_end(&mut self, _: &Call, _: Option<&Handshake>) {
        self.push("secure_connect_end");
    }
    fn connect_end(&mut self, _: &Call, _: SocketAddr, _: &Proxy, _: Option<http::Version>) {
        self.push("connect_end");
    }
    fn connect_failed(
        &mut self,
        _: &Call,
        _: SocketAddr,
        _: &Proxy,
        _: Option<http::Version>,
        _: &CallError,
    ) {
        self.push("connect_failed");
    }
    fn connection_acquired(&mut self, _: &Call, _: &Connection) {
        self.push("connection_acquired");
    }
    fn connection_released(&mut self, _: &Call, _: &Connection) {
        self.push("connection_released");
    }
    fn request_headers_start(&mut self, _: &Call) {
        self.push("request_headers_start");
    }
    fn request_headers_end(&mut self, _: &Call, _: &Request<Bytes>) {
        self.push("request_headers_end");
    }
    fn request_body_start(&mut self, _: &Call) {
        self.push("request_body_start");
    }
    fn request_body_end(&mut self, _: &Call, _: u64) {
        self.push("request_body_end");
    }
    fn response_headers_start(&mut self, _: &Call) {
        self.push("response_headers_start");
    }
    fn response_headers_end(&mut self, _: &Call, _: &Response<Bytes>) {
        self.push("response_headers_end");
    }
    fn response_body_start(&mut self, _: &Call) {
        self.push("response_body_start");
    }
    fn response_body_end(&mut self, _: &Call, _: u64) {
        self.push("response_body_end");
    }
    fn call_end(&mut self, _: &Call) {
        self.push("call_end");
    }
    fn call_failed(&mut self, _: &Call, _: &CallError) {
        self.push("call_failed");
    }
}

type Reports = Arc<Mutex<Vec<CallMetrics>>>;

fn collecting_sink() -> (Arc<dyn MetricsSink>, Reports) {
    let reports: Reports = Arc::default();
    let sink_reports = reports.clone();
    let sink = Arc::new(move |m: CallMetrics| sink_reports.lock().unwrap().push(m));
    (sink, reports)
}

fn no_blacklist() -> Arc<dyn Blacklist> {
    Arc::new(|_: &str| false)
}

/// Reports every call, ignoring locality, so the in-process server counts.
fn always_reporting(
    sink: Arc<dyn MetricsSink>,
    blacklist: Arc<dyn Blacklist>,
) -> Arc<dyn EventListenerFactory> {
    Arc::new(move |_: &Call| -> Box<dyn CallEventListener> {
        Box::new(CallInstrumentationListener::new(
            None,
            Some(sink.clone()),
            blacklist.clone(),
        ))
    })
}

/// Reporting listener that also records every forwarded event.
fn recording_and_reporting(
    events: Events,
    sink: Arc<dyn MetricsSink>,
) -> Arc<dyn EventListenerFactory> {
    Arc::new(move |_: &Call| -> Box<dyn CallEventListener> {
        Box::new(CallInstrumentationListener::new(
            Some(Box::new(Recording(events.clone()))),
            Some(sink.clone()),
            no_blacklist(),
        ))
    })
}

fn client(factory: Arc<dyn EventListenerFactory>) -> InstrumentedClient {
    InstrumentedClient::new(factory, build_tls_config(false, None).unwrap()).without_env_proxy()
}

fn get(url: String) -> Request<Bytes> {
    Request::get(url).body(Bytes::new()).unwrap()
}

#[tokio::test]
async fn local_calls_forward_events_but_never_report() {
    let addr = serve().await;
    let (sink, reports) = collecting_sink();
    let events: Events = Arc::default();
    let upstream_events = events.clone();
    let factory = MonitorFactory::new(sink, no_blacklist()).with_upstream(Arc::new(
        move |_: &Call| -> Box<dyn CallEventListener> {
            Box::new(Recording(upstream_events.clone()))
        },
    ));

    let response = client(Arc::new(factory))
        .execute(get(format!("http://{}/ok", addr)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), &Bytes::from_static(b"hello"));
    assert!(reports.lock().unwrap().is_empty());
    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "call_start",
            "connect_start",
            "connect_end",
            "connection_acquired",
            "request_headers_start",
            "request_headers_end",
            "response_headers_start",
            "response_headers_end",
            "response_body_start",
            "response_body_end",
            "connection_released",
            "call_end",
        ]
    );
}

#[tokio::test]
async fn localhost_name_goes_through_dns_events() {
    let addr = serve().await;
    let (sink, reports) = collecting_sink();
    let events: Events = Arc::default();
    let upstream_events = events.clone();
    let factory = MonitorFactory::new(sink, no_blacklist()).with_upstream(Arc::new(
        move |_: &Call| -> Box<dyn CallEventListener> {
            Box::new(Recording(upstream_events.clone()))
        },
    ));

    let response = client(Arc::new(factory))
        .execute(get(format!("http://localhost:{}/ok", addr.port())))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(reports.lock().unwrap().is_empty());
    let events = events.lock().unwrap();
    assert_eq!(&events[..3], &["call_start", "dns_start", "dns_end"]);
    assert_eq!(events.last(), Some(&"call_end"));
}

#[tokio::test]
async fn error_responses_are_reported_once_with_diagnostics() {
    let addr = serve().await;
    let (sink, reports) = collecting_sink();
    let client = client(always_reporting(sink, no_blacklist()));

    let response = client
        .execute(get(format!("http://{}/missing", addr)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.response_code, Some(404));
    assert_eq!(report.status_code(), "404");
    assert_eq!(report.error_code, 4040);
    assert!(report.error_msg.as_deref().unwrap().contains("no such item"));
    assert_eq!(report.domain.as_deref(), Some("127.0.0.1"));
    assert_eq!(report.path.as_deref(), Some("/missing"));
    assert_eq!(report.method.as_deref(), Some("GET"));
    assert_eq!(report.response_byte_count, 43);
    assert!(report.response_cost >= 20);
    assert!(report.total_cost >= 20);
    assert_eq!(report.dns_cost, None);
    assert!(!report.is_first_connection());
}

#[tokio::test]
async fn request_bodies_are_counted_and_captured() {
    let addr = serve().await;
    let (sink, reports) = collecting_sink();
    let client = client(always_reporting(sink, no_blacklist()));

    let request = Request::post(format!("http://{}/echo", addr))
        .header("content-type", "application/x-www-form-urlencoded")
        .header("x-trace-id", "trace-42")
        .body(Bytes::from_static(b"q=rust+lang&page=2"))
        .unwrap();
    let response = client.execute(request).await.unwrap();
    assert_eq!(response.body(), &Bytes::from_static(b"q=rust+lang&page=2"));

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.request_byte_count, 18);
    assert_eq!(report.response_byte_count, 18);
    assert_eq!(report.request_params.as_deref(), Some("q=rust lang&page=2"));
    assert_eq!(report.trace_id.as_deref(), Some("trace-42"));
    assert_eq!(report.error_msg, None);
    assert!(report
        .request_headers
        .as_deref()
        .unwrap()
        .contains("x-trace-id: trace-42"));
}

#[tokio::test]
async fn blacklisted_calls_complete_without_report() {
    let addr = serve().await;
    let (sink, reports) = collecting_sink();
    let blacklist: Arc<dyn Blacklist> = Arc::new(|url: &str| url.ends_with("/ok"));
    let client = client(always_reporting(sink, blacklist));

    let response = client
        .execute(get(format!("http://{}/ok", addr)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(reports.lock().unwrap().is_empty());
}

#[tokio::test]
async fn timeouts_surface_as_call_failed() {
    let addr = serve().await;
    let (sink, reports) = collecting_sink();
    let client = client(always_reporting(sink, no_blacklist()))
        .with_timeout(Duration::from_millis(200));

    let err = client
        .execute(get(format!("http://{}/slow", addr)))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::Timeout(_)));

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    let message = reports[0].error_msg.as_deref().unwrap();
    assert!(
        message.starts_with("responseHeadersStart,Ex:Timeout,"),
        "{}",
        message
    );
    assert!(reports[0].total_cost >= 200);
    assert_eq!(reports[0].response_code, None);
}

#[tokio::test]
async fn refused_connections_are_diagnosed() {
    let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = closed.local_addr().unwrap();
    drop(closed);

    let (sink, reports) = collecting_sink();
    let events: Events = Arc::default();
    let factory = recording_and_reporting(events.clone(), sink);

    let err = client(factory)
        .execute(get(format!("http://{}/ok", addr)))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::ConnectFailed { .. }));

    assert_eq!(
        *events.lock().unwrap(),
        vec!["call_start", "connect_start", "connect_failed", "call_failed"]
    );
    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    let message = reports[0].error_msg.as_deref().unwrap();
    assert!(message.starts_with("connectStart,Ex:ConnectFailed,Msg:failed to connect to"));
    assert_eq!(reports[0].status_code(), "0");
}

#[tokio::test]
async fn tls_handshake_failures_are_connect_failures() {
    // Plain http server behind an https url: the handshake cannot succeed.
    let addr = serve().await;
    let (sink, reports) = collecting_sink();
    let events: Events = Arc::default();
    let factory = recording_and_reporting(events.clone(), sink);

    let err = client(factory)
        .execute(get(format!("https://{}/ok", addr)))
        .await
        .unwrap_err();
    assert!(matches!(err, CallError::TlsHandshake { .. }), "{:?}", err);

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            "call_start",
            "connect_start",
            "secure_connect_start",
            "connect_failed",
            "call_failed",
        ]
    );
    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    let message = reports[0].error_msg.as_deref().unwrap();
    assert!(
        message.starts_with("secureConnectStart,Ex:TlsHandshake,Msg:tls handshake with 127.0.0.1 failed"),
        "{}",
        message
    );
    assert_eq!(reports[0].connect_cost, None);
    assert_eq!(reports[0].scheme.as_deref(), Some("https"));
}
