use crate::error::CallError;
use crate::http::proxy::{get_proxy_from_env, should_bypass_proxy};
use crate::monitor::event::{
    Call, CallEventListener, Connection, EventListenerFactory, Handshake, Proxy,
};
use bytes::Bytes;
use http::header::{HeaderValue, HOST, USER_AGENT};
use http::{Request, Response, Uri, Version};
use http_body_util::{BodyExt, Full};
use hyper::client::conn::http1;
use hyper_util::rt::TokioIo;
use rustls::ClientConfig;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP/1.1 client that reports every call's lifecycle to a listener built
/// by the configured factory.
///
/// One connection is opened per call; the listener sees the events in the
/// order they happen and exactly one terminal event.
#[derive(Clone)]
pub struct InstrumentedClient {
    factory: Arc<dyn EventListenerFactory>,
    tls_config: Arc<ClientConfig>,
    timeout: Duration,
    use_env_proxy: bool,
}

impl InstrumentedClient {
    pub fn new(factory: Arc<dyn EventListenerFactory>, tls_config: ClientConfig) -> Self {
        Self {
            factory,
            tls_config: Arc::new(tls_config),
            timeout: DEFAULT_TIMEOUT,
            use_env_proxy: true,
        }
    }

    /// Upper bound for the whole call, from connect to the last body byte.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Ignore `HTTP_PROXY` and friends.
    pub fn without_env_proxy(mut self) -> Self {
        self.use_env_proxy = false;
        self
    }

    pub async fn execute(&self, request: Request<Bytes>) -> Result<Response<Bytes>, CallError> {
        let factory = self.factory.clone();
        let call = Call::new(request);
        // The factory may resolve the target host.
        let (call, mut listener) = tokio::task::spawn_blocking(move || {
            let listener = factory.create(&call);
            (call, listener)
        })
        .await
        .map_err(|e| CallError::Io(io::Error::other(e)))?;

        listener.call_start(&call);
        let result = match timeout(self.timeout, self.exchange(&call, listener.as_mut())).await {
            Ok(result) => result,
            Err(_) => Err(CallError::Timeout(self.timeout)),
        };
        match &result {
            Ok(response) => {
                debug!("{} {} -> {}", call.method(), call.url(), response.status());
                listener.call_end(&call);
            }
            Err(e) => {
                debug!("{} {} failed: {}", call.method(), call.url(), e);
                listener.call_failed(&call, e);
            }
        }
        result
    }

    async fn exchange(
        &self,
        call: &Call,
        listener: &mut dyn CallEventListener,
    ) -> Result<Response<Bytes>, CallError> {
        let uri = call.request().uri();
        let host = uri
            .host()
            .ok_or_else(|| CallError::InvalidRequest(format!("no host in {}", uri)))?
            .to_string();
        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") | None => false,
            Some(other) => {
                return Err(CallError::InvalidRequest(format!(
                    "unsupported scheme {}",
                    other
                )))
            }
        };
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });

        let proxy = self.select_proxy(https, &host);
        let addrs = match &proxy {
            Proxy::Direct => resolve(call, listener, &host, port).await?,
            Proxy::Http(proxy_addr) => {
                let (proxy_host, proxy_port) = split_host_port(proxy_addr)?;
                resolve(call, listener, proxy_host, proxy_port).await?
            }
        };

        let (stream, addr) = connect(call, listener, &addrs, &proxy).await?;
        let connection = Connection {
            peer_addr: addr,
            local_addr: stream.local_addr().ok(),
            version: Version::HTTP_11,
        };

        if https {
            listener.secure_connect_start(call);
            let connector = TlsConnector::from(self.tls_config.clone());
            let tls_error = |source: io::Error| CallError::TlsHandshake {
                host: host.clone(),
                source,
            };
            let server_name = host.trim_start_matches('[').trim_end_matches(']');
            let domain = match pki_types::ServerName::try_from(server_name) {
                Ok(domain) => domain.to_owned(),
                Err(e) => {
                    let error = tls_error(io::Error::new(io::ErrorKind::InvalidInput, e));
                    listener.connect_failed(call, addr, &proxy, None, &error);
                    return Err(error);
                }
            };
            let tls_stream = match connector.connect(domain, stream).await {
                Ok(tls_stream) => tls_stream,
                Err(source) => {
                    let error = tls_error(source);
                    listener.connect_failed(call, addr, &proxy, None, &error);
                    return Err(error);
                }
            };
            let (_, session) = tls_stream.get_ref();
            let handshake = Handshake {
                tls_version: session.protocol_version().map(|v| format!("{:?}", v)),
                cipher_suite: session
                    .negotiated_cipher_suite()
                    .map(|s| format!("{:?}", s.suite())),
            };
            listener.secure_connect_end(call, Some(&handshake));
            listener.connect_end(call, addr, &proxy, Some(Version::HTTP_11));
            send(call, listener, TokioIo::new(tls_stream), &connection, false).await
        } else {
            listener.connect_end(call, addr, &proxy, Some(Version::HTTP_11));
            let proxied = matches!(proxy, Proxy::Http(_));
            send(call, listener, TokioIo::new(stream), &connection, proxied).await
        }
    }

    fn select_proxy(&self, https: bool, host: &str) -> Proxy {
        // Only plain-http forward proxying is supported.
        if https || !self.use_env_proxy || should_bypass_proxy(Some(host)) {
            return Proxy::Direct;
        }
        match get_proxy_from_env("http") {
            Some(proxy_addr) => {
                debug!("Using HTTP proxy: {}", proxy_addr);
                Proxy::Http(proxy_addr)
            }
            None => Proxy::Direct,
        }
    }
}

async fn resolve(
    call: &Call,
    listener: &mut dyn CallEventListener,
    host: &str,
    port: u16,
) -> Result<Vec<SocketAddr>, CallError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    listener.dns_start(call, host);
    let lookup = (host.to_string(), port);
    let addrs: Vec<SocketAddr> = tokio::task::spawn_blocking(move || lookup.to_socket_addrs())
        .await
        .map_err(io::Error::other)
        .and_then(|r| r)
        .map(|addrs| addrs.collect())
        .map_err(|source| CallError::UnknownHost {
            host: host.to_string(),
            source,
        })?;

    if addrs.is_empty() {
        error!("DNS resolution for {} returned no addresses.", host);
        return Err(CallError::UnknownHost {
            host: host.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no addresses"),
        });
    }
    for (i, addr) in addrs.iter().enumerate() {
        if i == 0 {
            debug!("Resolved IP: {}", addr.ip());
        } else {
            debug!("Resolved IP (alternative): {}", addr.ip());
        }
    }

    listener.dns_end(call, host, &addrs);
    Ok(addrs)
}

/// Tries each address in turn; every failed attempt is reported.
async fn connect(
    call: &Call,
    listener: &mut dyn CallEventListener,
    addrs: &[SocketAddr],
    proxy: &Proxy,
) -> Result<(TcpStream, SocketAddr), CallError> {
    let mut last_error = None;
    for &addr in addrs {
        listener.connect_start(call, addr, proxy);
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok((stream, addr)),
            Err(source) => {
                let error = CallError::ConnectFailed { addr, source };
                listener.connect_failed(call, addr, proxy, None, &error);
                last_error = Some(error);
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| CallError::InvalidRequest("no address to connect to".to_string())))
}

async fn send<IO>(
    call: &Call,
    listener: &mut dyn CallEventListener,
    io: TokioIo<IO>,
    connection: &Connection,
    proxied: bool,
) -> Result<Response<Bytes>, CallError>
where
    IO: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    listener.connection_acquired(call, connection);
    let (mut sender, conn) = http1::handshake::<_, Full<Bytes>>(io).await?;
    let peer = connection.peer_addr;
    tokio::spawn(async move {
        if let Err(err) = conn.await {
            debug!("Connection to {} closed with error: {:?}", peer, err);
        }
    });

    listener.request_headers_start(call);
    let outgoing = outgoing_request(call, proxied)?;
    listener.request_headers_end(call, &outgoing);

    let body_len = outgoing.body().len() as u64;
    let (parts, body) = outgoing.into_parts();
    if body_len > 0 {
        listener.request_body_start(call);
        listener.request_body_end(call, body_len);
    }

    listener.response_headers_start(call);
    let response = sender
        .send_request(Request::from_parts(parts, Full::new(body)))
        .await?;
    let (parts, incoming) = response.into_parts();
    let body = incoming.collect().await?.to_bytes();
    let response = Response::from_parts(parts, body);
    listener.response_headers_end(call, &response);

    listener.response_body_start(call);
    listener.response_body_end(call, response.body().len() as u64);
    listener.connection_released(call, connection);
    Ok(response)
}

/// The request as written on the wire: origin-form target unless proxied,
/// with `Host` and `User-Agent` filled in.
fn outgoing_request(call: &Call, proxied: bool) -> Result<Request<Bytes>, CallError> {
    let source = call.request();
    let uri = source.uri();
    let target: Uri = if proxied {
        uri.clone()
    } else {
        uri.path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/")
            .parse()
            .map_err(|e: http::uri::InvalidUri| CallError::InvalidRequest(e.to_string()))?
    };

    let mut request = Request::new(source.body().clone());
    *request.method_mut() = source.method().clone();
    *request.uri_mut() = target;
    *request.headers_mut() = source.headers().clone();

    if !request.headers().contains_key(HOST) {
        if let Some(authority) = uri.authority() {
            let value = HeaderValue::from_str(authority.as_str())
                .map_err(|e| CallError::InvalidRequest(e.to_string()))?;
            request.headers_mut().insert(HOST, value);
        }
    }
    if !request.headers().contains_key(USER_AGENT) {
        request.headers_mut().insert(
            USER_AGENT,
            HeaderValue::from_static(concat!("netmon/", env!("CARGO_PKG_VERSION"))),
        );
    }
    Ok(request)
}

fn split_host_port(addr: &str) -> Result<(&str, u16), CallError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| CallError::InvalidRequest(format!("proxy address without port: {}", addr)))?;
    let port = port
        .parse()
        .map_err(|_| CallError::InvalidRequest(format!("invalid proxy port in {}", addr)))?;
    Ok((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_requests_use_origin_form() {
        let call = Call::new(
            Request::post("http://example.com:8080/api/items?id=3")
                .body(Bytes::from_static(b"a=1"))
                .unwrap(),
        );
        let request = outgoing_request(&call, false).unwrap();
        assert_eq!(request.uri(), "/api/items?id=3");
        assert_eq!(request.method(), http::Method::POST);
        assert_eq!(request.headers()[HOST], "example.com:8080");
        assert!(request.headers()[USER_AGENT]
            .to_str()
            .unwrap()
            .starts_with("netmon/"));
        assert_eq!(request.body(), &Bytes::from_static(b"a=1"));
    }

    #[test]
    fn proxied_requests_keep_absolute_form() {
        let call = Call::new(
            Request::get("http://example.com/")
                .header(USER_AGENT, "custom/1.0")
                .body(Bytes::new())
                .unwrap(),
        );
        let request = outgoing_request(&call, true).unwrap();
        assert_eq!(request.uri(), "http://example.com/");
        assert_eq!(request.headers()[USER_AGENT], "custom/1.0");
    }

    #[test]
    fn proxy_address_splitting() {
        assert_eq!(split_host_port("10.0.0.1:3128").unwrap(), ("10.0.0.1", 3128));
        assert!(split_host_port("proxy.local").is_err());
        assert!(split_host_port("proxy.local:http").is_err());
    }
}
