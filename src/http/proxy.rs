//! Forward-proxy settings taken from the environment.

/// Read proxy address from environment variables.
///
/// Checks the following environment variables in order:
/// - `HTTPS_PROXY` / `https_proxy` for HTTPS URLs
/// - `HTTP_PROXY` / `http_proxy` for HTTP URLs
/// - `ALL_PROXY` / `all_proxy` as a fallback
///
/// Returns `None` if no proxy is configured or if the proxy type is not supported.
pub fn get_proxy_from_env(scheme: &str) -> Option<String> {
    let env_var = if scheme == "https" {
        std::env::var("HTTPS_PROXY")
            .or_else(|_| std::env::var("https_proxy"))
            .or_else(|_| std::env::var("ALL_PROXY"))
            .or_else(|_| std::env::var("all_proxy"))
            .ok()
    } else {
        std::env::var("HTTP_PROXY")
            .or_else(|_| std::env::var("http_proxy"))
            .or_else(|_| std::env::var("ALL_PROXY"))
            .or_else(|_| std::env::var("all_proxy"))
            .ok()
    }?;

    debug!("Proxy env var found for {}: {}", scheme, env_var);
    parse_proxy_addr(&env_var)
}

/// Turns a proxy setting into `host:port`.
///
/// Supports formats like:
/// - `http://127.0.0.1:7890`
/// - `http://proxy.example.com:8080`
/// - `proxy.example.com:8080`
/// - `socks5://127.0.0.1:1080` (not supported, returns None)
pub fn parse_proxy_addr(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(url) = url::Url::parse(value) {
        match url.scheme() {
            "http" => {
                let host = url.host_str()?;
                let port = url.port().unwrap_or(80);
                return Some(format!("{}:{}", host, port));
            }
            "https" => {
                let host = url.host_str()?;
                let port = url.port().unwrap_or(443);
                return Some(format!("{}:{}", host, port));
            }
            // "host:port" parses as a url whose scheme is the host
            _ if !value.contains("://") => {}
            _ => return None,
        }
    }
    // Fallback: assume the value is already in host:port format
    Some(value.to_string())
}

/// Check if a host should bypass the proxy based on `NO_PROXY`.
pub fn should_bypass_proxy(host: Option<&str>) -> bool {
    let Some(host) = host else {
        return false;
    };
    match std::env::var("NO_PROXY").or_else(|_| std::env::var("no_proxy")) {
        Ok(no_proxy) => matches_no_proxy(host, &no_proxy),
        Err(_) => false,
    }
}

/// Supports patterns like:
/// - `example.com` - exact domain match
/// - `.example.com` - domain suffix match
/// - `192.168.1.1` - exact IP match
/// - `*` - everything
pub fn matches_no_proxy(host: &str, no_proxy: &str) -> bool {
    for pattern in no_proxy.split(',') {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            continue;
        }

        if pattern == "*" {
            return true;
        }
        if let Some(suffix) = pattern.strip_prefix('.') {
            // Domain suffix match
            if host.ends_with(pattern) || host == suffix {
                return true;
            }
        } else if host == pattern {
            // Exact match
            return true;
        }
    }

    false
}
