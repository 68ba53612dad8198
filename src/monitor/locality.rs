use std::net::{IpAddr, ToSocketAddrs};
use url::{Host, Url};

/// Whether `url` targets this machine.
///
/// Unparseable URLs and hosts that fail to resolve count as remote, so a
/// lookup problem never switches monitoring off.
pub fn is_local(url: &str) -> bool {
    match resolve_locality(url) {
        Ok(local) => local,
        Err(e) => {
            warn!("Locality check failed for {}: {:#}", url, e);
            false
        }
    }
}

fn resolve_locality(url: &str) -> Result<bool, anyhow::Error> {
    let url = Url::parse(url)?;
    let host = url
        .host()
        .ok_or_else(|| anyhow!("Can not find host in the url:{}.", url))?;
    let local = match host {
        Host::Domain("localhost") => true,
        Host::Domain(domain) => {
            let addr = (domain, 0)
                .to_socket_addrs()?
                .next()
                .ok_or_else(|| anyhow!("No IP addresses found for host {}", domain))?;
            addr.ip().to_canonical().is_loopback()
        }
        Host::Ipv4(ip) => IpAddr::V4(ip).is_loopback(),
        // ::ffff:127.0.0.1 is loopback too
        Host::Ipv6(ip) => ip.to_canonical().is_loopback(),
    };
    Ok(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn localhost_name_is_local() {
        assert!(is_local("http://localhost:8080/x"));
        assert!(is_local("https://localhost/"));
    }

    #[test]
    fn loopback_literals_are_local() {
        assert!(is_local("http://127.0.0.1:3000/health"));
        assert!(is_local("http://127.10.0.1/"));
        assert!(is_local("http://[::1]:8080/"));
        assert!(is_local("http://[::ffff:127.0.0.1]:8080/x"));
    }

    #[test]
    fn public_literals_are_remote() {
        assert!(!is_local("http://93.184.216.34/index.html"));
        assert!(!is_local("http://[2606:2800:220:1:248:1893:25c8:1946]/"));
        assert!(!is_local("http://[::ffff:93.184.216.34]/"));
    }

    #[test]
    fn malformed_urls_fail_open() {
        assert!(!is_local("not a url"));
        assert!(!is_local(""));
        assert!(!is_local("mailto:someone@example.com"));
    }
}
