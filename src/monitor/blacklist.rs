use url::Url;

/// Decides which URLs must never be reported.
pub trait Blacklist: Send + Sync {
    fn in_blacklist(&self, url: &str) -> bool;
}

impl<F> Blacklist for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn in_blacklist(&self, url: &str) -> bool {
        self(url)
    }
}

/// Blacklist built from `NO_PROXY`-style patterns.
///
/// Supports patterns like:
/// - `example.com` - exact host match
/// - `.example.com` - host suffix match (also matches `example.com`)
/// - `https://example.com/internal/` - url prefix match
#[derive(Debug, Clone, Default)]
pub struct PatternBlacklist {
    patterns: Vec<String>,
}

impl PatternBlacklist {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = patterns
            .into_iter()
            .map(Into::into)
            .map(|p: String| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Blacklist for PatternBlacklist {
    fn in_blacklist(&self, url: &str) -> bool {
        let host = Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));

        for pattern in &self.patterns {
            if pattern.contains("://") {
                if url.starts_with(pattern.as_str()) {
                    return true;
                }
                continue;
            }
            let Some(host) = host.as_deref() else {
                continue;
            };
            let pattern = pattern.to_ascii_lowercase();
            if let Some(suffix) = pattern.strip_prefix('.') {
                // Domain suffix match
                if host.ends_with(pattern.as_str()) || host == suffix {
                    return true;
                }
            } else if host == pattern {
                return true;
            }
        }

        false
    }
}
