use crate::monitor::event::Call;
use crate::monitor::phase::LifecyclePhase;
use serde::Serialize;
use std::fmt;

/// Timing and diagnostic record for a single call.
///
/// Durations are milliseconds. `None` on an optional timing means the start
/// event was never observed or the measurement was discarded.
#[derive(Debug, Default, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMetrics {
    pub proxy: Option<String>,
    pub socket_address: Option<String>,
    pub protocol: Option<String>,

    pub scheme: Option<String>,
    pub domain: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub url: Option<String>,
    pub trace_id: Option<String>,

    pub dns_cost: Option<u64>,
    pub connect_cost: Option<u64>,
    pub response_cost: u64,
    pub total_cost: u64,

    pub response_code: Option<u16>,
    pub phase: LifecyclePhase,
    pub error_code: i64,
    pub error_msg: Option<String>,

    pub request_byte_count: u64,
    pub response_byte_count: u64,

    pub request_params: Option<String>,
    pub request_headers: Option<String>,
    pub response_headers: Option<String>,
}

impl CallMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copies scheme, domain, method, path, url and trace id from the call.
    pub fn snapshot_from_call(&mut self, call: &Call) {
        self.scheme = Some(call.scheme().to_string());
        self.domain = call.host().map(str::to_string);
        self.method = Some(call.method().to_string());
        self.path = Some(call.path().to_string());
        self.url = Some(call.url());
        self.trace_id = call.trace_id().map(str::to_string);
    }

    /// The HTTP status when the server answered, else the phase placeholder.
    pub fn status_code(&self) -> String {
        match self.response_code {
            Some(code) if code != 0 => code.to_string(),
            _ => self.phase.client_status_code().to_string(),
        }
    }

    pub fn has_dns_timing(&self) -> bool {
        self.dns_cost.is_some()
    }

    pub fn has_connect_timing(&self) -> bool {
        self.connect_cost.is_some()
    }

    /// A fresh connection was set up for this call (no pool reuse).
    pub fn is_first_connection(&self) -> bool {
        self.has_dns_timing() && self.has_connect_timing()
    }
}

impl fmt::Display for CallMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nTime breakdown:")?;

        if let Some(dns) = self.dns_cost {
            writeln!(f, "  DNS lookup:      {:>8} ms", dns)?;
        } else {
            writeln!(f, "  DNS lookup:      N/A")?;
        }

        if let Some(connect) = self.connect_cost {
            writeln!(f, "  Connect:         {:>8} ms", connect)?;
        } else {
            writeln!(f, "  Connect:         N/A")?;
        }

        if self.response_cost > 0 {
            writeln!(f, "  Response wait:   {:>8} ms", self.response_cost)?;
        } else {
            writeln!(f, "  Response wait:   N/A")?;
        }

        if self.total_cost > 0 {
            writeln!(f, "  Total time:      {:>8} ms", self.total_cost)?;
        } else {
            writeln!(f, "  Total time:      N/A")?;
        }

        write!(f, "  Status:          {:>8}", self.status_code())
    }
}
