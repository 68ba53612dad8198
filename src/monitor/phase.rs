use serde::Serialize;
use std::fmt;

/// Local status code reported while the server has not answered yet.
pub const PLACEHOLDER_STATUS_CODE: i32 = 0;

/// Last monitoring phase a call reached, in call order.
///
/// This is a diagnostic tag, not an enforced state machine: pooled connections
/// skip the dns/connect phases and clients may omit others.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecyclePhase {
    #[default]
    Begin,
    DnsStart,
    ConnectStart,
    SecureConnectStart,
    ConnectionAcquired,
    RequestHeadersStart,
    ResponseHeadersStart,
    RequestBodyStart,
    ResponseBodyStart,
    CallStart,
}

impl LifecyclePhase {
    pub const ALL: [LifecyclePhase; 10] = [
        LifecyclePhase::Begin,
        LifecyclePhase::DnsStart,
        LifecyclePhase::ConnectStart,
        LifecyclePhase::SecureConnectStart,
        LifecyclePhase::ConnectionAcquired,
        LifecyclePhase::RequestHeadersStart,
        LifecyclePhase::ResponseHeadersStart,
        LifecyclePhase::RequestBodyStart,
        LifecyclePhase::ResponseBodyStart,
        LifecyclePhase::CallStart,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LifecyclePhase::Begin => "begin",
            LifecyclePhase::DnsStart => "dnsStart",
            LifecyclePhase::ConnectStart => "connectStart",
            LifecyclePhase::SecureConnectStart => "secureConnectStart",
            LifecyclePhase::ConnectionAcquired => "connectionAcquired",
            LifecyclePhase::RequestHeadersStart => "requestHeadersStart",
            LifecyclePhase::ResponseHeadersStart => "responseHeadersStart",
            LifecyclePhase::RequestBodyStart => "requestBodyStart",
            LifecyclePhase::ResponseBodyStart => "responseBodyStart",
            LifecyclePhase::CallStart => "callStart",
        }
    }

    /// Status code used when no HTTP status is available.
    ///
    /// Every phase maps to the same placeholder until distinct codes are
    /// agreed on.
    pub fn client_status_code(&self) -> i32 {
        match self {
            LifecyclePhase::Begin
            | LifecyclePhase::DnsStart
            | LifecyclePhase::ConnectStart
            | LifecyclePhase::SecureConnectStart
            | LifecyclePhase::ConnectionAcquired
            | LifecyclePhase::RequestHeadersStart
            | LifecyclePhase::ResponseHeadersStart
            | LifecyclePhase::RequestBodyStart
            | LifecyclePhase::ResponseBodyStart
            | LifecyclePhase::CallStart => PLACEHOLDER_STATUS_CODE,
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
