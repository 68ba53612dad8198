use std::error::Error as StdError;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Why a call did not complete.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("unable to resolve host {host}")]
    UnknownHost {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to connect to {addr}")]
    ConnectFailed {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("tls handshake with {host} failed")]
    TlsHandshake {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("http protocol error")]
    Protocol(#[from] hyper::Error),
    #[error("io error")]
    Io(#[from] io::Error),
}

impl CallError {
    /// Short type name used in failure diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            CallError::InvalidRequest(_) => "InvalidRequest",
            CallError::UnknownHost { .. } => "UnknownHost",
            CallError::ConnectFailed { .. } => "ConnectFailed",
            CallError::TlsHandshake { .. } => "TlsHandshake",
            CallError::Timeout(_) => "Timeout",
            CallError::Protocol(_) => "Protocol",
            CallError::Io(_) => "Io",
        }
    }

    /// Innermost error of the source chain, if any.
    pub fn root_cause(&self) -> Option<&(dyn StdError + 'static)> {
        let mut cause = self.source()?;
        while let Some(next) = cause.source() {
            cause = next;
        }
        Some(cause)
    }
}
