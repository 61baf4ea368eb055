use zproxy_protocol::openai::error::ErrorFrame;
use zproxy_provider_core::BackendError;

/// Coarse classification of transport failures, used for logging and
/// retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    ReadTimeout,
    Dns,
    Tls,
    Connect,
    ConnectionReset,
    Other,
}

impl TransportErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::ReadTimeout => "read_timeout",
            TransportErrorKind::Dns => "dns",
            TransportErrorKind::Tls => "tls",
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::ConnectionReset => "connection_reset",
            TransportErrorKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// The pool has no selectable credential and anonymous mode is off.
    #[error("no upstream credential available")]
    NoCredential,

    #[error("{message}")]
    Backend { message: String },

    /// A 4xx from the upstream that was not recovered by rotation.
    #[error("upstream rejected the request with status {status}: {message}")]
    UpstreamRejected { status: u16, message: String },

    /// 5xx or transport failures that survived every retry.
    #[error("upstream unavailable after {attempts} attempts: {message}")]
    UpstreamUnavailable { attempts: u32, message: String },

    /// An error event inside an otherwise healthy stream.
    #[error("upstream reported an error: {message}")]
    UpstreamReported { code: Option<i64>, message: String },

    #[error("transport failure ({}): {message}", kind.as_str())]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
}

impl EngineError {
    pub fn error_type(&self) -> &'static str {
        match self {
            EngineError::NoCredential => "no_credential",
            EngineError::Backend { .. } => "backend_error",
            EngineError::UpstreamRejected { .. } => "upstream_error",
            EngineError::UpstreamUnavailable { .. } => "upstream_unavailable",
            EngineError::UpstreamReported { .. } => "upstream_error",
            EngineError::Transport { .. } => "transport_error",
        }
    }

    /// HTTP status a router should answer with when the error happens
    /// before any byte of the response body went out.
    pub fn http_status(&self) -> u16 {
        match self {
            EngineError::NoCredential => 503,
            EngineError::Backend { .. } => 500,
            EngineError::UpstreamRejected { status, .. } => *status,
            EngineError::UpstreamUnavailable { .. } => 502,
            EngineError::UpstreamReported { .. } => 502,
            EngineError::Transport { .. } => 502,
        }
    }

    pub fn to_frame(&self) -> ErrorFrame {
        let code = match self {
            EngineError::UpstreamReported { code, .. } => *code,
            other => Some(i64::from(other.http_status())),
        };
        ErrorFrame::new(self.to_string(), self.error_type(), code)
    }
}

impl From<BackendError> for EngineError {
    fn from(err: BackendError) -> Self {
        EngineError::Backend {
            message: err.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_carry_type_and_code() {
        let frame = EngineError::NoCredential.to_frame();
        assert_eq!(frame.error.r#type, "no_credential");
        assert_eq!(frame.error.code, Some(503));

        let frame = EngineError::UpstreamRejected {
            status: 422,
            message: "bad shape".to_string(),
        }
        .to_frame();
        assert_eq!(frame.error.code, Some(422));
        assert!(frame.error.message.contains("bad shape"));
    }

    #[test]
    fn reported_errors_keep_the_upstream_code() {
        let frame = EngineError::UpstreamReported {
            code: Some(429),
            message: "slow down".to_string(),
        }
        .to_frame();
        assert_eq!(frame.error.r#type, "upstream_error");
        assert_eq!(frame.error.code, Some(429));
    }
}
