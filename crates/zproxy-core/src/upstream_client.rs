use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Proxy};
use zproxy_provider_core::PreparedCall;

use crate::error::{EngineError, TransportErrorKind};

#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    pub proxy: Option<String>,
    pub connect_timeout: Duration,
    /// Whole-request ceiling; generous because completions stream for a
    /// long time.
    pub request_timeout: Duration,
    /// Maximum gap between two body chunks before the stream is dropped.
    pub stream_idle_timeout: Duration,
}

impl Default for UpstreamClientConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(86400),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

pub enum UpstreamBody {
    Bytes(Bytes),
    Stream(mpsc::Receiver<Bytes>),
}

pub struct UpstreamResponse {
    pub status: u16,
    pub body: UpstreamBody,
}

impl UpstreamResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drains the body into text, for error reporting.
    pub async fn text(self) -> String {
        match self.body {
            UpstreamBody::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            UpstreamBody::Stream(mut rx) => {
                let mut out = Vec::new();
                while let Some(chunk) = rx.recv().await {
                    out.extend_from_slice(&chunk);
                }
                String::from_utf8_lossy(&out).into_owned()
            }
        }
    }
}

/// Thin wrapper over a shared `wreq::Client`. Successful responses are
/// handed over as a channel fed by a reader task so that an idle
/// upstream cannot pin the connection forever.
#[derive(Clone)]
pub struct WreqUpstreamClient {
    config: UpstreamClientConfig,
    client: Client,
}

impl WreqUpstreamClient {
    pub fn new(config: UpstreamClientConfig) -> Result<Self, EngineError> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .read_timeout(config.stream_idle_timeout);

        if let Some(proxy) = normalize_proxy(config.proxy.as_deref()) {
            builder = builder.proxy(Proxy::all(proxy).map_err(map_wreq_error)?);
        }

        let client = builder.build().map_err(map_wreq_error)?;
        Ok(Self { config, client })
    }

    pub async fn send(&self, call: &PreparedCall) -> Result<UpstreamResponse, EngineError> {
        let mut builder = self.client.post(&call.url);
        for (name, value) in &call.headers {
            builder = builder.header(name, value);
        }
        let response = builder
            .json(&call.body)
            .send()
            .await
            .map_err(map_wreq_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.bytes().await.map_err(map_wreq_error)?;
            return Ok(UpstreamResponse {
                status,
                body: UpstreamBody::Bytes(body),
            });
        }

        let idle = self.config.stream_idle_timeout;
        let (tx, rx) = mpsc::channel::<Bytes>(16);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::time::timeout(idle, stream.next()).await;
                let Ok(item) = next else {
                    tracing::warn!(event = "upstream_stream_idle_timeout");
                    break;
                };
                let Some(item) = item else {
                    break;
                };
                let Ok(chunk) = item else {
                    break;
                };
                if tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        Ok(UpstreamResponse {
            status,
            body: UpstreamBody::Stream(rx),
        })
    }
}

fn normalize_proxy(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|item| !item.is_empty())
}

fn map_wreq_error(err: wreq::Error) -> EngineError {
    EngineError::Transport {
        kind: classify_wreq_error(&err),
        message: err.to_string(),
    }
}

fn classify_wreq_error(err: &wreq::Error) -> TransportErrorKind {
    let message = err.to_string().to_ascii_lowercase();
    if err.is_timeout() {
        if message.contains("read") || message.contains("idle") {
            return TransportErrorKind::ReadTimeout;
        }
        return TransportErrorKind::Timeout;
    }
    if err.is_connect() {
        if message.contains("dns") || message.contains("resolve") {
            return TransportErrorKind::Dns;
        }
        if message.contains("tls") || message.contains("certificate") {
            return TransportErrorKind::Tls;
        }
        return TransportErrorKind::Connect;
    }
    if message.contains("connection reset") || message.contains("broken pipe") {
        return TransportErrorKind::ConnectionReset;
    }
    TransportErrorKind::Other
}
