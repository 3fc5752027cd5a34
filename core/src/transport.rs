//! Delivery of a [`WirePayload`] to the remote sink.
//!
//! Every failure is reported as a [`DeliveryError`] whose
//! [`DeliveryErrorKind`] decides whether the pipeline falls back to the
//! pending queue (recoverable) or hands the failure back to the caller.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderValue};
use serde::Serialize;
use url::Url;

use crate::wire::{SinkRecord, SinkResponse, WirePayload, parse_sink_response};

/// Closed set of delivery failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryErrorKind {
    Connect,
    Timeout,
    Network,
    RouteNotFound,
    Unavailable,
    Rejected,
    ServerFault,
    InvalidResponse,
}

impl DeliveryErrorKind {
    /// Recoverable kinds mean the sink was never reached; retrying later may
    /// succeed without changing the payload.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            DeliveryErrorKind::Connect
                | DeliveryErrorKind::Timeout
                | DeliveryErrorKind::Network
                | DeliveryErrorKind::RouteNotFound
                | DeliveryErrorKind::Unavailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryErrorKind::Connect => "connect",
            DeliveryErrorKind::Timeout => "timeout",
            DeliveryErrorKind::Network => "network",
            DeliveryErrorKind::RouteNotFound => "route_not_found",
            DeliveryErrorKind::Unavailable => "unavailable",
            DeliveryErrorKind::Rejected => "rejected",
            DeliveryErrorKind::ServerFault => "server_fault",
            DeliveryErrorKind::InvalidResponse => "invalid_response",
        }
    }
}

/// Errors from a delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("could not connect to sink: {0}")]
    Connect(String),

    #[error("sink did not respond within {0:?}")]
    Timeout(Duration),

    #[error("network error: {0}")]
    Network(String),

    #[error("submission route not found (HTTP 404)")]
    RouteNotFound,

    #[error("sink unavailable (HTTP {status})")]
    Unavailable { status: u16 },

    /// The sink was reached and refused the payload.
    #[error("{message}")]
    Rejected {
        status: u16,
        message: String,
        missing_fields: Vec<String>,
    },

    #[error("sink error (HTTP {status}): {body}")]
    ServerFault { status: u16, body: String },

    #[error("unexpected sink response (HTTP {status}): {body}")]
    InvalidResponse { status: u16, body: String },
}

impl DeliveryError {
    pub fn kind(&self) -> DeliveryErrorKind {
        match self {
            DeliveryError::Connect(_) => DeliveryErrorKind::Connect,
            DeliveryError::Timeout(_) => DeliveryErrorKind::Timeout,
            DeliveryError::Network(_) => DeliveryErrorKind::Network,
            DeliveryError::RouteNotFound => DeliveryErrorKind::RouteNotFound,
            DeliveryError::Unavailable { .. } => DeliveryErrorKind::Unavailable,
            DeliveryError::Rejected { .. } => DeliveryErrorKind::Rejected,
            DeliveryError::ServerFault { .. } => DeliveryErrorKind::ServerFault,
            DeliveryError::InvalidResponse { .. } => DeliveryErrorKind::InvalidResponse,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.kind().is_recoverable()
    }
}

/// The network seam of the pipeline.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    /// Send one payload and return the sink's record identifier.
    async fn deliver(&self, payload: &WirePayload) -> Result<SinkRecord, DeliveryError>;
}

/// Longest response body kept in an error message.
const MAX_ERROR_BODY: usize = 512;

fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}…", &body[..idx]),
        None => body.to_string(),
    }
}

/// Map an HTTP status and body to a delivery outcome.
///
/// An application rejection document wins over the status code, so a
/// `503 {success:false}` is a rejection rather than an outage.
pub fn classify_response(status: u16, body: &str) -> Result<SinkRecord, DeliveryError> {
    let parsed = parse_sink_response(body);
    let success_status = (200..300).contains(&status);

    match parsed {
        Some(SinkResponse::Rejected {
            error,
            missing_fields,
        }) => Err(DeliveryError::Rejected {
            status,
            message: error,
            missing_fields,
        }),
        Some(SinkResponse::Accepted(record)) if success_status => Ok(record),
        _ => Err(match status {
            404 => DeliveryError::RouteNotFound,
            502..=504 => DeliveryError::Unavailable { status },
            _ if success_status => DeliveryError::InvalidResponse {
                status,
                body: truncate_body(body),
            },
            _ => DeliveryError::ServerFault {
                status,
                body: truncate_body(body),
            },
        }),
    }
}

/// Production transport: one JSON `POST` per payload.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn map_send_error(&self, err: reqwest::Error) -> DeliveryError {
        if err.is_timeout() {
            DeliveryError::Timeout(self.timeout)
        } else if err.is_connect() {
            DeliveryError::Connect(err.to_string())
        } else {
            DeliveryError::Network(err.to_string())
        }
    }
}

#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn deliver(&self, payload: &WirePayload) -> Result<SinkRecord, DeliveryError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .json(payload)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let outcome = classify_response(status, &body);
        match &outcome {
            Ok(record) => tracing::debug!(status, id = %record.id, "sink accepted payload"),
            Err(err) => tracing::debug!(status, kind = err.kind().as_str(), "sink call failed"),
        }
        outcome
    }
}
