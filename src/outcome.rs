// src/outcome.rs
//
// Request and Outcome types flowing through the pipeline, plus outcome
// classification.

use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;

/// The operation kinds the oracle can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Get,
    Put,
    Delete,
    Create,
    Consistency,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::Get => write!(f, "GET"),
            RequestKind::Put => write!(f, "PUT"),
            RequestKind::Delete => write!(f, "DELETE"),
            RequestKind::Create => write!(f, "CREATE"),
            RequestKind::Consistency => write!(f, "CONSISTENCY"),
        }
    }
}

/// One scheduled unit of work. Created by the oracle, consumed once by the
/// executor.
#[derive(Debug, Clone)]
pub struct Request {
    pub kind: RequestKind,
    pub file_name: String,
}

/// The result of one request. A consistency probe performs four HTTP
/// requests but yields exactly one Outcome describing the whole probe.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub kind: RequestKind,
    pub file_name: String,
    /// Final HTTP status, absent on transport errors.
    pub status: Option<StatusCode>,
    /// Task start (after in-flight acquisition) to Outcome emission.
    pub duration: Duration,
    /// Set by the executor when the request did not do what it was supposed
    /// to: transport failure, unexpected status, or a probe deviation.
    pub failed: bool,
    /// Response body or a diagnostic describing what went wrong.
    pub message: String,
    /// Underlying I/O error text, when there was one.
    pub error: Option<String>,
}

impl Outcome {
    pub fn failure(
        kind: RequestKind,
        file_name: impl Into<String>,
        status: Option<StatusCode>,
        duration: Duration,
        message: impl Into<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            kind,
            file_name: file_name.into(),
            status,
            duration,
            failed: true,
            message: message.into(),
            error,
        }
    }

    /// Whether the request achieved what it set out to do. Consistency
    /// probes are judged by the probe verdict alone; their expected final
    /// status is a 404.
    pub fn was_success(&self) -> bool {
        match self.kind {
            RequestKind::Consistency => !self.failed && self.error.is_none(),
            _ => {
                !self.failed
                    && self.error.is_none()
                    && self.status.is_some_and(|s| s.is_success())
            }
        }
    }

    pub fn was_failure(&self) -> bool {
        !self.was_success()
    }

    pub fn was_5xx(&self) -> bool {
        self.status.is_some_and(|s| s.is_server_error())
    }

    pub fn was_throttled(&self) -> bool {
        self.status == Some(StatusCode::TOO_MANY_REQUESTS)
    }

    pub fn was_404(&self) -> bool {
        self.status == Some(StatusCode::NOT_FOUND)
    }

    /// True when there is something worth surfacing in the error tables:
    /// either an HTTP-level refusal or a transport problem. A passing
    /// consistency probe terminates on a 404 by design, so probes are
    /// judged by their verdict here too.
    pub fn was_error(&self) -> bool {
        match self.kind {
            RequestKind::Consistency => self.failed || self.error.is_some(),
            _ => {
                self.error.is_some()
                    || self.status.is_none()
                    || self.status.is_some_and(|s| s.as_u16() >= 400)
            }
        }
    }
}
