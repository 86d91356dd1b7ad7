//! Maps raw compute failures onto a fixed error taxonomy.
//!
//! Collaborators convert their native errors into [`RawFailure`] at the
//! boundary; [`classify`] is a pure function over that struct. When a status
//! code is present it decides the kind on its own. Code, name and message
//! are only inspected when it is absent.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Delay suggested for a rate limit that carried no retry-after hint.
pub const DEFAULT_RATE_LIMIT_DELAY_MS: u64 = 60_000;

const TIMEOUT_CODES: &[&str] = &[
    "ECONNRESET",
    "ETIMEDOUT",
    "ECONNABORTED",
    "EPIPE",
    "ESOCKETTIMEDOUT",
];
const TIMEOUT_NAMES: &[&str] = &["timeouterror", "aborterror"];
const TIMEOUT_MESSAGES: &[&str] = &["timed out", "timeout", "connection reset", "socket hang up"];
const RATE_LIMIT_MESSAGES: &[&str] = &["rate limit", "too many requests", "quota exceeded"];
const UNAVAILABLE_MESSAGES: &[&str] = &[
    "service unavailable",
    "overloaded",
    "internal server error",
    "bad gateway",
];
const VALIDATION_MESSAGES: &[&str] = &["invalid request", "malformed", "validation"];

/// Failure reported by the compute call, reduced to inspectable fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFailure {
    /// HTTP-like status code.
    pub status: Option<u16>,
    /// Transport or provider error code, e.g. `ECONNRESET`.
    pub code: Option<String>,
    /// Error type name, e.g. `TimeoutError`.
    pub name: Option<String>,
    /// Human-readable message.
    pub message: String,
    /// Retry-after hint in seconds.
    pub retry_after_secs: Option<f64>,
}

impl RawFailure {
    /// Failure with only a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    /// Failure carrying a status code.
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Attach an error code.
    #[must_use]
    pub fn code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Attach an error type name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attach a retry-after hint in seconds.
    #[must_use]
    pub fn retry_after(mut self, secs: f64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }
}

impl fmt::Display for RawFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "[{status}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl From<std::io::Error> for RawFailure {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind as Io;
        let code = match err.kind() {
            Io::TimedOut => Some("ETIMEDOUT"),
            Io::ConnectionReset => Some("ECONNRESET"),
            Io::ConnectionAborted => Some("ECONNABORTED"),
            Io::BrokenPipe => Some("EPIPE"),
            _ => None,
        };
        Self {
            code: code.map(str::to_string),
            message: err.to_string(),
            ..Self::default()
        }
    }
}

impl From<tokio::time::error::Elapsed> for RawFailure {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::new(err.to_string()).name("TimeoutError")
    }
}

/// Error taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Provider throttled the request.
    RateLimit,
    /// Provider-side fault.
    ServiceUnavailable,
    /// Connection reset or deadline exceeded.
    Timeout,
    /// The request itself is bad; retrying cannot help.
    ValidationError,
    /// Nothing matched.
    Unknown,
}

impl ErrorKind {
    /// Whether failures of this kind are worth retrying.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        !matches!(self, Self::ValidationError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RateLimit => "RATE_LIMIT",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Timeout => "TIMEOUT",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Classification result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    /// Taxonomy bucket.
    pub kind: ErrorKind,
    /// Whether a retry may succeed.
    pub retryable: bool,
    /// Delay that overrides computed backoff for the next attempt.
    pub suggested_delay_ms: Option<u64>,
    /// Message copied from the raw failure.
    pub message: String,
}

impl ClassifiedError {
    /// Classification with the kind's default retryability and no delay hint.
    pub fn of(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            retryable: kind.is_retryable(),
            suggested_delay_ms: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Classify a raw failure.
#[must_use]
pub fn classify(raw: &RawFailure) -> ClassifiedError {
    let kind = raw.status.map_or_else(|| kind_from_signals(raw), kind_from_status);
    let mut classified = ClassifiedError::of(kind, raw.message.clone());
    if kind == ErrorKind::RateLimit {
        classified.suggested_delay_ms = Some(
            raw.retry_after_secs
                .and_then(retry_after_ms)
                .unwrap_or(DEFAULT_RATE_LIMIT_DELAY_MS),
        );
    }
    classified
}

const fn kind_from_status(status: u16) -> ErrorKind {
    match status {
        429 => ErrorKind::RateLimit,
        408 => ErrorKind::Timeout,
        500..=599 => ErrorKind::ServiceUnavailable,
        400..=499 => ErrorKind::ValidationError,
        _ => ErrorKind::Unknown,
    }
}

fn kind_from_signals(raw: &RawFailure) -> ErrorKind {
    let message = raw.message.to_ascii_lowercase();
    let name = raw.name.as_deref().unwrap_or_default().to_ascii_lowercase();
    let code = raw.code.as_deref().unwrap_or_default();
    let mentions = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

    if name.contains("ratelimit")
        || code.eq_ignore_ascii_case("rate_limit_exceeded")
        || mentions(RATE_LIMIT_MESSAGES)
    {
        return ErrorKind::RateLimit;
    }
    if name.contains("serviceunavailable")
        || name.contains("internalserver")
        || mentions(UNAVAILABLE_MESSAGES)
    {
        return ErrorKind::ServiceUnavailable;
    }
    if TIMEOUT_CODES.iter().any(|c| code.eq_ignore_ascii_case(c))
        || TIMEOUT_NAMES.contains(&name.as_str())
        || mentions(TIMEOUT_MESSAGES)
    {
        return ErrorKind::Timeout;
    }
    if name.contains("validation")
        || name.contains("badrequest")
        || code.eq_ignore_ascii_case("invalid_request_error")
        || mentions(VALIDATION_MESSAGES)
    {
        return ErrorKind::ValidationError;
    }
    ErrorKind::Unknown
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn retry_after_ms(secs: f64) -> Option<u64> {
    (secs.is_finite() && secs >= 0.0).then(|| (secs * 1_000.0).round() as u64)
}
