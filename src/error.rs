//! Error types for asynchronous service-client calls.
//!
//! This module provides one error type covering every failure class the
//! client core can produce: configuration mistakes, credential resolution,
//! network faults, service errors, protocol violations, and control-flow
//! failures from paginators and waiters. Errors preserve maximum debugging
//! information — raw bodies, status codes, the URL that failed — while
//! remaining ergonomic to match on.

use http::StatusCode;
use serde_json::Value;

/// Service error codes that indicate throttling rather than a hard failure.
///
/// Responses carrying one of these codes are retry-eligible even when the
/// HTTP status is a 4xx.
pub const THROTTLING_ERROR_CODES: &[&str] = &[
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestThrottledException",
    "TooManyRequestsException",
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "SlowDown",
];

/// The main error type for service-client calls.
///
/// # Examples
///
/// ```no_run
/// use wavecall::Error;
///
/// # fn example(result: Result<serde_json::Value, Error>) {
/// match result {
///     Ok(parsed) => println!("Success: {parsed:?}"),
///     Err(Error::Service { code, message, status, operation }) => {
///         eprintln!("{operation} failed with {code} ({status}): {message}");
///     }
///     Err(e) if e.is_retryable() => eprintln!("transient: {e}"),
///     Err(e) => eprintln!("fatal: {e}"),
/// }
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid configuration was provided at construction or call time.
    ///
    /// This covers bad URLs, invalid connector options, unknown operation
    /// names, and calls on a closed client.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A credential source produced some, but not all, required keys.
    #[error("Partial credentials found in {provider}, missing: {missing}")]
    PartialCredentials {
        /// The provider that produced the incomplete set.
        provider: String,
        /// Comma-separated names of the missing keys.
        missing: String,
    },

    /// No provider in the credential chain produced credentials.
    #[error("Unable to locate credentials (tried: {tried})")]
    NoCredentials {
        /// Comma-separated names of the providers that were probed.
        tried: String,
    },

    /// Refreshing expiring credentials failed inside the mandatory window.
    #[error("Error when retrieving refreshed credentials: {0}")]
    CredentialRefresh(String),

    /// The connection attempt timed out.
    #[error("Connect timeout on endpoint URL: \"{url}\"")]
    ConnectTimeout {
        /// The URL that was being connected to.
        url: String,
    },

    /// The response (or part of it) did not arrive within the read timeout.
    #[error("Read timeout on endpoint URL: \"{url}\"")]
    ReadTimeout {
        /// The URL that was being read from.
        url: String,
    },

    /// The peer closed the connection before the full response arrived.
    #[error("Connection was closed before the response was received from \"{url}\"")]
    ConnectionClosed {
        /// The URL of the interrupted exchange.
        url: String,
    },

    /// The endpoint could not be reached at all.
    ///
    /// Connect failures that look like DNS resolution problems are wrapped
    /// into this variant so a misconfigured region produces an actionable
    /// message naming the URL instead of a bare resolver error.
    #[error("Could not connect to the endpoint URL: \"{url}\"")]
    EndpointConnection {
        /// The unreachable URL.
        url: String,
        /// The originating transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The configured proxy could not be used for the request.
    #[error("Failed to connect through proxy for \"{url}\"")]
    ProxyConnection {
        /// The URL the proxied request was destined for.
        url: String,
        /// The originating transport error.
        #[source]
        source: reqwest::Error,
    },

    /// A network-level error that fits no more specific variant.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// The service answered with an error response (HTTP status >= 300).
    ///
    /// # Fields
    ///
    /// * `code` - The service error code (e.g. `NoSuchBucket`)
    /// * `message` - The service error message
    /// * `status` - The HTTP status code
    /// * `operation` - The operation that was being invoked
    #[error("An error occurred ({code}) when calling the {operation} operation: {message}")]
    Service {
        /// The parsed service error code.
        code: String,
        /// The parsed service error message.
        message: String,
        /// The HTTP status code of the response.
        status: StatusCode,
        /// The operation name.
        operation: String,
    },

    /// The response body could not be parsed.
    ///
    /// The raw body is preserved so production failures can be debugged
    /// without re-issuing the request.
    #[error("Failed to parse response (status {status}): {detail}")]
    ResponseParse {
        /// The raw response body.
        raw_body: String,
        /// What went wrong during parsing.
        detail: String,
        /// The HTTP status code of the response.
        status: u16,
    },

    /// Fewer body bytes arrived than the response declared.
    #[error("{actual} read, but total bytes expected is {expected}")]
    IncompleteRead {
        /// Bytes actually read.
        actual: u64,
        /// Bytes the response declared via content length.
        expected: u64,
    },

    /// An event-stream frame violated the framing protocol.
    #[error("Malformed event stream frame: {0}")]
    EventStreamFrame(String),

    /// The service returned the same continuation token twice in a row.
    ///
    /// Raised by the paginator to avoid looping forever against a
    /// misbehaving service.
    #[error("The same next token was received twice: {token}")]
    PaginationLoop {
        /// The repeated token.
        token: String,
    },

    /// A waiter gave up after its configured number of attempts.
    #[error("Waiter {name} failed: max attempts exceeded ({attempts})")]
    WaiterMaxAttempts {
        /// The waiter name.
        name: String,
        /// How many times the operation was polled.
        attempts: u32,
        /// The last response observed.
        last_response: Value,
    },

    /// A waiter reached a terminal failure state or saw an unexpected error.
    #[error("Waiter {name} failed: {reason}")]
    WaiterFailure {
        /// The waiter name.
        name: String,
        /// Why the waiter terminated.
        reason: String,
        /// The last response observed.
        last_response: Value,
    },

    /// The request description could not be built from the parameters.
    #[error("Failed to serialize request: {0}")]
    Serialization(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Returns `true` if this error is potentially retryable.
    ///
    /// Network-class errors (timeouts, closed connections, unreachable
    /// endpoints) are retryable. Service errors are retryable for 5xx
    /// statuses, HTTP 429, and throttling error codes. Everything else —
    /// configuration, credentials, protocol violations, control-flow
    /// failures — is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::ConnectTimeout { .. }
            | Error::ReadTimeout { .. }
            | Error::ConnectionClosed { .. }
            | Error::EndpointConnection { .. }
            | Error::ProxyConnection { .. }
            | Error::Network(_) => true,
            Error::Service { code, status, .. } => {
                status.is_server_error()
                    || status.as_u16() == 429
                    || THROTTLING_ERROR_CODES.contains(&code.as_str())
            }
            _ => false,
        }
    }

    /// Returns the HTTP status code if this error carries one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Service { status, .. } => Some(*status),
            Error::ResponseParse { status, .. } => StatusCode::from_u16(*status).ok(),
            _ => None,
        }
    }

    /// Returns the service error code if this is a service error.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Error::Service { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Returns the raw response body if this error preserved one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::ResponseParse { raw_body, .. } => Some(raw_body),
            _ => None,
        }
    }
}

/// A specialized `Result` type for service-client calls.
pub type Result<T> = std::result::Result<T, Error>;
