//! Error types for the SOAP client.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// SOAP client errors.
#[derive(Error, Debug)]
pub enum SoapError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Endpoint configuration error: {0}")]
    EndpointConfig(String),

    #[error("XML construction error: {0}")]
    Construction(String),

    #[error("XML parsing error: {0}")]
    XmlParse(String),

    #[error("Invalid SOAP action: {0}")]
    InvalidAction(String),

    #[error("Operation '{operation}' is not supported by endpoint '{endpoint}'")]
    OperationNotSupported { operation: String, endpoint: String },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Request failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("Extraction error: {0}")]
    Extraction(String),
}

impl SoapError {
    /// Whether this error came out of the transport layer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RetriesExhausted { .. })
    }
}

/// Failures surfaced by the HTTP transport adapter.
///
/// Each kind is distinct so the orchestrator can map it to a response status
/// without inspecting message text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Timeout after {timeout_secs}s calling {url}")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("TLS error calling {url}: {reason}")]
    Tls { url: String, reason: String },

    #[error("Connection error calling {url}: {reason}")]
    Connection { url: String, reason: String },

    #[error("HTTP error calling {url}: {reason}")]
    Http { url: String, reason: String },
}

impl TransportError {
    /// Target URL of the failed call.
    pub fn url(&self) -> &str {
        match self {
            Self::Timeout { url, .. }
            | Self::Tls { url, .. }
            | Self::Connection { url, .. }
            | Self::Http { url, .. } => url,
        }
    }

    /// Short kind label used in logs and result mappings.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Tls { .. } => "tls",
            Self::Connection { .. } => "connection",
            Self::Http { .. } => "http",
        }
    }
}

/// Validation finding codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViolationCode {
    /// URL is empty, unparsable or lacks a host
    InvalidUrl,
    /// URL scheme is not http/https
    UnsupportedScheme,
    /// Endpoint is reached over plain HTTP
    InsecureTransport,
    /// basic/digest/ntlm without username or password
    MissingCredentials,
    /// certificate auth without a certificate path
    MissingCertificate,
    /// Timeout is zero
    InvalidTimeout,
    /// Timeout above the recommended ceiling
    HighTimeout,
    /// Content is not well-formed XML
    InvalidXml,
    /// No SOAP Envelope element
    MissingEnvelope,
    /// Envelope lacks a SOAP namespace declaration
    MissingSoapNamespace,
    /// Envelope without a Body element
    MissingBody,
    /// Body larger than 1 MiB
    BodyTooLarge,
    /// No SOAP action given
    MissingSoapAction,
    /// Schema validation could not be performed
    SchemaValidationUnavailable,
}

impl ViolationCode {
    /// Get the string code for this violation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "INVALID_URL",
            Self::UnsupportedScheme => "UNSUPPORTED_SCHEME",
            Self::InsecureTransport => "INSECURE_TRANSPORT",
            Self::MissingCredentials => "MISSING_CREDENTIALS",
            Self::MissingCertificate => "MISSING_CERTIFICATE",
            Self::InvalidTimeout => "INVALID_TIMEOUT",
            Self::HighTimeout => "HIGH_TIMEOUT",
            Self::InvalidXml => "INVALID_XML",
            Self::MissingEnvelope => "MISSING_ENVELOPE",
            Self::MissingSoapNamespace => "MISSING_SOAP_NAMESPACE",
            Self::MissingBody => "MISSING_BODY",
            Self::BodyTooLarge => "BODY_TOO_LARGE",
            Self::MissingSoapAction => "MISSING_SOAP_ACTION",
            Self::SchemaValidationUnavailable => "SCHEMA_VALIDATION_UNAVAILABLE",
        }
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Violation code
    pub code: ViolationCode,
    /// Human-readable message
    pub message: String,
    /// Field or XML location hint (if available)
    pub location: Option<String>,
}

impl Violation {
    /// Create a new violation.
    pub fn new(code: ViolationCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            location: None,
        }
    }

    /// Create a violation with location.
    pub fn with_location(
        code: ViolationCode,
        message: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            location: Some(location.into()),
        }
    }
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} ({})", self.message, location),
            None => f.write_str(&self.message),
        }
    }
}
