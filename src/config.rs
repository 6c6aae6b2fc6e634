//! Configuration types for the SOAP client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// SOAP 1.1 envelope namespace.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
/// SOAP 1.2 envelope namespace.
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// Main configuration for the SOAP client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// HTTP transport settings
    pub transport: TransportConfig,

    /// Response cache settings
    pub cache: CacheConfig,

    /// Domain service settings
    pub service: ServiceConfig,

    /// Batch execution settings
    pub batch: BatchConfig,
}

/// HTTP transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// User-Agent sent when the caller sets none
    pub user_agent: String,

    /// Default request timeout (seconds)
    pub timeout_secs: u64,

    /// Verify TLS certificates
    pub validate_certs: bool,

    /// Automatic retries on 429/500/502/503/504 and connection failures
    pub max_retries: u32,

    /// Allow the automatic retry for POST (SOAP calls are not idempotent)
    pub retry_post: bool,

    /// Base delay of the exponential backoff (milliseconds)
    pub backoff_factor_ms: u64,

    /// Timeout for connectivity probes (seconds)
    pub connectivity_timeout_secs: u64,

    /// Timeout for WSDL downloads (seconds)
    pub wsdl_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("zentinel-soap-client/{}", env!("CARGO_PKG_VERSION")),
            timeout_secs: 30,
            validate_certs: true,
            max_retries: 0,
            retry_post: false,
            backoff_factor_ms: 1000,
            connectivity_timeout_secs: 5,
            wsdl_timeout_secs: 10,
        }
    }
}

impl TransportConfig {
    /// Default request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime (seconds)
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 300 } // 5 minutes
    }
}

/// Domain service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Base delay between response-level retries (milliseconds)
    pub retry_delay_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 1000,
        }
    }
}

/// Batch execution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Default worker count for parallel batches
    pub max_workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { max_workers: 5 }
    }
}

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    #[default]
    #[serde(rename = "1.1")]
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    #[serde(rename = "1.2")]
    Soap12,
}

impl SoapVersion {
    /// Envelope namespace URI for this version.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_NS,
            Self::Soap12 => SOAP_12_NS,
        }
    }

    /// Envelope prefix used when building messages.
    pub fn prefix(&self) -> &'static str {
        "soap"
    }

    /// Base Content-Type for this version.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Soap11 => "text/xml; charset=utf-8",
            Self::Soap12 => "application/soap+xml; charset=utf-8",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Soap11 => "1.1",
            Self::Soap12 => "1.2",
        }
    }
}

impl fmt::Display for SoapVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoapVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.1" => Ok(Self::Soap11),
            "1.2" => Ok(Self::Soap12),
            other => Err(format!("soap_version must be '1.1' or '1.2', got '{}'", other)),
        }
    }
}

/// Supported authentication schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    #[default]
    None,
    Basic,
    Digest,
    Ntlm,
    Certificate,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Basic => "basic",
            Self::Digest => "digest",
            Self::Ntlm => "ntlm",
            Self::Certificate => "certificate",
        }
    }

    /// Whether the scheme needs a username and password.
    pub fn needs_credentials(&self) -> bool {
        matches!(self, Self::Basic | Self::Digest | Self::Ntlm)
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "basic" => Ok(Self::Basic),
            "digest" => Ok(Self::Digest),
            "ntlm" => Ok(Self::Ntlm),
            "certificate" => Ok(Self::Certificate),
            other => Err(format!("Unsupported auth_type: {}", other)),
        }
    }
}
