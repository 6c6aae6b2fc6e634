//! Endpoint definition and authentication settings.

use crate::config::{AuthType, SoapVersion};
use crate::error::SoapError;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use url::Url;

/// Raw endpoint settings as supplied by configuration or parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Service URL (http or https)
    pub url: String,

    /// Display name, derived from the URL when absent
    pub name: Option<String>,

    pub description: Option<String>,

    /// Authentication scheme
    pub auth_type: AuthType,

    pub username: Option<String>,

    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Client certificate (PEM)
    pub cert_path: Option<String>,

    /// Client key (PEM), when not bundled with the certificate
    pub key_path: Option<String>,

    /// Verify the server certificate
    pub verify_ssl: bool,

    /// HTTP(S) proxy for this endpoint
    pub proxy_url: Option<String>,

    /// Default request timeout (seconds)
    pub timeout_secs: u64,

    /// Default SOAP version
    pub soap_version: SoapVersion,

    /// Headers sent with every request, below per-request headers
    pub default_headers: BTreeMap<String, String>,

    /// Allowed operation names or glob patterns (empty = allow all)
    pub supported_operations: Vec<String>,

    /// WSDL location, `<url>?wsdl` when absent
    pub wsdl_url: Option<String>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            name: None,
            description: None,
            auth_type: AuthType::None,
            username: None,
            password: None,
            cert_path: None,
            key_path: None,
            verify_ssl: true,
            proxy_url: None,
            timeout_secs: 30,
            soap_version: SoapVersion::Soap11,
            default_headers: BTreeMap::new(),
            supported_operations: Vec::new(),
            wsdl_url: None,
        }
    }
}

impl EndpointConfig {
    /// Settings for `url` with every other field at its default.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Resolved authentication settings.
#[derive(Clone, PartialEq, Eq, Default)]
pub enum AuthConfig {
    #[default]
    None,
    Basic { username: String, password: String },
    Digest { username: String, password: String },
    Ntlm { username: String, password: String },
    Certificate {
        cert_path: PathBuf,
        key_path: Option<PathBuf>,
    },
}

impl AuthConfig {
    /// Assemble settings for `kind`, checking that its credentials are present.
    pub fn from_parts(
        kind: AuthType,
        username: Option<&str>,
        password: Option<&str>,
        cert_path: Option<&str>,
        key_path: Option<&str>,
    ) -> Result<Self, SoapError> {
        let present = |v: Option<&str>| v.filter(|s| !s.is_empty()).map(str::to_string);

        let credentials = || match (present(username), present(password)) {
            (Some(username), Some(password)) => Ok((username, password)),
            _ => Err(SoapError::EndpointConfig(format!(
                "{} auth requires username and password",
                kind
            ))),
        };

        Ok(match kind {
            AuthType::None => Self::None,
            AuthType::Basic => {
                let (username, password) = credentials()?;
                Self::Basic { username, password }
            }
            AuthType::Digest => {
                let (username, password) = credentials()?;
                Self::Digest { username, password }
            }
            AuthType::Ntlm => {
                let (username, password) = credentials()?;
                Self::Ntlm { username, password }
            }
            AuthType::Certificate => {
                let cert_path = present(cert_path).ok_or_else(|| {
                    SoapError::EndpointConfig("certificate auth requires cert_path".to_string())
                })?;
                Self::Certificate {
                    cert_path: PathBuf::from(cert_path),
                    key_path: present(key_path).map(PathBuf::from),
                }
            }
        })
    }

    pub fn kind(&self) -> AuthType {
        match self {
            Self::None => AuthType::None,
            Self::Basic { .. } => AuthType::Basic,
            Self::Digest { .. } => AuthType::Digest,
            Self::Ntlm { .. } => AuthType::Ntlm,
            Self::Certificate { .. } => AuthType::Certificate,
        }
    }
}

// Passwords stay out of debug output and logs.
impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. }
            | Self::Digest { username, .. }
            | Self::Ntlm { username, .. } => f
                .debug_struct(self.kind().as_str())
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Certificate {
                cert_path,
                key_path,
            } => f
                .debug_struct("certificate")
                .field("cert_path", cert_path)
                .field("key_path", key_path)
                .finish(),
        }
    }
}

/// Validated, immutable endpoint.
#[derive(Debug, Clone)]
pub struct Endpoint {
    url: Url,
    name: String,
    description: Option<String>,
    auth: AuthConfig,
    verify_ssl: bool,
    proxy_url: Option<String>,
    timeout_secs: u64,
    soap_version: SoapVersion,
    default_headers: BTreeMap<String, String>,
    supported_operations: Vec<String>,
    operation_patterns: Vec<Pattern>,
    wsdl_url: Option<String>,
}

impl TryFrom<EndpointConfig> for Endpoint {
    type Error = SoapError;

    fn try_from(config: EndpointConfig) -> Result<Self, Self::Error> {
        let url = parse_service_url(&config.url)?;

        let auth = AuthConfig::from_parts(
            config.auth_type,
            config.username.as_deref(),
            config.password.as_deref(),
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        if config.timeout_secs == 0 {
            return Err(SoapError::EndpointConfig(
                "timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(proxy) = &config.proxy_url {
            Url::parse(proxy).map_err(|e| {
                SoapError::EndpointConfig(format!("Invalid proxy URL '{}': {}", proxy, e))
            })?;
        }

        let operation_patterns = config
            .supported_operations
            .iter()
            .filter_map(|pattern| Pattern::new(pattern).ok())
            .collect();

        let name = config
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| name_from_url(&url));

        Ok(Self {
            url,
            name,
            description: config.description,
            auth,
            verify_ssl: config.verify_ssl,
            proxy_url: config.proxy_url,
            timeout_secs: config.timeout_secs,
            soap_version: config.soap_version,
            default_headers: config.default_headers,
            supported_operations: config.supported_operations,
            operation_patterns,
            wsdl_url: config.wsdl_url,
        })
    }
}

impl Endpoint {
    /// Endpoint for `url` with default settings.
    pub fn from_url(url: &str) -> Result<Self, SoapError> {
        Self::try_from(EndpointConfig::new(url))
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    pub fn requires_auth(&self) -> bool {
        self.auth != AuthConfig::None
    }

    pub fn verify_ssl(&self) -> bool {
        self.verify_ssl
    }

    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn soap_version(&self) -> SoapVersion {
        self.soap_version
    }

    pub fn default_headers(&self) -> &BTreeMap<String, String> {
        &self.default_headers
    }

    pub fn supported_operations(&self) -> &[String] {
        &self.supported_operations
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "https"
    }

    /// URL without query or fragment.
    pub fn base_url(&self) -> String {
        let mut base = self.url.clone();
        base.set_query(None);
        base.set_fragment(None);
        base.to_string()
    }

    /// Configured WSDL location, or `<url>?wsdl`.
    pub fn wsdl_url(&self) -> String {
        match &self.wsdl_url {
            Some(url) => url.clone(),
            None => format!("{}?wsdl", self.base_url()),
        }
    }

    /// Whether the operation is allowed. An empty allow-list allows everything;
    /// entries match exactly or as glob patterns.
    pub fn supports_operation(&self, operation: &str) -> bool {
        if self.supported_operations.is_empty() {
            return true;
        }
        self.supported_operations.iter().any(|op| op == operation)
            || self
                .operation_patterns
                .iter()
                .any(|pattern| pattern.matches(operation))
    }
}

/// Parse and check an http(s) URL with a host.
pub fn parse_service_url(raw: &str) -> Result<Url, SoapError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(SoapError::EndpointConfig("URL is required".to_string()));
    }
    let url = Url::parse(raw)
        .map_err(|e| SoapError::EndpointConfig(format!("Invalid URL '{}': {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(SoapError::EndpointConfig(format!(
            "URL must use http or https: {}",
            raw
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(SoapError::EndpointConfig(format!(
            "URL must have a host: {}",
            raw
        )));
    }
    Ok(url)
}

fn name_from_url(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    let netloc = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };
    format!("{}{}", netloc, url.path())
        .replace('/', "_")
        .trim_matches('_')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(url: &str) -> EndpointConfig {
        EndpointConfig::new(url)
    }

    #[test]
    fn test_valid_endpoint_with_derived_name() {
        let endpoint = Endpoint::from_url("https://svc.example.com:8443/api/users?x=1").unwrap();
        assert_eq!(endpoint.name(), "svc.example.com:8443_api_users");
        assert_eq!(endpoint.base_url(), "https://svc.example.com:8443/api/users");
        assert_eq!(endpoint.wsdl_url(), "https://svc.example.com:8443/api/users?wsdl");
        assert!(endpoint.is_secure());
        assert!(!endpoint.requires_auth());
        assert_eq!(endpoint.timeout_secs(), 30);
    }

    #[test]
    fn test_invalid_urls_fail_fast() {
        for url in ["", "not a url", "ftp://host/file", "http://"] {
            let err = Endpoint::from_url(url).unwrap_err();
            assert!(matches!(err, SoapError::EndpointConfig(_)), "{}", url);
        }
    }

    #[test]
    fn test_credentials_required() {
        let mut cfg = config("http://svc.local/soap");
        cfg.auth_type = AuthType::Basic;
        cfg.username = Some("alice".to_string());
        let err = Endpoint::try_from(cfg.clone()).unwrap_err();
        assert!(err.to_string().contains("basic auth requires username and password"));

        cfg.password = Some("secret".to_string());
        let endpoint = Endpoint::try_from(cfg).unwrap();
        assert_eq!(endpoint.auth().kind(), AuthType::Basic);
        assert!(!format!("{:?}", endpoint.auth()).contains("secret"));
    }

    #[test]
    fn test_certificate_requires_path() {
        let mut cfg = config("https://svc.local/soap");
        cfg.auth_type = AuthType::Certificate;
        assert!(Endpoint::try_from(cfg.clone()).is_err());
        cfg.cert_path = Some("/etc/client.pem".to_string());
        assert!(Endpoint::try_from(cfg).is_ok());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut cfg = config("http://svc.local/soap");
        cfg.timeout_secs = 0;
        assert!(Endpoint::try_from(cfg).is_err());
    }

    #[test]
    fn test_supported_operations() {
        let endpoint = Endpoint::from_url("http://svc.local").unwrap();
        assert!(endpoint.supports_operation("Anything"));

        let mut cfg = config("http://svc.local");
        cfg.supported_operations = vec!["GetUser".to_string(), "List*".to_string()];
        let endpoint = Endpoint::try_from(cfg).unwrap();
        assert!(endpoint.supports_operation("GetUser"));
        assert!(endpoint.supports_operation("ListOrders"));
        assert!(!endpoint.supports_operation("DeleteUser"));
    }

    #[test]
    fn test_explicit_name_and_wsdl() {
        let mut cfg = config("http://svc.local/soap");
        cfg.name = Some("users".to_string());
        cfg.wsdl_url = Some("http://svc.local/users.wsdl".to_string());
        let endpoint = Endpoint::try_from(cfg).unwrap();
        assert_eq!(endpoint.name(), "users");
        assert_eq!(endpoint.wsdl_url(), "http://svc.local/users.wsdl");
    }
}
