//! SOAP request entity.

use crate::body::XmlBody;
use crate::config::SoapVersion;
use crate::endpoint::AuthConfig;
use crate::envelope::SoapEnvelope;
use crate::error::SoapError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A single dispatch unit.
///
/// `Content-Type` (and `SOAPAction` for 1.1) are filled in at construction
/// when the caller has not set them. Headers can only be added before the
/// request is handed to a repository, which takes it by reference.
#[derive(Debug, Clone)]
pub struct SoapRequest {
    id: String,
    endpoint_url: String,
    soap_action: String,
    body: String,
    headers: BTreeMap<String, String>,
    namespace: Option<String>,
    soap_version: SoapVersion,
    timeout_secs: u64,
    auth: AuthConfig,
    proxy_url: Option<String>,
    verify_ssl: bool,
    created_at: DateTime<Utc>,
}

impl SoapRequest {
    /// Create a request. `body` is the wire body, usually a built envelope.
    pub fn new(
        endpoint_url: &str,
        soap_action: &str,
        body: impl Into<String>,
        soap_version: SoapVersion,
        timeout_secs: u64,
    ) -> Result<Self, SoapError> {
        let body = body.into();
        if endpoint_url.trim().is_empty() {
            return Err(SoapError::InvalidInput("endpoint_url is required".to_string()));
        }
        if body.trim().is_empty() {
            return Err(SoapError::InvalidInput("body is required".to_string()));
        }
        if timeout_secs == 0 {
            return Err(SoapError::InvalidInput(
                "timeout must be greater than 0".to_string(),
            ));
        }

        let mut request = Self {
            id: Uuid::new_v4().to_string(),
            endpoint_url: endpoint_url.trim().to_string(),
            soap_action: soap_action.trim().to_string(),
            body,
            headers: BTreeMap::new(),
            namespace: None,
            soap_version,
            timeout_secs,
            auth: AuthConfig::None,
            proxy_url: None,
            verify_ssl: true,
            created_at: Utc::now(),
        };
        request.ensure_soap_headers();
        Ok(request)
    }

    fn ensure_soap_headers(&mut self) {
        match self.soap_version {
            SoapVersion::Soap11 => {
                self.set_default_header("Content-Type", SoapVersion::Soap11.content_type());
                if !self.soap_action.is_empty() {
                    let value = format!("\"{}\"", self.soap_action);
                    self.set_default_header("SOAPAction", &value);
                }
            }
            SoapVersion::Soap12 => {
                let mut content_type = SoapVersion::Soap12.content_type().to_string();
                if !self.soap_action.is_empty() {
                    content_type.push_str(&format!("; action=\"{}\"", self.soap_action));
                }
                self.set_default_header("Content-Type", &content_type);
            }
        }
    }

    /// Namespace carried for envelope wrapping.
    pub fn with_namespace(mut self, namespace: Option<&str>) -> Self {
        self.namespace = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        self
    }

    /// Authentication the repository applies when sending.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = auth;
        self
    }

    /// Proxy the repository routes through.
    pub fn with_proxy(mut self, proxy_url: Option<&str>) -> Self {
        self.proxy_url = proxy_url.map(str::to_string);
        self
    }

    /// Whether the server certificate is checked.
    pub fn with_verify_ssl(mut self, verify_ssl: bool) -> Self {
        self.verify_ssl = verify_ssl;
        self
    }

    /// Set a header, replacing a previous value of the same name.
    pub fn add_header(&mut self, key: &str, value: &str) -> Result<(), SoapError> {
        if key.trim().is_empty() || value.is_empty() {
            return Err(SoapError::InvalidInput(
                "Header key and value must not be empty".to_string(),
            ));
        }
        let existing = self
            .headers
            .keys()
            .find(|k| k.eq_ignore_ascii_case(key))
            .cloned();
        if let Some(existing) = existing {
            self.headers.remove(&existing);
        }
        self.headers.insert(key.to_string(), value.to_string());
        Ok(())
    }

    /// Set a header only when no header of that name exists yet.
    pub fn set_default_header(&mut self, key: &str, value: &str) {
        if self.header(key).is_none() {
            self.headers.insert(key.to_string(), value.to_string());
        }
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    pub fn soap_action(&self) -> &str {
        &self.soap_action
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn soap_version(&self) -> SoapVersion {
        self.soap_version
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }

    pub fn auth(&self) -> &AuthConfig {
        &self.auth
    }

    pub fn proxy_url(&self) -> Option<&str> {
        self.proxy_url.as_deref()
    }

    pub fn verify_ssl(&self) -> bool {
        self.verify_ssl
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Full envelope for the body.
    ///
    /// A body that already is a SOAP envelope is returned untouched; anything
    /// else is wrapped, declaring the request namespace as `ns`.
    pub fn soap_envelope(&self) -> Result<String, SoapError> {
        if XmlBody::permissive(self.body.clone()).is_soap_envelope() {
            return Ok(self.body.clone());
        }
        let mut envelope = SoapEnvelope::new(&self.body, self.soap_version)?;
        if let Some(ns) = &self.namespace {
            envelope = envelope.with_namespace("ns", ns)?;
        }
        Ok(envelope.build())
    }
}

/// Requests are identified by their id.
impl PartialEq for SoapRequest {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SoapRequest {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soap11_headers() {
        let request =
            SoapRequest::new("http://svc.local/soap", "GetUser", "<GetUser/>", SoapVersion::Soap11, 30)
                .unwrap();
        assert_eq!(request.header("content-type"), Some("text/xml; charset=utf-8"));
        assert_eq!(request.header("SOAPAction"), Some("\"GetUser\""));
        assert!(!request.id().is_empty());
    }

    #[test]
    fn test_soap12_headers() {
        let request =
            SoapRequest::new("http://svc.local/soap", "GetUser", "<GetUser/>", SoapVersion::Soap12, 30)
                .unwrap();
        assert_eq!(
            request.header("Content-Type"),
            Some("application/soap+xml; charset=utf-8; action=\"GetUser\"")
        );
        assert_eq!(request.header("SOAPAction"), None);
    }

    #[test]
    fn test_invariants() {
        assert!(SoapRequest::new("", "A", "<a/>", SoapVersion::Soap11, 30).is_err());
        assert!(SoapRequest::new("http://x", "A", "  ", SoapVersion::Soap11, 30).is_err());
        assert!(SoapRequest::new("http://x", "A", "<a/>", SoapVersion::Soap11, 0).is_err());
    }

    #[test]
    fn test_add_header() {
        let mut request =
            SoapRequest::new("http://svc.local", "A", "<a/>", SoapVersion::Soap11, 30).unwrap();
        assert!(request.add_header("", "x").is_err());
        assert!(request.add_header("X-Trace", "").is_err());
        request.add_header("content-type", "text/xml").unwrap();
        assert_eq!(request.header("Content-Type"), Some("text/xml"));
        assert_eq!(request.headers().len(), 2);

        request.set_default_header("X-Trace", "abc");
        request.set_default_header("x-trace", "def");
        assert_eq!(request.header("X-TRACE"), Some("abc"));
    }

    #[test]
    fn test_ids_are_unique() {
        let a = SoapRequest::new("http://svc.local", "A", "<a/>", SoapVersion::Soap11, 30).unwrap();
        let b = SoapRequest::new("http://svc.local", "A", "<a/>", SoapVersion::Soap11, 30).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_soap_envelope_wraps_or_passes_through() {
        let request = SoapRequest::new("http://svc.local", "A", "<a/>", SoapVersion::Soap11, 30)
            .unwrap()
            .with_namespace(Some("urn:x"));
        let envelope = request.soap_envelope().unwrap();
        assert!(envelope.contains("xmlns:ns=\"urn:x\""));
        assert!(envelope.contains("<soap:Body>\n<a/>\n</soap:Body>"));

        let wrapped = SoapRequest::new("http://svc.local", "A", envelope.clone(), SoapVersion::Soap11, 30)
            .unwrap();
        assert_eq!(wrapped.soap_envelope().unwrap(), envelope);
    }
}
