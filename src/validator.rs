//! Validation of requests, endpoints and SOAP documents.

use crate::config::{AuthType, SOAP_11_NS, SOAP_12_NS};
use crate::endpoint::EndpointConfig;
use crate::error::{Violation, ViolationCode};
use crate::parser::{self, XmlElement};
use crate::request::SoapRequest;
use serde::Serialize;
use tracing::debug;
use url::Url;

/// Bodies above this size draw a warning.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Timeouts above this draw a warning.
pub const HIGH_TIMEOUT_SECS: u64 = 300;

/// Findings of one validation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Problems that make the input unusable
    pub errors: Vec<Violation>,
    /// Problems worth reporting that do not block
    pub warnings: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, violation: Violation) {
        self.errors.push(violation);
    }

    pub fn add_warning(&mut self, violation: Violation) {
        self.warnings.push(violation);
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}

/// Stateless validation rules.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationService;

impl ValidationService {
    pub fn new() -> Self {
        Self
    }

    /// Check a request before it is sent.
    pub fn validate_request(&self, request: &SoapRequest) -> ValidationReport {
        let mut report = ValidationReport::default();

        check_url(request.endpoint_url(), "endpoint_url", &mut report);

        match parser::parse_document(request.body()) {
            Ok(root) => {
                if !is_envelope(&root) {
                    report.add_warning(Violation::with_location(
                        ViolationCode::MissingEnvelope,
                        "Body is not a SOAP envelope",
                        "body",
                    ));
                }
            }
            Err(e) => report.add_error(Violation::with_location(
                ViolationCode::InvalidXml,
                format!("Body is not well-formed XML: {}", e),
                "body",
            )),
        }

        let size = request.body().len();
        if size > MAX_BODY_BYTES {
            report.add_warning(Violation::new(
                ViolationCode::BodyTooLarge,
                format!("Body is {} bytes, larger than {} bytes", size, MAX_BODY_BYTES),
            ));
        }

        check_timeout(request.timeout_secs(), &mut report);

        if request.soap_action().is_empty() {
            report.add_warning(Violation::new(
                ViolationCode::MissingSoapAction,
                "No SOAP action given",
            ));
        }

        debug!(
            request_id = %request.id(),
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Request validated"
        );
        report
    }

    /// Check endpoint settings: URL, auth completeness, timeout and proxy.
    pub fn validate_endpoint(&self, config: &EndpointConfig) -> ValidationReport {
        let mut report = ValidationReport::default();

        if let Some(url) = check_url(&config.url, "url", &mut report) {
            if url.scheme() == "http" {
                report.add_warning(Violation::with_location(
                    ViolationCode::InsecureTransport,
                    "Endpoint does not use HTTPS",
                    "url",
                ));
            }
        }

        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        if config.auth_type.needs_credentials()
            && !(present(&config.username) && present(&config.password))
        {
            report.add_error(Violation::with_location(
                ViolationCode::MissingCredentials,
                format!("{} auth requires username and password", config.auth_type),
                "auth_type",
            ));
        }
        if config.auth_type == AuthType::Certificate && !present(&config.cert_path) {
            report.add_error(Violation::with_location(
                ViolationCode::MissingCertificate,
                "certificate auth requires cert_path",
                "cert_path",
            ));
        }

        check_timeout(config.timeout_secs, &mut report);

        if let Some(proxy) = config.proxy_url.as_deref().filter(|p| !p.is_empty()) {
            if Url::parse(proxy).is_err() {
                report.add_error(Violation::with_location(
                    ViolationCode::InvalidUrl,
                    format!("Invalid proxy URL: {}", proxy),
                    "proxy_url",
                ));
            }
        }

        debug!(
            url = %config.url,
            auth = %config.auth_type,
            errors = report.errors.len(),
            "Endpoint validated"
        );
        report
    }

    /// Check that `xml` is a SOAP envelope with a Body.
    pub fn validate_soap_structure(&self, xml: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        let root = match parser::parse_document(xml) {
            Ok(root) => root,
            Err(e) => {
                report.add_error(Violation::new(ViolationCode::InvalidXml, e.to_string()));
                return report;
            }
        };

        if root.local_name() != "Envelope" {
            report.add_error(Violation::new(
                ViolationCode::MissingEnvelope,
                format!("Root element is {}, expected Envelope", root.name),
            ));
            return report;
        }

        if !is_envelope(&root) {
            report.add_error(Violation::new(
                ViolationCode::MissingSoapNamespace,
                "Envelope is not in a SOAP namespace",
            ));
        }

        if root.child("Body").is_none() {
            report.add_error(Violation::new(
                ViolationCode::MissingBody,
                "Envelope has no Body element",
            ));
        }

        report
    }

    /// Check a document against an XSD.
    ///
    /// Both documents must be well-formed. Schema rules themselves are not
    /// evaluated; that is reported as a warning.
    pub fn validate_xml_against_schema(&self, xml: &str, xsd: &str) -> ValidationReport {
        let mut report = ValidationReport::default();

        if let Err(e) = parser::parse_document(xml) {
            report.add_error(Violation::with_location(
                ViolationCode::InvalidXml,
                e.to_string(),
                "xml",
            ));
        }
        if let Err(e) = parser::parse_document(xsd) {
            report.add_error(Violation::with_location(
                ViolationCode::InvalidXml,
                e.to_string(),
                "schema",
            ));
        }

        if report.is_valid() {
            report.add_warning(Violation::new(
                ViolationCode::SchemaValidationUnavailable,
                "XSD validation is not available; only well-formedness was checked",
            ));
        }
        report
    }
}

fn is_envelope(root: &XmlElement) -> bool {
    root.local_name() == "Envelope"
        && matches!(root.namespace.as_deref(), Some(SOAP_11_NS) | Some(SOAP_12_NS))
}

fn check_url(raw: &str, field: &str, report: &mut ValidationReport) -> Option<Url> {
    let url = match Url::parse(raw.trim()) {
        Ok(url) => url,
        Err(e) => {
            report.add_error(Violation::with_location(
                ViolationCode::InvalidUrl,
                format!("Invalid URL '{}': {}", raw, e),
                field,
            ));
            return None;
        }
    };

    if !matches!(url.scheme(), "http" | "https") {
        report.add_error(Violation::with_location(
            ViolationCode::UnsupportedScheme,
            format!("Unsupported URL scheme: {}", url.scheme()),
            field,
        ));
        return None;
    }

    if url.host_str().map_or(true, str::is_empty) {
        report.add_error(Violation::with_location(
            ViolationCode::InvalidUrl,
            "URL must have a host",
            field,
        ));
        return None;
    }

    Some(url)
}

fn check_timeout(timeout_secs: u64, report: &mut ValidationReport) {
    if timeout_secs == 0 {
        report.add_error(Violation::with_location(
            ViolationCode::InvalidTimeout,
            "Timeout must be greater than 0",
            "timeout",
        ));
    } else if timeout_secs > HIGH_TIMEOUT_SECS {
        report.add_warning(Violation::with_location(
            ViolationCode::HighTimeout,
            format!(
                "Timeout of {}s is above the recommended {}s",
                timeout_secs, HIGH_TIMEOUT_SECS
            ),
            "timeout",
        ));
    }
}
