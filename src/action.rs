//! SOAP action value object.

use crate::config::SoapVersion;
use crate::error::SoapError;
use std::fmt;

/// An operation name with an optional namespace URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SoapAction {
    value: String,
    namespace: Option<String>,
}

impl SoapAction {
    /// Create an action; the name must be non-empty and contain no whitespace.
    pub fn new(value: &str, namespace: Option<&str>) -> Result<Self, SoapError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(SoapError::InvalidAction(
                "SOAP action must not be empty".to_string(),
            ));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(SoapError::InvalidAction(format!(
                "SOAP action must not contain whitespace: '{}'",
                value
            )));
        }
        Ok(Self {
            value: value.to_string(),
            namespace: namespace.filter(|ns| !ns.is_empty()).map(str::to_string),
        })
    }

    /// Create an action without namespace.
    pub fn from_string(value: &str) -> Result<Self, SoapError> {
        Self::new(value, None)
    }

    /// Split `namespace#Action` or `namespace/Action`.
    ///
    /// A value containing `://` without `#` is kept whole, since the slash
    /// then belongs to a URI action.
    pub fn from_qualified_name(qualified: &str) -> Result<Self, SoapError> {
        if let Some((namespace, action)) = qualified.rsplit_once('#') {
            return Self::new(action, Some(namespace));
        }
        if !qualified.contains("://") {
            if let Some((namespace, action)) = qualified.rsplit_once('/') {
                return Self::new(action, Some(namespace));
            }
        }
        Self::new(qualified, None)
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// `namespace<separator>value`, or just the value without namespace.
    pub fn qualified_name(&self, separator: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{}{}{}", ns, separator, self.value),
            None => self.value.clone(),
        }
    }

    /// Whether the action value itself is an absolute http(s) URI.
    pub fn is_uri(&self) -> bool {
        match url::Url::parse(&self.value) {
            Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
            Err(_) => false,
        }
    }

    /// Value as carried on the wire: quoted `SOAPAction` header for 1.1, bare
    /// `action` content-type parameter for 1.2.
    pub fn header_value(&self, version: SoapVersion) -> String {
        match version {
            SoapVersion::Soap11 => format!("\"{}\"", self.value),
            SoapVersion::Soap12 => self.value.clone(),
        }
    }
}

impl fmt::Display for SoapAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_name("#"))
    }
}
