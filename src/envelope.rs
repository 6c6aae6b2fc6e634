//! SOAP envelope builder.

use crate::body::XmlBody;
use crate::config::SoapVersion;
use crate::error::SoapError;
use crate::parser;
use quick_xml::escape::escape;
use std::fmt;

/// XML declaration every built envelope starts with.
pub const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// Immutable SOAP envelope.
///
/// Body and header fragments are checked to be well-formed when they are
/// attached, so [`SoapEnvelope::build`] cannot fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapEnvelope {
    body: String,
    version: SoapVersion,
    header: Option<String>,
    namespaces: Vec<(String, String)>,
    body_prefix: Option<String>,
}

impl SoapEnvelope {
    /// Create an envelope around a body fragment.
    pub fn new(body: &str, version: SoapVersion) -> Result<Self, SoapError> {
        let body = check_fragment(body, "Body")?;
        Ok(Self {
            body,
            version,
            header: None,
            namespaces: Vec::new(),
            body_prefix: None,
        })
    }

    /// Create an envelope around an [`XmlBody`].
    pub fn from_body(body: &XmlBody, version: SoapVersion) -> Result<Self, SoapError> {
        Self::new(body.as_str(), version)
    }

    /// Copy with a header fragment nested under `soap:Header`.
    pub fn with_header(&self, header: &str) -> Result<Self, SoapError> {
        let header = check_fragment(header, "Header")?;
        Ok(Self {
            header: Some(header),
            ..self.clone()
        })
    }

    /// Copy with an extra `xmlns:<prefix>` declaration on the envelope root.
    ///
    /// Declarations keep insertion order; redeclaring a prefix replaces its URI.
    pub fn with_namespace(&self, prefix: &str, uri: &str) -> Result<Self, SoapError> {
        if prefix.contains(':') || !parser::is_valid_name(prefix) {
            return Err(SoapError::Construction(format!(
                "'{}' is not a valid namespace prefix",
                prefix
            )));
        }
        if prefix == self.version.prefix() {
            return Err(SoapError::Construction(format!(
                "Prefix '{}' is reserved for the SOAP envelope",
                prefix
            )));
        }

        let mut namespaces = self.namespaces.clone();
        match namespaces.iter_mut().find(|(p, _)| p == prefix) {
            Some(slot) => slot.1 = uri.to_string(),
            None => namespaces.push((prefix.to_string(), uri.to_string())),
        }
        Ok(Self {
            namespaces,
            ..self.clone()
        })
    }

    /// Copy that puts body elements in the namespace declared for `prefix`
    /// under that prefix when built.
    pub fn with_namespace_prefix(&self, prefix: &str) -> Self {
        Self {
            body_prefix: Some(prefix.to_string()),
            ..self.clone()
        }
    }

    pub fn version(&self) -> SoapVersion {
        self.version
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn header(&self) -> Option<&str> {
        self.header.as_deref()
    }

    /// Extra namespace declarations in insertion order.
    pub fn namespaces(&self) -> &[(String, String)] {
        &self.namespaces
    }

    /// Render the wire XML.
    pub fn build(&self) -> String {
        let prefix = self.version.prefix();

        let mut declarations = format!("xmlns:{}=\"{}\"", prefix, self.version.namespace());
        for (ns_prefix, uri) in &self.namespaces {
            declarations.push_str(&format!(" xmlns:{}=\"{}\"", ns_prefix, escape(uri.as_str())));
        }

        let mut parts = vec![
            XML_DECLARATION.to_string(),
            format!("<{}:Envelope {}>", prefix, declarations),
        ];

        if let Some(header) = &self.header {
            parts.push(format!("<{}:Header>", prefix));
            parts.push(header.clone());
            parts.push(format!("</{}:Header>", prefix));
        }

        parts.push(format!("<{}:Body>", prefix));
        parts.push(self.body_content());
        parts.push(format!("</{}:Body>", prefix));
        parts.push(format!("</{}:Envelope>", prefix));

        parts.join("\n")
    }

    fn body_content(&self) -> String {
        let Some(prefix) = &self.body_prefix else {
            return self.body.clone();
        };
        let Some((_, uri)) = self.namespaces.iter().find(|(p, _)| p == prefix) else {
            return self.body.clone();
        };
        match parser::parse_document(&self.body) {
            Ok(mut root) => {
                root.requalify(uri, prefix);
                root.to_xml_string()
            }
            Err(_) => self.body.clone(),
        }
    }
}

fn check_fragment(fragment: &str, part: &str) -> Result<String, SoapError> {
    let fragment = fragment.trim();
    if fragment.is_empty() {
        return Err(SoapError::Construction(format!(
            "{} content must not be empty",
            part
        )));
    }
    parser::parse_document(fragment).map_err(|e| {
        SoapError::Construction(format!("{} content is not valid XML: {}", part, e))
    })?;
    Ok(fragment.to_string())
}

impl fmt::Display for SoapEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.build())
    }
}
