//! SOAP fault extraction and classification.

use crate::config::{SoapVersion, SOAP_11_NS, SOAP_12_NS};
use crate::parser::{self, XmlElement};
use quick_xml::escape::escape;
use serde::Serialize;
use std::fmt;

/// Fault details carried by a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SoapFault {
    pub fault_code: String,
    pub fault_string: String,
    pub fault_actor: Option<String>,
    pub detail: Option<String>,
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SOAP Fault: {} - {}", self.fault_code, self.fault_string)
    }
}

/// Fault categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FaultCategory {
    ClientError,
    ServerError,
    VersionMismatch,
    MustUnderstand,
    Unknown,
}

impl FaultCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientError => "CLIENT_ERROR",
            Self::ServerError => "SERVER_ERROR",
            Self::VersionMismatch => "VERSION_MISMATCH",
            Self::MustUnderstand => "MUST_UNDERSTAND",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// The first `Fault` element in the document, if any.
pub fn find_fault_element(root: &XmlElement) -> Option<&XmlElement> {
    std::iter::once(root)
        .chain(root.descendants())
        .find(|e| e.local_name() == "Fault")
}

/// Whether the body parses and contains a `Fault` element.
pub fn contains_fault(xml: &str) -> bool {
    match parser::parse_document(xml) {
        Ok(root) => find_fault_element(&root).is_some(),
        Err(_) => false,
    }
}

/// Extract fault details from a SOAP 1.1 or 1.2 fault document.
///
/// `None` when the body does not parse or has neither a code nor a reason.
pub fn extract_fault(xml: &str) -> Option<SoapFault> {
    let root = parser::parse_document(xml).ok()?;
    let fault = find_fault_element(&root)?;

    // 1.1: faultcode/faultstring/faultactor/detail
    // 1.2: Code/Value, Reason/Text, Role, Detail
    let code = child_text(fault, "faultcode").or_else(|| {
        fault
            .child("Code")
            .and_then(|c| c.child("Value"))
            .and_then(XmlElement::text)
    });
    let string = child_text(fault, "faultstring").or_else(|| {
        fault.child("Reason").and_then(|reason| {
            reason
                .child("Text")
                .and_then(XmlElement::text)
                .or_else(|| reason.text())
        })
    });
    let actor = child_text(fault, "faultactor").or_else(|| child_text(fault, "Role"));
    let detail = fault
        .child_elements()
        .find(|e| e.local_name().eq_ignore_ascii_case("detail"))
        .and_then(detail_content);

    if code.is_none() && string.is_none() {
        return None;
    }

    Some(SoapFault {
        fault_code: code.unwrap_or_else(|| "Unknown".to_string()),
        fault_string: string.unwrap_or_else(|| "Unknown SOAP Fault".to_string()),
        fault_actor: actor,
        detail,
    })
}

fn child_text(element: &XmlElement, local_name: &str) -> Option<String> {
    element
        .child(local_name)
        .and_then(XmlElement::text)
        .map(|t| t.trim().to_string())
}

fn detail_content(detail: &XmlElement) -> Option<String> {
    if detail.has_element_children() {
        let inner: String = detail
            .child_elements()
            .map(XmlElement::to_xml_string)
            .collect();
        Some(inner)
    } else {
        detail.text()
    }
}

/// Server/Receiver faults are worth retrying; Client/Sender faults are not.
pub fn is_retriable_fault(fault: &SoapFault) -> bool {
    let local = match fault.fault_code.rsplit_once(':') {
        Some((_, local)) => local,
        None => fault.fault_code.as_str(),
    };
    matches!(local.trim(), "Server" | "Receiver")
}

/// Coarse category of a fault code.
pub fn categorize_fault(fault: &SoapFault) -> FaultCategory {
    let code = fault.fault_code.to_lowercase();
    if code.contains("client") || code.contains("sender") {
        FaultCategory::ClientError
    } else if code.contains("server") || code.contains("receiver") {
        FaultCategory::ServerError
    } else if code.contains("version") {
        FaultCategory::VersionMismatch
    } else if code.contains("mustunderstand") {
        FaultCategory::MustUnderstand
    } else {
        FaultCategory::Unknown
    }
}

/// Render a fault document.
///
/// `code` is the unqualified fault code (`Client`, `Server`, `Sender`,
/// `Receiver`); it is put under the envelope prefix.
pub fn soap_fault_response(
    code: &str,
    message: &str,
    detail: Option<&str>,
    version: SoapVersion,
) -> String {
    match version {
        SoapVersion::Soap11 => soap_11_fault(code, message, detail),
        SoapVersion::Soap12 => soap_12_fault(code, message, detail),
    }
}

fn soap_11_fault(code: &str, message: &str, detail: Option<&str>) -> String {
    let detail = detail
        .map(|d| format!("\n      <detail>{}</detail>", escape(d)))
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="{}">
  <soap:Body>
    <soap:Fault>
      <faultcode>soap:{}</faultcode>
      <faultstring>{}</faultstring>{}
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        SOAP_11_NS,
        escape(code),
        escape(message),
        detail
    )
}

fn soap_12_fault(code: &str, message: &str, detail: Option<&str>) -> String {
    let detail = detail
        .map(|d| format!("\n      <soap:Detail>{}</soap:Detail>", escape(d)))
        .unwrap_or_default();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<soap:Envelope xmlns:soap="{}">
  <soap:Body>
    <soap:Fault>
      <soap:Code>
        <soap:Value>soap:{}</soap:Value>
      </soap:Code>
      <soap:Reason>
        <soap:Text xml:lang="en">{}</soap:Text>
      </soap:Reason>{}
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        SOAP_12_NS,
        escape(code),
        escape(message),
        detail
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAULT_11: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <soap:Fault>
      <faultcode>Server</faultcode>
      <faultstring>Boom</faultstring>
      <faultactor>http://svc.local/actor</faultactor>
      <detail><e:Info xmlns:e="urn:e">disk full</e:Info></detail>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#;

    #[test]
    fn test_extract_fault_11() {
        let fault = extract_fault(FAULT_11).unwrap();
        assert_eq!(fault.fault_code, "Server");
        assert_eq!(fault.fault_string, "Boom");
        assert_eq!(fault.fault_actor.as_deref(), Some("http://svc.local/actor"));
        assert!(fault.detail.unwrap().contains("disk full"));
        assert!(contains_fault(FAULT_11));
    }

    #[test]
    fn test_extract_fault_12() {
        let xml = soap_fault_response("Sender", "Bad input", None, SoapVersion::Soap12);
        let fault = extract_fault(&xml).unwrap();
        assert_eq!(fault.fault_code, "soap:Sender");
        assert_eq!(fault.fault_string, "Bad input");
        assert!(!is_retriable_fault(&fault));
        assert_eq!(categorize_fault(&fault), FaultCategory::ClientError);
    }

    #[test]
    fn test_no_fault() {
        assert!(extract_fault("<ok/>").is_none());
        assert!(extract_fault("<broken").is_none());
        assert!(!contains_fault("<ok/>"));
        // Fault element without code or reason
        assert!(extract_fault("<Fault/>").is_none());
        assert!(contains_fault("<Fault/>"));
    }

    #[test]
    fn test_retriable_codes() {
        let fault = |code: &str| SoapFault {
            fault_code: code.to_string(),
            fault_string: "x".to_string(),
            fault_actor: None,
            detail: None,
        };
        assert!(is_retriable_fault(&fault("Server")));
        assert!(is_retriable_fault(&fault("soap:Server")));
        assert!(is_retriable_fault(&fault("env:Receiver")));
        assert!(!is_retriable_fault(&fault("Client")));
        assert!(!is_retriable_fault(&fault("soap:Sender")));
    }

    #[test]
    fn test_categorize() {
        let fault = |code: &str| SoapFault {
            fault_code: code.to_string(),
            fault_string: "x".to_string(),
            fault_actor: None,
            detail: None,
        };
        assert_eq!(categorize_fault(&fault("soap:Server")), FaultCategory::ServerError);
        assert_eq!(categorize_fault(&fault("VersionMismatch")), FaultCategory::VersionMismatch);
        assert_eq!(categorize_fault(&fault("soap:MustUnderstand")), FaultCategory::MustUnderstand);
        assert_eq!(categorize_fault(&fault("Weird")), FaultCategory::Unknown);
        assert_eq!(FaultCategory::ServerError.as_str(), "SERVER_ERROR");
    }

    #[test]
    fn test_fault_response_escapes_message() {
        let xml = soap_fault_response("Server", "a < b & c", Some("x"), SoapVersion::Soap11);
        let fault = extract_fault(&xml).unwrap();
        assert_eq!(fault.fault_string, "a < b & c");
        assert_eq!(fault.detail.as_deref(), Some("x"));
    }
}
