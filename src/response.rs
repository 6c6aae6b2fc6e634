//! SOAP response entity.

use crate::error::TransportError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome kinds of a dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Success,
    SoapFault,
    HttpError,
    NetworkError,
    Timeout,
    AuthError,
    ParsingError,
    Error,
    Failure,
}

impl ResponseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::SoapFault => "soap_fault",
            Self::HttpError => "http_error",
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::AuthError => "auth_error",
            Self::ParsingError => "parsing_error",
            Self::Error => "error",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SoapResponse {
    /// Id of the originating request
    pub request_id: String,
    pub status: ResponseStatus,
    /// HTTP status code (absent when nothing was received)
    pub status_code: Option<u16>,
    /// Raw response body
    pub body: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// Structured body, when a caller attached one
    pub parsed_body: Option<Value>,
    pub fault_code: Option<String>,
    pub fault_string: Option<String>,
    pub fault_detail: Option<String>,
    pub error_message: Option<String>,
    pub response_time_ms: Option<f64>,
    pub received_at: DateTime<Utc>,
}

impl SoapResponse {
    /// Empty response with the given status.
    pub fn new(request_id: impl Into<String>, status: ResponseStatus) -> Self {
        Self {
            request_id: request_id.into(),
            status,
            status_code: None,
            body: None,
            headers: BTreeMap::new(),
            parsed_body: None,
            fault_code: None,
            fault_string: None,
            fault_detail: None,
            error_message: None,
            response_time_ms: None,
            received_at: Utc::now(),
        }
    }

    /// `error` response carrying only a message.
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut response = Self::new(request_id, ResponseStatus::Error);
        response.status_code = Some(0);
        response.body = Some(String::new());
        response.error_message = Some(message.into());
        response
    }

    /// Response for a request that never got an HTTP answer.
    pub fn from_transport_error(request_id: impl Into<String>, error: &TransportError) -> Self {
        let status = match error {
            TransportError::Timeout { .. } => ResponseStatus::Timeout,
            TransportError::Tls { .. } | TransportError::Connection { .. } => {
                ResponseStatus::NetworkError
            }
            TransportError::Http { .. } => ResponseStatus::HttpError,
        };
        let mut response = Self::new(request_id, status);
        response.error_message = Some(error.to_string());
        response
    }

    /// Classified success with a 2xx code.
    pub fn is_successful(&self) -> bool {
        self.status == ResponseStatus::Success
            && matches!(self.status_code, Some(code) if (200..300).contains(&code))
    }

    pub fn has_soap_fault(&self) -> bool {
        self.status == ResponseStatus::SoapFault
    }

    /// Fault fields as a mapping, for fault responses only.
    pub fn fault_info(&self) -> Option<Value> {
        if !self.has_soap_fault() {
            return None;
        }
        Some(json!({
            "code": self.fault_code,
            "string": self.fault_string,
            "detail": self.fault_detail,
        }))
    }

    /// One-line description of the outcome.
    pub fn error_summary(&self) -> String {
        if self.is_successful() {
            return "Success".to_string();
        }
        if self.has_soap_fault() {
            return format!(
                "SOAP Fault: {} - {}",
                self.fault_code.as_deref().unwrap_or("Unknown"),
                self.fault_string.as_deref().unwrap_or("Unknown SOAP Fault")
            );
        }
        match &self.error_message {
            Some(message) => format!("{}: {}", self.status, message),
            None => format!("Error: {}", self.status),
        }
    }

    /// Result mapping handed back to the host.
    pub fn to_result(&self) -> Value {
        let success = self.is_successful();
        let mut result = Map::new();
        result.insert("changed".to_string(), Value::Bool(success));
        result.insert("request_id".to_string(), json!(self.request_id));
        result.insert("status".to_string(), json!(self.status.as_str()));
        result.insert("status_code".to_string(), json!(self.status_code));
        result.insert("success".to_string(), Value::Bool(success));
        result.insert("headers".to_string(), json!(self.headers));

        if let Some(ms) = self.response_time_ms {
            result.insert("response_time_ms".to_string(), json!(ms));
        }

        if success {
            result.insert("body".to_string(), json!(self.body));
            if let Some(parsed) = &self.parsed_body {
                result.insert("parsed_body".to_string(), parsed.clone());
            }
        } else {
            result.insert("failed".to_string(), Value::Bool(true));
            result.insert("msg".to_string(), json!(self.error_summary()));
            if let Some(body) = &self.body {
                result.insert("body".to_string(), json!(body));
            }
            if let Some(fault) = self.fault_info() {
                result.insert("fault".to_string(), fault);
            }
            if let Some(error) = &self.error_message {
                result.insert("error".to_string(), json!(error));
            }
        }

        Value::Object(result)
    }
}
