//! Send-request use case.
//!
//! Validates the endpoint, builds the action and envelope, dispatches through
//! [`SoapService`] and optionally extracts data from the response. Every step
//! can end the run early with a failed [`SendSoapRequestResult`]; nothing is
//! sent before validation and construction have succeeded.

use crate::action::SoapAction;
use crate::body::{XmlBody, XmlMap};
use crate::config::SoapVersion;
use crate::endpoint::{Endpoint, EndpointConfig};
use crate::envelope::SoapEnvelope;
use crate::error::{SoapError, TransportError};
use crate::request::SoapRequest;
use crate::response::SoapResponse;
use crate::service::SoapService;
use crate::validator::ValidationService;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Body of a send command.
#[derive(Debug, Clone, PartialEq)]
pub enum BodyContent {
    /// Ready XML fragment (or a complete envelope)
    Xml(String),
    /// Structured data, wrapped in `root_tag` when given
    Map {
        data: XmlMap,
        root_tag: Option<String>,
    },
}

/// Everything needed for one send.
#[derive(Debug, Clone)]
pub struct SendSoapRequestCommand {
    pub endpoint: EndpointConfig,
    pub soap_action: String,
    pub body: BodyContent,
    /// Namespace of the body elements
    pub namespace: Option<String>,
    /// Prefix for `namespace`; unprefixed (default namespace) when absent
    pub namespace_prefix: Option<String>,
    /// Overrides the endpoint's version
    pub soap_version: Option<SoapVersion>,
    /// Fragment placed under `soap:Header`
    pub soap_header: Option<String>,
    /// Extra HTTP headers, above the endpoint defaults
    pub headers: BTreeMap<String, String>,
    /// Overrides the endpoint's timeout
    pub timeout_secs: Option<u64>,
    /// Validate the endpoint settings first
    pub validate: bool,
    pub use_cache: bool,
    pub max_retries: u32,
    /// Path whose text is extracted from a successful response
    pub extract_xpath: Option<String>,
    /// Drop namespaces before extraction
    pub strip_namespaces: bool,
}

impl SendSoapRequestCommand {
    pub fn new(endpoint: EndpointConfig, soap_action: impl Into<String>, body: BodyContent) -> Self {
        Self {
            endpoint,
            soap_action: soap_action.into(),
            body,
            namespace: None,
            namespace_prefix: None,
            soap_version: None,
            soap_header: None,
            headers: BTreeMap::new(),
            timeout_secs: None,
            validate: true,
            use_cache: false,
            max_retries: 0,
            extract_xpath: None,
            strip_namespaces: false,
        }
    }
}

/// Outcome of one send.
#[derive(Debug, Clone, Default)]
pub struct SendSoapRequestResult {
    /// Response-level success, independent of extraction
    pub success: bool,
    pub response: Option<SoapResponse>,
    /// Extracted value, or `{"extraction_error": ...}`
    pub extracted_data: Option<Value>,
    pub validation_errors: Vec<String>,
    pub error_message: Option<String>,
}

impl SendSoapRequestResult {
    fn failed(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Default::default()
        }
    }

    /// Result mapping for the host.
    pub fn to_result(&self) -> Value {
        let mut result = match &self.response {
            Some(response) => match response.to_result() {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            None => {
                let mut map = Map::new();
                map.insert("changed".to_string(), Value::Bool(false));
                map
            }
        };

        result.insert("success".to_string(), Value::Bool(self.success));
        if self.success {
            result.remove("failed");
        } else {
            result.insert("failed".to_string(), Value::Bool(true));
            result.insert("changed".to_string(), Value::Bool(false));
        }

        if let Some(extracted) = &self.extracted_data {
            result.insert("extracted_data".to_string(), extracted.clone());
        }
        if !self.validation_errors.is_empty() {
            result.insert("validation_errors".to_string(), json!(self.validation_errors));
        }
        if let Some(message) = &self.error_message {
            result.insert("error_message".to_string(), json!(message));
            if !result.contains_key("msg") {
                result.insert("msg".to_string(), json!(message));
            }
        }
        Value::Object(result)
    }
}

/// The send use case.
pub struct SendSoapRequest {
    service: Arc<SoapService>,
    validator: ValidationService,
}

impl SendSoapRequest {
    pub fn new(service: Arc<SoapService>) -> Self {
        Self {
            service,
            validator: ValidationService::new(),
        }
    }

    pub fn service(&self) -> &Arc<SoapService> {
        &self.service
    }

    /// Run one command to completion.
    pub async fn execute(&self, command: SendSoapRequestCommand) -> SendSoapRequestResult {
        if command.validate {
            let report = self.validator.validate_endpoint(&command.endpoint);
            for warning in &report.warnings {
                debug!(endpoint = %command.endpoint.url, warning = %warning, "Endpoint warning");
            }
            if !report.is_valid() {
                warn!(endpoint = %command.endpoint.url, errors = report.errors.len(), "Endpoint validation failed");
                return SendSoapRequestResult {
                    validation_errors: report.error_messages(),
                    ..SendSoapRequestResult::failed("Endpoint validation failed")
                };
            }
        }

        let endpoint = match Endpoint::try_from(command.endpoint.clone()) {
            Ok(endpoint) => endpoint,
            Err(e) => return SendSoapRequestResult::failed(e.to_string()),
        };

        let request = match self.build_request(&endpoint, &command) {
            Ok(request) => request,
            Err(e) => {
                warn!(endpoint = %endpoint.name(), error = %e, "Request construction failed");
                return SendSoapRequestResult::failed(e.to_string());
            }
        };

        info!(
            request_id = %request.id(),
            endpoint = %endpoint.name(),
            action = %request.soap_action(),
            version = %request.soap_version(),
            auth = %endpoint.auth().kind(),
            "Sending SOAP request"
        );

        let dispatched = if command.max_retries > 0 {
            self.service
                .execute_request_with_retry(&endpoint, &request, command.max_retries, command.use_cache)
                .await
        } else {
            self.service
                .execute_request(&endpoint, &request, command.use_cache)
                .await
        };

        let response = match dispatched {
            Ok(response) => response,
            Err(e) => {
                warn!(request_id = %request.id(), error = %e, "SOAP request failed");
                let response = transport_cause(&e)
                    .map(|cause| SoapResponse::from_transport_error(request.id(), cause));
                return SendSoapRequestResult {
                    response,
                    ..SendSoapRequestResult::failed(e.to_string())
                };
            }
        };

        let success = response.is_successful();
        let extracted_data = match (&command.extract_xpath, success) {
            (Some(path), true) => Some(
                match self
                    .service
                    .transform_response(&response, Some(path), command.strip_namespaces)
                {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(request_id = %request.id(), error = %e, "Extraction failed");
                        json!({ "extraction_error": e.to_string() })
                    }
                },
            ),
            _ => None,
        };

        info!(
            request_id = %request.id(),
            status = %response.status,
            status_code = ?response.status_code,
            success,
            "SOAP request finished"
        );

        SendSoapRequestResult {
            success,
            error_message: (!success).then(|| response.error_summary()),
            response: Some(response),
            extracted_data,
            validation_errors: Vec::new(),
        }
    }

    fn build_request(
        &self,
        endpoint: &Endpoint,
        command: &SendSoapRequestCommand,
    ) -> Result<SoapRequest, SoapError> {
        let namespace = command.namespace.as_deref().filter(|ns| !ns.is_empty());
        let action = SoapAction::new(&command.soap_action, namespace)?;
        let version = command.soap_version.unwrap_or(endpoint.soap_version());

        let body = match &command.body {
            BodyContent::Xml(xml) => XmlBody::parse(xml)?,
            BodyContent::Map { data, root_tag } => XmlBody::from_map(
                data,
                root_tag.as_deref(),
                namespace,
                command.namespace_prefix.as_deref(),
            )?,
        };

        let wire = if body.is_soap_envelope() {
            body.into_string()
        } else {
            let mut envelope = SoapEnvelope::from_body(&body, version)?;
            if let Some(header) = &command.soap_header {
                envelope = envelope.with_header(header)?;
            }
            if let (Some(ns), Some(prefix)) = (namespace, command.namespace_prefix.as_deref()) {
                envelope = envelope.with_namespace(prefix, ns)?;
            }
            envelope.build()
        };

        let timeout = command.timeout_secs.unwrap_or(endpoint.timeout_secs());
        let mut request = SoapRequest::new(endpoint.url(), action.value(), wire, version, timeout)?
            .with_namespace(namespace)
            .with_auth(endpoint.auth().clone())
            .with_proxy(endpoint.proxy_url())
            .with_verify_ssl(endpoint.verify_ssl());

        for (key, value) in &command.headers {
            request.add_header(key, value)?;
        }
        for (key, value) in endpoint.default_headers() {
            request.set_default_header(key, value);
        }
        Ok(request)
    }
}

fn transport_cause(error: &SoapError) -> Option<&TransportError> {
    match error {
        SoapError::Transport(cause) | SoapError::RetriesExhausted { source: cause, .. } => {
            Some(cause)
        }
        _ => None,
    }
}
