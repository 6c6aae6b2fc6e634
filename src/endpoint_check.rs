//! Endpoint validation use case: settings, connectivity and WSDL.

use crate::endpoint::{Endpoint, EndpointConfig};
use crate::service::{operations_from_wsdl, SoapService};
use crate::validator::ValidationService;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What to check.
#[derive(Debug, Clone)]
pub struct ValidateEndpointCommand {
    pub endpoint: EndpointConfig,
    pub check_connectivity: bool,
    pub check_wsdl: bool,
}

/// Findings for one endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidateEndpointResult {
    pub valid: bool,
    /// `None` when connectivity was not checked
    pub reachable: Option<bool>,
    pub has_wsdl: bool,
    pub validation_errors: Vec<String>,
    pub warnings: Vec<String>,
    pub wsdl_operations: Vec<String>,
    pub error_message: Option<String>,
    pub response_time_ms: Option<f64>,
}

impl ValidateEndpointResult {
    pub fn to_result(&self) -> Value {
        let msg = match &self.error_message {
            Some(message) => message.clone(),
            None if self.valid => "Endpoint is valid".to_string(),
            None => "Endpoint is not valid".to_string(),
        };
        json!({
            "changed": false,
            "failed": !self.valid,
            "valid": self.valid,
            "reachable": self.reachable,
            "has_wsdl": self.has_wsdl,
            "validation_errors": self.validation_errors,
            "warnings": self.warnings,
            "wsdl_operations": self.wsdl_operations,
            "response_time_ms": self.response_time_ms,
            "msg": msg,
        })
    }
}

pub struct ValidateEndpoint {
    service: Arc<SoapService>,
    validator: ValidationService,
}

impl ValidateEndpoint {
    pub fn new(service: Arc<SoapService>) -> Self {
        Self {
            service,
            validator: ValidationService::new(),
        }
    }

    /// Settings errors end the run before any network call. A missing WSDL
    /// only adds a warning.
    pub async fn execute(&self, command: ValidateEndpointCommand) -> ValidateEndpointResult {
        let report = self.validator.validate_endpoint(&command.endpoint);
        let mut result = ValidateEndpointResult {
            validation_errors: report.error_messages(),
            warnings: report.warning_messages(),
            ..Default::default()
        };
        if !report.is_valid() {
            result.error_message = Some("Endpoint validation failed".to_string());
            return result;
        }

        let endpoint = match Endpoint::try_from(command.endpoint) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                result.error_message = Some(e.to_string());
                return result;
            }
        };
        result.valid = true;

        if command.check_connectivity {
            let started = Instant::now();
            let reachable = self.service.validate_endpoint_connectivity(&endpoint).await;
            result.response_time_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
            result.reachable = Some(reachable);
            if !reachable {
                result.valid = false;
                result.error_message = Some(format!("Endpoint {} is not reachable", endpoint.url()));
            }
        }

        if command.check_wsdl {
            let wsdl_url = endpoint.wsdl_url();
            match self.service.repository().get_wsdl(&endpoint).await {
                Some(wsdl) => {
                    result.has_wsdl = true;
                    result.wsdl_operations = operations_from_wsdl(&wsdl);
                    debug!(url = %wsdl_url, operations = result.wsdl_operations.len(), "WSDL fetched");
                }
                None => {
                    warn!(url = %wsdl_url, "WSDL not available");
                    result
                        .warnings
                        .push(format!("WSDL not available at {}", wsdl_url));
                }
            }
        }

        info!(
            endpoint = %endpoint.name(),
            valid = result.valid,
            reachable = ?result.reachable,
            has_wsdl = result.has_wsdl,
            "Endpoint checked"
        );
        result
    }
}
