//! Response classification.
//!
//! Maps an HTTP exchange onto a [`SoapResponse`]. Checked in order:
//!
//! 1. 401/403 is `auth_error`
//! 2. an empty or malformed body is `parsing_error`, whatever the status
//! 3. 500 with a `Fault` element is `soap_fault`
//! 4. 500 without one is `error`
//! 5. 2xx is `success`
//! 6. anything else is `error` with `HTTP <code>`

use crate::fault::{self, find_fault_element};
use crate::parser;
use crate::request::SoapRequest;
use crate::response::{ResponseStatus, SoapResponse};
use crate::transport::HttpResponse;
use tracing::debug;

/// Classify one HTTP exchange.
pub fn classify(request: &SoapRequest, http: HttpResponse) -> SoapResponse {
    let status_code = http.status_code;
    let mut response = SoapResponse::new(request.id(), ResponseStatus::Error);
    response.status_code = Some(status_code);
    response.headers = http.headers;
    response.response_time_ms = Some(http.elapsed_ms);

    let (status, error_message) = decide(status_code, &http.body, &mut response);
    response.status = status;
    response.error_message = error_message;
    response.body = Some(http.body);

    debug!(
        request_id = %request.id(),
        status_code,
        status = %response.status,
        "Classified response"
    );
    response
}

fn decide(
    status_code: u16,
    body: &str,
    response: &mut SoapResponse,
) -> (ResponseStatus, Option<String>) {
    if status_code == 401 || status_code == 403 {
        return (
            ResponseStatus::AuthError,
            Some(format!("Authentication failed: HTTP {}", status_code)),
        );
    }

    if body.trim().is_empty() {
        return (
            ResponseStatus::ParsingError,
            Some("Response body is empty".to_string()),
        );
    }
    let root = match parser::parse_document(body) {
        Ok(root) => root,
        Err(e) => return (ResponseStatus::ParsingError, Some(e.to_string())),
    };

    if status_code == 500 {
        if find_fault_element(&root).is_none() {
            return (ResponseStatus::Error, Some("Server error".to_string()));
        }
        let message = match fault::extract_fault(body) {
            Some(found) => {
                response.fault_code = Some(found.fault_code);
                response.fault_detail = found.detail;
                response.fault_string = Some(found.fault_string.clone());
                found.fault_string
            }
            None => "Unknown SOAP Fault".to_string(),
        };
        return (ResponseStatus::SoapFault, Some(message));
    }

    if (200..300).contains(&status_code) {
        return (ResponseStatus::Success, None);
    }

    (ResponseStatus::Error, Some(format!("HTTP {}", status_code)))
}
