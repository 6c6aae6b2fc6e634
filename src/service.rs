//! SOAP domain service: dispatch, retries, caching and response handling.

use crate::body::XmlBody;
use crate::cache::ResponseCache;
use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::SoapError;
use crate::repository::SoapRepository;
use crate::request::SoapRequest;
use crate::response::SoapResponse;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

fn operation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<(?:[A-Za-z_][\w.-]*:)?operation[^>]*\bname="([^"]*)""#)
            .expect("static regex")
    })
}

/// Operation names declared in a WSDL document, first occurrence order.
pub fn operations_from_wsdl(wsdl: &str) -> Vec<String> {
    let mut operations: Vec<String> = Vec::new();
    for captures in operation_regex().captures_iter(wsdl) {
        let name = &captures[1];
        if !name.is_empty() && !operations.iter().any(|o| o == name) {
            operations.push(name.to_string());
        }
    }
    operations
}

/// Dispatch service owning a response cache.
pub struct SoapService {
    repository: Arc<dyn SoapRepository>,
    cache: ResponseCache,
    retry_delay: Duration,
}

impl SoapService {
    pub fn new(repository: Arc<dyn SoapRepository>, config: &ClientConfig) -> Self {
        Self::with_cache(
            repository,
            ResponseCache::new(Duration::from_secs(config.cache.ttl_secs)),
            Duration::from_millis(config.service.retry_delay_ms),
        )
    }

    pub fn with_cache(
        repository: Arc<dyn SoapRepository>,
        cache: ResponseCache,
        retry_delay: Duration,
    ) -> Self {
        Self {
            repository,
            cache,
            retry_delay,
        }
    }

    pub fn repository(&self) -> &Arc<dyn SoapRepository> {
        &self.repository
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Send one request.
    ///
    /// With `use_cache` a live cached success is returned without network
    /// I/O, and a fresh success is stored.
    pub async fn execute_request(
        &self,
        endpoint: &Endpoint,
        request: &SoapRequest,
        use_cache: bool,
    ) -> Result<SoapResponse, SoapError> {
        let action = request.soap_action();
        if !action.is_empty() && !endpoint.supports_operation(action) {
            return Err(SoapError::OperationNotSupported {
                operation: action.to_string(),
                endpoint: endpoint.name().to_string(),
            });
        }

        let key = ResponseCache::cache_key(request.endpoint_url(), action, request.body());
        if use_cache {
            if let Some(hit) = self.cache.get(&key) {
                info!(request_id = %request.id(), endpoint = %endpoint.name(), "Serving cached response");
                return Ok(hit);
            }
        }

        let response = self.repository.send(request).await?;
        debug!(
            request_id = %request.id(),
            status = %response.status,
            status_code = ?response.status_code,
            "SOAP request executed"
        );

        if use_cache && self.cache.insert(key, &response) {
            debug!(request_id = %request.id(), "Response cached");
        }
        Ok(response)
    }

    /// Send with up to `max_retries` retries on transport failures.
    ///
    /// Waits `retry_delay * (attempt + 1)` between attempts. Classified
    /// responses, SOAP faults included, are returned as they are.
    pub async fn execute_request_with_retry(
        &self,
        endpoint: &Endpoint,
        request: &SoapRequest,
        max_retries: u32,
        use_cache: bool,
    ) -> Result<SoapResponse, SoapError> {
        let mut attempt: u32 = 0;
        loop {
            match self.execute_request(endpoint, request, use_cache).await {
                Err(SoapError::Transport(error)) => {
                    if attempt >= max_retries {
                        return Err(SoapError::RetriesExhausted {
                            attempts: attempt + 1,
                            source: error,
                        });
                    }
                    let delay = self.retry_delay * (attempt + 1);
                    warn!(
                        request_id = %request.id(),
                        attempt = attempt + 1,
                        max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Send requests one after another; failures become `error` responses.
    pub async fn batch_execute(
        &self,
        endpoint: &Endpoint,
        requests: &[SoapRequest],
        use_cache: bool,
    ) -> Vec<SoapResponse> {
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            let response = match self.execute_request(endpoint, request, use_cache).await {
                Ok(response) => response,
                Err(e) => SoapResponse::error(request.id(), e.to_string()),
            };
            responses.push(response);
        }
        responses
    }

    pub async fn validate_endpoint_connectivity(&self, endpoint: &Endpoint) -> bool {
        self.repository.validate_endpoint(endpoint).await
    }

    /// Operation names listed in the endpoint's WSDL; empty when unavailable.
    pub async fn discover_operations(&self, endpoint: &Endpoint) -> Vec<String> {
        match self.repository.get_wsdl(endpoint).await {
            Some(wsdl) => {
                let operations = operations_from_wsdl(&wsdl);
                info!(endpoint = %endpoint.name(), count = operations.len(), "Discovered operations");
                operations
            }
            None => {
                debug!(endpoint = %endpoint.name(), "No WSDL available");
                Vec::new()
            }
        }
    }

    /// Turn a response body into data.
    ///
    /// The SOAP Body is unwrapped first. With `xpath` the text of the first
    /// match is returned (`null` when nothing matches), otherwise the whole
    /// content flattened with [`XmlBody::to_map`].
    pub fn transform_response(
        &self,
        response: &SoapResponse,
        xpath: Option<&str>,
        strip_namespaces: bool,
    ) -> Result<Value, SoapError> {
        let body = response
            .body
            .as_deref()
            .filter(|b| !b.trim().is_empty())
            .ok_or_else(|| SoapError::Extraction("Response has no body".to_string()))?;

        let mut xml =
            XmlBody::parse(body).map_err(|e| SoapError::Extraction(e.to_string()))?;
        if strip_namespaces {
            xml = xml.strip_namespaces()?;
        }
        if let Some(content) = xml.extract_body_content() {
            xml = content;
        }

        match xpath {
            Some(path) => Ok(xml.find(path)?.map(Value::String).unwrap_or(Value::Null)),
            None => xml.to_map(),
        }
    }

    /// Whether two responses carry the same outcome.
    ///
    /// Statuses must match; failures then compare their error messages and
    /// successes their bodies, ignoring namespaces and formatting.
    pub fn compare_responses(&self, a: &SoapResponse, b: &SoapResponse) -> bool {
        if a.status != b.status {
            return false;
        }
        if !a.is_successful() || !b.is_successful() {
            return a.error_message == b.error_message;
        }
        match (a.body.as_deref(), b.body.as_deref()) {
            (None, None) => true,
            (Some(x), Some(y)) => normalized(x) == normalized(y),
            _ => false,
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        debug!("Response cache cleared");
    }
}

fn normalized(xml: &str) -> String {
    match XmlBody::parse(xml).and_then(|b| b.strip_namespaces()) {
        Ok(body) => body.minify().into_string(),
        Err(_) => xml.trim().to_string(),
    }
}
