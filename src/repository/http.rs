//! HTTP-backed repository.

use super::SoapRepository;
use crate::classifier;
use crate::config::TransportConfig;
use crate::endpoint::Endpoint;
use crate::error::SoapError;
use crate::request::SoapRequest;
use crate::response::SoapResponse;
use crate::transport::HttpClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct Inner {
    client: HttpClient,
    responses: Mutex<HashMap<String, SoapResponse>>,
}

/// Repository sending over a shared [`HttpClient`].
///
/// Cloning shares the connection pool and the async response map.
#[derive(Clone)]
pub struct HttpSoapRepository {
    inner: Arc<Inner>,
}

impl HttpSoapRepository {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: HttpClient::new(config),
                responses: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn client(&self) -> &HttpClient {
        &self.inner.client
    }

    async fn dispatch(inner: &Inner, request: &SoapRequest) -> Result<SoapResponse, SoapError> {
        let timeout = Duration::from_secs(request.timeout_secs());
        debug!(
            request_id = %request.id(),
            url = %request.endpoint_url(),
            action = %request.soap_action(),
            "Sending SOAP request"
        );

        let http = inner
            .client
            .post(
                request.endpoint_url(),
                request.body(),
                request.headers(),
                request.auth(),
                timeout,
                request.proxy_url(),
                request.verify_ssl(),
            )
            .await
            .map_err(|e| {
                warn!(request_id = %request.id(), kind = e.kind(), error = %e, "Transport failure");
                e
            })?;

        Ok(classifier::classify(request, http))
    }
}

#[async_trait]
impl SoapRepository for HttpSoapRepository {
    async fn send(&self, request: &SoapRequest) -> Result<SoapResponse, SoapError> {
        Self::dispatch(&self.inner, request).await
    }

    async fn send_async(&self, request: &SoapRequest) -> Result<String, SoapError> {
        let inner = Arc::clone(&self.inner);
        let request = request.clone();
        let request_id = request.id().to_string();

        tokio::spawn(async move {
            let response = match Self::dispatch(&inner, &request).await {
                Ok(response) => response,
                Err(e) => SoapResponse::error(request.id(), e.to_string()),
            };
            inner
                .responses
                .lock()
                .insert(request.id().to_string(), response);
        });

        Ok(request_id)
    }

    fn get_response(&self, request_id: &str) -> Option<SoapResponse> {
        self.inner.responses.lock().remove(request_id)
    }

    async fn validate_endpoint(&self, endpoint: &Endpoint) -> bool {
        let timeout = Duration::from_secs(self.inner.client.config().connectivity_timeout_secs);
        let reachable = self
            .inner
            .client
            .test_connectivity(endpoint.url(), timeout)
            .await;
        info!(endpoint = %endpoint.name(), reachable, "Connectivity check");
        reachable
    }

    async fn get_wsdl(&self, endpoint: &Endpoint) -> Option<String> {
        let url = endpoint.wsdl_url();
        let timeout = Duration::from_secs(self.inner.client.config().wsdl_timeout_secs);
        match self.inner.client.get(&url, &BTreeMap::new(), timeout).await {
            Ok(response) if response.is_successful() => Some(response.body),
            Ok(response) => {
                debug!(url = %url, status_code = response.status_code, "WSDL not available");
                None
            }
            Err(e) => {
                debug!(url = %url, error = %e, "WSDL fetch failed");
                None
            }
        }
    }

    fn close(&self) {
        self.inner.client.close();
    }
}
