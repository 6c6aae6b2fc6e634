//! Top-level client: runs use cases from host parameters.
//!
//! Each run opens its own HTTP repository (configured from the parameters)
//! and closes it when the run ends. An injected repository is shared by all
//! runs and left open.

use crate::batch::BatchSend;
use crate::config::ClientConfig;
use crate::endpoint_check::ValidateEndpoint;
use crate::error::SoapError;
use crate::orchestrator::SendSoapRequest;
use crate::params::{BatchParams, RequestParams, ValidateParams};
use crate::repository::{HttpSoapRepository, SoapRepository};
use crate::service::SoapService;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Counters across all runs of one client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    pub requests_sent: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
}

/// A repository for the length of one run.
struct Session {
    repository: Arc<dyn SoapRepository>,
    owned: bool,
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.owned {
            self.repository.close();
            debug!("Session repository closed");
        }
    }
}

/// SOAP client.
pub struct SoapClient {
    config: ClientConfig,
    repository: Option<Arc<dyn SoapRepository>>,
    requests_sent: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
}

impl SoapClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            repository: None,
            requests_sent: AtomicU64::new(0),
            requests_succeeded: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    /// Client sending through `repository` instead of HTTP.
    pub fn with_repository(config: ClientConfig, repository: Arc<dyn SoapRepository>) -> Self {
        Self {
            repository: Some(repository),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            requests_sent: self.requests_sent.load(Ordering::Relaxed),
            requests_succeeded: self.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
        }
    }

    /// `validate_certs` overrides the transport setting for GETs made by the
    /// session. POSTs follow each request's own setting.
    fn open(&self, validate_certs: Option<bool>, probe_timeout_secs: Option<u64>) -> Session {
        if let Some(repository) = &self.repository {
            return Session {
                repository: Arc::clone(repository),
                owned: false,
            };
        }
        let mut transport = self.config.transport.clone();
        if let Some(validate_certs) = validate_certs {
            transport.validate_certs = validate_certs;
        }
        if let Some(secs) = probe_timeout_secs {
            transport.connectivity_timeout_secs = secs;
            transport.wsdl_timeout_secs = secs;
        }
        Session {
            repository: Arc::new(HttpSoapRepository::new(transport)),
            owned: true,
        }
    }

    fn service(&self, session: &Session) -> Arc<SoapService> {
        Arc::new(SoapService::new(Arc::clone(&session.repository), &self.config))
    }

    fn count(&self, success: bool) {
        self.requests_sent.fetch_add(1, Ordering::Relaxed);
        if success {
            self.requests_succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Send one request.
    pub async fn run_request(&self, params: RequestParams) -> Value {
        let command = match params.into_command() {
            Ok(command) => command,
            Err(e) => return rejected(e),
        };

        let session = self.open(None, None);
        let use_case = SendSoapRequest::new(self.service(&session));
        let result = use_case.execute(command).await;
        self.count(result.success);
        result.to_result()
    }

    /// Send a batch.
    pub async fn run_batch(&self, params: BatchParams) -> Value {
        let command = match params.into_command() {
            Ok(command) => command,
            Err(e) => return rejected(e),
        };

        let session = self.open(None, None);
        let batch = BatchSend::new(Arc::new(SendSoapRequest::new(self.service(&session))));
        let result = batch.execute(command).await;
        for item in &result.results {
            self.count(item.success);
        }
        result.to_result()
    }

    /// Check an endpoint.
    pub async fn run_validate(&self, params: ValidateParams) -> Value {
        let validate_certs = params.validate_certs;
        let timeout = u64::try_from(params.timeout).ok();
        let command = match params.into_command() {
            Ok(command) => command,
            Err(e) => return rejected(e),
        };

        let session = self.open(Some(validate_certs), timeout);
        let use_case = ValidateEndpoint::new(self.service(&session));
        use_case.execute(command).await.to_result()
    }
}

fn rejected(error: SoapError) -> Value {
    info!(error = %error, "Parameters rejected");
    json!({
        "changed": false,
        "failed": true,
        "success": false,
        "msg": error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemorySoapRepository;

    fn client(repo: Arc<InMemorySoapRepository>) -> SoapClient {
        SoapClient::with_repository(ClientConfig::default(), repo)
    }

    fn params() -> RequestParams {
        RequestParams {
            endpoint: Some("https://svc.local/soap".to_string()),
            soap_action: Some("GetUser".to_string()),
            body: Some("<GetUser/>".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_run_request_counts() {
        let repo = Arc::new(InMemorySoapRepository::new());
        repo.push_response(500, "<oops/>");
        let client = client(repo.clone());

        let failed = client.run_request(params()).await;
        assert_eq!(failed["failed"], json!(true));
        let ok = client.run_request(params()).await;
        assert_eq!(ok["changed"], json!(true));

        assert_eq!(
            client.stats(),
            ClientStats {
                requests_sent: 2,
                requests_succeeded: 1,
                requests_failed: 1,
            }
        );
        // injected repositories stay open
        assert!(!repo.is_closed());
    }

    #[tokio::test]
    async fn test_rejected_params_are_not_counted() {
        let client = client(Arc::new(InMemorySoapRepository::new()));
        let result = client
            .run_request(RequestParams {
                endpoint: None,
                ..params()
            })
            .await;
        assert_eq!(result["msg"], json!("Invalid input: endpoint is required"));
        assert_eq!(client.stats(), ClientStats::default());
    }

    #[tokio::test]
    async fn test_run_batch() {
        let repo = Arc::new(InMemorySoapRepository::new());
        let client = client(repo);
        let result = client
            .run_batch(BatchParams {
                requests: vec![params(), params()],
                ..Default::default()
            })
            .await;
        assert_eq!(result["total"], json!(2));
        assert_eq!(result["successful"], json!(2));
        assert_eq!(client.stats().requests_sent, 2);
    }

    #[tokio::test]
    async fn test_run_validate() {
        let repo = Arc::new(InMemorySoapRepository::new());
        let client = client(repo);
        let result = client
            .run_validate(ValidateParams {
                endpoint: Some("https://svc.local/soap".to_string()),
                ..Default::default()
            })
            .await;
        assert_eq!(result["valid"], json!(true));
        assert_eq!(result["reachable"], json!(true));
    }
}
