//! Batch send use case.
//!
//! Sequential runs keep input order and, with `stop_on_error`, stop at the
//! first failure, so `results` can be shorter than the input. Parallel runs
//! keep at most `max_workers` requests in flight and report results in
//! completion order; stopping only skips requests that have not started yet,
//! which makes the number of results after a stop vary between runs.

use crate::orchestrator::{SendSoapRequest, SendSoapRequestCommand, SendSoapRequestResult};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A batch of send commands and its execution policy.
#[derive(Debug, Clone)]
pub struct BatchSendCommand {
    pub requests: Vec<SendSoapRequestCommand>,
    pub parallel: bool,
    /// Parallel requests in flight; 0 is treated as 1
    pub max_workers: usize,
    pub stop_on_error: bool,
}

/// Aggregate outcome.
///
/// `successful + failed == results.len() <= total`.
#[derive(Debug, Clone, Default)]
pub struct BatchSendResult {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub results: Vec<SendSoapRequestResult>,
}

impl BatchSendResult {
    fn record(&mut self, result: SendSoapRequestResult) {
        if result.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }

    /// Result mapping for the host.
    pub fn to_result(&self) -> Value {
        let results: Vec<Value> = self.results.iter().map(|r| r.to_result()).collect();
        let all_ok = self.failed == 0 && self.results.len() == self.total;
        json!({
            "changed": self.successful > 0,
            "success": all_ok,
            "total": self.total,
            "successful": self.successful,
            "failed": self.failed,
            "results": results,
            "msg": format!(
                "{} of {} requests succeeded, {} failed",
                self.successful, self.total, self.failed
            ),
        })
    }
}

/// The batch use case, running each item through [`SendSoapRequest`].
pub struct BatchSend {
    use_case: Arc<SendSoapRequest>,
}

impl BatchSend {
    pub fn new(use_case: Arc<SendSoapRequest>) -> Self {
        Self { use_case }
    }

    pub async fn execute(&self, command: BatchSendCommand) -> BatchSendResult {
        let total = command.requests.len();
        info!(
            total,
            parallel = command.parallel,
            max_workers = command.max_workers,
            stop_on_error = command.stop_on_error,
            "Starting batch"
        );

        let result = if command.parallel {
            self.run_parallel(command).await
        } else {
            self.run_sequential(command).await
        };

        info!(
            total = result.total,
            successful = result.successful,
            failed = result.failed,
            completed = result.results.len(),
            "Batch finished"
        );
        result
    }

    async fn run_sequential(&self, command: BatchSendCommand) -> BatchSendResult {
        let mut batch = BatchSendResult {
            total: command.requests.len(),
            ..Default::default()
        };

        for (index, request) in command.requests.into_iter().enumerate() {
            // spawned so a panicking request becomes a failed entry
            let use_case = Arc::clone(&self.use_case);
            let result = match tokio::spawn(async move { use_case.execute(request).await }).await
            {
                Ok(result) => result,
                Err(e) => crashed(e),
            };

            let failed = !result.success;
            batch.record(result);
            if failed && command.stop_on_error {
                warn!(index, "Request failed, stopping batch");
                break;
            }
        }
        batch
    }

    async fn run_parallel(&self, command: BatchSendCommand) -> BatchSendResult {
        let mut batch = BatchSendResult {
            total: command.requests.len(),
            ..Default::default()
        };
        let workers = command.max_workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));
        let stop = Arc::new(AtomicBool::new(false));
        let stop_on_error = command.stop_on_error;

        let mut tasks = JoinSet::new();
        for (index, request) in command.requests.into_iter().enumerate() {
            let use_case = Arc::clone(&self.use_case);
            let semaphore = Arc::clone(&semaphore);
            let stop = Arc::clone(&stop);

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                if stop.load(Ordering::SeqCst) {
                    debug!(index, "Skipping request after stop");
                    return None;
                }
                let result = use_case.execute(request).await;
                if !result.success && stop_on_error {
                    stop.store(true, Ordering::SeqCst);
                }
                Some(result)
            });
        }

        // in-flight requests are drained, not aborted
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(result)) => batch.record(result),
                Ok(None) => {}
                Err(e) => {
                    if stop_on_error {
                        stop.store(true, Ordering::SeqCst);
                    }
                    batch.record(crashed(e));
                }
            }
        }

        if stop.load(Ordering::SeqCst) {
            warn!(
                completed = batch.results.len(),
                total = batch.total,
                "Batch stopped after a failure"
            );
        }
        batch
    }
}

fn crashed(error: tokio::task::JoinError) -> SendSoapRequestResult {
    SendSoapRequestResult {
        error_message: Some(format!("Request execution failed: {}", error)),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::endpoint::EndpointConfig;
    use crate::orchestrator::BodyContent;
    use crate::endpoint::Endpoint;
    use crate::error::SoapError;
    use crate::repository::{InMemorySoapRepository, SoapRepository};
    use crate::request::SoapRequest;
    use crate::response::{ResponseStatus, SoapResponse};
    use crate::service::SoapService;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Answers every request with success, except `Op1`, which panics.
    #[derive(Default)]
    struct PanickingRepository {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SoapRepository for PanickingRepository {
        async fn send(&self, request: &SoapRequest) -> Result<SoapResponse, SoapError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if request.soap_action() == "Op1" {
                panic!("repository blew up");
            }
            let mut response = SoapResponse::new(request.id(), ResponseStatus::Success);
            response.status_code = Some(200);
            response.body = Some("<ok/>".to_string());
            Ok(response)
        }

        async fn send_async(&self, request: &SoapRequest) -> Result<String, SoapError> {
            Ok(request.id().to_string())
        }

        fn get_response(&self, _request_id: &str) -> Option<SoapResponse> {
            None
        }

        async fn validate_endpoint(&self, _endpoint: &Endpoint) -> bool {
            true
        }

        async fn get_wsdl(&self, _endpoint: &Endpoint) -> Option<String> {
            None
        }

        fn close(&self) {}
    }

    fn panicking_batch(repo: Arc<PanickingRepository>) -> BatchSend {
        let service = SoapService::with_cache(
            repo,
            ResponseCache::new(Duration::from_secs(300)),
            Duration::from_millis(1),
        );
        BatchSend::new(Arc::new(SendSoapRequest::new(Arc::new(service))))
    }

    async fn run_with_panic(parallel: bool) {
        let repo = Arc::new(PanickingRepository::default());
        let result = panicking_batch(repo.clone())
            .execute(BatchSendCommand {
                requests: commands(3),
                parallel,
                max_workers: 2,
                stop_on_error: false,
            })
            .await;

        assert_eq!(result.total, 3);
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.successful, 2);
        assert_eq!(result.failed, 1);
        assert_eq!(repo.calls.load(Ordering::SeqCst), 3);
        let crashed: Vec<_> = result.results.iter().filter(|r| !r.success).collect();
        assert!(crashed[0]
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("Request execution failed"));
    }

    #[tokio::test]
    async fn test_sequential_panic_becomes_failed_entry() {
        run_with_panic(false).await;
    }

    #[tokio::test]
    async fn test_parallel_panic_becomes_failed_entry() {
        run_with_panic(true).await;
    }

    fn batch(repo: Arc<InMemorySoapRepository>) -> BatchSend {
        let service = SoapService::with_cache(
            repo,
            ResponseCache::new(Duration::from_secs(300)),
            Duration::from_millis(1),
        );
        BatchSend::new(Arc::new(SendSoapRequest::new(Arc::new(service))))
    }

    fn commands(n: usize) -> Vec<SendSoapRequestCommand> {
        (0..n)
            .map(|i| {
                SendSoapRequestCommand::new(
                    EndpointConfig::new("https://svc.local/soap"),
                    format!("Op{}", i),
                    BodyContent::Xml(format!("<Op{}/>", i)),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_sequential_keeps_order() {
        let repo = Arc::new(InMemorySoapRepository::new());
        repo.push_response(200, "<a/>").push_response(404, "<b/>");
        let result = batch(repo.clone())
            .execute(BatchSendCommand {
                requests: commands(3),
                parallel: false,
                max_workers: 5,
                stop_on_error: false,
            })
            .await;

        assert_eq!(result.total, 3);
        assert_eq!(result.results.len(), 3);
        assert_eq!(result.successful, 2);
        assert_eq!(result.failed, 1);
        assert!(!result.results[1].success);
        let actions: Vec<String> = repo
            .sent_requests()
            .iter()
            .map(|r| r.soap_action().to_string())
            .collect();
        assert_eq!(actions, vec!["Op0", "Op1", "Op2"]);
    }

    #[tokio::test]
    async fn test_sequential_stop_on_error() {
        let repo = Arc::new(InMemorySoapRepository::new());
        repo.push_response(200, "<a/>").push_response(500, "<oops/>");
        let result = batch(repo.clone())
            .execute(BatchSendCommand {
                requests: commands(5),
                parallel: false,
                max_workers: 5,
                stop_on_error: true,
            })
            .await;

        assert_eq!(result.total, 5);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.failed, 1);
        assert_eq!(repo.call_count(), 2);
        assert_eq!(result.to_result()["success"], json!(false));
    }

    #[tokio::test]
    async fn test_parallel_runs_everything() {
        let repo = Arc::new(InMemorySoapRepository::new());
        repo.set_latency(Duration::from_millis(5));
        let result = batch(repo.clone())
            .execute(BatchSendCommand {
                requests: commands(8),
                parallel: true,
                max_workers: 3,
                stop_on_error: false,
            })
            .await;

        assert_eq!(result.results.len(), 8);
        assert_eq!(result.successful, 8);
        assert_eq!(repo.call_count(), 8);
    }

    #[tokio::test]
    async fn test_parallel_stop_on_error_bounds() {
        let repo = Arc::new(InMemorySoapRepository::new());
        repo.set_default_response(500, "<oops/>");
        repo.set_latency(Duration::from_millis(5));
        let result = batch(repo.clone())
            .execute(BatchSendCommand {
                requests: commands(20),
                parallel: true,
                max_workers: 2,
                stop_on_error: true,
            })
            .await;

        assert!(!result.results.is_empty());
        assert!(result.results.len() < 20);
        assert_eq!(result.successful + result.failed, result.results.len());
        assert_eq!(repo.call_count(), result.results.len());
    }

    #[tokio::test]
    async fn test_zero_workers_is_clamped() {
        let repo = Arc::new(InMemorySoapRepository::new());
        let result = batch(repo)
            .execute(BatchSendCommand {
                requests: commands(2),
                parallel: true,
                max_workers: 0,
                stop_on_error: false,
            })
            .await;
        assert_eq!(result.successful, 2);
    }
}
