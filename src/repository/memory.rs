//! Scripted in-memory repository.

use super::SoapRepository;
use crate::classifier;
use crate::endpoint::Endpoint;
use crate::error::{SoapError, TransportError};
use crate::request::SoapRequest;
use crate::response::SoapResponse;
use crate::transport::HttpResponse;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Scripted {
    Reply(HttpResponse),
    Fail(TransportError),
}

/// Repository answering from a queue of scripted outcomes.
///
/// Replies go through the real classifier. When the queue is empty the
/// default reply (`200` with an empty SOAP body) is used.
pub struct InMemorySoapRepository {
    script: Mutex<VecDeque<Scripted>>,
    default_reply: Mutex<HttpResponse>,
    sent: Mutex<Vec<SoapRequest>>,
    responses: Mutex<HashMap<String, SoapResponse>>,
    calls: AtomicUsize,
    reachable: AtomicBool,
    wsdl: Mutex<Option<String>>,
    latency: Mutex<Option<Duration>>,
    closed: AtomicBool,
}

impl Default for InMemorySoapRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySoapRepository {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_reply: Mutex::new(reply(200, DEFAULT_BODY)),
            sent: Mutex::new(Vec::new()),
            responses: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            reachable: AtomicBool::new(true),
            wsdl: Mutex::new(None),
            latency: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a reply.
    pub fn push_response(&self, status_code: u16, body: &str) -> &Self {
        self.script
            .lock()
            .push_back(Scripted::Reply(reply(status_code, body)));
        self
    }

    /// Queue a transport failure.
    pub fn push_error(&self, error: TransportError) -> &Self {
        self.script.lock().push_back(Scripted::Fail(error));
        self
    }

    /// Reply used once the queue is drained.
    pub fn set_default_response(&self, status_code: u16, body: &str) {
        *self.default_reply.lock() = reply(status_code, body);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_wsdl(&self, wsdl: Option<&str>) {
        *self.wsdl.lock() = wsdl.map(str::to_string);
    }

    /// Delay every send, to keep requests in flight.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Number of `send` calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests in the order they were sent.
    pub fn sent_requests(&self) -> Vec<SoapRequest> {
        self.sent.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

const DEFAULT_BODY: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body/></soap:Envelope>"#;

fn reply(status_code: u16, body: &str) -> HttpResponse {
    let mut headers = BTreeMap::new();
    headers.insert(
        "content-type".to_string(),
        "text/xml; charset=utf-8".to_string(),
    );
    HttpResponse {
        status_code,
        body: body.to_string(),
        headers,
        elapsed_ms: 1.0,
    }
}

#[async_trait]
impl SoapRepository for InMemorySoapRepository {
    async fn send(&self, request: &SoapRequest) -> Result<SoapResponse, SoapError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sent.lock().push(request.clone());

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let next = self.script.lock().pop_front();
        match next {
            Some(Scripted::Fail(error)) => Err(SoapError::Transport(error)),
            Some(Scripted::Reply(http)) => Ok(classifier::classify(request, http)),
            None => {
                let http = self.default_reply.lock().clone();
                Ok(classifier::classify(request, http))
            }
        }
    }

    async fn send_async(&self, request: &SoapRequest) -> Result<String, SoapError> {
        let response = match self.send(request).await {
            Ok(response) => response,
            Err(e) => SoapResponse::error(request.id(), e.to_string()),
        };
        self.responses
            .lock()
            .insert(request.id().to_string(), response);
        Ok(request.id().to_string())
    }

    fn get_response(&self, request_id: &str) -> Option<SoapResponse> {
        self.responses.lock().remove(request_id)
    }

    async fn validate_endpoint(&self, _endpoint: &Endpoint) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    async fn get_wsdl(&self, _endpoint: &Endpoint) -> Option<String> {
        self.wsdl.lock().clone()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
