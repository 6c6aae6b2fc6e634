//! Integration tests for the zentinel-soap-client crate.
//!
//! These tests exercise the public API end-to-end against the in-memory
//! repository: building, dispatch, classification, batches and caching.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use zentinel_soap_client::batch::{BatchSend, BatchSendCommand};
use zentinel_soap_client::cache::{ManualClock, ResponseCache};
use zentinel_soap_client::classifier::classify;
use zentinel_soap_client::config::{AuthType, ClientConfig, SoapVersion};
use zentinel_soap_client::endpoint::{Endpoint, EndpointConfig};
use zentinel_soap_client::error::{SoapError, TransportError};
use zentinel_soap_client::fault::{extract_fault, is_retriable_fault};
use zentinel_soap_client::orchestrator::{BodyContent, SendSoapRequest, SendSoapRequestCommand};
use zentinel_soap_client::params::{BatchParams, RequestParams};
use zentinel_soap_client::repository::{InMemorySoapRepository, SoapRepository};
use zentinel_soap_client::response::ResponseStatus;
use zentinel_soap_client::service::SoapService;
use zentinel_soap_client::transport::HttpResponse;
use zentinel_soap_client::{SoapClient, SoapEnvelope, SoapRequest, XmlBody, XmlMap};

const URL: &str = "https://svc.example.com/soap";

// ============================================================================
// Helpers
// ============================================================================

fn service(repo: Arc<InMemorySoapRepository>) -> Arc<SoapService> {
    Arc::new(SoapService::with_cache(
        repo,
        ResponseCache::new(Duration::from_secs(300)),
        Duration::from_millis(1),
    ))
}

fn send_use_case(repo: Arc<InMemorySoapRepository>) -> Arc<SendSoapRequest> {
    Arc::new(SendSoapRequest::new(service(repo)))
}

fn command(action: &str) -> SendSoapRequestCommand {
    SendSoapRequestCommand::new(
        EndpointConfig::new(URL),
        action,
        BodyContent::Xml(format!("<{}/>", action)),
    )
}

fn fault_envelope(code: &str, message: &str) -> String {
    format!(
        r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <soap:Fault>
      <faultcode>{}</faultcode>
      <faultstring>{}</faultstring>
    </soap:Fault>
  </soap:Body>
</soap:Envelope>"#,
        code, message
    )
}

// ============================================================================
// Body and envelope construction
// ============================================================================

#[test]
fn test_e2e_map_body_with_default_namespace() {
    let data = XmlMap::new().with("NumberToWords", XmlMap::new().with("ubiNum", 42i64));
    let body = XmlBody::from_map(&data, None, Some("http://example.com/ns"), None).unwrap();

    assert!(body.as_str().contains(r#"xmlns="http://example.com/ns""#));
    assert!(body.as_str().contains("<ubiNum>42</ubiNum>"));

    let envelope = SoapEnvelope::from_body(&body, SoapVersion::Soap11).unwrap().build();
    assert!(envelope.contains("<soap:Body>"));
    assert!(envelope.contains("NumberToWords"));
    assert!(XmlBody::parse(&envelope).unwrap().is_soap_envelope());
}

#[test]
fn test_e2e_map_body_with_prefix() {
    let data = XmlMap::new().with("NumberToWords", XmlMap::new().with("ubiNum", 42i64));
    let body =
        XmlBody::from_map(&data, None, Some("http://example.com/ns"), Some("ns")).unwrap();

    assert!(body.as_str().contains(r#"xmlns:ns="http://example.com/ns""#));
    assert!(body.as_str().contains("<ns:ubiNum>42</ns:ubiNum>"));
}

#[test]
fn test_e2e_soap12_request_headers() {
    let envelope = SoapEnvelope::new("<Ping/>", SoapVersion::Soap12).unwrap().build();
    let request = SoapRequest::new(URL, "Ping", envelope, SoapVersion::Soap12, 30).unwrap();

    let content_type = request.header("Content-Type").unwrap();
    assert!(content_type.starts_with("application/soap+xml"));
    assert!(content_type.contains(r#"action="Ping""#));
    assert!(request.header("SOAPAction").is_none());
}

// ============================================================================
// Classification
// ============================================================================

#[test]
fn test_e2e_server_fault_is_retriable() {
    let envelope = SoapEnvelope::new("<Ping/>", SoapVersion::Soap11).unwrap().build();
    let request = SoapRequest::new(URL, "Ping", envelope, SoapVersion::Soap11, 30).unwrap();
    let body = fault_envelope("Server", "Boom");

    let response = classify(
        &request,
        HttpResponse {
            status_code: 500,
            body: body.clone(),
            headers: Default::default(),
            elapsed_ms: 3.0,
        },
    );

    assert_eq!(response.status, ResponseStatus::SoapFault);
    assert_eq!(response.fault_code.as_deref(), Some("Server"));
    assert_eq!(response.fault_string.as_deref(), Some("Boom"));
    assert!(is_retriable_fault(&extract_fault(&body).unwrap()));
}

#[test]
fn test_e2e_unclosed_body_is_parsing_error() {
    let envelope = SoapEnvelope::new("<Ping/>", SoapVersion::Soap11).unwrap().build();
    let request = SoapRequest::new(URL, "Ping", envelope, SoapVersion::Soap11, 30).unwrap();

    let response = classify(
        &request,
        HttpResponse {
            status_code: 200,
            body: "<not-closed".to_string(),
            headers: Default::default(),
            elapsed_ms: 1.0,
        },
    );

    assert_eq!(response.status, ResponseStatus::ParsingError);
    assert!(!response.is_successful());
}

// ============================================================================
// Send use case
// ============================================================================

#[tokio::test]
async fn test_e2e_send_soap_fault() {
    let repo = Arc::new(InMemorySoapRepository::new());
    repo.push_response(500, &fault_envelope("soap:Server", "Boom"));

    let result = send_use_case(repo).execute(command("Ping")).await;

    assert!(!result.success);
    let response = result.response.as_ref().unwrap();
    assert_eq!(response.status, ResponseStatus::SoapFault);
    let mapped = result.to_result();
    assert_eq!(mapped["failed"], json!(true));
    assert_eq!(mapped["status"], json!("soap_fault"));
}

#[tokio::test]
async fn test_e2e_basic_auth_without_password_never_dispatches() {
    let repo = Arc::new(InMemorySoapRepository::new());
    let mut cmd = command("Ping");
    cmd.endpoint.auth_type = AuthType::Basic;
    cmd.endpoint.username = Some("alice".to_string());

    let result = send_use_case(repo.clone()).execute(cmd).await;

    assert!(!result.success);
    assert!(result
        .validation_errors
        .iter()
        .any(|e| e.contains("auth requires username and password")));
    assert_eq!(repo.call_count(), 0);
}

#[tokio::test]
async fn test_e2e_extraction_from_success() {
    let repo = Arc::new(InMemorySoapRepository::new());
    repo.push_response(
        200,
        r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/">
  <soap:Body>
    <m:GetUserResponse xmlns:m="http://example.com/users">
      <m:Name>Alice</m:Name>
    </m:GetUserResponse>
  </soap:Body>
</soap:Envelope>"#,
    );
    let mut cmd = command("GetUser");
    cmd.extract_xpath = Some(".//Name".to_string());
    cmd.strip_namespaces = true;

    let result = send_use_case(repo).execute(cmd).await;

    assert!(result.success);
    assert_eq!(result.extracted_data, Some(json!("Alice")));
}

#[tokio::test]
async fn test_e2e_transport_failure_maps_to_network_error() {
    let repo = Arc::new(InMemorySoapRepository::new());
    repo.push_error(TransportError::Connection {
        url: URL.to_string(),
        reason: "connection refused".to_string(),
    });

    let result = send_use_case(repo).execute(command("Ping")).await;

    assert!(!result.success);
    let response = result.response.unwrap();
    assert_eq!(response.status, ResponseStatus::NetworkError);
}

#[tokio::test]
async fn test_e2e_retry_recovers_after_transport_failure() {
    let repo = Arc::new(InMemorySoapRepository::new());
    repo.push_error(TransportError::Timeout {
        url: URL.to_string(),
        timeout_secs: 30,
    });
    let mut cmd = command("Ping");
    cmd.max_retries = 2;

    let result = send_use_case(repo.clone()).execute(cmd).await;

    assert!(result.success);
    assert_eq!(repo.call_count(), 2);
}

// ============================================================================
// Batches
// ============================================================================

#[tokio::test]
async fn test_e2e_batch_second_fails_without_stop() {
    let repo = Arc::new(InMemorySoapRepository::new());
    repo.push_response(200, "<ok/>").push_response(500, "<oops/>");

    let result = BatchSend::new(send_use_case(repo))
        .execute(BatchSendCommand {
            requests: vec![command("A"), command("B"), command("C")],
            parallel: false,
            max_workers: 5,
            stop_on_error: false,
        })
        .await;

    assert_eq!(result.total, 3);
    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.results.len(), 3);
}

#[tokio::test]
async fn test_e2e_batch_first_fails_with_stop() {
    let repo = Arc::new(InMemorySoapRepository::new());
    repo.push_response(500, "<oops/>");

    let result = BatchSend::new(send_use_case(repo.clone()))
        .execute(BatchSendCommand {
            requests: vec![command("A"), command("B"), command("C")],
            parallel: false,
            max_workers: 5,
            stop_on_error: true,
        })
        .await;

    assert_eq!(result.results.len(), 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.successful, 0);
    assert_eq!(repo.call_count(), 1);
}

#[tokio::test]
async fn test_e2e_parallel_batch_counts_add_up() {
    let repo = Arc::new(InMemorySoapRepository::new());
    repo.push_response(404, "<missing/>");
    repo.set_latency(Duration::from_millis(2));

    let requests = (0..10).map(|i| command(&format!("Op{}", i))).collect();
    let result = BatchSend::new(send_use_case(repo))
        .execute(BatchSendCommand {
            requests,
            parallel: true,
            max_workers: 4,
            stop_on_error: false,
        })
        .await;

    assert_eq!(result.total, 10);
    assert_eq!(result.results.len(), 10);
    assert_eq!(result.successful + result.failed, 10);
    assert_eq!(result.failed, 1);
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test]
async fn test_e2e_cache_hit_then_expiry() {
    let repo = Arc::new(InMemorySoapRepository::new());
    let clock = Arc::new(ManualClock::default());
    let cache = ResponseCache::with_clock(Duration::from_secs(60), clock.clone());
    let service = SoapService::with_cache(repo.clone(), cache, Duration::from_millis(1));

    let endpoint = Endpoint::from_url(URL).unwrap();
    let envelope = SoapEnvelope::new("<Ping/>", SoapVersion::Soap11).unwrap().build();
    let request = SoapRequest::new(URL, "Ping", envelope, SoapVersion::Soap11, 30).unwrap();

    service.execute_request(&endpoint, &request, true).await.unwrap();
    service.execute_request(&endpoint, &request, true).await.unwrap();
    assert_eq!(repo.call_count(), 1);

    clock.advance(Duration::from_secs(60));
    service.execute_request(&endpoint, &request, true).await.unwrap();
    assert_eq!(repo.call_count(), 2);
}

#[tokio::test]
async fn test_e2e_failures_are_not_cached() {
    let repo = Arc::new(InMemorySoapRepository::new());
    repo.push_response(500, &fault_envelope("Server", "Busy"));
    let service = service(repo.clone());

    let endpoint = Endpoint::from_url(URL).unwrap();
    let envelope = SoapEnvelope::new("<Ping/>", SoapVersion::Soap11).unwrap().build();
    let request = SoapRequest::new(URL, "Ping", envelope, SoapVersion::Soap11, 30).unwrap();

    let first = service.execute_request(&endpoint, &request, true).await.unwrap();
    assert_eq!(first.status, ResponseStatus::SoapFault);
    let second = service.execute_request(&endpoint, &request, true).await.unwrap();
    assert!(second.is_successful());
    assert_eq!(repo.call_count(), 2);
}

#[tokio::test]
async fn test_e2e_unsupported_operation_is_rejected() {
    let repo = Arc::new(InMemorySoapRepository::new());
    let mut config = EndpointConfig::new(URL);
    config.supported_operations = vec!["Get*".to_string()];
    let endpoint = Endpoint::try_from(config).unwrap();

    let envelope = SoapEnvelope::new("<DeleteUser/>", SoapVersion::Soap11)
        .unwrap()
        .build();
    let request =
        SoapRequest::new(URL, "DeleteUser", envelope, SoapVersion::Soap11, 30).unwrap();

    let err = service(repo.clone())
        .execute_request(&endpoint, &request, false)
        .await
        .unwrap_err();
    assert!(matches!(err, SoapError::OperationNotSupported { .. }));
    assert_eq!(repo.call_count(), 0);
}

// ============================================================================
// Repository and client
// ============================================================================

#[tokio::test]
async fn test_e2e_send_async_then_lookup() {
    let repo = InMemorySoapRepository::new();
    let envelope = SoapEnvelope::new("<Ping/>", SoapVersion::Soap11).unwrap().build();
    let request = SoapRequest::new(URL, "Ping", envelope, SoapVersion::Soap11, 30).unwrap();

    let id = repo.send_async(&request).await.unwrap();
    assert_eq!(id, request.id());
    let stored = repo.get_response(&id).unwrap();
    assert!(stored.is_successful());
    assert!(repo.get_response("unknown").is_none());
}

#[tokio::test]
async fn test_e2e_client_batch_from_params() {
    let repo = Arc::new(InMemorySoapRepository::new());
    repo.push_response(200, "<ok/>").push_response(500, "<oops/>");
    let client = SoapClient::with_repository(ClientConfig::default(), repo.clone());

    let params: BatchParams = serde_yaml::from_str(
        r#"
requests:
  - endpoint: https://svc.example.com/soap
    soap_action: GetUser
    body: "<GetUser><id>1</id></GetUser>"
  - endpoint: https://svc.example.com/soap
    soap_action: GetUser
    body_dict:
      id: 2
  - endpoint: https://svc.example.com/soap
    soap_action: GetUser
    body: "<GetUser><id>3</id></GetUser>"
stop_on_error: true
"#,
    )
    .unwrap();

    let result = client.run_batch(params).await;

    assert_eq!(result["total"], json!(3));
    assert_eq!(result["successful"], json!(1));
    assert_eq!(result["failed"], json!(1));
    assert_eq!(result["results"].as_array().unwrap().len(), 2);
    assert_eq!(client.stats().requests_sent, 2);
    assert!(!repo.is_closed());
}

#[tokio::test]
async fn test_e2e_client_rejects_mixed_bodies() {
    let client = SoapClient::with_repository(
        ClientConfig::default(),
        Arc::new(InMemorySoapRepository::new()),
    );
    let result = client
        .run_request(RequestParams {
            endpoint: Some(URL.to_string()),
            soap_action: Some("GetUser".to_string()),
            body: Some("<GetUser/>".to_string()),
            body_dict: Some(json!({"id": 1})),
            ..Default::default()
        })
        .await;

    assert_eq!(result["failed"], json!(true));
    assert!(result["msg"].as_str().unwrap().contains("mutually exclusive"));
}
