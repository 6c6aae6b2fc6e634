//! HTTP transport adapter.
//!
//! Authenticated POST/GET over `reqwest` with per-call timeouts, a TLS
//! verification toggle, client certificates and an opt-in retry on
//! transient status codes. Failures come back as [`TransportError`] kinds.

pub mod auth;
pub mod ntlm;

use crate::config::TransportConfig;
use crate::endpoint::AuthConfig;
use crate::error::TransportError;
use auth::DigestChallenge;
use parking_lot::Mutex;
use reqwest::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Status codes worth retrying.
const RETRY_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Markers of a TLS failure somewhere in an error chain.
const TLS_MARKERS: [&str; 4] = ["certificate", "tls", "ssl", "handshake"];

/// What came back from the server.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status_code: u16,
    pub body: String,
    /// Response headers, lower-cased names
    pub headers: BTreeMap<String, String>,
    pub elapsed_ms: f64,
}

impl HttpResponse {
    pub fn is_successful(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// One `reqwest::Client` per identity/proxy/verification combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ClientKey {
    cert_path: Option<PathBuf>,
    key_path: Option<PathBuf>,
    proxy_url: Option<String>,
    verify_certs: bool,
}

/// HTTP client shared by every request of one repository.
///
/// Connection pools live as long as the client; [`HttpClient::close`]
/// releases them and makes later calls fail.
pub struct HttpClient {
    config: TransportConfig,
    clients: Mutex<HashMap<ClientKey, Client>>,
    closed: AtomicBool,
}

impl HttpClient {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            clients: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// POST `body` to `url`.
    ///
    /// Retries only when `retry_post` is enabled. Server certificates are
    /// checked only when both `verify_certs` and the transport's
    /// `validate_certs` are set.
    #[allow(clippy::too_many_arguments)]
    pub async fn post(
        &self,
        url: &str,
        body: &str,
        headers: &BTreeMap<String, String>,
        auth: &AuthConfig,
        timeout: Duration,
        proxy_url: Option<&str>,
        verify_certs: bool,
    ) -> Result<HttpResponse, TransportError> {
        let client = self.client_for(url, auth, proxy_url, verify_certs)?;
        let headers = with_charset(headers);
        let retries = if self.config.retry_post {
            self.config.max_retries
        } else {
            0
        };

        debug!(url, auth = %auth.kind(), bytes = body.len(), "POST");
        self.with_retry(url, retries, || {
            self.exchange(&client, Method::POST, url, Some(body), &headers, auth, timeout)
        })
        .await
    }

    /// GET `url` without authentication.
    pub async fn get(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let client = self.client_for(url, &AuthConfig::None, None, true)?;
        debug!(url, "GET");
        self.with_retry(url, self.config.max_retries, || {
            self.exchange(&client, Method::GET, url, None, headers, &AuthConfig::None, timeout)
        })
        .await
    }

    /// Whether the server answers at all. Anything below 500 counts.
    pub async fn test_connectivity(&self, url: &str, timeout: Duration) -> bool {
        match self.get(url, &BTreeMap::new(), timeout).await {
            Ok(response) => response.status_code < 500,
            Err(e) => {
                debug!(url, error = %e, "Connectivity check failed");
                false
            }
        }
    }

    /// Drop all pooled connections. Later calls fail.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.clients.lock().clear();
        debug!("HTTP client closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn with_retry<F, Fut>(
        &self,
        url: &str,
        retries: u32,
        mut call: F,
    ) -> Result<HttpResponse, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<HttpResponse, TransportError>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = call().await;
            let transient = match &outcome {
                Ok(response) => RETRY_STATUSES.contains(&response.status_code),
                Err(TransportError::Connection { .. }) => true,
                Err(_) => false,
            };
            if !transient || attempt >= retries {
                return outcome;
            }

            let delay = self.backoff(attempt);
            warn!(
                url,
                attempt = attempt + 1,
                max_retries = retries,
                delay_ms = delay.as_millis() as u64,
                "Transient failure, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        Duration::from_millis(self.config.backoff_factor_ms.saturating_mul(factor))
    }

    #[allow(clippy::too_many_arguments)]
    async fn exchange(
        &self,
        client: &Client,
        method: Method,
        url: &str,
        body: Option<&str>,
        headers: &BTreeMap<String, String>,
        auth: &AuthConfig,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        let build = || {
            let mut request = client.request(method.clone(), url).timeout(timeout);
            for (key, value) in headers {
                request = request.header(key, value);
            }
            if let Some(body) = body {
                request = request.body(body.to_string());
            }
            request
        };

        let start = Instant::now();
        let response = match auth {
            AuthConfig::Basic { username, password } => {
                send(build().basic_auth(username, Some(password)), url, timeout).await?
            }
            AuthConfig::Digest { username, password } => {
                let first = send(build(), url, timeout).await?;
                match challenge_of(&first, DigestChallenge::parse) {
                    Some(challenge) if first.status() == StatusCode::UNAUTHORIZED => {
                        drain(first).await;
                        let value = challenge.authorization(
                            method.as_str(),
                            &request_uri(url),
                            username,
                            password,
                            &auth::client_nonce(),
                        );
                        send(build().header(AUTHORIZATION, value), url, timeout).await?
                    }
                    _ => first,
                }
            }
            AuthConfig::Ntlm { username, password } => {
                let first = send(
                    build().header(AUTHORIZATION, ntlm::negotiate_header()),
                    url,
                    timeout,
                )
                .await?;
                let token = challenge_of(&first, |v| {
                    v.starts_with("NTLM ").then(|| v.to_string())
                });
                match token {
                    Some(token) if first.status() == StatusCode::UNAUTHORIZED => {
                        drain(first).await;
                        let value = ntlm::Challenge::from_header(&token)
                            .and_then(|c| ntlm::authenticate_header(&c, username, password))
                            .map_err(|reason| TransportError::Http {
                                url: url.to_string(),
                                reason,
                            })?;
                        send(build().header(AUTHORIZATION, value), url, timeout).await?
                    }
                    _ => first,
                }
            }
            // client certificates are part of the client itself
            AuthConfig::None | AuthConfig::Certificate { .. } => {
                send(build(), url, timeout).await?
            }
        };

        let status_code = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|e| map_error(url, timeout, e))?;
        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

        debug!(url, status_code, elapsed_ms, "HTTP exchange complete");
        Ok(HttpResponse {
            status_code,
            body,
            headers,
            elapsed_ms,
        })
    }

    fn client_for(
        &self,
        url: &str,
        auth: &AuthConfig,
        proxy_url: Option<&str>,
        verify_certs: bool,
    ) -> Result<Client, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Http {
                url: url.to_string(),
                reason: "HTTP client is closed".to_string(),
            });
        }

        let (cert_path, key_path) = match auth {
            AuthConfig::Certificate {
                cert_path,
                key_path,
            } => (Some(cert_path.clone()), key_path.clone()),
            _ => (None, None),
        };
        let key = ClientKey {
            cert_path,
            key_path,
            proxy_url: proxy_url.map(str::to_string),
            verify_certs: verify_certs && self.config.validate_certs,
        };

        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }
        let client = self.build_client(url, &key)?;
        clients.insert(key, client.clone());
        Ok(client)
    }

    fn build_client(&self, url: &str, key: &ClientKey) -> Result<Client, TransportError> {
        let tls_error = |reason: String| TransportError::Tls {
            url: url.to_string(),
            reason,
        };

        if !key.verify_certs {
            warn!(url, "TLS certificate verification is disabled");
        }

        let mut builder = Client::builder()
            .use_rustls_tls()
            .danger_accept_invalid_certs(!key.verify_certs)
            .user_agent(self.config.user_agent.clone());

        // only explicitly configured proxies are used
        builder = match &key.proxy_url {
            Some(proxy) => {
                let proxy = reqwest::Proxy::all(proxy).map_err(|e| TransportError::Http {
                    url: url.to_string(),
                    reason: format!("invalid proxy {}: {}", proxy, e),
                })?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        if let Some(cert_path) = &key.cert_path {
            let mut pem = fs::read(cert_path).map_err(|e| {
                tls_error(format!(
                    "failed to read client certificate {}: {}",
                    cert_path.display(),
                    e
                ))
            })?;
            if let Some(key_path) = &key.key_path {
                let key_pem = fs::read(key_path).map_err(|e| {
                    tls_error(format!(
                        "failed to read client key {}: {}",
                        key_path.display(),
                        e
                    ))
                })?;
                pem.push(b'\n');
                pem.extend_from_slice(&key_pem);
            }
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| tls_error(format!("invalid client identity: {}", e)))?;
            builder = builder.identity(identity);
        }

        builder.build().map_err(|e| TransportError::Http {
            url: url.to_string(),
            reason: format!("failed to build HTTP client: {}", e),
        })
    }
}

async fn send(
    request: RequestBuilder,
    url: &str,
    timeout: Duration,
) -> Result<Response, TransportError> {
    request.send().await.map_err(|e| map_error(url, timeout, e))
}

/// Read and discard a body so the connection can be reused.
async fn drain(response: Response) {
    let _ = response.bytes().await;
}

fn challenge_of<T>(response: &Response, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    response
        .headers()
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(parse)
}

/// Path and query of `url`, as used in the digest `uri` field.
fn request_uri(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => match parsed.query() {
            Some(query) => format!("{}?{}", parsed.path(), query),
            None => parsed.path().to_string(),
        },
        Err(_) => "/".to_string(),
    }
}

/// Copy of `headers` whose `Content-Type` carries a charset.
fn with_charset(headers: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    headers
        .iter()
        .map(|(key, value)| {
            let value = if key.eq_ignore_ascii_case("content-type")
                && !value.to_ascii_lowercase().contains("charset")
            {
                format!("{}; charset=utf-8", value)
            } else {
                value.clone()
            };
            (key.clone(), value)
        })
        .collect()
}

fn map_error(url: &str, timeout: Duration, err: reqwest::Error) -> TransportError {
    let reason = error_chain(&err);
    let url = url.to_string();
    if err.is_timeout() {
        TransportError::Timeout {
            url,
            timeout_secs: timeout.as_secs(),
        }
    } else if is_tls_failure(&reason) {
        TransportError::Tls { url, reason }
    } else if err.is_connect() {
        TransportError::Connection { url, reason }
    } else {
        TransportError::Http { url, reason }
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

fn is_tls_failure(reason: &str) -> bool {
    let lower = reason.to_lowercase();
    TLS_MARKERS.iter().any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_charset_appends_once() {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "text/xml".to_string());
        headers.insert("SOAPAction".to_string(), "\"Op\"".to_string());
        let prepared = with_charset(&headers);
        assert_eq!(prepared["Content-Type"], "text/xml; charset=utf-8");
        assert_eq!(prepared["SOAPAction"], "\"Op\"");

        let again = with_charset(&prepared);
        assert_eq!(again["Content-Type"], "text/xml; charset=utf-8");
    }

    #[test]
    fn test_request_uri() {
        assert_eq!(request_uri("http://svc.local/soap/v1?wsdl"), "/soap/v1?wsdl");
        assert_eq!(request_uri("https://svc.local"), "/");
    }

    #[test]
    fn test_tls_markers() {
        assert!(is_tls_failure("invalid peer certificate: UnknownIssuer"));
        assert!(is_tls_failure("received fatal alert: HandshakeFailure"));
        assert!(!is_tls_failure("tcp connect error: Connection refused"));
    }

    #[test]
    fn test_backoff_doubles() {
        let config = TransportConfig {
            backoff_factor_ms: 100,
            ..Default::default()
        };
        let client = HttpClient::new(config);
        assert_eq!(client.backoff(0), Duration::from_millis(100));
        assert_eq!(client.backoff(1), Duration::from_millis(200));
        assert_eq!(client.backoff(3), Duration::from_millis(800));
    }

    #[test]
    fn test_verification_setting_selects_client() {
        let client = HttpClient::new(TransportConfig::default());
        let url = "https://svc.local/soap";
        client.client_for(url, &AuthConfig::None, None, true).unwrap();
        client.client_for(url, &AuthConfig::None, None, false).unwrap();
        client.client_for(url, &AuthConfig::None, None, false).unwrap();

        let clients = client.clients.lock();
        assert_eq!(clients.len(), 2);
        assert!(clients.keys().any(|key| key.verify_certs));
        assert!(clients.keys().any(|key| !key.verify_certs));
    }

    #[test]
    fn test_transport_setting_disables_verification() {
        let client = HttpClient::new(TransportConfig {
            validate_certs: false,
            ..Default::default()
        });
        client
            .client_for("https://svc.local/soap", &AuthConfig::None, None, true)
            .unwrap();
        assert!(client.clients.lock().keys().all(|key| !key.verify_certs));
    }

    #[tokio::test]
    async fn test_closed_client_rejects_calls() {
        let client = HttpClient::new(TransportConfig::default());
        client.close();
        let err = client
            .get("http://127.0.0.1:9/", &BTreeMap::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "http");
        assert!(err.to_string().contains("closed"));
    }
}
