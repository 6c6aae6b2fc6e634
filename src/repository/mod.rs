//! Repository abstraction over SOAP dispatch.
//!
//! The orchestrators only talk to [`SoapRepository`]; [`HttpSoapRepository`]
//! is the production adapter and [`InMemorySoapRepository`] a scripted fake.

mod http;
mod memory;

pub use http::HttpSoapRepository;
pub use memory::InMemorySoapRepository;

use crate::endpoint::Endpoint;
use crate::error::SoapError;
use crate::request::SoapRequest;
use crate::response::SoapResponse;
use async_trait::async_trait;

/// Sends requests and hands back classified responses.
#[async_trait]
pub trait SoapRepository: Send + Sync {
    /// Dispatch and classify. Transport failures are returned as
    /// [`SoapError::Transport`].
    async fn send(&self, request: &SoapRequest) -> Result<SoapResponse, SoapError>;

    /// Start a dispatch and return the request id right away.
    ///
    /// The outcome is picked up later with [`SoapRepository::get_response`];
    /// transport failures are stored as `error` responses.
    async fn send_async(&self, request: &SoapRequest) -> Result<String, SoapError>;

    /// Completed asynchronous response, if it has arrived.
    ///
    /// A response is handed out once; it is removed from the repository
    /// when returned.
    fn get_response(&self, request_id: &str) -> Option<SoapResponse>;

    /// Whether the endpoint answers.
    async fn validate_endpoint(&self, endpoint: &Endpoint) -> bool;

    /// WSDL document of the endpoint, `None` when it cannot be fetched.
    async fn get_wsdl(&self, endpoint: &Endpoint) -> Option<String>;

    /// Release connections.
    fn close(&self);
}
