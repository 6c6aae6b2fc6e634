//! SOAP client toolkit
//!
//! Builds SOAP 1.1/1.2 envelopes, sends them over HTTP with Basic, Digest,
//! NTLM or client-certificate authentication, and classifies what comes back.
//!
//! # Features
//!
//! - Validated value types for actions, XML bodies, envelopes and endpoints
//! - Response classification (success, SOAP fault, auth, parsing, HTTP error)
//! - Response cache with TTL and retry for transport failures
//! - XPath-style extraction with namespace stripping
//! - Sequential and bounded-parallel batches
//! - Endpoint checks: settings, connectivity and WSDL discovery
//!
//! # Example
//!
//! ```ignore
//! use zentinel_soap_client::{ClientConfig, RequestParams, SoapClient};
//!
//! let client = SoapClient::new(ClientConfig::default());
//! let result = client
//!     .run_request(RequestParams {
//!         endpoint: Some("https://svc.example.com/soap".into()),
//!         soap_action: Some("GetUser".into()),
//!         body: Some("<GetUser><id>1</id></GetUser>".into()),
//!         ..Default::default()
//!     })
//!     .await;
//! ```

pub mod action;
pub mod batch;
pub mod body;
pub mod cache;
pub mod classifier;
pub mod client;
pub mod config;
pub mod endpoint;
pub mod endpoint_check;
pub mod envelope;
pub mod error;
pub mod fault;
pub mod orchestrator;
pub mod params;
pub mod parser;
pub mod repository;
pub mod request;
pub mod response;
pub mod service;
pub mod transport;
pub mod validator;
pub mod xpath;

pub use action::SoapAction;
pub use body::{XmlBody, XmlMap, XmlValue};
pub use client::{ClientStats, SoapClient};
pub use config::{AuthType, ClientConfig, SoapVersion};
pub use endpoint::{AuthConfig, Endpoint, EndpointConfig};
pub use envelope::SoapEnvelope;
pub use error::{SoapError, TransportError, ViolationCode};
pub use params::{BatchParams, RequestParams, ValidateParams};
pub use repository::{HttpSoapRepository, InMemorySoapRepository, SoapRepository};
pub use request::SoapRequest;
pub use response::{ResponseStatus, SoapResponse};
pub use service::SoapService;
