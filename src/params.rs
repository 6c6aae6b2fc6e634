//! Host-facing parameter mappings.
//!
//! These are the loosely typed inputs a caller hands over (from a YAML or
//! JSON parameter file). `validate_input` checks them before they are mapped
//! into use-case commands.

use crate::batch::BatchSendCommand;
use crate::body::XmlMap;
use crate::config::{AuthType, SoapVersion};
use crate::endpoint::EndpointConfig;
use crate::endpoint_check::ValidateEndpointCommand;
use crate::error::SoapError;
use crate::orchestrator::{BodyContent, SendSoapRequestCommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Parameters of a single SOAP call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestParams {
    /// Service URL
    pub endpoint: Option<String>,
    pub soap_action: Option<String>,

    /// Raw XML body; exclusive with `body_dict`
    pub body: Option<String>,
    /// Structured body; exclusive with `body`
    pub body_dict: Option<Value>,
    pub body_root_tag: String,
    /// Send the keys of `body_dict` without the root element
    pub skip_request_wrapper: bool,

    pub namespace: Option<String>,
    pub namespace_prefix: String,
    pub soap_version: String,
    pub soap_header: Option<String>,
    pub headers: BTreeMap<String, String>,

    /// Seconds
    pub timeout: i64,
    pub auth_type: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    /// Unset means verify, or the batch-wide setting inside a batch.
    pub validate_certs: Option<bool>,
    pub proxy_url: Option<String>,

    /// Validate the endpoint settings before sending
    pub validate: bool,
    pub use_cache: bool,
    pub max_retries: u32,
    pub extract_xpath: Option<String>,
    pub strip_namespaces: bool,
}

impl Default for RequestParams {
    fn default() -> Self {
        Self {
            endpoint: None,
            soap_action: None,
            body: None,
            body_dict: None,
            body_root_tag: "Request".to_string(),
            skip_request_wrapper: false,
            namespace: None,
            namespace_prefix: "ns".to_string(),
            soap_version: "1.1".to_string(),
            soap_header: None,
            headers: BTreeMap::new(),
            timeout: 30,
            auth_type: "none".to_string(),
            username: None,
            password: None,
            cert_path: None,
            key_path: None,
            validate_certs: None,
            proxy_url: None,
            validate: true,
            use_cache: false,
            max_retries: 0,
            extract_xpath: None,
            strip_namespaces: false,
        }
    }
}

fn given(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn invalid(message: impl Into<String>) -> SoapError {
    SoapError::InvalidInput(message.into())
}

/// Checks shared by request and validate parameters.
fn check_auth(
    auth_type: &str,
    username: &Option<String>,
    password: &Option<String>,
    cert_path: &Option<String>,
) -> Result<AuthType, SoapError> {
    let auth: AuthType = auth_type.parse().map_err(invalid)?;
    if auth.needs_credentials() && (given(username).is_none() || given(password).is_none()) {
        return Err(invalid(format!(
            "username and password are required for auth_type '{}'",
            auth
        )));
    }
    if auth == AuthType::Certificate && given(cert_path).is_none() {
        return Err(invalid("cert_path is required for auth_type 'certificate'"));
    }
    Ok(auth)
}

impl RequestParams {
    /// Reject incomplete or contradictory parameters.
    pub fn validate_input(&self) -> Result<(), SoapError> {
        if given(&self.endpoint).is_none() {
            return Err(invalid("endpoint is required"));
        }
        if given(&self.soap_action).is_none() {
            return Err(invalid("soap_action is required"));
        }
        match (given(&self.body), &self.body_dict) {
            (Some(_), Some(_)) => {
                return Err(invalid("body and body_dict are mutually exclusive"));
            }
            (None, None) => return Err(invalid("Either body or body_dict must be provided")),
            _ => {}
        }
        self.soap_version.parse::<SoapVersion>().map_err(invalid)?;
        check_auth(&self.auth_type, &self.username, &self.password, &self.cert_path)?;
        if self.timeout < 1 {
            return Err(invalid("timeout must be at least 1 second"));
        }
        Ok(())
    }

    /// Endpoint settings carried by these parameters.
    pub fn endpoint_config(&self) -> Result<EndpointConfig, SoapError> {
        Ok(EndpointConfig {
            url: given(&self.endpoint).unwrap_or_default().to_string(),
            auth_type: self.auth_type.parse().map_err(invalid)?,
            username: self.username.clone(),
            password: self.password.clone(),
            cert_path: self.cert_path.clone(),
            key_path: self.key_path.clone(),
            verify_ssl: self.validate_certs.unwrap_or(true),
            proxy_url: given(&self.proxy_url).map(str::to_string),
            timeout_secs: u64::try_from(self.timeout).unwrap_or(0),
            soap_version: self.soap_version.parse().map_err(invalid)?,
            ..Default::default()
        })
    }

    /// Validate and map into a send command.
    pub fn into_command(self) -> Result<SendSoapRequestCommand, SoapError> {
        self.validate_input()?;
        let endpoint = self.endpoint_config()?;

        let body = match (self.body, self.body_dict) {
            (Some(xml), _) if !xml.trim().is_empty() => BodyContent::Xml(xml),
            (_, Some(dict)) => BodyContent::Map {
                data: XmlMap::try_from(dict)?,
                root_tag: (!self.skip_request_wrapper)
                    .then_some(self.body_root_tag)
                    .filter(|tag| !tag.trim().is_empty()),
            },
            _ => return Err(invalid("Either body or body_dict must be provided")),
        };

        let namespace = self.namespace.filter(|ns| !ns.trim().is_empty());
        let namespace_prefix = namespace
            .as_ref()
            .and(Some(self.namespace_prefix))
            .filter(|p| !p.trim().is_empty());

        let timeout_secs = endpoint.timeout_secs;
        Ok(SendSoapRequestCommand {
            endpoint,
            soap_action: self.soap_action.unwrap_or_default(),
            body,
            namespace,
            namespace_prefix,
            soap_version: None,
            soap_header: self.soap_header.filter(|h| !h.trim().is_empty()),
            headers: self.headers,
            timeout_secs: Some(timeout_secs),
            validate: self.validate,
            use_cache: self.use_cache,
            max_retries: self.max_retries,
            extract_xpath: self.extract_xpath.filter(|x| !x.trim().is_empty()),
            strip_namespaces: self.strip_namespaces,
        })
    }
}

/// Parameters of a batch run. Each entry takes the single-call defaults,
/// except that `validate_certs` falls back to the batch-wide value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchParams {
    pub requests: Vec<RequestParams>,
    pub parallel: bool,
    pub max_workers: usize,
    pub stop_on_error: bool,
    pub validate_certs: bool,
}

impl Default for BatchParams {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            parallel: false,
            max_workers: 5,
            stop_on_error: false,
            validate_certs: true,
        }
    }
}

impl BatchParams {
    pub fn validate_input(&self) -> Result<(), SoapError> {
        if self.requests.is_empty() {
            return Err(invalid("requests must not be empty"));
        }
        for (index, request) in self.requests.iter().enumerate() {
            request
                .validate_input()
                .map_err(|e| invalid(format!("requests[{}]: {}", index, e)))?;
        }
        Ok(())
    }

    pub fn into_command(self) -> Result<BatchSendCommand, SoapError> {
        self.validate_input()?;
        let validate_certs = self.validate_certs;
        let requests = self
            .requests
            .into_iter()
            .map(|mut request| {
                request.validate_certs.get_or_insert(validate_certs);
                request.into_command()
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BatchSendCommand {
            requests,
            parallel: self.parallel,
            max_workers: self.max_workers,
            stop_on_error: self.stop_on_error,
        })
    }
}

/// Parameters of an endpoint check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidateParams {
    pub endpoint: Option<String>,
    pub auth_type: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub cert_path: Option<String>,
    pub key_path: Option<String>,
    pub validate_certs: bool,
    pub proxy_url: Option<String>,
    /// Seconds allowed for the connectivity probe and WSDL download
    pub timeout: i64,
    pub check_connectivity: bool,
    pub check_wsdl: bool,
    pub wsdl_url: Option<String>,
}

impl Default for ValidateParams {
    fn default() -> Self {
        Self {
            endpoint: None,
            auth_type: "none".to_string(),
            username: None,
            password: None,
            cert_path: None,
            key_path: None,
            validate_certs: true,
            proxy_url: None,
            timeout: 10,
            check_connectivity: true,
            check_wsdl: false,
            wsdl_url: None,
        }
    }
}

impl ValidateParams {
    pub fn validate_input(&self) -> Result<(), SoapError> {
        if given(&self.endpoint).is_none() {
            return Err(invalid("endpoint is required"));
        }
        if self.timeout < 1 {
            return Err(invalid("timeout must be at least 1 second"));
        }
        check_auth(&self.auth_type, &self.username, &self.password, &self.cert_path)?;
        Ok(())
    }

    pub fn into_command(self) -> Result<ValidateEndpointCommand, SoapError> {
        self.validate_input()?;
        let endpoint = EndpointConfig {
            url: given(&self.endpoint).unwrap_or_default().to_string(),
            auth_type: self.auth_type.parse().map_err(invalid)?,
            username: self.username,
            password: self.password,
            cert_path: self.cert_path,
            key_path: self.key_path,
            verify_ssl: self.validate_certs,
            proxy_url: self.proxy_url.filter(|p| !p.trim().is_empty()),
            timeout_secs: u64::try_from(self.timeout).unwrap_or(0),
            wsdl_url: self.wsdl_url.filter(|w| !w.trim().is_empty()),
            ..Default::default()
        };
        Ok(ValidateEndpointCommand {
            endpoint,
            check_connectivity: self.check_connectivity,
            check_wsdl: self.check_wsdl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params() -> RequestParams {
        RequestParams {
            endpoint: Some("https://svc.local/soap".to_string()),
            soap_action: Some("GetUser".to_string()),
            body_dict: Some(json!({"Id": 7})),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_from_yaml() {
        let parsed: RequestParams = serde_yaml::from_str("endpoint: https://svc.local\n").unwrap();
        assert_eq!(parsed.body_root_tag, "Request");
        assert_eq!(parsed.namespace_prefix, "ns");
        assert_eq!(parsed.soap_version, "1.1");
        assert_eq!(parsed.timeout, 30);
        assert!(parsed.validate);
        assert_eq!(parsed.validate_certs, None);
        assert!(parsed.endpoint_config().unwrap().verify_ssl);

        let batch: BatchParams = serde_yaml::from_str("requests: []\n").unwrap();
        assert_eq!(batch.max_workers, 5);
        let validate: ValidateParams = serde_yaml::from_str("endpoint: x\n").unwrap();
        assert_eq!(validate.timeout, 10);
        assert!(!validate.check_wsdl);
    }

    #[test]
    fn test_body_exclusivity() {
        let both = RequestParams {
            body: Some("<a/>".to_string()),
            ..params()
        };
        assert!(both.validate_input().unwrap_err().to_string().contains("mutually exclusive"));

        let neither = RequestParams {
            body_dict: None,
            ..params()
        };
        assert!(neither.validate_input().is_err());
    }

    #[test]
    fn test_rejects_bad_values() {
        let version = RequestParams {
            soap_version: "2.0".to_string(),
            ..params()
        };
        assert!(version.validate_input().is_err());

        let auth = RequestParams {
            auth_type: "kerberos".to_string(),
            ..params()
        };
        assert!(auth.validate_input().unwrap_err().to_string().contains("kerberos"));

        let creds = RequestParams {
            auth_type: "basic".to_string(),
            username: Some("alice".to_string()),
            ..params()
        };
        assert!(creds.validate_input().is_err());

        let timeout = RequestParams {
            timeout: 0,
            ..params()
        };
        assert!(timeout.validate_input().is_err());
    }

    #[test]
    fn test_into_command() {
        let command = RequestParams {
            namespace: Some("urn:users".to_string()),
            ..params()
        }
        .into_command()
        .unwrap();

        match &command.body {
            BodyContent::Map { root_tag, data } => {
                assert_eq!(root_tag.as_deref(), Some("Request"));
                assert_eq!(data.len(), 1);
            }
            other => panic!("unexpected body: {:?}", other),
        }
        assert_eq!(command.namespace_prefix.as_deref(), Some("ns"));
        assert_eq!(command.timeout_secs, Some(30));
        assert!(command.validate);
    }

    #[test]
    fn test_skip_request_wrapper() {
        let command = RequestParams {
            skip_request_wrapper: true,
            ..params()
        }
        .into_command()
        .unwrap();
        assert!(matches!(command.body, BodyContent::Map { root_tag: None, .. }));
        // no namespace, no prefix
        assert_eq!(command.namespace_prefix, None);
    }

    #[test]
    fn test_batch_errors_name_the_entry() {
        let batch = BatchParams {
            requests: vec![params(), RequestParams::default()],
            ..Default::default()
        };
        let err = batch.validate_input().unwrap_err().to_string();
        assert!(err.contains("requests[1]"));
    }

    #[test]
    fn test_batch_entries_keep_their_certificate_setting() {
        let batch = BatchParams {
            requests: vec![
                params(),
                RequestParams {
                    validate_certs: Some(true),
                    ..params()
                },
            ],
            validate_certs: false,
            ..Default::default()
        };
        let command = batch.into_command().unwrap();
        // unset entries inherit the batch value
        assert!(!command.requests[0].endpoint.verify_ssl);
        assert!(command.requests[1].endpoint.verify_ssl);

        let single = RequestParams {
            validate_certs: Some(false),
            ..params()
        }
        .into_command()
        .unwrap();
        assert!(!single.endpoint.verify_ssl);
    }
}
