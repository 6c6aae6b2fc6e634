//! HTTP Digest authentication (RFC 7616, `auth` quality of protection).

use md5::Md5;
use sha2::{Digest, Sha256};

/// Nonce count sent with every response; each challenge is answered once.
const NONCE_COUNT: &str = "00000001";

/// Hash algorithm announced by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "MD5" => Some(Self::Md5),
            "MD5-SESS" => Some(Self::Md5Sess),
            "SHA-256" => Some(Self::Sha256),
            "SHA-256-SESS" => Some(Self::Sha256Sess),
            _ => None,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Md5Sess => "MD5-sess",
            Self::Sha256 => "SHA-256",
            Self::Sha256Sess => "SHA-256-sess",
        }
    }

    fn is_session(&self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn hash(&self, data: &str) -> String {
        match self {
            Self::Md5 | Self::Md5Sess => hex::encode(Md5::digest(data.as_bytes())),
            Self::Sha256 | Self::Sha256Sess => hex::encode(Sha256::digest(data.as_bytes())),
        }
    }
}

/// A parsed `WWW-Authenticate: Digest ...` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: DigestAlgorithm,
    /// `true` when the server offers `qop=auth`
    pub qop_auth: bool,
}

impl DigestChallenge {
    /// Parse a header value. `None` for other schemes or unsupported
    /// algorithms and qop values.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("digest") {
            return None;
        }

        let mut realm = None;
        let mut nonce = None;
        let mut opaque = None;
        let mut algorithm = DigestAlgorithm::Md5;
        let mut qop: Option<String> = None;

        for (key, value) in parse_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "opaque" => opaque = Some(value),
                "algorithm" => algorithm = DigestAlgorithm::parse(&value)?,
                "qop" => qop = Some(value),
                _ => {}
            }
        }

        let qop_auth = match qop {
            Some(options) => {
                let offered: Vec<&str> = options.split(',').map(str::trim).collect();
                if !offered.contains(&"auth") {
                    // auth-int only
                    return None;
                }
                true
            }
            None => false,
        };

        Some(Self {
            realm: realm?,
            nonce: nonce?,
            opaque,
            algorithm,
            qop_auth,
        })
    }

    /// `Authorization` header value answering this challenge.
    pub fn authorization(
        &self,
        method: &str,
        uri: &str,
        username: &str,
        password: &str,
        cnonce: &str,
    ) -> String {
        let alg = self.algorithm;
        let mut ha1 = alg.hash(&format!("{}:{}:{}", username, self.realm, password));
        if alg.is_session() {
            ha1 = alg.hash(&format!("{}:{}:{}", ha1, self.nonce, cnonce));
        }
        let ha2 = alg.hash(&format!("{}:{}", method, uri));

        let response = if self.qop_auth {
            alg.hash(&format!(
                "{}:{}:{}:{}:auth:{}",
                ha1, self.nonce, NONCE_COUNT, cnonce, ha2
            ))
        } else {
            alg.hash(&format!("{}:{}:{}", ha1, self.nonce, ha2))
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
            username,
            self.realm,
            self.nonce,
            uri,
            response,
            alg.as_str()
        );
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        if self.qop_auth {
            header.push_str(&format!(
                ", qop=auth, nc={}, cnonce=\"{}\"",
                NONCE_COUNT, cnonce
            ));
        }
        header
    }
}

/// Split `key=value, key="quoted, value"` lists.
fn parse_params(input: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace() || *c == ',') {
            chars.next();
        }
        let mut key = String::new();
        while let Some(&c) = chars.peek() {
            if c == '=' {
                break;
            }
            key.push(c);
            chars.next();
        }
        if chars.next().is_none() {
            break;
        }

        let mut value = String::new();
        if chars.peek() == Some(&'"') {
            chars.next();
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => break,
                    other => value.push(other),
                }
            }
        } else {
            while let Some(&c) = chars.peek() {
                if c == ',' {
                    break;
                }
                value.push(c);
                chars.next();
            }
        }
        out.push((key.trim().to_string(), value.trim().to_string()));
    }
    out
}

/// Fresh client nonce.
pub fn client_nonce() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_challenge() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="testrealm@host.com", qop="auth,auth-int", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap();
        assert_eq!(challenge.realm, "testrealm@host.com");
        assert_eq!(challenge.nonce, "dcd98b7102dd2f0e8b11d0f600bfb0c093");
        assert_eq!(challenge.opaque.as_deref(), Some("5ccc069c403ebaf9f0171e9517f40e41"));
        assert_eq!(challenge.algorithm, DigestAlgorithm::Md5);
        assert!(challenge.qop_auth);
    }

    #[test]
    fn test_rfc2617_example_response() {
        let challenge = DigestChallenge::parse(
            r#"Digest realm="testrealm@host.com", qop="auth", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093", opaque="5ccc069c403ebaf9f0171e9517f40e41""#,
        )
        .unwrap();
        let header = challenge.authorization(
            "GET",
            "/dir/index.html",
            "Mufasa",
            "Circle Of Life",
            "0a4f113b",
        );
        assert!(header.contains(r#"response="6629fae49393a05397450978507c4ef1""#));
        assert!(header.contains("nc=00000001"));
        assert!(header.contains(r#"cnonce="0a4f113b""#));
    }

    #[test]
    fn test_rejects_other_schemes() {
        assert!(DigestChallenge::parse(r#"Basic realm="x""#).is_none());
        assert!(DigestChallenge::parse(r#"Digest realm="x", nonce="n", qop="auth-int""#).is_none());
        assert!(DigestChallenge::parse(r#"Digest realm="x""#).is_none());
        assert!(DigestChallenge::parse(r#"Digest realm="x", nonce="n", algorithm=SHA-512"#).is_none());
    }

    #[test]
    fn test_sha256_without_qop() {
        let challenge =
            DigestChallenge::parse(r#"Digest realm="r", nonce="n", algorithm=SHA-256"#).unwrap();
        assert!(!challenge.qop_auth);
        let header = challenge.authorization("POST", "/soap", "u", "p", "c");
        assert!(header.contains("algorithm=SHA-256"));
        assert!(!header.contains("qop="));
        // SHA-256 hex digests are 64 characters
        let response = header
            .split("response=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
            .unwrap();
        assert_eq!(response.len(), 64);
    }

    #[test]
    fn test_client_nonce_is_hex() {
        let nonce = client_nonce();
        assert_eq!(nonce.len(), 16);
        assert!(nonce.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
