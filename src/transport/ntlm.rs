//! NTLMv2 message construction for HTTP `Authorization: NTLM` handshakes.
//!
//! Only the three messages needed for a client handshake are built:
//! NEGOTIATE (type 1), parsing of CHALLENGE (type 2), and AUTHENTICATE
//! (type 3). No signing or sealing.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;

const SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
const NEGOTIATE_OEM: u32 = 0x0000_0002;
const REQUEST_TARGET: u32 = 0x0000_0004;
const NEGOTIATE_NTLM: u32 = 0x0000_0200;
const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
const NEGOTIATE_128: u32 = 0x2000_0000;
const NEGOTIATE_56: u32 = 0x8000_0000;

const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | NEGOTIATE_OEM
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_56;

/// AV_PAIR id of the server timestamp in the target info block.
const MSV_AV_TIMESTAMP: u16 = 7;
const MSV_AV_EOL: u16 = 0;

/// Seconds between 1601-01-01 and the Unix epoch.
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;

type HmacMd5 = Hmac<Md5>;

/// Parsed server challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl Challenge {
    /// Decode a type 2 message.
    pub fn parse(message: &[u8]) -> Result<Self, String> {
        if message.len() < 32 || &message[..8] != SIGNATURE {
            return Err("not an NTLM message".to_string());
        }
        if read_u32(message, 8) != 2 {
            return Err("expected an NTLM challenge message".to_string());
        }
        let flags = read_u32(message, 20);
        let mut server_challenge = [0u8; 8];
        server_challenge.copy_from_slice(&message[24..32]);

        let target_info = if message.len() >= 48 {
            let len = read_u16(message, 40) as usize;
            let offset = read_u32(message, 44) as usize;
            message
                .get(offset..offset + len)
                .map(<[u8]>::to_vec)
                .ok_or_else(|| "truncated NTLM target info".to_string())?
        } else {
            Vec::new()
        };

        Ok(Self {
            flags,
            server_challenge,
            target_info,
        })
    }

    /// Decode the base64 token of a `WWW-Authenticate: NTLM <token>` header.
    pub fn from_header(header: &str) -> Result<Self, String> {
        let token = header
            .trim()
            .strip_prefix("NTLM ")
            .ok_or_else(|| "missing NTLM challenge".to_string())?;
        let bytes = BASE64
            .decode(token.trim())
            .map_err(|e| format!("invalid NTLM challenge encoding: {}", e))?;
        Self::parse(&bytes)
    }

    /// Server timestamp from the target info block, if present.
    fn timestamp(&self) -> Option<[u8; 8]> {
        let info = &self.target_info;
        let mut pos = 0;
        while pos + 4 <= info.len() {
            let id = read_u16(info, pos);
            let len = read_u16(info, pos + 2) as usize;
            if id == MSV_AV_EOL {
                break;
            }
            let value = info.get(pos + 4..pos + 4 + len)?;
            if id == MSV_AV_TIMESTAMP && len == 8 {
                let mut ts = [0u8; 8];
                ts.copy_from_slice(value);
                return Some(ts);
            }
            pos += 4 + len;
        }
        None
    }
}

/// Account name split into domain and user.
///
/// `DOMAIN\user` carries its domain; `user@realm` and bare names are sent
/// with an empty domain.
pub fn split_account(username: &str) -> (&str, &str) {
    match username.split_once('\\') {
        Some((domain, user)) => (domain, user),
        None => ("", username),
    }
}

/// Type 1 message as an `Authorization` header value.
pub fn negotiate_header() -> String {
    format!("NTLM {}", BASE64.encode(negotiate_message()))
}

/// Type 1 message with empty domain and workstation fields.
pub fn negotiate_message() -> Vec<u8> {
    let mut msg = Vec::with_capacity(32);
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&1u32.to_le_bytes());
    msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    // domain and workstation security buffers
    msg.extend_from_slice(&[0u8; 16]);
    msg
}

/// Type 3 message as an `Authorization` header value.
pub fn authenticate_header(
    challenge: &Challenge,
    username: &str,
    password: &str,
) -> Result<String, String> {
    let client_challenge: [u8; 8] = rand::random();
    let message = authenticate_message(
        challenge,
        username,
        password,
        client_challenge,
        current_filetime(),
    )?;
    Ok(format!("NTLM {}", BASE64.encode(message)))
}

/// NTLMv2 type 3 message.
pub fn authenticate_message(
    challenge: &Challenge,
    username: &str,
    password: &str,
    client_challenge: [u8; 8],
    now: [u8; 8],
) -> Result<Vec<u8>, String> {
    let (domain, user) = split_account(username);
    let response_key = ntowf_v2(user, password, domain)?;

    let server_timestamp = challenge.timestamp();
    let timestamp = server_timestamp.unwrap_or(now);

    let mut blob = Vec::with_capacity(32 + challenge.target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0x00, 0x00]);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&timestamp);
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(&challenge.target_info);
    blob.extend_from_slice(&[0u8; 4]);

    let nt_proof = hmac_md5(&response_key, &[&challenge.server_challenge, &blob])?;
    let mut nt_response = nt_proof;
    nt_response.extend_from_slice(&blob);

    // LMv2 must be zeroed when the server sent a timestamp
    let lm_response = if server_timestamp.is_some() {
        vec![0u8; 24]
    } else {
        let mut lm = hmac_md5(
            &response_key,
            &[&challenge.server_challenge, &client_challenge],
        )?;
        lm.extend_from_slice(&client_challenge);
        lm
    };

    let domain = utf16le(domain);
    let user = utf16le(user);
    let workstation: Vec<u8> = Vec::new();
    let session_key: Vec<u8> = Vec::new();

    const HEADER_LEN: usize = 64;
    let payloads: [&[u8]; 6] = [
        &lm_response,
        &nt_response,
        &domain,
        &user,
        &workstation,
        &session_key,
    ];

    let mut msg = Vec::with_capacity(HEADER_LEN + payloads.iter().map(|p| p.len()).sum::<usize>());
    msg.extend_from_slice(SIGNATURE);
    msg.extend_from_slice(&3u32.to_le_bytes());

    let mut offset = HEADER_LEN;
    for payload in payloads {
        let len = u16::try_from(payload.len())
            .map_err(|_| "NTLM field too long".to_string())?;
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&len.to_le_bytes());
        msg.extend_from_slice(&(offset as u32).to_le_bytes());
        offset += payload.len();
    }
    let flags = (challenge.flags & CLIENT_FLAGS) | NEGOTIATE_UNICODE;
    msg.extend_from_slice(&flags.to_le_bytes());

    for payload in payloads {
        msg.extend_from_slice(payload);
    }
    Ok(msg)
}

/// NT one-way function, version 1 (MD4 of the UTF-16LE password).
pub fn ntowf_v1(password: &str) -> [u8; 16] {
    let digest = Md4::digest(utf16le(password));
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// NT one-way function, version 2.
pub fn ntowf_v2(user: &str, password: &str, domain: &str) -> Result<Vec<u8>, String> {
    let identity = utf16le(&format!("{}{}", user.to_uppercase(), domain));
    hmac_md5(&ntowf_v1(password), &[&identity])
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, String> {
    let mut mac = HmacMd5::new_from_slice(key).map_err(|e| e.to_string())?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn current_filetime() -> [u8; 8] {
    let now = chrono::Utc::now();
    let secs = now.timestamp().max(0) as u64 + FILETIME_EPOCH_OFFSET;
    let ticks = secs * 10_000_000 + u64::from(now.timestamp_subsec_nanos() / 100);
    ticks.to_le_bytes()
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}
