//! SCRAM-SHA-256 client side of SASL authentication
//!
//! The user name is left empty in the client-first message; the engine takes
//! it from the startup packet. Channel binding is not offered.

use crate::error::{ProxyError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Length of the random client nonce
const NONCE_LEN: usize = 24;

/// Base64 of the `n,,` GS2 header
const GS2_HEADER_B64: &str = "biws";

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| ProxyError::Protocol(format!("SCRAM key: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// One SCRAM-SHA-256 exchange
#[derive(Debug)]
pub struct ScramClient {
    password: String,
    nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    /// Start an exchange for `password` with a fresh nonce
    pub fn new(password: &str) -> Self {
        let nonce: String = rand::thread_rng()
            .sample_iter(&rand::distributions::Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        Self::with_nonce("", password, &nonce)
    }

    fn with_nonce(user: &str, password: &str, nonce: &str) -> Self {
        ScramClient {
            password: password.to_string(),
            nonce: nonce.to_string(),
            client_first_bare: format!("n={},r={}", user, nonce),
            server_signature: None,
        }
    }

    /// Payload of the SASLInitialResponse
    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Answer the server-first message with the client proof
    pub fn client_final(&mut self, server_first: &str) -> Result<String> {
        let mut server_nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            if let Some(v) = attr.strip_prefix("r=") {
                server_nonce = Some(v);
            } else if let Some(v) = attr.strip_prefix("s=") {
                salt = Some(v);
            } else if let Some(v) = attr.strip_prefix("i=") {
                iterations = v.parse::<u32>().ok().filter(|i| *i > 0);
            }
        }
        let invalid = |what: &str| ProxyError::Protocol(format!("SCRAM server-first: {}", what));

        let server_nonce = server_nonce.ok_or_else(|| invalid("missing nonce"))?;
        if !server_nonce.starts_with(&self.nonce) || server_nonce.len() == self.nonce.len() {
            return Err(invalid("nonce mismatch"));
        }
        let salt = BASE64
            .decode(salt.ok_or_else(|| invalid("missing salt"))?)
            .map_err(|_| invalid("bad salt encoding"))?;
        let iterations = iterations.ok_or_else(|| invalid("bad iteration count"))?;

        let mut salted_password = [0u8; 32];
        pbkdf2_hmac::<Sha256>(
            self.password.as_bytes(),
            &salt,
            iterations,
            &mut salted_password,
        );

        let client_key = hmac_sha256(&salted_password, b"Client Key")?;
        let stored_key = Sha256::digest(&client_key);

        let without_proof = format!("c={},r={}", GS2_HEADER_B64, server_nonce);
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(k, s)| k ^ s)
            .collect();

        let server_key = hmac_sha256(&salted_password, b"Server Key")?;
        self.server_signature = Some(hmac_sha256(&server_key, auth_message.as_bytes())?);

        Ok(format!("{},p={}", without_proof, BASE64.encode(proof)))
    }

    /// Check the server signature of the server-final message
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        let expected = self.server_signature.as_deref().ok_or_else(|| {
            ProxyError::Protocol("SCRAM server-final before client-final".into())
        })?;
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(ProxyError::Backend(format!("SCRAM rejected: {}", err)));
        }
        let signature = server_final
            .split(',')
            .find_map(|attr| attr.strip_prefix("v="))
            .and_then(|v| BASE64.decode(v).ok())
            .ok_or_else(|| ProxyError::Protocol("SCRAM server-final without signature".into()))?;
        if signature != expected {
            return Err(ProxyError::Backend("SCRAM server signature mismatch".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
impl ScramClient {
    pub(crate) fn with_fixed_nonce(user: &str, password: &str, nonce: &str) -> Self {
        Self::with_nonce(user, password, nonce)
    }

    pub(crate) fn nonce(&self) -> &str {
        &self.nonce
    }

    pub(crate) fn server_final(&self) -> Option<String> {
        self.server_signature
            .as_ref()
            .map(|sig| format!("v={}", BASE64.encode(sig)))
    }
}
