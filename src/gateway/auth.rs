//! Wallet-based session auth.
//!
//! Sign-in is a nonce handshake: the client fetches a one-time nonce, embeds
//! it in a human-readable message, signs the message with the wallet key, and
//! posts address, message, and signature back. Verification recovers the
//! signer from the EIP-191 digest and compares addresses; a passing check
//! mints an opaque bearer token with a fixed lifetime. Nothing about the
//! session is stateless: signing out revokes the token server-side.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, VerifyingKey};
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use sha3::{Digest, Keccak256};
use subtle::ConstantTimeEq;

use crate::chain::{normalize_address, BASE_CHAIN_ID};
use crate::error::AuthError;

const NONCE_LENGTH: usize = 24;
const SESSION_TOKEN_LENGTH: usize = 48;

/// Default session lifetime, matching the one-week web session.
pub const DEFAULT_SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// One-time nonce storage.
///
/// Injected so deployments can back nonces with shared storage; the default
/// is process-local.
pub trait NonceStore: Send + Sync {
    fn put(&self, nonce: String);

    /// Consumes the nonce. `false` when it was never issued or already used.
    fn take(&self, nonce: &str) -> bool;
}

#[derive(Default)]
pub struct InMemoryNonceStore {
    nonces: Mutex<HashSet<String>>,
}

impl InMemoryNonceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NonceStore for InMemoryNonceStore {
    fn put(&self, nonce: String) {
        if let Ok(mut nonces) = self.nonces.lock() {
            nonces.insert(nonce);
        }
    }

    fn take(&self, nonce: &str) -> bool {
        self.nonces
            .lock()
            .map(|mut nonces| nonces.remove(nonce))
            .unwrap_or(false)
    }
}

struct Session {
    address: String,
    expires_at: DateTime<Utc>,
}

/// Live bearer tokens, keyed by token value.
#[derive(Default)]
struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionStore {
    fn issue(&self, address: &str, ttl: Duration) -> String {
        let token = random_token(SESSION_TOKEN_LENGTH);
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.insert(
                token.clone(),
                Session {
                    address: address.to_string(),
                    expires_at: Utc::now() + ttl,
                },
            );
        }
        token
    }

    /// Address bound to a live token. Tokens are compared in constant time.
    fn authenticate(&self, token: &str) -> Option<String> {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().ok()?;
        sessions.retain(|_, session| session.expires_at > now);
        sessions.iter().find_map(|(stored, session)| {
            let matches: bool = stored.as_bytes().ct_eq(token.as_bytes()).into();
            matches.then(|| session.address.clone())
        })
    }

    fn revoke(&self, token: &str) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(token);
        }
    }
}

/// Nonce issuance, signature verification, and session management.
pub struct Authenticator {
    nonces: Arc<dyn NonceStore>,
    sessions: SessionStore,
    session_ttl: Duration,
}

impl Authenticator {
    pub fn new(nonces: Arc<dyn NonceStore>, session_ttl: Duration) -> Self {
        Self {
            nonces,
            sessions: SessionStore::default(),
            session_ttl,
        }
    }

    /// Issues a fresh one-time nonce for the sign-in handshake.
    pub fn issue_nonce(&self) -> String {
        let nonce = random_token(NONCE_LENGTH);
        self.nonces.put(nonce.clone());
        nonce
    }

    /// Verifies a signed sign-in message and mints a session token.
    ///
    /// The nonce is consumed before the signature is checked, so a failed
    /// attempt burns it either way.
    pub fn verify(
        &self,
        address: &str,
        message: &str,
        signature: &str,
    ) -> Result<String, AuthError> {
        let expected = normalize_address(address).ok_or_else(|| AuthError::InvalidAddress {
            value: address.to_string(),
        })?;

        let nonce = extract_nonce(message).ok_or_else(|| AuthError::MalformedMessage {
            reason: "nonce not found".to_string(),
        })?;
        if !self.nonces.take(&nonce) {
            return Err(AuthError::InvalidNonce);
        }

        let recovered = recover_signer(message, signature)?;
        if recovered != expected {
            return Err(AuthError::SignerMismatch {
                expected,
                recovered,
            });
        }

        Ok(self.sessions.issue(&expected, self.session_ttl))
    }

    /// Address behind a live session token.
    pub fn authenticate(&self, token: &str) -> Option<String> {
        self.sessions.authenticate(token)
    }

    pub fn sign_out(&self, token: &str) {
        self.sessions.revoke(token);
    }
}

/// Canonical sign-in message. The server only requires the nonce line; the
/// rest exists so wallets show the user something meaningful.
pub fn sign_in_message(address: &str, nonce: &str) -> String {
    format!(
        "Sign in to Basepilot\nWallet: {address}\nChain ID: {BASE_CHAIN_ID}\nNonce: {nonce}\nIssued At: {}",
        Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
    )
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn extract_nonce(message: &str) -> Option<String> {
    let regex = Regex::new(r"Nonce: (\w+)").ok()?;
    let captures = regex.captures(message)?;
    Some(captures.get(1)?.as_str().to_string())
}

/// Recovers the signer address from a 65-byte `personal_sign` signature.
pub fn recover_signer(message: &str, signature: &str) -> Result<String, AuthError> {
    let hex_body = signature
        .trim()
        .strip_prefix("0x")
        .ok_or_else(|| AuthError::InvalidSignature {
            reason: "signature must be 0x-prefixed".to_string(),
        })?;
    let bytes = hex::decode(hex_body).map_err(|e| AuthError::InvalidSignature {
        reason: format!("invalid hex: {e}"),
    })?;
    if bytes.len() != 65 {
        return Err(AuthError::InvalidSignature {
            reason: format!("expected 65 bytes, got {}", bytes.len()),
        });
    }

    let sig =
        EcdsaSignature::try_from(&bytes[..64]).map_err(|e| AuthError::InvalidSignature {
            reason: format!("invalid ECDSA bytes: {e}"),
        })?;
    let recovery_id = normalize_recovery_id(bytes[64])?;
    let prehash = personal_sign_hash(message);
    let key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id).map_err(|e| {
        AuthError::InvalidSignature {
            reason: format!("recovery failed: {e}"),
        }
    })?;
    address_from_verifying_key(&key)
}

fn normalize_recovery_id(raw: u8) -> Result<RecoveryId, AuthError> {
    let id = match raw {
        27 | 28 => raw - 27,
        0 | 1 => raw,
        _ => {
            return Err(AuthError::InvalidSignature {
                reason: "recovery id must be 0/1 or 27/28".to_string(),
            });
        }
    };
    RecoveryId::try_from(id).map_err(|_| AuthError::InvalidSignature {
        reason: "recovery id is invalid".to_string(),
    })
}

/// EIP-191 `personal_sign` digest: keccak256 of the prefixed message.
pub fn personal_sign_hash(message: &str) -> [u8; 32] {
    let bytes = message.as_bytes();
    let prefix = format!("\x19Ethereum Signed Message:\n{}", bytes.len());
    let mut hasher = Keccak256::new();
    hasher.update(prefix.as_bytes());
    hasher.update(bytes);
    hasher.finalize().into()
}

pub(crate) fn address_from_verifying_key(key: &VerifyingKey) -> Result<String, AuthError> {
    let encoded = key.to_encoded_point(false);
    let pubkey = encoded.as_bytes();
    if pubkey.len() != 65 || pubkey[0] != 0x04 {
        return Err(AuthError::InvalidSignature {
            reason: "unexpected recovered public key format".to_string(),
        });
    }
    let mut hasher = Keccak256::new();
    hasher.update(&pubkey[1..]);
    let digest = hasher.finalize();
    Ok(format!("0x{}", hex::encode(&digest[12..])))
}
