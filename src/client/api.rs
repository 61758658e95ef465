//! Typed HTTP client for the gateway.
//!
//! One method per route, sharing the gateway's DTOs, with the session token
//! carried across calls as a bearer header. Non-2xx bodies are folded into
//! [`ClientError::Api`] through the gateway's `{error, details}` shape.
//! [`WalletSigner`] drives the sign-in handshake with a local key, producing
//! the same 65-byte `personal_sign` signatures a browser wallet would.

use std::sync::Mutex;
use std::time::Duration;

use k256::ecdsa::SigningKey;
use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::agent::HistoryEntry;
use crate::error::ClientError;
use crate::gateway::auth::{address_from_verifying_key, personal_sign_hash, sign_in_message};
use crate::gateway::types::{
    AuthStatusResponse, ChatRequest, ChatResponse, ErrorResponse, HealthResponse, NonceResponse,
    ServerWalletResponse, SignOutResponse, SwapRequest, SwapResponse, TransferRequest,
    TransferResponse, VerifyRequest, VerifyResponse,
};

/// Covers chat turns (two completion calls) and fund movements (settle
/// delays plus relay waits) with room to spare.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Local signing key standing in for a wallet.
pub struct WalletSigner {
    key: SigningKey,
    address: String,
}

impl WalletSigner {
    /// Builds a signer from a 32-byte hex private key, `0x` prefix optional.
    pub fn from_hex(private_key: &str) -> Result<Self, ClientError> {
        let trimmed = private_key.trim();
        let hex_body = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let raw = hex::decode(hex_body).map_err(|e| ClientError::InvalidKey {
            reason: format!("invalid hex: {e}"),
        })?;
        let key = SigningKey::from_slice(&raw).map_err(|e| ClientError::InvalidKey {
            reason: e.to_string(),
        })?;
        Self::from_key(key)
    }

    /// A throwaway key for local sessions against the simulated chain.
    pub fn random() -> Result<Self, ClientError> {
        Self::from_key(SigningKey::random(&mut rand::thread_rng()))
    }

    fn from_key(key: SigningKey) -> Result<Self, ClientError> {
        let address =
            address_from_verifying_key(key.verifying_key()).map_err(|e| ClientError::InvalidKey {
                reason: e.to_string(),
            })?;
        Ok(Self { key, address })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// 65-byte `personal_sign` signature, 0x-hex, v in {27, 28}.
    pub fn sign(&self, message: &str) -> Result<String, ClientError> {
        let prehash = personal_sign_hash(message);
        let (signature, recovery_id) =
            self.key
                .sign_prehash_recoverable(&prehash)
                .map_err(|e| ClientError::InvalidKey {
                    reason: format!("signing failed: {e}"),
                })?;
        let mut bytes = signature.to_bytes().to_vec();
        bytes.push(recovery_id.to_byte() + 27);
        Ok(format!("0x{}", hex::encode(bytes)))
    }
}

/// HTTP client bound to one gateway.
pub struct ApiClient {
    http: Client,
    base_url: String,
    session: Mutex<Option<String>>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: Mutex::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The live session token, once `verify` has succeeded.
    pub fn session_token(&self) -> Option<String> {
        self.session.lock().ok().and_then(|token| token.clone())
    }

    fn set_session(&self, token: Option<String>) {
        if let Ok(mut session) = self.session.lock() {
            *session = token;
        }
    }

    pub async fn health(&self) -> Result<HealthResponse, ClientError> {
        decode(self.get("/api/health").send().await?).await
    }

    pub async fn nonce(&self) -> Result<String, ClientError> {
        let response: NonceResponse = decode(self.get("/api/auth/nonce").send().await?).await?;
        Ok(response.nonce)
    }

    /// Posts a signed sign-in message; the returned token is retained for
    /// subsequent calls.
    pub async fn verify(&self, request: &VerifyRequest) -> Result<VerifyResponse, ClientError> {
        let response: VerifyResponse =
            decode(self.post("/api/auth/verify").json(request).send().await?).await?;
        self.set_session(Some(response.session_token.clone()));
        Ok(response)
    }

    /// Full sign-in handshake: nonce, message, signature, verify. Returns
    /// the address the gateway bound the session to.
    pub async fn sign_in(&self, signer: &WalletSigner) -> Result<String, ClientError> {
        let nonce = self.nonce().await?;
        let message = sign_in_message(signer.address(), &nonce);
        let signature = signer.sign(&message)?;
        let response = self
            .verify(&VerifyRequest {
                address: signer.address().to_string(),
                message,
                signature,
            })
            .await?;
        debug!(address = %response.address, "session established");
        Ok(response.address)
    }

    pub async fn auth_status(&self) -> Result<AuthStatusResponse, ClientError> {
        decode(self.get("/api/auth/status").send().await?).await
    }

    pub async fn sign_out(&self) -> Result<SignOutResponse, ClientError> {
        let response = decode(self.post("/api/auth/signout").send().await?).await;
        if response.is_ok() {
            self.set_session(None);
        }
        response
    }

    pub async fn chat(
        &self,
        message: &str,
        history: &[HistoryEntry],
    ) -> Result<ChatResponse, ClientError> {
        let request = ChatRequest {
            message: message.to_string(),
            conversation_history: history.to_vec(),
        };
        decode(self.post("/api/chat").json(&request).send().await?).await
    }

    pub async fn server_wallet(&self) -> Result<ServerWalletResponse, ClientError> {
        self.require_session()?;
        decode(self.get("/api/serverwallet").send().await?).await
    }

    pub async fn transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferResponse, ClientError> {
        self.require_session()?;
        decode(self.post("/api/transfer").json(request).send().await?).await
    }

    pub async fn swap(&self, request: &SwapRequest) -> Result<SwapResponse, ClientError> {
        self.require_session()?;
        decode(self.post("/api/swap").json(request).send().await?).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.http.get(self.url(path)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.http.post(self.url(path)))
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.session_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn require_session(&self) -> Result<(), ClientError> {
        if self.session_token().is_none() {
            return Err(ClientError::NotAuthenticated);
        }
        Ok(())
    }
}

/// Decodes a 2xx body as `T`, anything else as the gateway's error shape.
async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }
    let body = response.text().await.unwrap_or_default();
    Err(api_error(status.as_u16(), &body))
}

fn api_error(status: u16, body: &str) -> ClientError {
    let message = match serde_json::from_str::<ErrorResponse>(body) {
        Ok(err) => match err.details {
            Some(details) => format!("{}: {details}", err.error),
            None => err.error,
        },
        Err(_) => {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                format!("HTTP {status}")
            } else {
                trimmed.to_string()
            }
        }
    };
    ClientError::Api { status, message }
}
