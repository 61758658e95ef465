//! Error types for basepilot.

use crate::chain::format_usdc;

/// Top-level error type for the runtime.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Permission error: {0}")]
    Permission(#[from] PermissionError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wallet-session authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("No session token provided")]
    MissingSession,

    #[error("Session token is invalid or expired")]
    InvalidSession,

    #[error("Invalid or expired nonce")]
    InvalidNonce,

    #[error("Signed message is malformed: {reason}")]
    MalformedMessage { reason: String },

    #[error("Signature is malformed: {reason}")]
    InvalidSignature { reason: String },

    #[error("Signature was produced by {recovered}, expected {expected}")]
    SignerMismatch { expected: String, recovered: String },

    #[error("Invalid wallet address: {value}")]
    InvalidAddress { value: String },
}

/// Spend-permission registry and allowance errors.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("Failed to fetch permissions for {account}: {reason}")]
    FetchFailed { account: String, reason: String },

    #[error("Failed to query permission status: {reason}")]
    StatusFailed { reason: String },

    #[error("Allowance request rejected: {reason}")]
    RequestRejected { reason: String },

    #[error("Failed to prepare spend call: {reason}")]
    PrepareFailed { reason: String },

    #[error(
        "Insufficient spend permission allowance. Need {} more USDC in permissions.",
        format_usdc(*deficit)
    )]
    Shortfall { deficit: u128 },

    #[error("No spend permissions found. Please set up spend permissions first.")]
    NoPermissions,
}

/// Fund-movement execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("Invalid {field}: {message}")]
    InvalidField { field: String, message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Spend call at index {index} is missing 'to' field")]
    SpendCallMissingTarget { index: usize },

    #[error("Relay submission failed during {step}: {reason}")]
    SubmissionFailed { step: String, reason: String },

    #[error("Operation did not complete during {step}: {reason}")]
    CompletionFailed { step: String, reason: String },

    #[error(
        "Insufficient balance in smart wallet. Has: {}, needs: {}",
        format_usdc(*has),
        format_usdc(*needs)
    )]
    InsufficientCustodyBalance { has: u128, needs: u128 },

    #[error("Swap failed with status: {status}")]
    SwapFailed { status: String },

    #[error("Balance query failed: {reason}")]
    BalanceQueryFailed { reason: String },
}

/// Errors reported by on-chain collaborators (relay, reads, swap).
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("submission rejected: {reason}")]
    Submission { reason: String },

    #[error("completion polling failed: {reason}")]
    Completion { reason: String },

    #[error("balance query failed: {reason}")]
    Balance { reason: String },

    #[error("swap rejected: {reason}")]
    Swap { reason: String },
}

/// Custodial wallet provisioning errors.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("Failed to provision server wallet for {owner}: {reason}")]
    ProvisionFailed { owner: String, reason: String },
}

/// Completion-backend errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Provider {provider} returned no completion text")]
    EmptyCompletion { provider: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },
}

impl ToolError {
    /// The failure text without the tool-name prefix, suitable for feeding
    /// back into a model prompt.
    pub fn detail(&self) -> String {
        match self {
            Self::NotFound { name } => format!("Unknown tool: {name}"),
            Self::ExecutionFailed { reason, .. } | Self::InvalidParameters { reason, .. } => {
                reason.clone()
            }
        }
    }
}

/// Gateway startup and serving errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Gateway failed to start: {reason}")]
    StartupFailed { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the HTTP client and the client-side executor.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Not authenticated; run the auth handshake first")]
    NotAuthenticated,

    #[error("Invalid wallet key: {reason}")]
    InvalidKey { reason: String },

    #[error("Transaction history IO failed: {reason}")]
    HistoryIo { reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for the runtime.
pub type Result<T> = std::result::Result<T, Error>;
