//! Axum HTTP server for the chat gateway.
//!
//! Public routes cover health, the wallet-auth handshake, and chat (which
//! works anonymously but only defers fund movements for authenticated
//! sessions). The server-wallet and fund-movement routes sit behind session
//! middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Request, State},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tokio::sync::oneshot;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tracing::{error, info, warn};

use crate::agent::AgentLoop;
use crate::chain::{self, EXPLORER_URL, USDC_ADDRESS};
use crate::error::{AuthError, GatewayError};
use crate::exec::{FundMovementExecutor, OperationKind, SwapOrder, TransferOrder};
use crate::gateway::auth::{Authenticator, DEFAULT_SESSION_TTL_SECS};
use crate::gateway::types::*;
use crate::tools::ToolContext;
use crate::wallet::WalletDirectory;

/// Wallet address of the live session, stamped onto requests that pass
/// [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct SessionIdentity(pub String);

/// Shared state for all gateway handlers.
pub struct GatewayState {
    pub auth: Authenticator,
    pub agent: AgentLoop,
    pub wallets: Arc<WalletDirectory>,
    pub executor: FundMovementExecutor,
    /// Shutdown signal sender.
    pub shutdown_tx: tokio::sync::RwLock<Option<oneshot::Sender<()>>>,
}

impl GatewayState {
    pub fn new(
        auth: Authenticator,
        agent: AgentLoop,
        wallets: Arc<WalletDirectory>,
        executor: FundMovementExecutor,
    ) -> Self {
        Self {
            auth,
            agent,
            wallets,
            executor,
            shutdown_tx: tokio::sync::RwLock::new(None),
        }
    }

    /// Stops the serve loop, if one is running.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
    }
}

/// Start the gateway HTTP server.
///
/// Returns the actual bound `SocketAddr` (useful when binding to port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<GatewayState>,
) -> Result<SocketAddr, GatewayError> {
    let listener =
        tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::StartupFailed {
                reason: format!("Failed to bind to {}: {}", addr, e),
            })?;
    let bound_addr = listener
        .local_addr()
        .map_err(|e| GatewayError::StartupFailed {
            reason: format!("Failed to get local addr: {}", e),
        })?;

    // Public routes (no auth)
    let public = Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/auth/nonce", get(auth_nonce_handler))
        .route("/api/auth/verify", post(auth_verify_handler))
        .route("/api/auth/status", get(auth_status_handler))
        .route("/api/auth/signout", post(auth_signout_handler))
        .route("/api/chat", post(chat_handler));

    // Protected routes (always require a live session)
    let protected = Router::new()
        .route("/api/serverwallet", get(serverwallet_handler))
        .route("/api/transfer", post(transfer_handler))
        .route("/api/swap", post(swap_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    // CORS: restrict to same-origin by default. Only localhost/127.0.0.1
    // origins are allowed, since the gateway is a local-first service.
    let cors = CorsLayer::new()
        .allow_origin([
            format!("http://{}:{}", bound_addr.ip(), bound_addr.port())
                .parse()
                .expect("valid origin"),
            format!("http://localhost:{}", bound_addr.port())
                .parse()
                .expect("valid origin"),
        ])
        .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
        ]))
        .allow_credentials(true);

    let app = Router::new()
        .merge(public)
        .merge(protected)
        .layer(cors)
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB max request body
        .with_state(state.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("Gateway shutting down");
            })
            .await
        {
            tracing::error!("Gateway server error: {}", e);
        }
    });

    info!(addr = %bound_addr, "gateway listening");
    Ok(bound_addr)
}

/// Rejects requests without a live session and stamps the wallet identity
/// onto the request for downstream handlers.
pub async fn auth_middleware(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let address =
        session_token(request.headers()).and_then(|token| state.auth.authenticate(&token));
    let Some(address) = address else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("Not authenticated")),
        )
            .into_response();
    };
    request.extensions_mut().insert(SessionIdentity(address));
    next.run(request).await
}

/// Session token from the `Authorization: Bearer` header, falling back to
/// the `session` cookie set by the verify handler.
fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| cookie_token(headers))
}

fn cookie_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies
        .split(';')
        .find_map(|pair| pair.trim().strip_prefix("session="))
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

fn session_cookie(token: &str, max_age_secs: i64) -> String {
    format!("session={token}; Path=/; HttpOnly; SameSite=Strict; Max-Age={max_age_secs}")
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::new(message))).into_response()
}

// --- Health ---

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

// --- Auth ---

async fn auth_nonce_handler(State(state): State<Arc<GatewayState>>) -> Json<NonceResponse> {
    Json(NonceResponse {
        nonce: state.auth.issue_nonce(),
    })
}

async fn auth_verify_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let Ok(req) = serde_json::from_value::<VerifyRequest>(body) else {
        return bad_request("Missing required fields: address, message, signature");
    };

    match state.auth.verify(&req.address, &req.message, &req.signature) {
        Ok(token) => {
            let cookie = session_cookie(&token, DEFAULT_SESSION_TTL_SECS);
            (
                [(header::SET_COOKIE, cookie)],
                Json(VerifyResponse {
                    ok: true,
                    address: req.address,
                    session_token: token,
                }),
            )
                .into_response()
        }
        Err(err) => {
            warn!(address = %req.address, error = %err, "sign-in verification failed");
            let status = match err {
                AuthError::MalformedMessage { .. } | AuthError::InvalidAddress { .. } => {
                    StatusCode::BAD_REQUEST
                }
                _ => StatusCode::UNAUTHORIZED,
            };
            (status, Json(ErrorResponse::new(err.to_string()))).into_response()
        }
    }
}

async fn auth_status_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> Json<AuthStatusResponse> {
    let Some(token) = session_token(&headers) else {
        return Json(AuthStatusResponse {
            is_authenticated: false,
            address: None,
            error: Some("No session".to_string()),
        });
    };
    match state.auth.authenticate(&token) {
        Some(address) => Json(AuthStatusResponse {
            is_authenticated: true,
            address: Some(address),
            error: None,
        }),
        None => Json(AuthStatusResponse {
            is_authenticated: false,
            address: None,
            error: Some("Invalid session".to_string()),
        }),
    }
}

async fn auth_signout_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    if let Some(token) = session_token(&headers) {
        state.auth.sign_out(&token);
    }
    (
        [(header::SET_COOKIE, session_cookie("", 0))],
        Json(SignOutResponse {
            message: "Logged out successfully".to_string(),
        }),
    )
}

// --- Chat ---

async fn chat_handler(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let Ok(req) = serde_json::from_value::<ChatRequest>(body) else {
        return bad_request("Message is required");
    };
    if req.message.trim().is_empty() {
        return bad_request("Message is required");
    }

    // Fund movers need the session identity; everything else runs anonymously.
    let ctx = session_token(&headers)
        .and_then(|token| state.auth.authenticate(&token))
        .map(ToolContext::authenticated)
        .unwrap_or_default();

    let reply = match state
        .agent
        .run(&req.message, &req.conversation_history, &ctx)
        .await
    {
        Ok(reply) => reply,
        Err(err) => {
            error!(error = %err, "chat turn failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Failed to get response from Gemini API")),
            )
                .into_response();
        }
    };

    let mut response = ChatResponse {
        response: reply.response,
        tool_used: reply.tool_used,
        ..Default::default()
    };
    if let Some(operation) = reply.pending {
        response.execute_client_side = Some(true);
        response.swap_type =
            (operation.kind() == OperationKind::Swap).then(|| "usdc-to-token".to_string());
        response.transaction_params = Some(operation.params_value());
    }
    Json(response).into_response()
}

// --- Server wallet ---

async fn serverwallet_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(identity): Extension<SessionIdentity>,
) -> Response {
    match state.wallets.get_or_create(&identity.0).await {
        Ok(wallet) => Json(ServerWalletResponse {
            address: identity.0,
            server_wallet_address: wallet.server_wallet_address,
            smart_account_address: wallet.smart_account_address,
            message: "Server wallet retrieved successfully".to_string(),
        })
        .into_response(),
        Err(err) => {
            error!(owner = %identity.0, error = %err, "server wallet provisioning failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::with_details(
                    "Failed to provision server wallet",
                    err.to_string(),
                )),
            )
                .into_response()
        }
    }
}

// --- Fund movement ---

async fn transfer_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let Ok(req) = serde_json::from_value::<TransferRequest>(body) else {
        return bad_request(
            "Missing required fields: recipient, sender, amount, or spendCalls (array)",
        );
    };
    let Some(amount) = chain::parse_amount(&req.amount.canonical()) else {
        return bad_request("Invalid amount");
    };
    let Some(wallet) = state.wallets.get(&req.sender).await else {
        return bad_request("Server wallet not found");
    };

    let order = TransferOrder {
        sender: req.sender,
        recipient: req.recipient,
        smart_account: wallet.smart_account_address,
        token: req.token_address,
        amount,
        spend_calls: req.spend_calls,
    };
    match state.executor.transfer(&order).await {
        Ok(outcome) => Json(TransferResponse {
            success: true,
            message: "✅ USDC transfer completed successfully".to_string(),
            pull_user_op_hash: outcome.pull_operation_id,
            transfer_user_op_hash: outcome.transfer_operation_id,
            amount: outcome.amount.to_string(),
            recipient: outcome.recipient,
            token_address: outcome.token,
            explorer_url: EXPLORER_URL.to_string(),
            details: TransferDetails {
                spend_calls_executed: outcome.spend_calls_executed,
                total_amount: outcome.amount.to_string(),
            },
        })
        .into_response(),
        Err(err) => {
            error!(error = %err, "transfer failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::with_details("Transfer failed", err.to_string())),
            )
                .into_response()
        }
    }
}

async fn swap_handler(
    State(state): State<Arc<GatewayState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let Ok(req) = serde_json::from_value::<SwapRequest>(body) else {
        return bad_request(
            "Missing required fields: tokenAddress, sender, amount, or spendCalls (array)",
        );
    };
    // The success message quotes the amount exactly as the client sent it,
    // in base units.
    let raw_amount = req.amount.canonical();
    let Some(amount) = chain::parse_amount(&raw_amount) else {
        return bad_request("Invalid amount");
    };
    let Some(wallet) = state.wallets.get(&req.sender).await else {
        return bad_request("Server wallet not found");
    };

    let order = SwapOrder {
        sender: req.sender.clone(),
        smart_account: wallet.smart_account_address,
        from_token: USDC_ADDRESS.to_string(),
        to_token: req.token_address,
        amount,
        spend_calls: req.spend_calls,
    };
    match state.executor.swap(&order).await {
        Ok(outcome) => Json(SwapResponse {
            success: true,
            message: format!(
                "✅ Successfully swapped {raw_amount} USDC for tokens and sent them to {}",
                req.sender
            ),
            pull_user_op_hash: outcome.pull_operation_id,
            trade_transaction_hash: outcome.trade_transaction_hash.unwrap_or_default(),
            amount: outcome.amount.to_string(),
            token_address: outcome.to_token,
            explorer_url: EXPLORER_URL.to_string(),
        })
        .into_response(),
        Err(err) => {
            error!(error = %err, "swap failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::with_details(
                    "Swap + transfer failed",
                    err.to_string(),
                )),
            )
                .into_response()
        }
    }
}
