//! The two fund-moving tools.
//!
//! Neither touches the chain. They validate, resolve the caller's custodial
//! wallet, and defer: the returned [`PendingOperation`] crosses back to the
//! client, which gathers permissions and calls the executor endpoints in the
//! user's own authenticated context.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::chain;
use crate::error::ToolError;
use crate::exec::{PendingOperation, PendingSwap, PendingTransfer};
use crate::tools::{invalid_params, JsonAmount, Tool, ToolContext, ToolName, ToolOutcome};
use crate::wallet::WalletDirectory;

fn auth_required(action: &str) -> ToolOutcome {
    ToolOutcome::Completed(json!({
        "success": false,
        "requiresAuth": true,
        "message": format!("USDC {action} requires user authentication"),
        "instructions": ["Please connect your wallet to the application first"],
    }))
}

fn setup_required() -> ToolOutcome {
    ToolOutcome::Completed(json!({
        "success": false,
        "requiresSetup": true,
        "message": "Server wallet not found. Please refresh and try again.",
    }))
}

fn positive_base_units(name: ToolName, amount: &str) -> Result<u128, ToolError> {
    let units = chain::parse_amount(amount).ok_or_else(|| {
        invalid_params(name, "amount must be a base-unit integer string")
    })?;
    if units == 0 {
        return Err(invalid_params(name, "Amount must be greater than 0"));
    }
    Ok(units)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendUsdcParams {
    recipient: String,
    amount: String,
    #[serde(rename = "amountUSD")]
    amount_usd: JsonAmount,
    #[serde(default)]
    user_address: Option<String>,
}

/// `sendUSDCTransaction`: prepares a USDC transfer for client execution.
pub struct SendUsdcTool {
    wallets: Arc<WalletDirectory>,
}

impl SendUsdcTool {
    pub fn new(wallets: Arc<WalletDirectory>) -> Self {
        Self { wallets }
    }
}

#[async_trait]
impl Tool for SendUsdcTool {
    fn name(&self) -> ToolName {
        ToolName::SendUsdcTransaction
    }

    fn description(&self) -> &str {
        "Send USDC tokens to another wallet address on the Base network. Use this tool when users want to transfer, send, or pay USDC to someone. This tool integrates with the user's spend permissions system and will trigger client-side execution for proper permission handling."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "recipient": {
                    "type": "string",
                    "description": "The wallet address to send USDC to (must be a valid Ethereum address starting with 0x)"
                },
                "amount": {
                    "type": "string",
                    "description": "Amount of USDC to send in smallest units (6 decimals). For example, '1000000' = 1 USDC, '500000' = 0.5 USDC"
                },
                "amountUSD": {
                    "type": "number",
                    "description": "Amount in USD for user-friendly display (e.g., 1.5 for $1.50)"
                },
                "userAddress": {
                    "type": "string",
                    "description": "The user's wallet address (automatically populated from session if not provided)"
                }
            },
            "required": ["recipient", "amount", "amountUSD"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let parsed: SendUsdcParams = serde_json::from_value(params)
            .map_err(|e| invalid_params(self.name(), e.to_string()))?;

        if !chain::is_address(&parsed.recipient) {
            return Err(invalid_params(
                self.name(),
                "Invalid recipient address. Must be a valid Ethereum address starting with 0x",
            ));
        }
        positive_base_units(self.name(), &parsed.amount)?;

        let Some(user_address) = parsed
            .user_address
            .or_else(|| ctx.user_address.clone())
        else {
            return Ok(auth_required("transfer"));
        };
        let Some(wallet) = self.wallets.get(&user_address).await else {
            return Ok(setup_required());
        };

        let amount_usd = parsed.amount_usd.canonical();
        Ok(ToolOutcome::Deferred {
            message: format!(
                "Preparing to send ${} USDC to {}...",
                amount_usd, parsed.recipient
            ),
            operation: PendingOperation::Transfer(PendingTransfer {
                recipient: parsed.recipient,
                amount: parsed.amount,
                amount_usd,
                user_address,
                smart_account_address: wallet.smart_account_address,
            }),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapUsdcParams {
    token_address: String,
    amount: String,
    #[serde(rename = "amountUSD")]
    amount_usd: JsonAmount,
    #[serde(default)]
    user_address: Option<String>,
}

/// `swapUSDCToken`: prepares a USDC-to-token swap for client execution.
pub struct SwapUsdcTool {
    wallets: Arc<WalletDirectory>,
}

impl SwapUsdcTool {
    pub fn new(wallets: Arc<WalletDirectory>) -> Self {
        Self { wallets }
    }
}

#[async_trait]
impl Tool for SwapUsdcTool {
    fn name(&self) -> ToolName {
        ToolName::SwapUsdcToken
    }

    fn description(&self) -> &str {
        "Swap USDC for another token on the Base network. Use this tool when users want to swap, convert, or trade their USDC into a different token by its contract address. The swap runs through the user's spend permissions and triggers client-side execution."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "tokenAddress": {
                    "type": "string",
                    "description": "Contract address of the token to receive (must be a valid address starting with 0x)"
                },
                "amount": {
                    "type": "string",
                    "description": "Amount of USDC to swap in smallest units (6 decimals). For example, '1000000' = 1 USDC"
                },
                "amountUSD": {
                    "type": "number",
                    "description": "Amount in USD for user-friendly display (e.g., 1.5 for $1.50)"
                },
                "userAddress": {
                    "type": "string",
                    "description": "The user's wallet address (automatically populated from session if not provided)"
                }
            },
            "required": ["tokenAddress", "amount", "amountUSD"]
        })
    }

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let parsed: SwapUsdcParams = serde_json::from_value(params)
            .map_err(|e| invalid_params(self.name(), e.to_string()))?;

        if !chain::is_address(&parsed.token_address) {
            return Err(invalid_params(
                self.name(),
                "Invalid token address. Must be a valid contract address starting with 0x",
            ));
        }
        positive_base_units(self.name(), &parsed.amount)?;

        let Some(user_address) = parsed
            .user_address
            .or_else(|| ctx.user_address.clone())
        else {
            return Ok(auth_required("swap"));
        };
        let Some(wallet) = self.wallets.get(&user_address).await else {
            return Ok(setup_required());
        };

        let amount_usd = parsed.amount_usd.canonical();
        Ok(ToolOutcome::Deferred {
            message: format!(
                "Preparing to swap ${} USDC to {}...",
                amount_usd, parsed.token_address
            ),
            operation: PendingOperation::Swap(PendingSwap {
                token_address: parsed.token_address,
                amount: parsed.amount,
                amount_usd,
                user_address,
                smart_account_address: wallet.smart_account_address,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WalletError;
    use crate::wallet::{ServerWallet, WalletProvider};

    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x3333333333333333333333333333333333333333";

    struct StubProvider;

    #[async_trait]
    impl WalletProvider for StubProvider {
        async fn provision(&self, owner: &str) -> Result<ServerWallet, WalletError> {
            Ok(ServerWallet {
                server_wallet_address: format!("0xserver-{owner}"),
                smart_account_address: "0x2222222222222222222222222222222222222222".to_string(),
            })
        }
    }

    async fn directory_with_alice() -> Arc<WalletDirectory> {
        let directory = Arc::new(WalletDirectory::new(Arc::new(StubProvider)));
        directory.get_or_create(ALICE).await.expect("provision");
        directory
    }

    #[tokio::test]
    async fn send_defers_with_transaction_params() {
        let tool = SendUsdcTool::new(directory_with_alice().await);
        let outcome = tool
            .execute(
                serde_json::json!({
                    "recipient": BOB,
                    "amount": "100000",
                    "amountUSD": 0.1,
                }),
                &ToolContext::authenticated(ALICE),
            )
            .await
            .expect("execute");

        let ToolOutcome::Deferred { message, operation } = outcome else {
            panic!("expected deferred outcome");
        };
        assert_eq!(
            message,
            format!("Preparing to send $0.1 USDC to {BOB}...")
        );
        let params = operation.params_value();
        assert_eq!(params["amount"], "100000");
        assert_eq!(params["amountUSD"], "0.1");
        assert_eq!(params["userAddress"], ALICE);
        assert_eq!(
            params["smartAccountAddress"],
            "0x2222222222222222222222222222222222222222"
        );
    }

    #[tokio::test]
    async fn send_prefers_explicit_user_address_over_session() {
        let directory = Arc::new(WalletDirectory::new(Arc::new(StubProvider)));
        directory.get_or_create(BOB).await.expect("provision");
        let tool = SendUsdcTool::new(directory);

        let outcome = tool
            .execute(
                serde_json::json!({
                    "recipient": ALICE,
                    "amount": "100000",
                    "amountUSD": "0.1",
                    "userAddress": BOB,
                }),
                &ToolContext::authenticated(ALICE),
            )
            .await
            .expect("execute");
        let ToolOutcome::Deferred { operation, .. } = outcome else {
            panic!("expected deferred outcome");
        };
        assert_eq!(operation.user_address(), BOB);
    }

    #[tokio::test]
    async fn send_requires_authentication() {
        let tool = SendUsdcTool::new(directory_with_alice().await);
        let outcome = tool
            .execute(
                serde_json::json!({
                    "recipient": BOB,
                    "amount": "100000",
                    "amountUSD": 0.1,
                }),
                &ToolContext::default(),
            )
            .await
            .expect("execute");

        let ToolOutcome::Completed(value) = outcome else {
            panic!("expected completed outcome");
        };
        assert_eq!(value["requiresAuth"], true);
        assert_eq!(value["success"], false);
    }

    #[tokio::test]
    async fn send_requires_a_provisioned_wallet() {
        let tool = SendUsdcTool::new(Arc::new(WalletDirectory::new(Arc::new(StubProvider))));
        let outcome = tool
            .execute(
                serde_json::json!({
                    "recipient": BOB,
                    "amount": "100000",
                    "amountUSD": 0.1,
                }),
                &ToolContext::authenticated(ALICE),
            )
            .await
            .expect("execute");

        let ToolOutcome::Completed(value) = outcome else {
            panic!("expected completed outcome");
        };
        assert_eq!(value["requiresSetup"], true);
        assert_eq!(
            value["message"],
            "Server wallet not found. Please refresh and try again."
        );
    }

    #[tokio::test]
    async fn send_rejects_bad_recipient_and_amount() {
        let tool = SendUsdcTool::new(directory_with_alice().await);

        let err = tool
            .execute(
                serde_json::json!({"recipient": "bob", "amount": "1", "amountUSD": 1}),
                &ToolContext::authenticated(ALICE),
            )
            .await
            .expect_err("bad recipient");
        assert!(err.to_string().contains("Invalid recipient address"));

        let err = tool
            .execute(
                serde_json::json!({"recipient": BOB, "amount": "0", "amountUSD": 0}),
                &ToolContext::authenticated(ALICE),
            )
            .await
            .expect_err("zero amount");
        assert!(err.to_string().contains("Amount must be greater than 0"));

        let err = tool
            .execute(
                serde_json::json!({"recipient": BOB, "amount": "1.5", "amountUSD": 1}),
                &ToolContext::authenticated(ALICE),
            )
            .await
            .expect_err("fractional base units");
        assert!(err.to_string().contains("base-unit integer"));
    }

    #[tokio::test]
    async fn swap_defers_with_pending_swap() {
        let tool = SwapUsdcTool::new(directory_with_alice().await);
        let weth = "0x4200000000000000000000000000000000000006";

        let outcome = tool
            .execute(
                serde_json::json!({
                    "tokenAddress": weth,
                    "amount": "1000000",
                    "amountUSD": 1,
                }),
                &ToolContext::authenticated(ALICE),
            )
            .await
            .expect("execute");

        let ToolOutcome::Deferred { message, operation } = outcome else {
            panic!("expected deferred outcome");
        };
        assert_eq!(message, format!("Preparing to swap $1 USDC to {weth}..."));
        assert_eq!(operation.kind(), crate::exec::OperationKind::Swap);
        assert_eq!(operation.params_value()["tokenAddress"], weth);
    }

    #[tokio::test]
    async fn swap_rejects_bad_token_address() {
        let tool = SwapUsdcTool::new(directory_with_alice().await);
        let err = tool
            .execute(
                serde_json::json!({"tokenAddress": "weth", "amount": "1", "amountUSD": 1}),
                &ToolContext::authenticated(ALICE),
            )
            .await
            .expect_err("bad token");
        assert!(err.to_string().contains("Invalid token address"));
    }
}
