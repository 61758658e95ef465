//! End-to-end fund movement tests: the executor endpoints and the
//! client-side retry driver against a real gateway over HTTP.
//!
//! Each test stands up the gateway on a random port with the simulated chain
//! behind every seam, grants spend permissions, and watches balances move
//! ledger-to-ledger: pull into custody, settle, then pay out (transfer) or
//! swap and forward (swap).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use basepilot::agent::AgentLoop;
use basepilot::chain::sim::SimulatedChain;
use basepilot::chain::{BASE_CHAIN_ID, SpendCall, USDC_ADDRESS};
use basepilot::client::{ApiClient, RetryExecutor, WalletSigner};
use basepilot::error::ClientError;
use basepilot::exec::{
    ExecutorTiming, FundMovementExecutor, InMemorySagaStore, PendingSwap, PendingTransfer,
};
use basepilot::gateway::types::{SwapRequest, TransferRequest};
use basepilot::gateway::{Authenticator, GatewayState, InMemoryNonceStore, start_server};
use basepilot::llm::ScriptedBackend;
use basepilot::permissions::{Allocator, PermissionRegistry, build_spend_calls};
use basepilot::tools::{JsonAmount, ToolRegistry};
use basepilot::wallet::WalletDirectory;

const RECIPIENT: &str = "0x3333333333333333333333333333333333333333";
const WETH: &str = "0x4200000000000000000000000000000000000006";

fn is_bind_permission_error<E: std::fmt::Display>(err: &E) -> bool {
    err.to_string().contains("Operation not permitted")
        || err.to_string().contains("Failed to bind")
}

struct FundHarness {
    addr: SocketAddr,
    sim: Arc<SimulatedChain>,
    signer: WalletSigner,
    smart_account: String,
    allocator: Arc<Allocator>,
}

/// Start a gateway with millisecond settle/approve delays so movements
/// finish quickly. Returns `None` when the sandbox forbids binding.
async fn start_test_gateway() -> Option<FundHarness> {
    let signer = WalletSigner::random().expect("signer");
    let sim = Arc::new(SimulatedChain::new());

    let wallets = Arc::new(WalletDirectory::new(sim.clone()));
    let wallet = wallets
        .get_or_create(signer.address())
        .await
        .expect("provision wallet");
    // Grants must name the smart account the executor pulls into.
    let allocator = Arc::new(Allocator::new(
        sim.clone(),
        wallet.smart_account_address.clone(),
        USDC_ADDRESS,
        BASE_CHAIN_ID,
    ));

    let auth = Authenticator::new(
        Arc::new(InMemoryNonceStore::new()),
        chrono::Duration::hours(1),
    );
    // Chat is not exercised here; the agent rides an empty script.
    let agent = AgentLoop::new(
        Arc::new(ScriptedBackend::default()),
        Arc::new(ToolRegistry::new()),
    );
    let executor = FundMovementExecutor::new(
        sim.clone(),
        sim.clone(),
        sim.clone(),
        Arc::new(InMemorySagaStore::new()),
        ExecutorTiming {
            settle_delay: Duration::from_millis(10),
            approve_delay: Duration::from_millis(10),
        },
    );
    let state = Arc::new(GatewayState::new(auth, agent, wallets, executor));

    let addr: SocketAddr = "127.0.0.1:0".parse().expect("addr");
    match start_server(addr, state).await {
        Ok(bound) => Some(FundHarness {
            addr: bound,
            sim,
            signer,
            smart_account: wallet.smart_account_address,
            allocator,
        }),
        Err(e) if is_bind_permission_error(&e) => None,
        Err(e) => panic!("Failed to start test server: {e:?}"),
    }
}

impl FundHarness {
    async fn signed_in_api(&self) -> ApiClient {
        let api = ApiClient::new(format!("http://{}", self.addr));
        api.sign_in(&self.signer).await.expect("sign in");
        api
    }

    /// Funds the signer's wallet and grants `allowance_usd` to custody.
    async fn fund_and_grant(&self, balance: u128, allowance_usd: Decimal) {
        self.sim
            .set_balance(USDC_ADDRESS, self.signer.address(), balance);
        self.allocator
            .request_allowance(self.signer.address(), allowance_usd, 1)
            .await
            .expect("grant");
    }

    /// Plans the pull for `amount` base units from the live grants.
    async fn spend_calls(&self, amount: u128) -> Vec<SpendCall> {
        let permissions = self
            .allocator
            .usable_permissions(self.signer.address())
            .await
            .expect("permissions");
        let plan = build_spend_calls(self.allocator.registry(), &permissions, amount)
            .await
            .expect("plan");
        assert!(plan.is_covered(), "grants must cover the planned amount");
        plan.spend_calls
    }

    fn pending_transfer(&self, amount: &str, amount_usd: &str) -> PendingTransfer {
        PendingTransfer {
            recipient: RECIPIENT.to_string(),
            amount: amount.to_string(),
            amount_usd: amount_usd.to_string(),
            user_address: self.signer.address().to_string(),
            smart_account_address: self.smart_account.clone(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_transfer_moves_usdc_end_to_end() {
    let Some(h) = start_test_gateway().await else {
        return;
    };
    let api = h.signed_in_api().await;
    h.fund_and_grant(5_000_000, dec!(2)).await;
    let spend_calls = h.spend_calls(1_000_000).await;

    let response = api
        .transfer(&TransferRequest {
            sender: h.signer.address().to_string(),
            recipient: RECIPIENT.to_string(),
            token_address: USDC_ADDRESS.to_string(),
            amount: JsonAmount::from("1000000"),
            spend_calls,
        })
        .await
        .expect("transfer");

    assert!(response.success);
    assert_eq!(response.message, "✅ USDC transfer completed successfully");
    assert_eq!(response.amount, "1000000");
    assert_eq!(response.recipient, RECIPIENT);
    assert_eq!(response.details.spend_calls_executed, 1);
    assert!(!response.pull_user_op_hash.is_empty());
    assert!(!response.transfer_user_op_hash.is_empty());
    assert_ne!(response.pull_user_op_hash, response.transfer_user_op_hash);

    assert_eq!(h.sim.balance(USDC_ADDRESS, RECIPIENT), 1_000_000);
    assert_eq!(h.sim.balance(USDC_ADDRESS, h.signer.address()), 4_000_000);
    assert_eq!(h.sim.balance(USDC_ADDRESS, &h.smart_account), 0);
}

#[tokio::test]
async fn test_underfunded_pull_reports_custody_shortfall() {
    let Some(h) = start_test_gateway().await else {
        return;
    };
    let api = h.signed_in_api().await;
    h.fund_and_grant(5_000_000, dec!(2)).await;
    // Pull covers only 0.3 USDC of the requested 1 USDC.
    let spend_calls = h.spend_calls(300_000).await;

    let err = api
        .transfer(&TransferRequest {
            sender: h.signer.address().to_string(),
            recipient: RECIPIENT.to_string(),
            token_address: USDC_ADDRESS.to_string(),
            amount: JsonAmount::from("1000000"),
            spend_calls,
        })
        .await
        .expect_err("custody short");

    let ClientError::Api { status, message } = err else {
        panic!("expected API error, got {err:?}");
    };
    assert_eq!(status, 500);
    assert!(message.contains("Insufficient balance in smart wallet. Has: 0.3, needs: 1"));

    // The pull landed, so the partial state is visible in custody.
    assert_eq!(h.sim.balance(USDC_ADDRESS, &h.smart_account), 300_000);
    assert_eq!(h.sim.balance(USDC_ADDRESS, RECIPIENT), 0);
}

#[tokio::test]
async fn test_swap_trades_and_forwards_to_the_sender() {
    let Some(h) = start_test_gateway().await else {
        return;
    };
    let api = h.signed_in_api().await;
    h.fund_and_grant(5_000_000, dec!(2)).await;
    h.sim.set_swap_rate(2, 1);
    let spend_calls = h.spend_calls(1_000_000).await;

    let response = api
        .swap(&SwapRequest {
            sender: h.signer.address().to_string(),
            token_address: WETH.to_string(),
            amount: JsonAmount::from("1000000"),
            spend_calls,
        })
        .await
        .expect("swap");

    assert!(response.success);
    assert_eq!(
        response.message,
        format!(
            "✅ Successfully swapped 1000000 USDC for tokens and sent them to {}",
            h.signer.address()
        )
    );
    assert!(!response.trade_transaction_hash.is_empty());
    assert_eq!(response.token_address, WETH);

    // 2:1 rate, full output forwarded home.
    assert_eq!(h.sim.balance(WETH, h.signer.address()), 2_000_000);
    assert_eq!(h.sim.balance(WETH, &h.smart_account), 0);
    assert_eq!(h.sim.balance(USDC_ADDRESS, &h.smart_account), 0);
}

#[tokio::test]
async fn test_one_transfer_can_draw_on_multiple_grants() {
    let Some(h) = start_test_gateway().await else {
        return;
    };
    let api = h.signed_in_api().await;
    h.sim
        .set_balance(USDC_ADDRESS, h.signer.address(), 5_000_000);
    // Two grants: 0.4 then 0.7 USDC. A 1 USDC pull drains the first and
    // takes the remainder from the second.
    h.allocator
        .request_allowance(h.signer.address(), dec!(0.4), 1)
        .await
        .expect("grant a");
    h.allocator
        .request_allowance(h.signer.address(), dec!(0.7), 1)
        .await
        .expect("grant b");

    let permissions = h
        .allocator
        .usable_permissions(h.signer.address())
        .await
        .expect("permissions");
    let plan = build_spend_calls(h.allocator.registry(), &permissions, 1_000_000)
        .await
        .expect("plan");
    assert_eq!(plan.spend_calls.len(), 2);
    assert_eq!(plan.contributions[0].amount, 400_000);
    assert_eq!(plan.contributions[1].amount, 600_000);

    let response = api
        .transfer(&TransferRequest {
            sender: h.signer.address().to_string(),
            recipient: RECIPIENT.to_string(),
            token_address: USDC_ADDRESS.to_string(),
            amount: JsonAmount::from("1000000"),
            spend_calls: plan.spend_calls,
        })
        .await
        .expect("transfer");

    assert!(response.success);
    assert_eq!(response.details.spend_calls_executed, 2);
    assert_eq!(h.sim.balance(USDC_ADDRESS, RECIPIENT), 1_000_000);

    // The older grant is drained; 0.1 USDC survives on the newer one.
    assert_eq!(
        h.sim.remaining_spend(&permissions[0]).await.expect("status"),
        0
    );
    assert_eq!(
        h.sim.remaining_spend(&permissions[1]).await.expect("status"),
        100_000
    );
}

#[tokio::test]
async fn test_retry_executor_recovers_from_a_relay_outage() {
    let Some(h) = start_test_gateway().await else {
        return;
    };
    let api = Arc::new(h.signed_in_api().await);
    h.fund_and_grant(5_000_000, dec!(2)).await;

    // The first pull submission dies at the relay; the second attempt lands.
    h.sim.fail_next_submissions(1);

    let executor = RetryExecutor::new(api, h.allocator.clone());
    let report = executor
        .execute_transfer(&h.pending_transfer("1000000", "1"))
        .await;

    assert!(report.success, "report: {report:?}");
    assert_eq!(
        report.message,
        "Transaction successful! (succeeded on attempt 2)"
    );
    assert!(report.transaction_hash.is_some());
    assert_eq!(h.sim.balance(USDC_ADDRESS, RECIPIENT), 1_000_000);
}

#[tokio::test]
async fn test_retry_executor_stops_without_permissions() {
    let Some(h) = start_test_gateway().await else {
        return;
    };
    let api = Arc::new(h.signed_in_api().await);
    // Funded, but no grants at all.
    h.sim
        .set_balance(USDC_ADDRESS, h.signer.address(), 5_000_000);

    let executor = RetryExecutor::new(api, h.allocator.clone());
    let report = executor
        .execute_transfer(&h.pending_transfer("1000000", "1"))
        .await;

    assert!(!report.success);
    assert_eq!(
        report.message,
        "No spend permissions found. Please set up spend permissions first."
    );
    assert_eq!(h.sim.balance(USDC_ADDRESS, RECIPIENT), 0);
    assert_eq!(h.sim.balance(USDC_ADDRESS, &h.smart_account), 0);
}

#[tokio::test]
async fn test_retry_executor_reports_allowance_shortfall() {
    let Some(h) = start_test_gateway().await else {
        return;
    };
    let api = Arc::new(h.signed_in_api().await);
    h.fund_and_grant(5_000_000, dec!(0.3)).await;

    let executor = RetryExecutor::new(api, h.allocator.clone());
    let report = executor
        .execute_transfer(&h.pending_transfer("1000000", "1"))
        .await;

    assert!(!report.success);
    assert_eq!(
        report.message,
        "Insufficient spend permission allowance. Need 0.7 more USDC in permissions."
    );
    // Terminal before any pull was submitted.
    assert_eq!(h.sim.balance(USDC_ADDRESS, &h.smart_account), 0);
}

#[tokio::test]
async fn test_retry_executor_runs_swaps_end_to_end() {
    let Some(h) = start_test_gateway().await else {
        return;
    };
    let api = Arc::new(h.signed_in_api().await);
    h.fund_and_grant(5_000_000, dec!(2)).await;
    h.sim.set_swap_rate(3, 1);

    let executor = RetryExecutor::new(api, h.allocator.clone());
    let report = executor
        .execute_swap(
            &PendingSwap {
                token_address: WETH.to_string(),
                amount: "1000000".to_string(),
                amount_usd: "1".to_string(),
                user_address: h.signer.address().to_string(),
                smart_account_address: h.smart_account.clone(),
            },
            Some("WETH"),
        )
        .await;

    assert!(report.success, "report: {report:?}");
    assert_eq!(report.message, "Swap successful! Exchanged $1 USDC for WETH");
    assert!(report.transaction_hash.is_some());
    assert_eq!(h.sim.balance(WETH, h.signer.address()), 3_000_000);
}
