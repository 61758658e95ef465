//! Fund-Movement Executor.
//!
//! Runs the server side of a fund movement as a strictly sequential saga:
//! pull into custody via spend calls, then transfer out (transfer mode) or
//! approve + swap + forward (swap mode). Every step submits through the
//! sponsored-gas relay and awaits completion before the next, because later
//! steps depend on earlier ones being visible on chain.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

use crate::chain::erc20;
use crate::chain::relay::{RelayClient, SwapClient, SwapRequest, TokenReader};
use crate::chain::{self, Call, OperationReceipt, SpendCall, PERMIT2_ADDRESS};
use crate::error::ExecutionError;

pub mod pending;
pub mod saga;

pub use pending::{OperationKind, PendingOperation, PendingSwap, PendingTransfer};
pub use saga::{InMemorySagaStore, SagaLog, SagaOutcome, SagaStep, SagaStore};

/// Fixed wait after the pull before custody balances are trusted. A weak
/// substitute for a real confirmation wait.
pub const SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Wait between the router approval and the swap itself.
pub const APPROVE_DELAY: Duration = Duration::from_secs(3);

/// Swap slippage tolerance in basis points (5%).
pub const SLIPPAGE_BPS: u32 = 500;

/// Settle timing knobs, overridable from config.
#[derive(Debug, Clone)]
pub struct ExecutorTiming {
    pub settle_delay: Duration,
    pub approve_delay: Duration,
}

impl Default for ExecutorTiming {
    fn default() -> Self {
        Self {
            settle_delay: SETTLE_DELAY,
            approve_delay: APPROVE_DELAY,
        }
    }
}

/// A validated transfer request: pull `amount` of `token` from `sender` via
/// the spend calls, then send it to `recipient`.
#[derive(Debug, Clone)]
pub struct TransferOrder {
    pub sender: String,
    pub recipient: String,
    pub smart_account: String,
    pub token: String,
    pub amount: u128,
    pub spend_calls: Vec<SpendCall>,
}

/// A validated swap request: pull `amount` of `from_token` from `sender`,
/// swap it to `to_token`, and forward the proceeds back to `sender`.
#[derive(Debug, Clone)]
pub struct SwapOrder {
    pub sender: String,
    pub smart_account: String,
    pub from_token: String,
    pub to_token: String,
    pub amount: u128,
    pub spend_calls: Vec<SpendCall>,
}

#[derive(Debug, Clone)]
pub struct TransferOutcome {
    pub saga_id: uuid::Uuid,
    pub pull_operation_id: String,
    pub transfer_operation_id: String,
    pub transaction_hash: Option<String>,
    pub amount: u128,
    pub recipient: String,
    pub token: String,
    pub spend_calls_executed: usize,
}

#[derive(Debug, Clone)]
pub struct ForwardedFunds {
    pub operation_id: String,
    pub amount: u128,
}

#[derive(Debug, Clone)]
pub struct SwapOutcome {
    pub saga_id: uuid::Uuid,
    pub pull_operation_id: String,
    pub approve_operation_id: String,
    pub swap_operation_id: String,
    pub trade_transaction_hash: Option<String>,
    pub forwarded: Option<ForwardedFunds>,
    pub amount: u128,
    pub from_token: String,
    pub to_token: String,
}

/// Server-side executor for both fund-movement modes.
pub struct FundMovementExecutor {
    relay: Arc<dyn RelayClient>,
    reader: Arc<dyn TokenReader>,
    swapper: Arc<dyn SwapClient>,
    sagas: Arc<dyn SagaStore>,
    timing: ExecutorTiming,
    slippage_bps: u32,
}

impl FundMovementExecutor {
    pub fn new(
        relay: Arc<dyn RelayClient>,
        reader: Arc<dyn TokenReader>,
        swapper: Arc<dyn SwapClient>,
        sagas: Arc<dyn SagaStore>,
        timing: ExecutorTiming,
    ) -> Self {
        Self {
            relay,
            reader,
            swapper,
            sagas,
            timing,
            slippage_bps: SLIPPAGE_BPS,
        }
    }

    pub async fn transfer(&self, order: &TransferOrder) -> Result<TransferOutcome, ExecutionError> {
        let recipient = validated_address("recipient", &order.recipient)?;
        require_positive_amount(order.amount)?;
        let calls = pull_calls(&order.spend_calls)?;

        let mut log = SagaLog::begin(
            OperationKind::Transfer,
            &order.sender,
            &order.smart_account,
            order.amount,
        );
        let result = self.run_transfer(&mut log, order, &recipient, &calls).await;
        self.finish(log, result).await
    }

    pub async fn swap(&self, order: &SwapOrder) -> Result<SwapOutcome, ExecutionError> {
        let to_token = validated_address("tokenAddress", &order.to_token)?;
        require_positive_amount(order.amount)?;
        let calls = pull_calls(&order.spend_calls)?;

        let mut log = SagaLog::begin(
            OperationKind::Swap,
            &order.sender,
            &order.smart_account,
            order.amount,
        );
        let result = self.run_swap(&mut log, order, &to_token, &calls).await;
        self.finish(log, result).await
    }

    async fn run_transfer(
        &self,
        log: &mut SagaLog,
        order: &TransferOrder,
        recipient: &str,
        calls: &[Call],
    ) -> Result<TransferOutcome, ExecutionError> {
        info!(
            sender = %order.sender,
            recipient = %recipient,
            amount = order.amount,
            spend_calls = order.spend_calls.len(),
            "executing transfer"
        );

        let (pull_operation_id, _) = self
            .submit_and_confirm("pull", &order.smart_account, calls)
            .await?;
        log.push(SagaStep::Pulled {
            operation_id: pull_operation_id.clone(),
            amount: order.amount,
            spend_calls: order.spend_calls.len(),
        });
        self.sagas.record(log).await;

        sleep(self.timing.settle_delay).await;

        let balance = self
            .reader
            .token_balance(&order.token, &order.smart_account)
            .await
            .map_err(|e| ExecutionError::BalanceQueryFailed {
                reason: e.to_string(),
            })?;
        if balance < order.amount {
            return Err(ExecutionError::InsufficientCustodyBalance {
                has: balance,
                needs: order.amount,
            });
        }
        log.push(SagaStep::BalanceVerified { balance });
        self.sagas.record(log).await;

        let data = erc20::transfer_calldata(recipient, order.amount).ok_or_else(|| {
            ExecutionError::InvalidField {
                field: "recipient".to_string(),
                message: "could not encode transfer calldata".to_string(),
            }
        })?;
        let (transfer_operation_id, receipt) = self
            .submit_and_confirm(
                "transfer",
                &order.smart_account,
                &[Call::new(&order.token, data)],
            )
            .await?;
        log.push(SagaStep::Transferred {
            operation_id: transfer_operation_id.clone(),
            transaction_hash: receipt.transaction_hash.clone(),
        });

        info!(saga = %log.id, pull = %pull_operation_id, transfer = %transfer_operation_id, "transfer complete");
        Ok(TransferOutcome {
            saga_id: log.id,
            pull_operation_id,
            transfer_operation_id,
            transaction_hash: receipt.transaction_hash,
            amount: order.amount,
            recipient: recipient.to_string(),
            token: order.token.clone(),
            spend_calls_executed: order.spend_calls.len(),
        })
    }

    async fn run_swap(
        &self,
        log: &mut SagaLog,
        order: &SwapOrder,
        to_token: &str,
        calls: &[Call],
    ) -> Result<SwapOutcome, ExecutionError> {
        info!(
            sender = %order.sender,
            to_token = %to_token,
            amount = order.amount,
            "executing swap"
        );

        let (pull_operation_id, _) = self
            .submit_and_confirm("pull", &order.smart_account, calls)
            .await?;
        log.push(SagaStep::Pulled {
            operation_id: pull_operation_id.clone(),
            amount: order.amount,
            spend_calls: order.spend_calls.len(),
        });
        self.sagas.record(log).await;

        // One-time maximal router allowance; harmless if already granted.
        let approve_data = erc20::approve_max_calldata(PERMIT2_ADDRESS).ok_or_else(|| {
            ExecutionError::SubmissionFailed {
                step: "approve".to_string(),
                reason: "could not encode approval calldata".to_string(),
            }
        })?;
        let (approve_operation_id, _) = self
            .submit_and_confirm(
                "approve",
                &order.smart_account,
                &[Call::new(&order.from_token, approve_data)],
            )
            .await?;
        log.push(SagaStep::Approved {
            operation_id: approve_operation_id.clone(),
        });
        self.sagas.record(log).await;

        sleep(self.timing.approve_delay).await;

        let request = SwapRequest {
            from_token: order.from_token.clone(),
            to_token: to_token.to_string(),
            from_amount: order.amount,
            slippage_bps: self.slippage_bps,
        };
        let swap_operation_id = self
            .swapper
            .submit_swap(&order.smart_account, &request)
            .await
            .map_err(|e| ExecutionError::SubmissionFailed {
                step: "swap".to_string(),
                reason: e.to_string(),
            })?;
        let receipt = self
            .relay
            .await_completion(&swap_operation_id)
            .await
            .map_err(|e| ExecutionError::CompletionFailed {
                step: "swap".to_string(),
                reason: e.to_string(),
            })?;
        if !receipt.status.is_complete() {
            return Err(ExecutionError::SwapFailed {
                status: receipt.status.as_str().to_string(),
            });
        }
        log.push(SagaStep::Swapped {
            operation_id: swap_operation_id.clone(),
            transaction_hash: receipt.transaction_hash.clone(),
        });
        self.sagas.record(log).await;

        // Forward everything the custody account now holds in the
        // destination token, not just the swap output.
        let destination_balance = self
            .reader
            .token_balance(to_token, &order.smart_account)
            .await
            .map_err(|e| ExecutionError::BalanceQueryFailed {
                reason: e.to_string(),
            })?;
        let forwarded = if destination_balance > 0 {
            let data = erc20::transfer_calldata(&order.sender, destination_balance).ok_or_else(
                || ExecutionError::InvalidField {
                    field: "sender".to_string(),
                    message: "could not encode forwarding calldata".to_string(),
                },
            )?;
            let (forward_operation_id, _) = self
                .submit_and_confirm("forward", &order.smart_account, &[Call::new(to_token, data)])
                .await?;
            log.push(SagaStep::Forwarded {
                operation_id: forward_operation_id.clone(),
                amount: destination_balance,
            });
            Some(ForwardedFunds {
                operation_id: forward_operation_id,
                amount: destination_balance,
            })
        } else {
            None
        };

        info!(saga = %log.id, pull = %pull_operation_id, swap = %swap_operation_id, "swap complete");
        Ok(SwapOutcome {
            saga_id: log.id,
            pull_operation_id,
            approve_operation_id,
            swap_operation_id,
            trade_transaction_hash: receipt.transaction_hash,
            forwarded,
            amount: order.amount,
            from_token: order.from_token.clone(),
            to_token: to_token.to_string(),
        })
    }

    async fn submit_and_confirm(
        &self,
        step: &str,
        account: &str,
        calls: &[Call],
    ) -> Result<(String, OperationReceipt), ExecutionError> {
        let operation_id = self.relay.submit(account, calls).await.map_err(|e| {
            ExecutionError::SubmissionFailed {
                step: step.to_string(),
                reason: e.to_string(),
            }
        })?;
        let receipt = self.relay.await_completion(&operation_id).await.map_err(|e| {
            ExecutionError::CompletionFailed {
                step: step.to_string(),
                reason: e.to_string(),
            }
        })?;
        if !receipt.status.is_complete() {
            return Err(ExecutionError::CompletionFailed {
                step: step.to_string(),
                reason: format!("operation finished with status {}", receipt.status),
            });
        }
        Ok((operation_id, receipt))
    }

    async fn finish<T>(
        &self,
        mut log: SagaLog,
        result: Result<T, ExecutionError>,
    ) -> Result<T, ExecutionError> {
        match &result {
            Ok(_) => log.outcome = SagaOutcome::Succeeded,
            Err(err) => {
                log.outcome = SagaOutcome::Failed {
                    error: err.to_string(),
                };
                if log.funds_stranded() {
                    warn!(
                        saga = %log.id,
                        smart_account = %log.smart_account,
                        amount = log.amount,
                        "fund movement failed after pull; funds remain in custody and no compensation path exists"
                    );
                }
            }
        }
        self.sagas.record(&log).await;
        result
    }
}

fn validated_address(field: &str, value: &str) -> Result<String, ExecutionError> {
    chain::normalize_address(value).ok_or_else(|| ExecutionError::InvalidField {
        field: field.to_string(),
        message: "must be a 0x-prefixed 20-byte hex address".to_string(),
    })
}

fn require_positive_amount(amount: u128) -> Result<(), ExecutionError> {
    if amount == 0 {
        return Err(ExecutionError::InvalidField {
            field: "amount".to_string(),
            message: "must be a positive integer in base units".to_string(),
        });
    }
    Ok(())
}

/// Flattens spend calls into relay calls, rejecting any entry without a
/// usable destination before anything is submitted.
fn pull_calls(spend_calls: &[SpendCall]) -> Result<Vec<Call>, ExecutionError> {
    if spend_calls.is_empty() {
        return Err(ExecutionError::MissingField {
            field: "spendCalls".to_string(),
        });
    }
    let mut calls = Vec::new();
    for (index, spend_call) in spend_calls.iter().enumerate() {
        if spend_call.calls.is_empty() {
            return Err(ExecutionError::SpendCallMissingTarget { index });
        }
        for call in &spend_call.calls {
            if !chain::is_address(&call.to) {
                return Err(ExecutionError::SpendCallMissingTarget { index });
            }
            let value = (call.native_value() > 0).then(|| call.native_value().to_string());
            calls.push(Call {
                to: call.to.clone(),
                data: call.data.clone(),
                value,
            });
        }
    }
    Ok(calls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::sim::SimulatedChain;
    use crate::chain::{BASE_CHAIN_ID, USDC_ADDRESS};
    use crate::permissions::registry::{AllowanceRequest, PermissionRegistry};

    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x3333333333333333333333333333333333333333";
    const CUSTODY: &str = "0x2222222222222222222222222222222222222222";
    const WETH: &str = "0x4200000000000000000000000000000000000006";

    struct Harness {
        sim: Arc<SimulatedChain>,
        sagas: Arc<InMemorySagaStore>,
        executor: FundMovementExecutor,
    }

    fn harness() -> Harness {
        let sim = Arc::new(SimulatedChain::new());
        let sagas = Arc::new(InMemorySagaStore::new());
        let executor = FundMovementExecutor::new(
            sim.clone(),
            sim.clone(),
            sim.clone(),
            sagas.clone(),
            ExecutorTiming::default(),
        );
        Harness {
            sim,
            sagas,
            executor,
        }
    }

    async fn pull_plan(harness: &Harness, allowance: u128, amount: u128) -> Vec<SpendCall> {
        let permission = harness
            .sim
            .request_allowance(&AllowanceRequest {
                account: ALICE.to_string(),
                spender: CUSTODY.to_string(),
                token: USDC_ADDRESS.to_string(),
                chain_id: BASE_CHAIN_ID,
                allowance,
                period_in_days: 1,
            })
            .await
            .expect("grant");
        vec![harness
            .sim
            .prepare_spend_call(&permission, amount)
            .await
            .expect("prepare")]
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_pulls_verifies_and_pays_out() {
        let h = harness();
        h.sim.set_balance(USDC_ADDRESS, ALICE, 5_000_000);
        let spend_calls = pull_plan(&h, 2_000_000, 1_000_000).await;

        let outcome = h
            .executor
            .transfer(&TransferOrder {
                sender: ALICE.to_string(),
                recipient: BOB.to_string(),
                smart_account: CUSTODY.to_string(),
                token: USDC_ADDRESS.to_string(),
                amount: 1_000_000,
                spend_calls,
            })
            .await
            .expect("transfer");

        assert_eq!(outcome.amount, 1_000_000);
        assert!(outcome.transaction_hash.is_some());
        assert_ne!(outcome.pull_operation_id, outcome.transfer_operation_id);
        assert_eq!(h.sim.balance(USDC_ADDRESS, BOB), 1_000_000);
        assert_eq!(h.sim.balance(USDC_ADDRESS, CUSTODY), 0);

        let log = h.sagas.load(outcome.saga_id).await.expect("saga recorded");
        assert_eq!(log.outcome, SagaOutcome::Succeeded);
        assert_eq!(log.steps.len(), 3);
        assert!(!log.funds_stranded());
    }

    #[tokio::test(start_paused = true)]
    async fn transfer_fails_fast_when_custody_balance_short() {
        let h = harness();
        h.sim.set_balance(USDC_ADDRESS, ALICE, 5_000_000);
        // Pull less than the transfer requires.
        let spend_calls = pull_plan(&h, 2_000_000, 300_000).await;

        let err = h
            .executor
            .transfer(&TransferOrder {
                sender: ALICE.to_string(),
                recipient: BOB.to_string(),
                smart_account: CUSTODY.to_string(),
                token: USDC_ADDRESS.to_string(),
                amount: 1_000_000,
                spend_calls,
            })
            .await
            .expect_err("short balance");

        assert_eq!(
            err.to_string(),
            "Insufficient balance in smart wallet. Has: 0.3, needs: 1"
        );
        assert_eq!(h.sim.balance(USDC_ADDRESS, BOB), 0);
        // The pull landed, so the partial state is stranded custody funds.
        assert_eq!(h.sim.balance(USDC_ADDRESS, CUSTODY), 300_000);
        let logs = h.sagas.for_sender(ALICE).await;
        assert_eq!(logs.len(), 1);
        assert!(logs[0].funds_stranded());
        assert!(matches!(logs[0].outcome, SagaOutcome::Failed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn missing_spend_call_target_aborts_before_submission() {
        let h = harness();
        h.sim.set_balance(USDC_ADDRESS, ALICE, 5_000_000);
        let spend_calls = vec![
            SpendCall::new(vec![Call::new(USDC_ADDRESS, "0x")]),
            SpendCall::new(vec![Call::new("", "0xdead")]),
        ];

        let err = h
            .executor
            .transfer(&TransferOrder {
                sender: ALICE.to_string(),
                recipient: BOB.to_string(),
                smart_account: CUSTODY.to_string(),
                token: USDC_ADDRESS.to_string(),
                amount: 1_000_000,
                spend_calls,
            })
            .await
            .expect_err("malformed spend call");

        assert_eq!(err.to_string(), "Spend call at index 1 is missing 'to' field");
        assert_eq!(h.sim.balance(USDC_ADDRESS, ALICE), 5_000_000);
        // Nothing was submitted, so no saga was started either.
        assert!(h.sagas.for_sender(ALICE).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_spend_calls_are_rejected() {
        let h = harness();
        let err = h
            .executor
            .transfer(&TransferOrder {
                sender: ALICE.to_string(),
                recipient: BOB.to_string(),
                smart_account: CUSTODY.to_string(),
                token: USDC_ADDRESS.to_string(),
                amount: 1_000_000,
                spend_calls: vec![],
            })
            .await
            .expect_err("no spend calls");
        assert!(matches!(err, ExecutionError::MissingField { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn swap_forwards_entire_destination_balance() {
        let h = harness();
        h.sim.set_balance(USDC_ADDRESS, ALICE, 5_000_000);
        // Pre-existing dust in custody gets swept along with the swap output.
        h.sim.set_balance(WETH, CUSTODY, 500);
        h.sim.set_swap_rate(2, 1);
        let spend_calls = pull_plan(&h, 2_000_000, 1_000_000).await;

        let outcome = h
            .executor
            .swap(&SwapOrder {
                sender: ALICE.to_string(),
                smart_account: CUSTODY.to_string(),
                from_token: USDC_ADDRESS.to_string(),
                to_token: WETH.to_string(),
                amount: 1_000_000,
                spend_calls,
            })
            .await
            .expect("swap");

        let forwarded = outcome.forwarded.expect("forwarded");
        assert_eq!(forwarded.amount, 2_000_500);
        assert_eq!(h.sim.balance(WETH, ALICE), 2_000_500);
        assert_eq!(h.sim.balance(WETH, CUSTODY), 0);
        assert_eq!(h.sim.balance(USDC_ADDRESS, CUSTODY), 0);

        let log = h.sagas.load(outcome.saga_id).await.expect("saga");
        assert_eq!(log.outcome, SagaOutcome::Succeeded);
        assert_eq!(log.steps.len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn swap_failure_names_status_and_never_forwards() {
        let h = harness();
        h.sim.set_balance(USDC_ADDRESS, ALICE, 5_000_000);
        h.sim.force_swap_status("reverted");
        let spend_calls = pull_plan(&h, 2_000_000, 1_000_000).await;

        let err = h
            .executor
            .swap(&SwapOrder {
                sender: ALICE.to_string(),
                smart_account: CUSTODY.to_string(),
                from_token: USDC_ADDRESS.to_string(),
                to_token: WETH.to_string(),
                amount: 1_000_000,
                spend_calls,
            })
            .await
            .expect_err("bad terminal status");

        assert_eq!(err.to_string(), "Swap failed with status: reverted");
        assert_eq!(h.sim.balance(WETH, ALICE), 0);
        // Pulled funds stay in custody: the known stranding hazard.
        assert_eq!(h.sim.balance(USDC_ADDRESS, CUSTODY), 1_000_000);
        let logs = h.sagas.for_sender(ALICE).await;
        assert!(logs[0].funds_stranded());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_amount_is_a_validation_error() {
        let h = harness();
        let err = h
            .executor
            .transfer(&TransferOrder {
                sender: ALICE.to_string(),
                recipient: BOB.to_string(),
                smart_account: CUSTODY.to_string(),
                token: USDC_ADDRESS.to_string(),
                amount: 0,
                spend_calls: vec![SpendCall::new(vec![Call::new(USDC_ADDRESS, "0x")])],
            })
            .await
            .expect_err("zero amount");
        assert!(err.to_string().contains("amount"));
    }
}
