//! Deterministic in-process chain.
//!
//! Implements every collaborator seam (permission registry, relay, token
//! reads, swap, wallet provisioning) against a single in-memory ledger, so
//! the full transfer/swap protocol runs end to end without a network. Used
//! by the test suite and as the chain backend for `serve` and `chat`.
//!
//! Operations complete synchronously at submission; `await_completion`
//! returns the recorded receipt. Fault hooks (`fail_next_submissions`,
//! `force_swap_status`) script transient failures and bad terminal states.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use sha3::{Digest, Keccak256};
use tracing::debug;

use crate::chain::erc20::{self, DecodedErc20};
use crate::chain::relay::{RelayClient, SwapClient, SwapRequest, TokenReader};
use crate::chain::{Call, OperationReceipt, OperationStatus, SpendCall};
use crate::error::{PermissionError, RelayError, WalletError};
use crate::permissions::registry::{AllowanceRequest, PermissionRegistry};
use crate::permissions::SpendPermission;
use crate::wallet::{ServerWallet, WalletProvider};

/// The simulated spend-permission manager contract.
pub const SPEND_MANAGER_ADDRESS: &str = "0x5e4d000000000000000000000000000000000001";

const SPEND_SIG: &str = "spend(bytes32,uint256)";

fn deterministic_hash<T: Serialize>(value: &T) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    format!("0x{}", blake3::hash(&bytes).to_hex())
}

fn derived_address(seed: &str) -> String {
    let digest = Keccak256::digest(seed.as_bytes());
    format!("0x{}", hex::encode(&digest[12..32]))
}

fn spend_calldata(permission_hash: &str, amount: u128) -> Option<String> {
    let body = permission_hash.strip_prefix("0x")?;
    let hash: [u8; 32] = hex::decode(body).ok()?.try_into().ok()?;
    let mut data = Vec::with_capacity(4 + 64);
    data.extend_from_slice(&erc20::selector(SPEND_SIG));
    data.extend_from_slice(&hash);
    data.extend_from_slice(&[0u8; 16]);
    data.extend_from_slice(&amount.to_be_bytes());
    Some(format!("0x{}", hex::encode(data)))
}

fn decode_spend(data: &str) -> Option<(String, u128)> {
    let raw = hex::decode(data.strip_prefix("0x")?).ok()?;
    if raw.len() != 4 + 64 || raw[..4] != erc20::selector(SPEND_SIG) {
        return None;
    }
    let hash = format!("0x{}", hex::encode(&raw[4..36]));
    let mut low = [0u8; 16];
    low.copy_from_slice(&raw[52..68]);
    Some((hash, u128::from_be_bytes(low)))
}

#[derive(Default)]
struct Ledger {
    balances: HashMap<(String, String), u128>,
    permissions: Vec<SpendPermission>,
    remaining: HashMap<String, u128>,
    /// (owner, token, spender) triples with a standing approval.
    approvals: HashSet<(String, String, String)>,
    receipts: HashMap<String, OperationReceipt>,
    op_counter: u64,
    grant_counter: u64,
    fail_submissions: u32,
    forced_swap_status: Option<String>,
    swap_rate: (u128, u128),
}

impl Ledger {
    fn balance(&self, token: &str, holder: &str) -> u128 {
        *self
            .balances
            .get(&(token.to_ascii_lowercase(), holder.to_ascii_lowercase()))
            .unwrap_or(&0)
    }

    fn set_balance(&mut self, token: &str, holder: &str, amount: u128) {
        self.balances.insert(
            (token.to_ascii_lowercase(), holder.to_ascii_lowercase()),
            amount,
        );
    }

    fn credit(&mut self, token: &str, holder: &str, amount: u128) {
        let current = self.balance(token, holder);
        self.set_balance(token, holder, current + amount);
    }

    fn debit(&mut self, token: &str, holder: &str, amount: u128) -> bool {
        let current = self.balance(token, holder);
        if current < amount {
            return false;
        }
        self.set_balance(token, holder, current - amount);
        true
    }

    fn next_operation(&mut self) -> String {
        self.op_counter += 1;
        format!("0x{:064x}", self.op_counter)
    }

    fn record(&mut self, operation_id: &str, status: OperationStatus) {
        let transaction_hash = status
            .is_complete()
            .then(|| deterministic_hash(&("tx", operation_id)));
        self.receipts.insert(
            operation_id.to_string(),
            OperationReceipt {
                status,
                transaction_hash,
            },
        );
    }

    /// Applies one call from `account`. Err carries the revert reason.
    fn apply_call(&mut self, account: &str, call: &Call) -> Result<(), String> {
        if call.to.eq_ignore_ascii_case(SPEND_MANAGER_ADDRESS) {
            let (hash, amount) = decode_spend(&call.data)
                .ok_or_else(|| "unrecognized spend-manager calldata".to_string())?;
            let permission = self
                .permissions
                .iter()
                .find(|p| p.permission_hash == hash)
                .cloned()
                .ok_or_else(|| format!("unknown permission {hash}"))?;
            let remaining = *self.remaining.get(&hash).unwrap_or(&0);
            if remaining < amount {
                return Err(format!(
                    "spend of {amount} exceeds remaining allowance {remaining}"
                ));
            }
            if !self.debit(&permission.token, &permission.account, amount) {
                return Err(format!("grantor balance below {amount}"));
            }
            self.remaining.insert(hash, remaining - amount);
            self.credit(&permission.token, &permission.spender, amount);
            return Ok(());
        }
        match erc20::decode_erc20(&call.data) {
            Some(DecodedErc20::Transfer { to, amount }) => {
                if !self.debit(&call.to, account, amount) {
                    return Err(format!("transfer of {amount} exceeds balance"));
                }
                self.credit(&call.to, &to, amount);
                Ok(())
            }
            Some(DecodedErc20::Approve { spender, .. }) => {
                // Idempotent by construction: re-approvals overwrite.
                self.approvals.insert((
                    account.to_ascii_lowercase(),
                    call.to.to_ascii_lowercase(),
                    spender.to_ascii_lowercase(),
                ));
                Ok(())
            }
            Some(DecodedErc20::BalanceOf { .. }) => Ok(()),
            None => Err(format!("unrecognized calldata for {}", call.to)),
        }
    }
}

/// The simulated chain. Cheap to clone via `Arc`; all state sits behind one
/// mutex and no lock is held across an await.
pub struct SimulatedChain {
    ledger: Mutex<Ledger>,
}

impl Default for SimulatedChain {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedChain {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                swap_rate: (1, 1),
                ..Ledger::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ledger> {
        self.ledger.lock().expect("simulated chain lock poisoned")
    }

    pub fn set_balance(&self, token: &str, holder: &str, amount: u128) {
        self.lock().set_balance(token, holder, amount);
    }

    pub fn balance(&self, token: &str, holder: &str) -> u128 {
        self.lock().balance(token, holder)
    }

    /// Destination units credited per source unit, as a ratio.
    pub fn set_swap_rate(&self, numerator: u128, denominator: u128) {
        self.lock().swap_rate = (numerator, denominator.max(1));
    }

    /// Makes the next `count` relay submissions fail transiently.
    pub fn fail_next_submissions(&self, count: u32) {
        self.lock().fail_submissions = count;
    }

    /// Forces the next swap's terminal status (for example "reverted").
    pub fn force_swap_status(&self, status: &str) {
        self.lock().forced_swap_status = Some(status.to_string());
    }

    /// Grants a permission with an explicit validity window.
    pub fn grant_with_window(
        &self,
        request: &AllowanceRequest,
        start: u64,
        end: Option<u64>,
    ) -> SpendPermission {
        let mut ledger = self.lock();
        ledger.grant_counter += 1;
        let salt = ledger.grant_counter;
        let permission_hash = deterministic_hash(&(
            &request.account,
            &request.spender,
            &request.token,
            request.chain_id,
            request.allowance,
            salt,
        ));
        let permission = SpendPermission {
            account: request.account.to_ascii_lowercase(),
            spender: request.spender.to_ascii_lowercase(),
            token: request.token.to_ascii_lowercase(),
            chain_id: request.chain_id,
            allowance: request.allowance,
            period_in_days: request.period_in_days,
            start,
            end,
            signature: deterministic_hash(&("grant-sig", &permission_hash)),
            permission_hash: permission_hash.clone(),
        };
        ledger.remaining.insert(permission_hash, request.allowance);
        ledger.permissions.push(permission.clone());
        permission
    }
}

#[async_trait]
impl PermissionRegistry for SimulatedChain {
    async fn fetch(
        &self,
        account: &str,
        spender: &str,
        chain_id: u64,
    ) -> Result<Vec<SpendPermission>, PermissionError> {
        Ok(self
            .lock()
            .permissions
            .iter()
            .filter(|p| {
                p.account.eq_ignore_ascii_case(account)
                    && p.spender.eq_ignore_ascii_case(spender)
                    && p.chain_id == chain_id
            })
            .cloned()
            .collect())
    }

    async fn remaining_spend(
        &self,
        permission: &SpendPermission,
    ) -> Result<u128, PermissionError> {
        self.lock()
            .remaining
            .get(&permission.permission_hash)
            .copied()
            .ok_or_else(|| PermissionError::StatusFailed {
                reason: format!("unknown permission {}", permission.permission_hash),
            })
    }

    async fn prepare_spend_call(
        &self,
        permission: &SpendPermission,
        amount: u128,
    ) -> Result<SpendCall, PermissionError> {
        let data = spend_calldata(&permission.permission_hash, amount).ok_or_else(|| {
            PermissionError::PrepareFailed {
                reason: format!("malformed permission hash {}", permission.permission_hash),
            }
        })?;
        Ok(SpendCall::new(vec![Call::new(SPEND_MANAGER_ADDRESS, data)]))
    }

    async fn request_allowance(
        &self,
        request: &AllowanceRequest,
    ) -> Result<SpendPermission, PermissionError> {
        if request.allowance == 0 {
            return Err(PermissionError::RequestRejected {
                reason: "allowance must be positive".to_string(),
            });
        }
        let start = self.lock().grant_counter + 1;
        Ok(self.grant_with_window(request, start, None))
    }
}

#[async_trait]
impl RelayClient for SimulatedChain {
    async fn submit(&self, account: &str, calls: &[Call]) -> Result<String, RelayError> {
        let mut ledger = self.lock();
        if ledger.fail_submissions > 0 {
            ledger.fail_submissions -= 1;
            return Err(RelayError::Submission {
                reason: "simulated relay outage".to_string(),
            });
        }
        let operation_id = ledger.next_operation();
        let mut status = OperationStatus::Complete;
        for call in calls {
            if let Err(reason) = ledger.apply_call(account, call) {
                debug!(%operation_id, %reason, "simulated operation reverted");
                status = OperationStatus::Failed;
                break;
            }
        }
        ledger.record(&operation_id, status);
        Ok(operation_id)
    }

    async fn await_completion(&self, operation_id: &str) -> Result<OperationReceipt, RelayError> {
        self.lock()
            .receipts
            .get(operation_id)
            .cloned()
            .ok_or_else(|| RelayError::Completion {
                reason: format!("unknown operation {operation_id}"),
            })
    }
}

#[async_trait]
impl TokenReader for SimulatedChain {
    async fn token_balance(&self, token: &str, holder: &str) -> Result<u128, RelayError> {
        Ok(self.lock().balance(token, holder))
    }
}

#[async_trait]
impl SwapClient for SimulatedChain {
    async fn submit_swap(
        &self,
        account: &str,
        request: &SwapRequest,
    ) -> Result<String, RelayError> {
        let mut ledger = self.lock();
        if ledger.fail_submissions > 0 {
            ledger.fail_submissions -= 1;
            return Err(RelayError::Submission {
                reason: "simulated relay outage".to_string(),
            });
        }
        let operation_id = ledger.next_operation();

        if let Some(status) = ledger.forced_swap_status.take() {
            ledger.record(&operation_id, OperationStatus::parse(&status));
            return Ok(operation_id);
        }

        let approved = ledger.approvals.contains(&(
            account.to_ascii_lowercase(),
            request.from_token.to_ascii_lowercase(),
            super::PERMIT2_ADDRESS.to_string(),
        ));
        let funded = ledger.balance(&request.from_token, account) >= request.from_amount;
        if !approved || !funded {
            ledger.record(&operation_id, OperationStatus::Failed);
            return Ok(operation_id);
        }

        let (num, den) = ledger.swap_rate;
        let out = request.from_amount.saturating_mul(num) / den;
        ledger.debit(&request.from_token, account, request.from_amount);
        ledger.credit(&request.to_token, account, out);
        ledger.record(&operation_id, OperationStatus::Complete);
        Ok(operation_id)
    }
}

#[async_trait]
impl WalletProvider for SimulatedChain {
    async fn provision(&self, owner: &str) -> Result<ServerWallet, WalletError> {
        Ok(ServerWallet {
            server_wallet_address: derived_address(&format!("server:{owner}")),
            smart_account_address: derived_address(&format!("smart:{owner}")),
        })
    }
}
