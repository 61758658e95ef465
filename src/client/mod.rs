//! Terminal client for the gateway: typed API calls, client-side retry
//! execution of deferred fund movements, and persisted transaction history.

pub mod api;
pub mod history;
pub mod repl;
pub mod retry;

pub use api::{ApiClient, WalletSigner};
pub use history::{Transaction, TransactionHistory, TransactionStatus};
pub use repl::ChatRepl;
pub use retry::{MovementApi, MovementReport, RetryExecutor, MAX_ATTEMPTS};
