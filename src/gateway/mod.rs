//! HTTP gateway: wallet authentication, chat, and fund-movement routes.

pub mod auth;
pub mod server;
pub mod types;

pub use auth::{Authenticator, InMemoryNonceStore, NonceStore, sign_in_message};
pub use server::{GatewayState, SessionIdentity, start_server};
