//! Basepilot: a spend-permission USDC assistant.
//!
//! Users delegate capped, time-boxed USDC allowances to a custodial smart
//! account; a Gemini-backed agent turns chat into transfers and swaps, and
//! the terminal client executes the deferred fund movements with retries.
//! The crate splits into the HTTP [`gateway`], the [`agent`] loop and its
//! [`tools`], the [`permissions`] allocator/spender pair, the fund-movement
//! [`exec`] engine, and the [`client`] that drives it all end to end. All
//! on-chain access sits behind the seams in [`chain`], with a deterministic
//! simulator for tests and local runs.

pub mod agent;
pub mod chain;
pub mod client;
pub mod config;
pub mod error;
pub mod exec;
pub mod gateway;
pub mod llm;
pub mod permissions;
pub mod tools;
pub mod wallet;

pub use config::Config;
pub use error::{Error, Result};
