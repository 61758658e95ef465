//! Command-line entrypoint: `serve` runs the HTTP gateway, `chat` runs the
//! terminal client against an in-process gateway. Both ride the simulated
//! chain, so the full grant/transfer/swap protocol works without a network.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use tracing::{info, warn};

use basepilot::agent::AgentLoop;
use basepilot::chain::sim::SimulatedChain;
use basepilot::chain::{self, BASE_CHAIN_ID, USDC_ADDRESS};
use basepilot::client::{ApiClient, ChatRepl, WalletSigner};
use basepilot::config::Config;
use basepilot::exec::{FundMovementExecutor, InMemorySagaStore};
use basepilot::gateway::{Authenticator, GatewayState, InMemoryNonceStore, start_server};
use basepilot::llm::GeminiClient;
use basepilot::permissions::Allocator;
use basepilot::tools::{
    CalculateMathTool, ConvertUsdTool, CurrentTimeTool, SendUsdcTool, SpendPermissionsTool,
    SwapUsdcTool, ToolRegistry, WeatherTool,
};
use basepilot::wallet::{WalletDirectory, WalletProvider};

/// Owner slot under which the gateway provisions its own custody account
/// when `SPENDER_ADDRESS` is unset.
const GATEWAY_CUSTODY_OWNER: &str = "0x0000000000000000000000000000000000000000";

#[derive(Parser)]
#[command(
    name = "basepilot",
    version,
    about = "Spend-permission USDC assistant: HTTP gateway and chat client"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP gateway.
    Serve {
        /// Bind address override (defaults to GATEWAY_HOST:GATEWAY_PORT).
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Chat with the agent in the terminal. Starts an in-process gateway
    /// and funds a demo wallet on the simulated chain.
    Chat {
        /// Starting USDC balance of the demo wallet, in USD.
        #[arg(long, default_value = "100")]
        fund: Decimal,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind } => {
            init_tracing(tracing::Level::INFO);
            serve(bind).await
        }
        Command::Chat { fund } => {
            // Keep the prompt clean; RUST_LOG still turns details back on.
            init_tracing(tracing::Level::WARN);
            chat(fund).await
        }
    }
}

fn init_tracing(level: tracing::Level) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

async fn serve(bind: Option<SocketAddr>) -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    let addr = match bind {
        Some(addr) => addr,
        None => config.gateway.socket_addr()?,
    };

    let sim = Arc::new(SimulatedChain::new());
    let spender = match config.custody.spender.clone() {
        Some(address) => address,
        None => {
            sim.provision(GATEWAY_CUSTODY_OWNER)
                .await
                .context("provisioning the custody account")?
                .smart_account_address
        }
    };
    info!(spender = %spender, "custodial spender resolved");

    let state = gateway_state(&config, sim, spender);
    let bound = start_server(addr, state.clone()).await?;
    info!(address = %bound, "gateway listening");

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("shutting down");
    state.shutdown().await;
    Ok(())
}

async fn chat(fund: Decimal) -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;

    let signer = match &config.client.wallet_key {
        Some(key) => WalletSigner::from_hex(key.expose_secret())?,
        None => WalletSigner::random()?,
    };

    let sim = Arc::new(SimulatedChain::new());
    // Grants must name the smart account the executor pulls into, so the
    // client-side allocator uses the wallet provisioned for this signer.
    let wallet = sim
        .provision(signer.address())
        .await
        .context("provisioning the custodial wallet")?;
    if config.custody.spender.is_some() {
        warn!("SPENDER_ADDRESS is ignored in chat mode; grants use the provisioned smart account");
    }

    let units = chain::usd_to_usdc_units(fund)
        .ok_or_else(|| anyhow::anyhow!("--fund {fund} is not a valid USD amount"))?;
    sim.set_balance(USDC_ADDRESS, signer.address(), units);

    let state = gateway_state(&config, sim.clone(), wallet.smart_account_address.clone());
    let bound = start_server(SocketAddr::from(([127, 0, 0, 1], 0)), state.clone()).await?;

    let api = Arc::new(ApiClient::new(format!("http://{bound}")));
    let allocator = Arc::new(Allocator::new(
        sim,
        wallet.smart_account_address,
        USDC_ADDRESS,
        BASE_CHAIN_ID,
    ));

    let outcome = ChatRepl::new(api, allocator, signer).run().await;
    state.shutdown().await;
    outcome?;
    Ok(())
}

/// Wires every collaborator of the gateway around one simulated chain.
fn gateway_state(config: &Config, sim: Arc<SimulatedChain>, spender: String) -> Arc<GatewayState> {
    let auth = Authenticator::new(
        Arc::new(InMemoryNonceStore::new()),
        chrono::Duration::seconds(config.gateway.session_ttl_secs),
    );

    let wallets = Arc::new(WalletDirectory::new(sim.clone()));
    let allocator = Arc::new(Allocator::new(
        sim.clone(),
        spender,
        USDC_ADDRESS,
        BASE_CHAIN_ID,
    ));

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(SendUsdcTool::new(wallets.clone())));
    tools.register(Arc::new(SwapUsdcTool::new(wallets.clone())));
    tools.register(Arc::new(SpendPermissionsTool::new(allocator, sim.clone())));
    tools.register(Arc::new(ConvertUsdTool));
    tools.register(Arc::new(WeatherTool::new(
        config.weather.base_url.clone(),
        config.weather.api_key.clone(),
    )));
    tools.register(Arc::new(CurrentTimeTool));
    tools.register(Arc::new(CalculateMathTool));

    let backend = Arc::new(GeminiClient::new(config.llm.clone()));
    let agent = AgentLoop::new(backend, Arc::new(tools));

    let executor = FundMovementExecutor::new(
        sim.clone(),
        sim.clone(),
        sim.clone(),
        Arc::new(InMemorySagaStore::new()),
        config.executor.clone(),
    );

    Arc::new(GatewayState::new(auth, agent, wallets, executor))
}
