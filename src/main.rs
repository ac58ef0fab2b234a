use std::path::Path;
use std::time::Duration;

use tracing::{error, info, warn};

use vigil::agent::{AgentConfig, AgentLoop};
use vigil::chain::{self, abi, ChainReader};
use vigil::config::Config;
use vigil::copytrade::{policy::BasisPointsPolicy, CopyTradeConfig, CopyTrader};
use vigil::poller::{EventPoller, PollerConfig};
use vigil::proposals::{CoordinatorConfig, ProposalCoordinator};
use vigil::relayer::RelayerClient;
use vigil::venue::{VenueClient, VenueCredentials};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = if Path::new("vigil.toml").exists() {
        Config::load(Path::new("vigil.toml"))?
    } else {
        info!("no vigil.toml found, using env-only config");
        Config::from_env()
    };

    // Initialize logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .init();
    }

    info!("vigil v{} starting", env!("CARGO_PKG_VERSION"));

    for (signature, ok) in abi::verify_topic_hashes() {
        if !ok {
            error!(signature = %signature, "precomputed ABI hash does not match signature");
        }
    }

    let resolved = config.resolve()?;
    let chain_reader = chain::connect(&config.chain.rpc_url)?;
    info!(
        rpc = %config.chain.rpc_url,
        safe = %resolved.safe,
        governor = %resolved.governor,
        assets = resolved.tracked_assets.len(),
        "chain reader connected"
    );

    // Sanity-check the governor's collateral against the configured token.
    match chain_reader
        .call(resolved.governor, abi::encode_collateral(), None)
        .await
        .and_then(|raw| abi::decode_address_response(&raw).map_err(Into::into))
    {
        Ok(onchain) if onchain != resolved.collateral => warn!(
            configured = %resolved.collateral,
            onchain = %onchain,
            "configured collateral does not match the governor's collateral()"
        ),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "could not read governor collateral, continuing"),
    }
    match chain_reader
        .call(resolved.governor, abi::encode_bond_amount(), None)
        .await
        .and_then(|raw| abi::decode_u256_response(&raw).map_err(Into::into))
    {
        Ok(bond) => info!(bond = %bond, "governor proposal bond"),
        Err(e) => warn!(error = %e, "could not read governor bond amount, continuing"),
    }

    // --- Venue (optional capability) ---
    let creds = VenueCredentials::from_config(
        &config.venue.api_key,
        &config.venue.api_secret,
        &config.venue.api_passphrase,
    );
    if creds.is_none() {
        warn!(
            "no venue credentials configured - running in observe-only mode \
             (set VIGIL_VENUE_API_KEY, VIGIL_VENUE_SECRET, VIGIL_VENUE_PASSPHRASE to trade)"
        );
    }
    let venue = match creds {
        Some(creds) => Some(VenueClient::new(config.venue.base_url.clone(), creds)?),
        None => None,
    };

    // --- Relayer (optional capability) ---
    if !config.relayer.url.is_empty() {
        match RelayerClient::new(config.relayer.url.clone()) {
            Ok(relayer) => {
                if let Some(proposer) = resolved.proposer {
                    match relayer.proxy_wallet(proposer).await {
                        Ok(proxy) => info!(proxy = %proxy, "relayer proxy wallet resolved"),
                        Err(e) => {
                            warn!(error = %e, "relayer unreachable - meta-transaction path disabled")
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "relayer client setup failed - capability disabled"),
        }
    }

    // --- Copy trading (optional capability) ---
    let copytrader = if !config.copytrade.enabled {
        info!("copy trading disabled (set copytrade.enabled=true in config)");
        None
    } else {
        match (resolved.funding_wallet, resolved.proposer) {
            (Some(funding_wallet), Some(proposer)) => {
                let mode = if config.copytrade.execute && venue.is_some() {
                    "LIVE EXECUTION"
                } else {
                    "PAPER (set copytrade.execute=true and venue credentials to go live)"
                };
                info!(
                    funding_wallet = %funding_wallet,
                    proposer = %proposer,
                    copy_bps = config.copytrade.copy_bps,
                    watched = %config.copytrade.watched_trader,
                    mode = mode,
                    "copy trading enabled"
                );
                let watched_trader = if config.copytrade.watched_trader.is_empty() {
                    None
                } else {
                    Some(config.copytrade.watched_trader.clone())
                };
                Some(CopyTrader::new(
                    CopyTradeConfig {
                        execute: config.copytrade.execute && venue.is_some(),
                        collateral: resolved.collateral,
                        safe: resolved.safe,
                        governor: resolved.governor,
                        funding_wallet,
                        proposer,
                        watched_trader,
                        submission_timeout_ms: config.copytrade.submission_timeout_ms,
                    },
                    BasisPointsPolicy {
                        copy_bps: config.copytrade.copy_bps,
                    },
                ))
            }
            _ => {
                warn!(
                    "copytrade.funding_wallet / copytrade.proposer not set - \
                     copy trading disabled, proposal watching continues"
                );
                None
            }
        }
    };

    let poller = EventPoller::new(PollerConfig {
        safe: resolved.safe,
        governor: resolved.governor,
        tracked_assets: resolved.tracked_assets.clone(),
        block_window: config.chain.block_window,
        snapshot_mode: resolved.snapshot_mode,
    });

    let coordinator = ProposalCoordinator::new(CoordinatorConfig {
        governor: resolved.governor,
        retry_interval_ms: config.proposals.retry_interval_ms,
        execute: config.proposals.execute,
    });
    if config.proposals.execute {
        info!("proposal execution enabled - LIVE EXECUTION MODE");
    } else {
        info!("proposal execution in paper mode (set proposals.execute=true to go live)");
    }

    let agent = AgentLoop::new(
        AgentConfig {
            poll_interval: Duration::from_millis(config.chain.poll_interval_ms),
            venue_heartbeat: config.venue.heartbeat && venue.is_some(),
        },
        poller,
        coordinator,
        copytrader,
    );

    info!(
        interval_ms = config.chain.poll_interval_ms,
        "entering poll loop"
    );
    agent.run(chain_reader, venue).await
}
