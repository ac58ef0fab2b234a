//! The scheduler tying poller, coordinator, and copy-trading together.
//!
//! Single-task and cooperative: one cycle runs to completion before the next
//! is scheduled, so each state container is mutated from exactly one place
//! and cycles never overlap. A slow external call delays the next cycle
//! rather than racing it.
//!
//! Cycle ordering is load-bearing: signals are polled first, then ingested
//! into the proposal table, then the copy-trading pipeline consumes them,
//! and the execution sweep runs last — a proposal opened with an
//! already-elapsed challenge window is executable in the same cycle it was
//! observed.

use crate::chain::ChainReader;
use crate::copytrade::{policy::CopyPolicy, CopyTrader};
use crate::poller::EventPoller;
use crate::proposals::ProposalCoordinator;
use crate::venue::VenueClient;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub poll_interval: Duration,
    /// Send the venue dead man's switch heartbeat each cycle.
    pub venue_heartbeat: bool,
}

pub struct AgentLoop<P: CopyPolicy> {
    config: AgentConfig,
    poller: EventPoller,
    coordinator: ProposalCoordinator,
    copytrader: Option<CopyTrader<P>>,
}

impl<P: CopyPolicy> AgentLoop<P> {
    pub fn new(
        config: AgentConfig,
        poller: EventPoller,
        coordinator: ProposalCoordinator,
        copytrader: Option<CopyTrader<P>>,
    ) -> Self {
        Self {
            config,
            poller,
            coordinator,
            copytrader,
        }
    }

    /// Run cycles on the configured interval until ctrl-c.
    pub async fn run(
        mut self,
        chain: impl ChainReader,
        venue: Option<VenueClient>,
    ) -> anyhow::Result<()> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown requested");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.cycle(&chain, venue.as_ref()).await;
                }
            }
        }
    }

    /// One poll cycle. Every sub-step isolates its own failures; a bad
    /// cycle never takes the loop down.
    pub(crate) async fn cycle(&mut self, chain: &impl ChainReader, venue: Option<&VenueClient>) {
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;

        let signals = match self.poller.poll(chain, now_ms).await {
            Ok(signals) => signals,
            Err(e) => {
                warn!(error = %e, "poll failed, retrying next cycle");
                return;
            }
        };

        for signal in &signals {
            debug!(signal = %signal, "signal");
            self.coordinator.ingest(signal);
        }

        if let Some(trader) = &mut self.copytrader {
            let open = self.coordinator.open_proposals();
            trader.on_cycle(&signals, &open, chain, venue, now_ms).await;
        }

        let stats = self.coordinator.sweep(chain, now_ms).await;
        if stats.attempted > 0 {
            debug!(
                attempted = stats.attempted,
                submitted = stats.submitted,
                dropped = stats.dropped,
                "execution sweep"
            );
        }

        if self.config.venue_heartbeat {
            if let Some(venue) = venue {
                if let Err(e) = venue.heartbeat().await {
                    warn!(error = %e, "venue heartbeat failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::abi;
    use crate::chain::testing::MockChain;
    use crate::chain::RawLog;
    use crate::copytrade::policy::BasisPointsPolicy;
    use crate::poller::{PollerConfig, SnapshotMode, DEFAULT_BLOCK_WINDOW};
    use crate::proposals::CoordinatorConfig;
    use alloy::primitives::{Address, Bytes, B256, U256};

    #[tokio::test]
    async fn zero_length_window_is_executable_in_the_observing_cycle() {
        let safe = Address::repeat_byte(0x5a);
        let governor = Address::repeat_byte(0x60);
        let hash = B256::repeat_byte(0xaa);

        let poller = EventPoller::new(PollerConfig {
            safe,
            governor,
            tracked_assets: vec![],
            block_window: DEFAULT_BLOCK_WINDOW,
            snapshot_mode: SnapshotMode::Off,
        });
        let coordinator = ProposalCoordinator::new(CoordinatorConfig {
            governor,
            retry_interval_ms: 10_000,
            execute: true,
        });
        let mut agent: AgentLoop<BasisPointsPolicy> = AgentLoop::new(
            AgentConfig {
                poll_interval: Duration::from_secs(5),
                venue_heartbeat: false,
            },
            poller,
            coordinator,
            None,
        );

        let mut chain = MockChain {
            head: 100,
            simulate_ok: true,
            ..Default::default()
        };
        chain.assertion_ids.insert(hash, B256::repeat_byte(0x07));

        // Prime cycle: nothing to do yet.
        agent.cycle(&chain, None).await;
        assert_eq!(chain.sent_count(), 0);

        // A proposal with a zero-length challenge window lands in block 101.
        let txs = vec![crate::chain::signals::ProposedTransaction {
            to: Address::repeat_byte(0xcc),
            operation: 0,
            value: U256::ZERO,
            data: abi::encode_erc20_transfer(Address::repeat_byte(0x22), U256::from(5u64)),
        }];
        let data = abi::encode_transactions_proposed_data(hash, 0, &txs, "", "");
        chain.head = 101;
        chain.logs.push(RawLog {
            address: governor,
            topics: vec![
                *abi::TRANSACTIONS_PROPOSED_TOPIC,
                B256::left_padding_from(Address::repeat_byte(0x99).as_slice()),
                B256::ZERO,
                B256::repeat_byte(0x07),
            ],
            data: Bytes::from(data),
            block_number: 101,
            tx_hash: B256::repeat_byte(0x01),
            log_index: 0,
        });

        // Same cycle: observed, ingested, swept, executed.
        agent.cycle(&chain, None).await;
        assert_eq!(chain.sent_count(), 1);
    }
}
