//! Proposal lifecycle coordination.
//!
//! Owns the authoritative in-memory table of open Governor proposals, fed by
//! `ProposalOpened`/`ProposalExecuted`/`ProposalDeleted` signals, and drives
//! execution of proposals whose challenge window has elapsed.
//!
//! Execution is simulate-then-send: a proposal is permissionlessly executable
//! but conditioned on oracle state we cannot see directly (a pending dispute),
//! so a dry-run failure is treated as "not yet", never as a reason to drop
//! the record. Records leave the table only via lifecycle signals or when the
//! onchain assertion id reads zero (settled/removed out of band).

use crate::chain::abi;
use crate::chain::signals::{ProposedTransaction, Signal};
use crate::chain::{ChainError, ChainReader};
use alloy::primitives::{Address, B256};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ProposalRecord {
    pub proposal_hash: B256,
    pub assertion_id: B256,
    pub proposer: Address,
    /// Unix seconds after which execution is permitted.
    pub challenge_window_ends: u64,
    pub transactions: Vec<ProposedTransaction>,
    pub last_attempt_ms: Option<u64>,
    pub dispute_attempt_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub governor: Address,
    /// Minimum spacing between execution attempts per proposal.
    pub retry_interval_ms: u64,
    /// false = paper mode: simulate but never send.
    pub execute: bool,
}

/// Outcome counts for one execution sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub attempted: usize,
    pub submitted: usize,
    pub dropped: usize,
}

pub struct ProposalCoordinator {
    config: CoordinatorConfig,
    records: HashMap<B256, ProposalRecord>,
}

impl ProposalCoordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            records: HashMap::new(),
        }
    }

    /// Consume one proposal lifecycle signal. Non-proposal signals are
    /// ignored; execute/delete for an unknown hash is a no-op (it may have
    /// been opened before this process started watching).
    pub fn ingest(&mut self, signal: &Signal) {
        match signal {
            Signal::ProposalOpened {
                proposal_hash,
                assertion_id,
                proposer,
                challenge_window_ends,
                transactions,
                ..
            } => {
                info!(
                    hash = %proposal_hash,
                    proposer = %proposer,
                    window_ends = challenge_window_ends,
                    txs = transactions.len(),
                    "tracking proposal"
                );
                self.records.insert(
                    *proposal_hash,
                    ProposalRecord {
                        proposal_hash: *proposal_hash,
                        assertion_id: *assertion_id,
                        proposer: *proposer,
                        challenge_window_ends: *challenge_window_ends,
                        transactions: transactions.clone(),
                        last_attempt_ms: None,
                        dispute_attempt_ms: None,
                    },
                );
            }
            Signal::ProposalExecuted { proposal_hash } => {
                if self.records.remove(proposal_hash).is_some() {
                    info!(hash = %proposal_hash, "proposal executed, record closed");
                }
            }
            Signal::ProposalDeleted { proposal_hash } => {
                if self.records.remove(proposal_hash).is_some() {
                    info!(hash = %proposal_hash, "proposal deleted, record closed");
                }
            }
            _ => {}
        }
    }

    /// Immutable snapshot of open records, for per-cycle consumers.
    pub fn open_proposals(&self) -> Vec<&ProposalRecord> {
        self.records.values().collect()
    }

    /// Whether any proposal other than `except` is currently open.
    pub fn has_pending_other_than(&self, except: Option<B256>) -> bool {
        self.records
            .keys()
            .any(|hash| Some(*hash) != except)
    }

    pub fn open_count(&self) -> usize {
        self.records.len()
    }

    /// Try to execute every ready proposal. One record's failure never
    /// aborts the sweep; `last_attempt_ms` is stamped on every attempted
    /// record to enforce the retry interval.
    pub async fn sweep(&mut self, chain: &impl ChainReader, now_ms: u64) -> SweepStats {
        let mut stats = SweepStats::default();

        let ready: Vec<B256> = self
            .records
            .values()
            .filter(|record| {
                now_ms >= record.challenge_window_ends.saturating_mul(1000)
                    && record
                        .last_attempt_ms
                        .is_none_or(|last| now_ms.saturating_sub(last) >= self.config.retry_interval_ms)
            })
            .map(|record| record.proposal_hash)
            .collect();

        for hash in ready {
            stats.attempted += 1;
            match self.try_execute(chain, hash, now_ms).await {
                Ok(ExecutionOutcome::Submitted) => stats.submitted += 1,
                Ok(ExecutionOutcome::Dropped) => stats.dropped += 1,
                Ok(ExecutionOutcome::NotYet) => {}
                Err(e) => {
                    warn!(hash = %hash, error = %e, "execution attempt failed, will retry");
                }
            }
        }
        stats
    }

    async fn try_execute(
        &mut self,
        chain: &impl ChainReader,
        hash: B256,
        now_ms: u64,
    ) -> Result<ExecutionOutcome, ChainError> {
        if let Some(record) = self.records.get_mut(&hash) {
            record.last_attempt_ms = Some(now_ms);
        }

        // Settled or removed out of band: the assertion id is zeroed. This
        // is the self-healing path against missed lifecycle logs.
        let response = chain
            .call(self.config.governor, abi::encode_assertion_ids(hash), None)
            .await?;
        let assertion_id = abi::decode_b256_response(&response)?;
        if assertion_id == B256::ZERO {
            info!(hash = %hash, "assertion resolved externally, dropping record");
            self.records.remove(&hash);
            return Ok(ExecutionOutcome::Dropped);
        }

        let Some(record) = self.records.get(&hash) else {
            return Ok(ExecutionOutcome::Dropped);
        };
        let calldata = abi::encode_execute_proposal(&record.transactions);

        // Dry-run first: a pending dispute or an unsettled assertion shows
        // up here as a revert, which is "not yet", not a failure.
        if let Err(e) = chain
            .call(self.config.governor, calldata.clone(), None)
            .await
        {
            debug!(hash = %hash, error = %e, "execution simulation reverted, keeping record");
            return Ok(ExecutionOutcome::NotYet);
        }

        if !self.config.execute {
            info!(hash = %hash, "PAPER: would execute proposal");
            return Ok(ExecutionOutcome::NotYet);
        }

        let tx_hash = chain.send_transaction(self.config.governor, calldata).await?;
        info!(hash = %hash, tx = %tx_hash, "submitted proposal execution");
        Ok(ExecutionOutcome::Submitted)
    }
}

enum ExecutionOutcome {
    Submitted,
    Dropped,
    NotYet,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use alloy::primitives::U256;

    fn opened(hash: B256, window_ends: u64) -> Signal {
        Signal::ProposalOpened {
            proposal_hash: hash,
            assertion_id: B256::repeat_byte(0x07),
            proposer: Address::repeat_byte(0x99),
            challenge_window_ends: window_ends,
            transactions: vec![ProposedTransaction {
                to: Address::repeat_byte(0x11),
                operation: 0,
                value: U256::ZERO,
                data: abi::encode_erc20_transfer(Address::repeat_byte(0x22), U256::from(5u64)),
            }],
            rules: String::new(),
            explanation: String::new(),
        }
    }

    fn coordinator(execute: bool) -> ProposalCoordinator {
        ProposalCoordinator::new(CoordinatorConfig {
            governor: Address::repeat_byte(0x60),
            retry_interval_ms: 10_000,
            execute,
        })
    }

    fn live_chain(hash: B256, simulate_ok: bool) -> MockChain {
        let mut chain = MockChain {
            simulate_ok,
            ..Default::default()
        };
        chain.assertion_ids.insert(hash, B256::repeat_byte(0x07));
        chain
    }

    #[tokio::test]
    async fn lifecycle_signals_manage_the_table() {
        let hash = B256::repeat_byte(0xaa);
        let mut coord = coordinator(true);

        coord.ingest(&opened(hash, 100));
        assert_eq!(coord.open_count(), 1);

        // Unknown hash: no-op.
        coord.ingest(&Signal::ProposalExecuted {
            proposal_hash: B256::repeat_byte(0xdd),
        });
        assert_eq!(coord.open_count(), 1);

        coord.ingest(&Signal::ProposalExecuted { proposal_hash: hash });
        assert_eq!(coord.open_count(), 0);
    }

    #[tokio::test]
    async fn sweep_waits_for_challenge_window() {
        let hash = B256::repeat_byte(0xaa);
        let chain = live_chain(hash, true);
        let mut coord = coordinator(true);
        coord.ingest(&opened(hash, 100));

        let stats = coord.sweep(&chain, 99_999).await;
        assert_eq!(stats.attempted, 0);
        assert_eq!(chain.sent_count(), 0);

        // Window end is inclusive: executable the moment it elapses.
        let stats = coord.sweep(&chain, 100_000).await;
        assert_eq!(stats.submitted, 1);
        assert_eq!(chain.sent_count(), 1);
    }

    #[tokio::test]
    async fn failed_simulation_keeps_record_and_paces_retries() {
        let hash = B256::repeat_byte(0xaa);
        let chain = live_chain(hash, false);
        let mut coord = coordinator(true);
        coord.ingest(&opened(hash, 0));

        let stats = coord.sweep(&chain, 1_000).await;
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.submitted, 0);
        assert_eq!(coord.open_count(), 1);
        assert_eq!(chain.sent_count(), 0);

        let record = coord.open_proposals()[0];
        assert_eq!(record.last_attempt_ms, Some(1_000));

        // Inside the retry interval: not even attempted.
        let stats = coord.sweep(&chain, 5_000).await;
        assert_eq!(stats.attempted, 0);

        // Past the interval it retries, and succeeds once executable.
        let chain = live_chain(hash, true);
        let stats = coord.sweep(&chain, 12_000).await;
        assert_eq!(stats.submitted, 1);
    }

    #[tokio::test]
    async fn zero_assertion_id_drops_without_executing() {
        let hash = B256::repeat_byte(0xaa);
        // No assertion id scripted: the lookup returns zero.
        let chain = MockChain {
            simulate_ok: true,
            ..Default::default()
        };
        let mut coord = coordinator(true);
        coord.ingest(&opened(hash, 0));

        let stats = coord.sweep(&chain, 1_000).await;
        assert_eq!(stats.dropped, 1);
        assert_eq!(coord.open_count(), 0);
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn paper_mode_simulates_but_never_sends() {
        let hash = B256::repeat_byte(0xaa);
        let chain = live_chain(hash, true);
        let mut coord = coordinator(false);
        coord.ingest(&opened(hash, 0));

        let stats = coord.sweep(&chain, 1_000).await;
        assert_eq!(stats.submitted, 0);
        assert_eq!(chain.sent_count(), 0);
        assert_eq!(coord.open_count(), 1);
    }

    #[tokio::test]
    async fn pending_check_excludes_own_hash() {
        let hash = B256::repeat_byte(0xaa);
        let mut coord = coordinator(true);
        coord.ingest(&opened(hash, 0));

        assert!(coord.has_pending_other_than(None));
        assert!(!coord.has_pending_other_than(Some(hash)));
    }
}
