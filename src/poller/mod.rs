//! Incremental event polling with an in-memory checkpoint.
//!
//! Each poll advances the checkpoint from the last scanned block to the
//! current head, scanning deposit and Governor lifecycle logs in fixed-size
//! block windows to respect provider range limits. The checkpoint is only
//! replaced once the whole poll succeeds; a failed window scan aborts the
//! poll so the next one retries the same range.
//!
//! The first poll primes the checkpoint at the current head and emits no
//! signals: the agent reacts to changes observed after it starts watching,
//! never to pre-existing state.

use crate::chain::abi;
use crate::chain::signals::{Signal, SignalId};
use crate::chain::{ChainError, ChainReader, LogFilter, RawLog};
use alloy::primitives::{Address, B256, U256};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Blocks per `eth_getLogs` request.
pub const DEFAULT_BLOCK_WINDOW: u64 = 10;

/// When to emit `BalanceSnapshot` signals for tracked assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotMode {
    Off,
    /// Only when the balance changed since the previous poll.
    OnChange,
    /// On every poll, for policies that need unconditional visibility.
    EveryPoll,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub safe: Address,
    pub governor: Address,
    pub tracked_assets: Vec<Address>,
    pub block_window: u64,
    pub snapshot_mode: SnapshotMode,
}

/// Scan progress and last-known balances. In-memory only: a restart loses it
/// and the poller re-primes at the new head, recovering by reconciliation
/// rather than persistence.
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    pub last_scanned_block: Option<u64>,
    pub last_native_balance: Option<U256>,
    pub last_asset_balance: HashMap<Address, U256>,
}

struct TimelockTrigger {
    id: String,
    due_at_ms: u64,
    fired: bool,
}

pub struct EventPoller {
    config: PollerConfig,
    checkpoint: Checkpoint,
    timelocks: Vec<TimelockTrigger>,
}

impl EventPoller {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            config,
            checkpoint: Checkpoint::default(),
            timelocks: Vec::new(),
        }
    }

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    /// Register a wall-clock trigger that emits a single `Timelock` signal
    /// once `due_at_ms` has passed.
    pub fn arm_timelock(&mut self, id: impl Into<String>, due_at_ms: u64) {
        self.timelocks.push(TimelockTrigger {
            id: id.into(),
            due_at_ms,
            fired: false,
        });
    }

    /// Scan from the checkpoint to the current head and return new signals.
    ///
    /// Never errors on "nothing new": an unchanged head returns an empty
    /// list and leaves the checkpoint untouched.
    pub async fn poll(
        &mut self,
        chain: &impl ChainReader,
        now_ms: u64,
    ) -> Result<Vec<Signal>, ChainError> {
        let head = chain.block_number().await?;

        let last = match self.checkpoint.last_scanned_block {
            None => {
                self.prime(chain, head).await?;
                return Ok(Vec::new());
            }
            Some(last) => last,
        };

        let mut signals = Vec::new();

        if head > last {
            self.scan_range(chain, last + 1, head, &mut signals).await?;

            let native_now = chain.native_balance(self.config.safe, Some(head)).await?;
            if let Some(prev) = self.checkpoint.last_native_balance {
                if native_now > prev {
                    let amount = native_now - prev;
                    signals.push(Signal::NativeDeposit {
                        amount,
                        block_number: head,
                        id: SignalId::from_balance(head, "native", amount),
                    });
                }
            }

            let mut asset_balances = HashMap::new();
            for &asset in &self.config.tracked_assets {
                let balance = chain
                    .erc20_balance(asset, self.config.safe, Some(head))
                    .await?;
                let previous = self.checkpoint.last_asset_balance.get(&asset).copied();

                let emit = match self.config.snapshot_mode {
                    SnapshotMode::Off => false,
                    SnapshotMode::EveryPoll => balance > U256::ZERO,
                    SnapshotMode::OnChange => {
                        balance > U256::ZERO && previous != Some(balance)
                    }
                };
                if emit {
                    signals.push(Signal::BalanceSnapshot {
                        asset,
                        amount: balance,
                        block_number: head,
                        id: SignalId::from_balance(head, "snapshot", balance),
                    });
                }
                asset_balances.insert(asset, balance);
            }

            // Commit only after every read above succeeded.
            self.checkpoint = Checkpoint {
                last_scanned_block: Some(head),
                last_native_balance: Some(native_now),
                last_asset_balance: asset_balances,
            };
        }

        for trigger in &mut self.timelocks {
            if !trigger.fired && now_ms >= trigger.due_at_ms {
                trigger.fired = true;
                signals.push(Signal::Timelock {
                    trigger_id: trigger.id.clone(),
                    due_at_ms: trigger.due_at_ms,
                });
            }
        }
        self.timelocks.retain(|t| !t.fired);

        Ok(signals)
    }

    /// Prime the checkpoint at `head` without emitting signals.
    async fn prime(&mut self, chain: &impl ChainReader, head: u64) -> Result<(), ChainError> {
        let native = chain.native_balance(self.config.safe, Some(head)).await?;
        let mut asset_balances = HashMap::new();
        for &asset in &self.config.tracked_assets {
            let balance = chain
                .erc20_balance(asset, self.config.safe, Some(head))
                .await?;
            asset_balances.insert(asset, balance);
        }

        debug!(block = head, "primed checkpoint at current head");
        self.checkpoint = Checkpoint {
            last_scanned_block: Some(head),
            last_native_balance: Some(native),
            last_asset_balance: asset_balances,
        };
        Ok(())
    }

    /// Scan `[from, to]` in fixed windows for deposit and Governor logs.
    async fn scan_range(
        &self,
        chain: &impl ChainReader,
        from: u64,
        to: u64,
        signals: &mut Vec<Signal>,
    ) -> Result<(), ChainError> {
        let window = self.config.block_window.max(1);
        let safe_topic = B256::left_padding_from(self.config.safe.as_slice());

        let mut start = from;
        while start <= to {
            let end = (start + window - 1).min(to);

            for &asset in &self.config.tracked_assets {
                let logs = chain
                    .get_logs(&LogFilter {
                        address: asset,
                        topics0: vec![abi::TRANSFER_TOPIC],
                        topic2: Some(safe_topic),
                        from_block: start,
                        to_block: end,
                    })
                    .await?;
                for log in &logs {
                    self.decode_deposit(asset, log, signals);
                }
            }

            let governor_logs = chain
                .get_logs(&LogFilter {
                    address: self.config.governor,
                    topics0: vec![
                        *abi::TRANSACTIONS_PROPOSED_TOPIC,
                        *abi::PROPOSAL_EXECUTED_TOPIC,
                        *abi::PROPOSAL_DELETED_TOPIC,
                    ],
                    topic2: None,
                    from_block: start,
                    to_block: end,
                })
                .await?;
            for log in &governor_logs {
                self.decode_governor_log(log, signals);
            }

            start = end + 1;
        }
        Ok(())
    }

    fn decode_deposit(&self, asset: Address, log: &RawLog, signals: &mut Vec<Signal>) {
        match abi::decode_transfer_log(&log.topics, &log.data) {
            Ok((from, to, amount)) if to == self.config.safe => {
                signals.push(Signal::Erc20Deposit {
                    asset,
                    from,
                    amount,
                    block_number: log.block_number,
                    tx_hash: log.tx_hash,
                    log_index: log.log_index,
                    id: SignalId::from_log(log.tx_hash, log.log_index),
                });
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, tx = %log.tx_hash, "skipping undecodable transfer log");
            }
        }
    }

    /// A single undecodable log is skipped; it never aborts the poll.
    fn decode_governor_log(&self, log: &RawLog, signals: &mut Vec<Signal>) {
        let Some(&topic0) = log.topics.first() else {
            return;
        };

        if topic0 == *abi::TRANSACTIONS_PROPOSED_TOPIC {
            match abi::decode_transactions_proposed(&log.topics, &log.data) {
                Ok(event) => signals.push(Signal::ProposalOpened {
                    proposal_hash: event.proposal_hash,
                    assertion_id: event.assertion_id,
                    proposer: event.proposer,
                    challenge_window_ends: event.challenge_window_ends,
                    transactions: event.transactions,
                    rules: event.rules,
                    explanation: event.explanation,
                }),
                Err(e) => {
                    warn!(error = %e, tx = %log.tx_hash, "skipping undecodable proposal log");
                }
            }
        } else if topic0 == *abi::PROPOSAL_EXECUTED_TOPIC {
            match abi::decode_proposal_hash_topic(&log.topics) {
                Ok(hash) => signals.push(Signal::ProposalExecuted { proposal_hash: hash }),
                Err(e) => warn!(error = %e, "skipping malformed ProposalExecuted log"),
            }
        } else if topic0 == *abi::PROPOSAL_DELETED_TOPIC {
            match abi::decode_proposal_hash_topic(&log.topics) {
                Ok(hash) => signals.push(Signal::ProposalDeleted { proposal_hash: hash }),
                Err(e) => warn!(error = %e, "skipping malformed ProposalDeleted log"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::testing::MockChain;
    use alloy::primitives::Bytes;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn config() -> PollerConfig {
        PollerConfig {
            safe: addr(0x5a),
            governor: addr(0x60),
            tracked_assets: vec![addr(0xcc)],
            block_window: DEFAULT_BLOCK_WINDOW,
            snapshot_mode: SnapshotMode::Off,
        }
    }

    fn transfer_log(asset: Address, safe: Address, block: u64, amount: u64, tx: B256) -> RawLog {
        RawLog {
            address: asset,
            topics: vec![
                abi::TRANSFER_TOPIC,
                B256::left_padding_from(addr(0x01).as_slice()),
                B256::left_padding_from(safe.as_slice()),
            ],
            data: Bytes::copy_from_slice(&U256::from(amount).to_be_bytes::<32>()),
            block_number: block,
            tx_hash: tx,
            log_index: 0,
        }
    }

    #[tokio::test]
    async fn first_poll_primes_and_emits_nothing() {
        let cfg = config();
        let mut chain = MockChain {
            head: 100,
            native: U256::from(7u64),
            ..Default::default()
        };
        chain
            .balances
            .insert((addr(0xcc), cfg.safe), U256::from(50u64));

        let mut poller = EventPoller::new(cfg);
        let signals = poller.poll(&chain, 0).await.unwrap();

        assert!(signals.is_empty());
        assert_eq!(poller.checkpoint().last_scanned_block, Some(100));
        assert_eq!(poller.checkpoint().last_native_balance, Some(U256::from(7u64)));
    }

    #[tokio::test]
    async fn poll_is_idempotent_with_no_new_blocks() {
        let chain = MockChain {
            head: 100,
            ..Default::default()
        };
        let mut poller = EventPoller::new(config());
        poller.poll(&chain, 0).await.unwrap();

        for _ in 0..2 {
            let signals = poller.poll(&chain, 0).await.unwrap();
            assert!(signals.is_empty());
            assert_eq!(poller.checkpoint().last_scanned_block, Some(100));
        }
    }

    #[tokio::test]
    async fn erc20_deposits_get_stable_ids() {
        let cfg = config();
        let tx = B256::repeat_byte(0xee);
        let mut chain = MockChain {
            head: 100,
            ..Default::default()
        };

        let mut poller = EventPoller::new(cfg.clone());
        poller.poll(&chain, 0).await.unwrap();

        chain.head = 103;
        chain
            .logs
            .push(transfer_log(addr(0xcc), cfg.safe, 102, 1_000, tx));

        let signals = poller.poll(&chain, 0).await.unwrap();
        match &signals[..] {
            [Signal::Erc20Deposit { asset, amount, id, .. }] => {
                assert_eq!(*asset, addr(0xcc));
                assert_eq!(*amount, U256::from(1_000u64));
                assert_eq!(*id, SignalId::from_log(tx, 0));
            }
            other => panic!("unexpected signals: {other:?}"),
        }

        // The scanned range is never revisited.
        let again = poller.poll(&chain, 0).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn native_decrease_never_counts_as_deposit() {
        let mut chain = MockChain {
            head: 100,
            native: U256::from(10u64),
            ..Default::default()
        };
        let mut poller = EventPoller::new(config());
        poller.poll(&chain, 0).await.unwrap();

        // Outgoing spend: balance drops, no signal.
        chain.head = 101;
        chain.native = U256::from(4u64);
        assert!(poller.poll(&chain, 0).await.unwrap().is_empty());

        // Partial recovery must diff against the new baseline, not the old
        // one, or the spend would be double-counted back in.
        chain.head = 102;
        chain.native = U256::from(9u64);
        let signals = poller.poll(&chain, 0).await.unwrap();
        match &signals[..] {
            [Signal::NativeDeposit { amount, .. }] => {
                assert_eq!(*amount, U256::from(5u64));
            }
            other => panic!("unexpected signals: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_window_scan_leaves_checkpoint_unchanged() {
        let mut chain = MockChain {
            head: 100,
            ..Default::default()
        };
        let mut poller = EventPoller::new(config());
        poller.poll(&chain, 0).await.unwrap();

        chain.head = 120;
        chain.fail_logs = true;
        assert!(poller.poll(&chain, 0).await.is_err());
        assert_eq!(poller.checkpoint().last_scanned_block, Some(100));

        // Next poll retries the same range.
        chain.fail_logs = false;
        poller.poll(&chain, 0).await.unwrap();
        assert_eq!(poller.checkpoint().last_scanned_block, Some(120));
    }

    #[tokio::test]
    async fn governor_proposal_log_becomes_signal() {
        let cfg = config();
        let hash = B256::repeat_byte(0xaa);
        let txs = vec![crate::chain::signals::ProposedTransaction {
            to: addr(0xcc),
            operation: 0,
            value: U256::ZERO,
            data: abi::encode_erc20_transfer(addr(0x22), U256::from(9u64)),
        }];
        let data =
            abi::encode_transactions_proposed_data(hash, 1_700_000_100, &txs, "swap", "rules");

        let mut chain = MockChain {
            head: 100,
            ..Default::default()
        };
        let mut poller = EventPoller::new(cfg.clone());
        poller.poll(&chain, 0).await.unwrap();

        chain.head = 101;
        chain.logs.push(RawLog {
            address: cfg.governor,
            topics: vec![
                *abi::TRANSACTIONS_PROPOSED_TOPIC,
                B256::left_padding_from(addr(0x99).as_slice()),
                B256::ZERO,
                B256::repeat_byte(0xbb),
            ],
            data: Bytes::from(data),
            block_number: 101,
            tx_hash: B256::repeat_byte(0x01),
            log_index: 2,
        });

        let signals = poller.poll(&chain, 0).await.unwrap();
        match &signals[..] {
            [Signal::ProposalOpened { proposal_hash, proposer, challenge_window_ends, transactions, .. }] => {
                assert_eq!(*proposal_hash, hash);
                assert_eq!(*proposer, addr(0x99));
                assert_eq!(*challenge_window_ends, 1_700_000_100);
                assert_eq!(transactions.len(), 1);
            }
            other => panic!("unexpected signals: {other:?}"),
        }
    }

    #[tokio::test]
    async fn snapshot_on_change_emits_only_when_balance_moves() {
        let mut cfg = config();
        cfg.snapshot_mode = SnapshotMode::OnChange;
        let safe = cfg.safe;

        let mut chain = MockChain {
            head: 100,
            ..Default::default()
        };
        chain.balances.insert((addr(0xcc), safe), U256::from(5u64));

        let mut poller = EventPoller::new(cfg);
        poller.poll(&chain, 0).await.unwrap();

        // Unchanged balance: nothing.
        chain.head = 101;
        assert!(poller.poll(&chain, 0).await.unwrap().is_empty());

        chain.head = 102;
        chain.balances.insert((addr(0xcc), safe), U256::from(8u64));
        let signals = poller.poll(&chain, 0).await.unwrap();
        assert!(matches!(
            &signals[..],
            [Signal::BalanceSnapshot { amount, .. }] if *amount == U256::from(8u64)
        ));
    }

    #[tokio::test]
    async fn armed_timelock_fires_once() {
        let chain = MockChain {
            head: 100,
            ..Default::default()
        };
        let mut poller = EventPoller::new(config());
        poller.poll(&chain, 0).await.unwrap();
        poller.arm_timelock("rebalance", 5_000);

        assert!(poller.poll(&chain, 4_999).await.unwrap().is_empty());

        let signals = poller.poll(&chain, 5_000).await.unwrap();
        assert!(matches!(
            &signals[..],
            [Signal::Timelock { trigger_id, .. }] if trigger_id == "rebalance"
        ));

        assert!(poller.poll(&chain, 6_000).await.unwrap().is_empty());
    }
}
