//! Typed signals emitted by the event poller, consumed by the proposal
//! coordinator and policy state machines.
//!
//! Signals are the only data that crosses from polling into decision-making.
//! Each deposit/balance signal carries a deterministic [`SignalId`] so that a
//! consumer can detect and drop duplicate delivery.

use alloy::primitives::{Address, Bytes, B256, U256};
use serde::Serialize;

/// A single transaction payload inside a governance proposal.
///
/// Mirrors the Governor's `Transaction` struct: `(to, operation, value, data)`.
/// Also the unit matched during reimbursement reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProposedTransaction {
    pub to: Address,
    pub operation: u8,
    pub value: U256,
    pub data: Bytes,
}

/// Deterministic signal identity.
///
/// Derived from `(tx_hash, log_index)` for log-backed signals and from
/// `(block_number, kind, amount)` for balance-diff signals, so re-delivery of
/// the same underlying event always produces the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SignalId(String);

impl SignalId {
    pub fn from_log(tx_hash: B256, log_index: u64) -> Self {
        Self(format!("{tx_hash}:{log_index}"))
    }

    pub fn from_balance(block_number: u64, kind: &str, amount: U256) -> Self {
        Self(format!("{block_number}:{kind}:{amount}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SignalId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signals emitted by the event poller, consumed once per cycle.
#[derive(Debug, Clone, Serialize)]
pub enum Signal {
    /// An ERC-20 transfer into the Safe.
    Erc20Deposit {
        asset: Address,
        from: Address,
        amount: U256,
        block_number: u64,
        tx_hash: B256,
        log_index: u64,
        id: SignalId,
    },

    /// The Safe's native balance increased since the last poll.
    /// Only strictly positive deltas are reported; outgoing spends are not
    /// deposit activity.
    NativeDeposit {
        amount: U256,
        block_number: u64,
        id: SignalId,
    },

    /// Current balance of a tracked asset, for policies that need absolute
    /// balances rather than deltas.
    BalanceSnapshot {
        asset: Address,
        amount: U256,
        block_number: u64,
        id: SignalId,
    },

    /// A proposal was opened on the Governor (`TransactionsProposed`).
    ProposalOpened {
        proposal_hash: B256,
        assertion_id: B256,
        proposer: Address,
        /// Unix seconds after which the proposal is executable.
        challenge_window_ends: u64,
        transactions: Vec<ProposedTransaction>,
        rules: String,
        explanation: String,
    },

    /// A proposal was executed on the Governor.
    ProposalExecuted { proposal_hash: B256 },

    /// A proposal was deleted (disputed away or removed).
    ProposalDeleted { proposal_hash: B256 },

    /// An armed timelock trigger came due.
    Timelock { trigger_id: String, due_at_ms: u64 },
}

impl Signal {
    /// The deterministic id, for signals that carry one.
    pub fn id(&self) -> Option<&SignalId> {
        match self {
            Self::Erc20Deposit { id, .. }
            | Self::NativeDeposit { id, .. }
            | Self::BalanceSnapshot { id, .. } => Some(id),
            _ => None,
        }
    }
}

fn short(hash: &B256) -> String {
    let s = format!("{hash}");
    s[..10.min(s.len())].to_string()
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Erc20Deposit { asset, amount, block_number, .. } => {
                write!(f, "Erc20Deposit(asset={asset}, amount={amount}, block={block_number})")
            }
            Self::NativeDeposit { amount, block_number, .. } => {
                write!(f, "NativeDeposit(amount={amount}, block={block_number})")
            }
            Self::BalanceSnapshot { asset, amount, .. } => {
                write!(f, "BalanceSnapshot(asset={asset}, amount={amount})")
            }
            Self::ProposalOpened { proposal_hash, transactions, .. } => {
                write!(
                    f,
                    "ProposalOpened(hash={}, txs={})",
                    short(proposal_hash),
                    transactions.len()
                )
            }
            Self::ProposalExecuted { proposal_hash } => {
                write!(f, "ProposalExecuted(hash={})", short(proposal_hash))
            }
            Self::ProposalDeleted { proposal_hash } => {
                write!(f, "ProposalDeleted(hash={})", short(proposal_hash))
            }
            Self::Timelock { trigger_id, due_at_ms } => {
                write!(f, "Timelock(trigger={trigger_id}, due={due_at_ms})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_id_is_stable_across_redelivery() {
        let tx = B256::repeat_byte(0xab);
        assert_eq!(SignalId::from_log(tx, 3), SignalId::from_log(tx, 3));
        assert_ne!(SignalId::from_log(tx, 3), SignalId::from_log(tx, 4));

        let a = SignalId::from_balance(100, "native", U256::from(5u64));
        let b = SignalId::from_balance(100, "native", U256::from(5u64));
        assert_eq!(a, b);
    }
}
