//! Pluggable policy arithmetic for the copy-trading pipeline.
//!
//! Sizing and trigger rules live behind [`CopyPolicy`] so the state machine
//! stays independent of any particular fee schedule or signal source.

use alloy::primitives::U256;
use rust_decimal::Decimal;

const BPS_DENOMINATOR: u64 = 10_000;

/// How an observed value relates to its reference for a trigger to fire.
/// Both comparators are inclusive at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Lte,
    Gte,
}

/// A balance split into the amount to copy and the retained fee.
/// `copy + fee` always equals the input exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    pub copy: U256,
    pub fee: U256,
}

pub trait CopyPolicy {
    /// Split an available balance into copy amount and fee.
    fn copy_split(&self, balance: U256) -> Split;

    /// Whether an observed price against a reference (e.g. an SMA) fires.
    fn should_trigger(&self, observed: Decimal, reference: Decimal, comparator: Comparator)
        -> bool;
}

/// Basis-points split: `copy_bps` of the balance is copied, the remainder is
/// the fee. Default 9900 (99% copy / 1% fee).
#[derive(Debug, Clone, Copy)]
pub struct BasisPointsPolicy {
    pub copy_bps: u64,
}

impl Default for BasisPointsPolicy {
    fn default() -> Self {
        Self { copy_bps: 9_900 }
    }
}

impl CopyPolicy for BasisPointsPolicy {
    fn copy_split(&self, balance: U256) -> Split {
        let bps = self.copy_bps.min(BPS_DENOMINATOR);
        let copy = balance * U256::from(bps) / U256::from(BPS_DENOMINATOR);
        // The fee takes the rounding remainder, so the parts always sum
        // exactly to the input.
        Split {
            copy,
            fee: balance - copy,
        }
    }

    fn should_trigger(
        &self,
        observed: Decimal,
        reference: Decimal,
        comparator: Comparator,
    ) -> bool {
        match comparator {
            Comparator::Lte => observed <= reference,
            Comparator::Gte => observed >= reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(v: i64) -> Decimal {
        Decimal::from(v)
    }

    #[test]
    fn split_sums_exactly_with_no_remainder_loss() {
        let policy = BasisPointsPolicy::default();
        let split = policy.copy_split(U256::from(1_000_000u64));
        assert_eq!(split.copy, U256::from(990_000u64));
        assert_eq!(split.fee, U256::from(10_000u64));
        assert_eq!(split.copy + split.fee, U256::from(1_000_000u64));

        // Rounding remainder lands in the fee, never lost.
        let split = policy.copy_split(U256::from(101u64));
        assert_eq!(split.copy + split.fee, U256::from(101u64));
    }

    #[test]
    fn sma_trigger_is_inclusive_at_the_boundary() {
        let policy = BasisPointsPolicy::default();
        let sma = dec(2_000);

        assert!(policy.should_trigger(dec(1_999), sma, Comparator::Lte));
        assert!(!policy.should_trigger(dec(2_001), sma, Comparator::Lte));
        assert!(policy.should_trigger(dec(2_000), sma, Comparator::Lte));

        assert!(policy.should_trigger(dec(2_001), sma, Comparator::Gte));
        assert!(!policy.should_trigger(dec(1_999), sma, Comparator::Gte));
        assert!(policy.should_trigger(dec(2_000), sma, Comparator::Gte));
    }
}
