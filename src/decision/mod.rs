//! Contract with the decision collaborator.
//!
//! Each cycle's signals and policy state serialize into a
//! [`DecisionContext`]; the collaborator (an external LLM tool-caller, not
//! implemented here) returns named [`ToolInvocation`]s. Every invocation is
//! validated against the current action state before execution — one that
//! violates a transition guard is rejected synchronously, with no partial
//! effects.

use crate::chain::signals::Signal;
use crate::copytrade::{ActionState, GuardError};
use crate::venue::Side;
use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Snapshot handed to the decision collaborator each cycle.
#[derive(Debug, Serialize)]
pub struct DecisionContext<'a> {
    pub signals: &'a [Signal],
    pub state: &'a ActionState,
    pub open_proposal_count: usize,
    pub governor_busy: bool,
}

/// Named tool calls the collaborator may request. Amounts cross the
/// boundary as decimal strings and are parsed here, once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "tool", content = "args", rename_all = "snake_case")]
pub enum ToolInvocation {
    PlaceOrder {
        token_id: String,
        side: Side,
        price: Decimal,
        size: Decimal,
    },
    ConfirmFill {
        order_id: String,
    },
    DepositCollateral {
        amount: String,
    },
    ProposeReimbursement {
        recipient: String,
        amount: String,
    },
    Wait,
}

/// Validate an invocation against the current action state. Rejection means
/// the invocation is not executed at all.
pub fn validate(
    state: &ActionState,
    invocation: &ToolInvocation,
    governor_busy: bool,
) -> Result<(), GuardError> {
    match invocation {
        ToolInvocation::PlaceOrder {
            token_id, side, ..
        } => {
            state.can_submit_order()?;
            if state.token_id.as_deref() != Some(token_id.as_str()) {
                return Err(GuardError::NotEligible(
                    "order token does not match detected opportunity",
                ));
            }
            if state.side != Some(*side) {
                return Err(GuardError::NotEligible(
                    "order side does not match detected opportunity",
                ));
            }
            Ok(())
        }
        ToolInvocation::ConfirmFill { order_id } => {
            if state.order_id.as_deref() != Some(order_id.as_str()) {
                return Err(GuardError::NoOrderInFlight);
            }
            Ok(())
        }
        ToolInvocation::DepositCollateral { amount } => {
            let amount = parse_amount(amount)?;
            state.can_submit_deposit(amount)
        }
        ToolInvocation::ProposeReimbursement { recipient, amount } => {
            state.can_propose_reimbursement(governor_busy)?;
            Address::from_str(recipient)
                .map_err(|_| GuardError::NotEligible("invalid recipient address"))?;
            let amount = parse_amount(amount)?;
            if state.reimbursement_amount != Some(amount) {
                return Err(GuardError::NotEligible(
                    "reimbursement amount does not match stored amount",
                ));
            }
            Ok(())
        }
        ToolInvocation::Wait => Ok(()),
    }
}

fn parse_amount(raw: &str) -> Result<U256, GuardError> {
    let amount = U256::from_str(raw).map_err(|_| GuardError::NonPositiveAmount)?;
    if amount.is_zero() {
        return Err(GuardError::NonPositiveAmount);
    }
    Ok(amount)
}

/// The collaborator interface. Out of scope here beyond the contract; the
/// default implementation never acts.
pub trait DecisionEngine {
    fn decide(
        &self,
        context: &DecisionContext<'_>,
    ) -> impl std::future::Future<Output = anyhow::Result<Vec<ToolInvocation>>> + Send;
}

pub struct NullDecision;

impl DecisionEngine for NullDecision {
    async fn decide(
        &self,
        _context: &DecisionContext<'_>,
    ) -> anyhow::Result<Vec<ToolInvocation>> {
        Ok(Vec::new())
    }
}
