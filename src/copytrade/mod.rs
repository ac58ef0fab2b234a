//! Copy-trading pipeline: detect a source trade, mirror it on the venue,
//! move proceeds into the Safe, and propose reimbursement of the funding
//! wallet through the Governor.
//!
//! The pipeline is a single-flight state machine over one mutable
//! [`ActionState`]. It survives restarts, reverted submissions, and
//! ambiguous acks by never advancing on in-memory flags alone: every
//! optimistic transition is cross-checked against an independent source
//! (venue trade records, deposit logs, open Governor proposals, receipts),
//! and every stuck transition is bounded by a timeout.
//!
//! Transitions are plain functions over the owned state; all IO lives in
//! [`CopyTrader`], which gathers evidence and feeds it in.

pub mod policy;

use crate::chain::abi;
use crate::chain::signals::{ProposedTransaction, Signal};
use crate::chain::ChainReader;
use crate::proposals::ProposalRecord;
use crate::venue::{
    OrderAck, OrderInfo, OrderRequest, OrderStatus, OrderType, Side, TradeFilter, TradeRecord,
    TradeStatus, VenueClient,
};
use alloy::primitives::{Address, B256, U256};
use policy::CopyPolicy;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Collateral token decimals, for converting onchain amounts into venue
/// order sizing.
const COLLATERAL_DECIMALS: u32 = 6;

#[derive(Debug, Clone)]
pub struct CopyTradeConfig {
    /// false = paper mode: log intended actions, never send.
    pub execute: bool,
    /// Collateral token (deposits, reimbursement transfers).
    pub collateral: Address,
    pub safe: Address,
    pub governor: Address,
    /// Wallet that fronts the copy trade and gets reimbursed.
    pub funding_wallet: Address,
    /// This agent's proposer address on the Governor.
    pub proposer: Address,
    /// Venue address whose trades are copied.
    pub watched_trader: Option<String>,
    /// How long an unconfirmed proposal submission may stay pending.
    pub submission_timeout_ms: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("an opportunity is already active")]
    OpportunityActive,
    #[error("no active opportunity")]
    NoActiveOpportunity,
    #[error("source trade {0} already handled")]
    AlreadyHandled(String),
    #[error("source trade not eligible: {0}")]
    NotEligible(&'static str),
    #[error("computed size must be positive")]
    NonPositiveSize,
    #[error("order already submitted")]
    AlreadySubmitted,
    #[error("order parameters incomplete")]
    IncompleteOrder,
    #[error("venue rejected order: {0}")]
    VenueRejected(String),
    #[error("venue acknowledgement carried no order id")]
    MissingOrderId,
    #[error("no order in flight")]
    NoOrderInFlight,
    #[error("order fill not confirmed")]
    FillNotConfirmed,
    #[error("deposit already submitted")]
    DepositAlreadySubmitted,
    #[error("deposit not confirmed")]
    DepositUnconfirmed,
    #[error("reimbursement already proposed or in flight")]
    ReimbursementInFlight,
    #[error("unrelated proposal pending in the governor")]
    GovernorBusy,
    #[error("reimbursement amount must be positive")]
    NonPositiveAmount,
}

/// Where the pipeline currently stands. Derived from the markers, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Step {
    Idle,
    Detected,
    OrderSubmitted,
    OrderFilled,
    Deposited,
    ReimbursementPending,
}

/// The single live opportunity record. All markers are independently
/// optional so that partial progress is representable and recoverable.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ActionState {
    pub opportunity_id: Option<String>,
    pub token_id: Option<String>,
    pub side: Option<Side>,
    pub price: Option<Decimal>,
    pub size: Option<Decimal>,

    pub order_id: Option<String>,
    pub order_status: Option<String>,
    pub order_filled: bool,

    pub deposit_submitted: bool,
    pub deposit_confirmed: bool,

    pub reimbursement_amount: Option<U256>,
    pub reimbursement_proposed: bool,
    pub reimbursement_proposal_hash: Option<B256>,
    pub reimbursement_submission_pending: bool,
    pub reimbursement_submission_tx: Option<B256>,
    pub reimbursement_submitted_at_ms: Option<u64>,

    /// Last opportunity fully cleared; the same source trade never
    /// re-triggers.
    pub seen_opportunity_id: Option<String>,
}

/// Acknowledgement of a Governor proposal submission. The proposal hash may
/// be absent when the submission is routed through a relayer or the event
/// has not been indexed yet.
#[derive(Debug, Clone)]
pub struct SubmissionAck {
    pub proposal_hash: Option<B256>,
    pub tx_hash: Option<B256>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillAssessment {
    /// Both the order status and independent trade records agree.
    Filled,
    /// At least one source has not confirmed yet.
    Pending,
    /// Either source reports an unrecoverable status.
    TerminalFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing pending to reconcile.
    Clean,
    /// An open proposal matched the expected transfer; its hash was adopted.
    Adopted(B256),
    /// The submission transaction reverted; pending cleared.
    AbandonedReverted,
    /// The submission timed out with nothing pending onchain.
    AbandonedTimeout,
    /// Still waiting for evidence.
    Waiting,
}

/// How to read a hash-shaped value returned by a legacy submission ack.
///
/// If the value equals the known submission transaction hash it is treated
/// as that tx hash, otherwise as the real proposal hash. A genuinely
/// colliding value would be misclassified; evidence matching against open
/// proposals remains the authoritative recovery path, this is a tie-breaker
/// only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionRef {
    TxHash,
    ProposalHash,
}

pub fn classify_submission_ref(value: B256, known_tx: Option<B256>) -> SubmissionRef {
    if known_tx == Some(value) {
        SubmissionRef::TxHash
    } else {
        SubmissionRef::ProposalHash
    }
}

/// Whether `record` is exactly the reimbursement this opportunity expects:
/// a single transaction transferring `amount` of `collateral` to
/// `recipient`, proposed by this agent.
pub fn matches_reimbursement(
    record: &ProposalRecord,
    collateral: Address,
    recipient: Address,
    amount: U256,
    proposer: Address,
) -> bool {
    if record.proposer != proposer || record.transactions.len() != 1 {
        return false;
    }
    let tx = &record.transactions[0];
    if tx.to != collateral || tx.value != U256::ZERO {
        return false;
    }
    abi::decode_erc20_transfer(&tx.data) == Some((recipient, amount))
}

/// Judge fill progress from the order's own view and independent trade
/// records. Declares `Filled` only when both agree; disagreement is
/// "not yet", never success.
pub fn assess_fill(order: &OrderInfo, trades: &[TradeRecord], order_id: &str) -> FillAssessment {
    let matching: Vec<&TradeRecord> = trades.iter().filter(|t| t.order_id == order_id).collect();

    if order.status.is_terminal_failure()
        || matching.iter().any(|t| t.status == TradeStatus::Failed)
    {
        return FillAssessment::TerminalFailure;
    }

    let order_claims_fill = order.status == OrderStatus::Filled
        || (order.original_size > Decimal::ZERO && order.size_matched >= order.original_size);

    let corroborated: Decimal = matching
        .iter()
        .filter(|t| {
            matches!(
                t.status,
                TradeStatus::Matched | TradeStatus::Mined | TradeStatus::Confirmed
            )
        })
        .map(|t| t.size)
        .sum();
    let trades_corroborate =
        order.original_size > Decimal::ZERO && corroborated >= order.original_size;

    if order_claims_fill && trades_corroborate {
        FillAssessment::Filled
    } else {
        FillAssessment::Pending
    }
}

impl ActionState {
    pub fn step(&self) -> Step {
        if self.opportunity_id.is_none() {
            Step::Idle
        } else if self.reimbursement_proposed || self.reimbursement_submission_pending {
            Step::ReimbursementPending
        } else if self.deposit_confirmed {
            Step::Deposited
        } else if self.order_filled {
            Step::OrderFilled
        } else if self.order_id.is_some() {
            Step::OrderSubmitted
        } else {
            Step::Detected
        }
    }

    // ── Idle → Detected ──────────────────────────────────────────────────

    pub fn can_detect(&self, trade: &TradeRecord) -> Result<(), GuardError> {
        if self.opportunity_id.is_some() {
            return Err(GuardError::OpportunityActive);
        }
        if trade.side != Some(Side::Buy) {
            return Err(GuardError::NotEligible("only BUY source trades are copied"));
        }
        if trade.outcome.is_empty() {
            return Err(GuardError::NotEligible("unrecognized outcome"));
        }
        if self.seen_opportunity_id.as_deref() == Some(trade.id.as_str()) {
            return Err(GuardError::AlreadyHandled(trade.id.clone()));
        }
        Ok(())
    }

    pub fn detect(
        &mut self,
        trade: &TradeRecord,
        token_id: String,
        copy_amount: U256,
        order_size: Decimal,
    ) -> Result<(), GuardError> {
        self.can_detect(trade)?;
        if copy_amount.is_zero() || order_size <= Decimal::ZERO {
            return Err(GuardError::NonPositiveSize);
        }
        self.opportunity_id = Some(trade.id.clone());
        self.token_id = Some(token_id);
        self.side = trade.side;
        self.price = Some(trade.price);
        self.size = Some(order_size);
        self.reimbursement_amount = Some(copy_amount);
        Ok(())
    }

    // ── Detected → OrderSubmitted ────────────────────────────────────────

    pub fn can_submit_order(&self) -> Result<(), GuardError> {
        if self.opportunity_id.is_none() {
            return Err(GuardError::NoActiveOpportunity);
        }
        if self.order_id.is_some() || self.order_filled {
            return Err(GuardError::AlreadySubmitted);
        }
        let (Some(_), Some(price), Some(size)) = (self.side, self.price, self.size) else {
            return Err(GuardError::IncompleteOrder);
        };
        if price <= Decimal::ZERO || size <= Decimal::ZERO {
            return Err(GuardError::NonPositiveSize);
        }
        Ok(())
    }

    /// Record a submission only after the venue reported success *and*
    /// returned an order id; an id-less ack is unreconcilable later and must
    /// not count as submitted.
    pub fn record_order_submission(&mut self, ack: &OrderAck) -> Result<(), GuardError> {
        self.can_submit_order()?;
        if !ack.success {
            return Err(GuardError::VenueRejected(ack.error_msg.clone()));
        }
        let Some(order_id) = ack.order_id.as_ref().filter(|id| !id.is_empty()) else {
            return Err(GuardError::MissingOrderId);
        };
        self.order_id = Some(order_id.clone());
        self.order_status = Some(ack.status.clone());
        Ok(())
    }

    // ── OrderSubmitted → OrderFilled (or back to Detected) ───────────────

    pub fn mark_filled(&mut self) -> Result<(), GuardError> {
        if self.order_id.is_none() {
            return Err(GuardError::NoOrderInFlight);
        }
        self.order_filled = true;
        Ok(())
    }

    /// Terminal venue failure: back to Detected with the order id cleared so
    /// a fresh order may be attempted.
    pub fn revert_order(&mut self) {
        self.order_id = None;
        self.order_status = None;
        self.order_filled = false;
    }

    // ── OrderFilled → Deposited ──────────────────────────────────────────

    pub fn can_submit_deposit(&self, attributable_balance: U256) -> Result<(), GuardError> {
        if !self.order_filled {
            return Err(GuardError::FillNotConfirmed);
        }
        if self.deposit_submitted {
            return Err(GuardError::DepositAlreadySubmitted);
        }
        if attributable_balance.is_zero() {
            return Err(GuardError::NonPositiveAmount);
        }
        Ok(())
    }

    pub fn record_deposit_submission(&mut self) {
        self.deposit_submitted = true;
    }

    /// Driven by an observed `Erc20Deposit` of the expected asset.
    pub fn confirm_deposit(&mut self) -> Result<(), GuardError> {
        if !self.order_filled {
            return Err(GuardError::FillNotConfirmed);
        }
        self.deposit_confirmed = true;
        Ok(())
    }

    // ── Deposited → ReimbursementPending ─────────────────────────────────

    pub fn can_propose_reimbursement(&self, governor_busy: bool) -> Result<(), GuardError> {
        if !self.deposit_confirmed {
            return Err(GuardError::DepositUnconfirmed);
        }
        if self.reimbursement_proposed || self.reimbursement_submission_pending {
            return Err(GuardError::ReimbursementInFlight);
        }
        if governor_busy {
            return Err(GuardError::GovernorBusy);
        }
        match self.reimbursement_amount {
            Some(amount) if !amount.is_zero() => Ok(()),
            _ => Err(GuardError::NonPositiveAmount),
        }
    }

    pub fn record_reimbursement_submission(
        &mut self,
        ack: &SubmissionAck,
        now_ms: u64,
    ) -> Result<(), GuardError> {
        if !self.deposit_confirmed {
            return Err(GuardError::DepositUnconfirmed);
        }
        if self.reimbursement_proposed || self.reimbursement_submission_pending {
            return Err(GuardError::ReimbursementInFlight);
        }
        match ack.proposal_hash {
            Some(hash) => {
                self.reimbursement_proposed = true;
                self.reimbursement_proposal_hash = Some(hash);
            }
            None => {
                self.reimbursement_submission_pending = true;
                self.reimbursement_submission_tx = ack.tx_hash;
                self.reimbursement_submitted_at_ms = Some(now_ms);
            }
        }
        Ok(())
    }

    /// Recover a pending submission from onchain evidence.
    ///
    /// `receipt` is the submission transaction's status if known and mined;
    /// `governor_busy` is whether any proposal *not* matching this
    /// reimbursement is currently open.
    #[allow(clippy::too_many_arguments)]
    pub fn reconcile_submission(
        &mut self,
        open_proposals: &[&ProposalRecord],
        collateral: Address,
        recipient: Address,
        proposer: Address,
        receipt: Option<bool>,
        governor_busy: bool,
        timeout_ms: u64,
        now_ms: u64,
    ) -> ReconcileOutcome {
        if !self.reimbursement_submission_pending {
            return ReconcileOutcome::Clean;
        }
        let Some(amount) = self.reimbursement_amount else {
            self.abandon_submission();
            return ReconcileOutcome::AbandonedTimeout;
        };

        for record in open_proposals {
            if matches_reimbursement(record, collateral, recipient, amount, proposer) {
                self.reimbursement_proposed = true;
                self.reimbursement_proposal_hash = Some(record.proposal_hash);
                self.abandon_submission();
                return ReconcileOutcome::Adopted(record.proposal_hash);
            }
        }

        if receipt == Some(false) {
            self.abandon_submission();
            return ReconcileOutcome::AbandonedReverted;
        }

        let submitted_at = self.reimbursement_submitted_at_ms.unwrap_or(now_ms);
        if now_ms.saturating_sub(submitted_at) >= timeout_ms && !governor_busy {
            self.abandon_submission();
            return ReconcileOutcome::AbandonedTimeout;
        }

        ReconcileOutcome::Waiting
    }

    fn abandon_submission(&mut self) {
        self.reimbursement_submission_pending = false;
        self.reimbursement_submission_tx = None;
        self.reimbursement_submitted_at_ms = None;
    }

    // ── ReimbursementPending → cleared ───────────────────────────────────

    /// React to a `ProposalExecuted` signal. Clears the opportunity when the
    /// hash matches; returns whether it did.
    pub fn observe_executed(&mut self, proposal_hash: B256) -> bool {
        if self.reimbursement_proposal_hash == Some(proposal_hash) {
            self.clear();
            true
        } else {
            false
        }
    }

    /// React to a `ProposalDeleted` signal: the reimbursement proposal was
    /// disputed away, so fall back to Deposited and allow a fresh proposal.
    pub fn observe_deleted(&mut self, proposal_hash: B256) -> bool {
        if self.reimbursement_proposal_hash == Some(proposal_hash) {
            self.reimbursement_proposed = false;
            self.reimbursement_proposal_hash = None;
            true
        } else {
            false
        }
    }

    /// Terminal transition: remember the opportunity id and return to Idle.
    pub fn clear(&mut self) {
        let seen = self
            .opportunity_id
            .take()
            .or_else(|| self.seen_opportunity_id.take());
        *self = ActionState {
            seen_opportunity_id: seen,
            ..ActionState::default()
        };
    }

    /// Full reset, for test isolation.
    pub fn reset(&mut self) {
        *self = ActionState::default();
    }
}

/// Convert a collateral amount (6 decimals) into a venue decimal.
fn collateral_to_decimal(amount: U256) -> Option<Decimal> {
    let raw: u128 = amount.try_into().ok()?;
    let raw: i128 = raw.try_into().ok()?;
    Decimal::try_from_i128_with_scale(raw, COLLATERAL_DECIMALS).ok()
}

/// Async driver: gathers evidence from the chain and the venue each cycle
/// and feeds it through the pure transitions above.
pub struct CopyTrader<P: CopyPolicy> {
    config: CopyTradeConfig,
    policy: P,
    state: ActionState,
}

impl<P: CopyPolicy> CopyTrader<P> {
    pub fn new(config: CopyTradeConfig, policy: P) -> Self {
        Self {
            config,
            policy,
            state: ActionState::default(),
        }
    }

    pub fn state(&self) -> &ActionState {
        &self.state
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut ActionState {
        &mut self.state
    }

    /// One cycle of the pipeline. Reconciliation runs before any new
    /// trigger is considered; every sub-step isolates its own failures.
    pub async fn on_cycle(
        &mut self,
        signals: &[Signal],
        open_proposals: &[&ProposalRecord],
        chain: &impl ChainReader,
        venue: Option<&VenueClient>,
        now_ms: u64,
    ) {
        self.observe_lifecycle(signals);
        self.observe_deposits(signals);
        self.reconcile(open_proposals, chain, now_ms).await;
        self.drive_fill(venue).await;
        self.drive_order(venue).await;
        self.drive_deposit(chain).await;
        self.drive_reimbursement(open_proposals, chain, now_ms).await;
        self.detect_trigger(chain, venue).await;
    }

    /// Retry path for a detected opportunity whose order placement has not
    /// stuck yet (rejected ack, earlier venue outage).
    async fn drive_order(&mut self, venue: Option<&VenueClient>) {
        if self.state.can_submit_order().is_err() {
            return;
        }
        let Some(venue) = venue else {
            return;
        };
        self.submit_order(venue).await;
    }

    fn observe_lifecycle(&mut self, signals: &[Signal]) {
        for signal in signals {
            match signal {
                Signal::ProposalExecuted { proposal_hash } => {
                    if self.state.observe_executed(*proposal_hash) {
                        info!(hash = %proposal_hash, "reimbursement executed, opportunity cleared");
                    }
                }
                Signal::ProposalDeleted { proposal_hash } => {
                    if self.state.observe_deleted(*proposal_hash) {
                        warn!(hash = %proposal_hash, "reimbursement proposal deleted, will re-propose");
                    }
                }
                _ => {}
            }
        }
    }

    fn observe_deposits(&mut self, signals: &[Signal]) {
        if !self.state.order_filled || !self.state.deposit_submitted || self.state.deposit_confirmed
        {
            return;
        }
        let confirmed = signals.iter().any(|signal| {
            matches!(signal, Signal::Erc20Deposit { asset, .. } if *asset == self.config.collateral)
        });
        if confirmed && self.state.confirm_deposit().is_ok() {
            info!("collateral deposit confirmed onchain");
        }
    }

    async fn reconcile(
        &mut self,
        open_proposals: &[&ProposalRecord],
        chain: &impl ChainReader,
        now_ms: u64,
    ) {
        if !self.state.reimbursement_submission_pending {
            return;
        }

        let receipt = match self.state.reimbursement_submission_tx {
            Some(tx) => match chain.receipt_status(tx).await {
                Ok(status) => status,
                Err(e) => {
                    debug!(error = %e, "receipt lookup failed, retrying next cycle");
                    None
                }
            },
            None => None,
        };

        let governor_busy = self.governor_busy(open_proposals);
        let outcome = self.state.reconcile_submission(
            open_proposals,
            self.config.collateral,
            self.config.funding_wallet,
            self.config.proposer,
            receipt,
            governor_busy,
            self.config.submission_timeout_ms,
            now_ms,
        );
        match outcome {
            ReconcileOutcome::Adopted(hash) => {
                info!(hash = %hash, "recovered reimbursement proposal hash from onchain evidence");
            }
            ReconcileOutcome::AbandonedReverted => {
                warn!("reimbursement submission reverted, allowing a fresh attempt");
            }
            ReconcileOutcome::AbandonedTimeout => {
                warn!("reimbursement submission timed out unobserved, allowing a fresh attempt");
            }
            ReconcileOutcome::Waiting | ReconcileOutcome::Clean => {}
        }
    }

    /// Any open proposal that is not this opportunity's reimbursement.
    fn governor_busy(&self, open_proposals: &[&ProposalRecord]) -> bool {
        let expected = self.state.reimbursement_amount;
        open_proposals.iter().any(|record| {
            if Some(record.proposal_hash) == self.state.reimbursement_proposal_hash {
                return false;
            }
            match expected {
                Some(amount) => !matches_reimbursement(
                    record,
                    self.config.collateral,
                    self.config.funding_wallet,
                    amount,
                    self.config.proposer,
                ),
                None => true,
            }
        })
    }

    async fn drive_fill(&mut self, venue: Option<&VenueClient>) {
        if self.state.order_filled {
            return;
        }
        let Some(order_id) = self.state.order_id.clone() else {
            return;
        };
        let Some(venue) = venue else {
            return;
        };

        let order = match venue.get_order(&order_id).await {
            Ok(order) => order,
            Err(e) => {
                warn!(order = %order_id, error = %e, "order status check failed");
                return;
            }
        };
        let trades = match venue
            .get_trades(&TradeFilter {
                order_id: Some(order_id.clone()),
                ..TradeFilter::default()
            })
            .await
        {
            Ok(trades) => trades,
            Err(e) => {
                warn!(order = %order_id, error = %e, "trade record check failed");
                return;
            }
        };

        match assess_fill(&order, &trades, &order_id) {
            FillAssessment::Filled => {
                if self.state.mark_filled().is_ok() {
                    info!(order = %order_id, "order fill corroborated by trade records");
                }
            }
            FillAssessment::TerminalFailure => {
                warn!(order = %order_id, status = ?order.status, "order failed, reverting to detected");
                self.state.revert_order();
            }
            FillAssessment::Pending => {
                debug!(order = %order_id, "fill not yet corroborated");
            }
        }
    }

    async fn drive_deposit(&mut self, chain: &impl ChainReader) {
        if !self.state.order_filled || self.state.deposit_submitted {
            return;
        }
        let Some(amount) = self.state.reimbursement_amount else {
            return;
        };

        let balance = match chain
            .erc20_balance(self.config.collateral, self.config.funding_wallet, None)
            .await
        {
            Ok(balance) => balance,
            Err(e) => {
                warn!(error = %e, "funding wallet balance check failed");
                return;
            }
        };
        if let Err(e) = self.state.can_submit_deposit(balance) {
            debug!(reason = %e, "deposit not yet allowed");
            return;
        }

        if !self.config.execute {
            info!(amount = %amount, "PAPER: would deposit collateral into the safe");
            return;
        }

        let calldata = abi::encode_erc20_transfer(self.config.safe, amount);
        match chain.send_transaction(self.config.collateral, calldata).await {
            Ok(tx) => {
                info!(tx = %tx, amount = %amount, "submitted collateral deposit");
                self.state.record_deposit_submission();
            }
            Err(e) => {
                warn!(error = %e, "deposit submission failed, will retry");
            }
        }
    }

    async fn drive_reimbursement(
        &mut self,
        open_proposals: &[&ProposalRecord],
        chain: &impl ChainReader,
        now_ms: u64,
    ) {
        let governor_busy = self.governor_busy(open_proposals);
        if let Err(e) = self.state.can_propose_reimbursement(governor_busy) {
            if self.state.step() == Step::Deposited {
                debug!(reason = %e, "reimbursement not yet allowed");
            }
            return;
        }
        // Guard passed, so the amount is present and positive.
        let Some(amount) = self.state.reimbursement_amount else {
            return;
        };

        if !self.config.execute {
            info!(amount = %amount, recipient = %self.config.funding_wallet, "PAPER: would propose reimbursement");
            return;
        }

        let transfer = ProposedTransaction {
            to: self.config.collateral,
            operation: 0,
            value: U256::ZERO,
            data: abi::encode_erc20_transfer(self.config.funding_wallet, amount),
        };
        let calldata =
            abi::encode_propose_transactions(&[transfer], b"copy-trade reimbursement");

        match chain.send_transaction(self.config.governor, calldata).await {
            Ok(tx) => {
                info!(tx = %tx, amount = %amount, "submitted reimbursement proposal");
                // The proposal hash is only knowable from the Governor event;
                // reconciliation recovers it next cycle.
                let ack = SubmissionAck {
                    proposal_hash: None,
                    tx_hash: Some(tx),
                };
                if let Err(e) = self.state.record_reimbursement_submission(&ack, now_ms) {
                    warn!(error = %e, "reimbursement submission not recorded");
                }
            }
            Err(e) => {
                warn!(error = %e, "reimbursement proposal submission failed, will retry");
            }
        }
    }

    async fn detect_trigger(&mut self, chain: &impl ChainReader, venue: Option<&VenueClient>) {
        if self.state.step() != Step::Idle {
            return;
        }
        let (Some(venue), Some(watched)) = (venue, self.config.watched_trader.clone()) else {
            return;
        };

        let trades = match venue
            .get_trades(&TradeFilter {
                maker_address: Some(watched),
                ..TradeFilter::default()
            })
            .await
        {
            Ok(trades) => trades,
            Err(e) => {
                warn!(error = %e, "watched trader lookup failed");
                return;
            }
        };

        let Some(trade) = trades
            .iter()
            .find(|trade| self.state.can_detect(trade).is_ok())
        else {
            return;
        };

        let safe_balance = match chain
            .erc20_balance(self.config.collateral, self.config.safe, None)
            .await
        {
            Ok(balance) => balance,
            Err(e) => {
                warn!(error = %e, "safe balance check failed");
                return;
            }
        };
        let split = self.policy.copy_split(safe_balance);
        let Some(notional) = collateral_to_decimal(split.copy) else {
            return;
        };
        if trade.price <= Decimal::ZERO {
            return;
        }
        let order_size = notional / trade.price;

        if let Err(e) = self
            .state
            .detect(trade, trade.asset_id.clone(), split.copy, order_size)
        {
            debug!(trade = %trade.id, reason = %e, "trigger ignored");
            return;
        }
        info!(
            trade = %trade.id,
            copy = %split.copy,
            fee = %split.fee,
            size = %order_size,
            "copy opportunity detected"
        );

        self.submit_order(venue).await;
    }

    async fn submit_order(&mut self, venue: &VenueClient) {
        if self.state.can_submit_order().is_err() {
            return;
        }
        let (Some(token_id), Some(side), Some(price), Some(size)) = (
            self.state.token_id.clone(),
            self.state.side,
            self.state.price,
            self.state.size,
        ) else {
            return;
        };

        let request = OrderRequest {
            token_id,
            side,
            order_type: OrderType::Gtc,
            price,
            size,
        };

        if !self.config.execute {
            info!(side = side.as_str(), price = %price, size = %size, "PAPER: would place copy order");
            return;
        }

        match venue.place_order(&request).await {
            Ok(ack) => match self.state.record_order_submission(&ack) {
                Ok(()) => {
                    info!(order = ?self.state.order_id, "copy order submitted");
                }
                Err(e) => {
                    warn!(error = %e, "order ack not recorded as submitted");
                }
            },
            Err(e) => {
                warn!(error = %e, "order placement failed");
            }
        }
    }
}
