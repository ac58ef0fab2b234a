//! Contract event/function ABI definitions and hand-rolled codecs.
//!
//! We define minimal ABIs covering just the events and calls we need,
//! with keccak256 topic0/selector hashes for log filters and calldata.
//! Governor event signatures are hashed once at startup; well-known ERC-20
//! hashes are precomputed and checked by `verify_topic_hashes`.

use crate::chain::signals::ProposedTransaction;
use alloy::primitives::{b256, Address, Bytes, B256, U256};
use std::sync::LazyLock;
use thiserror::Error;

/// Upper bound on transactions per proposal. Payloads claiming more are
/// rejected as malformed before any allocation.
const MAX_PROPOSAL_TXS: usize = 256;

// ─── Event signatures and topic0 hashes ──────────────────────────────────────

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_TOPIC: B256 =
    b256!("ddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef");

/// Governor `TransactionsProposed` event, canonical tuple form.
/// Proposal = (Transaction[] transactions, uint256 requestTime)
/// Transaction = (address to, uint8 operation, uint256 value, bytes data)
const SIG_TRANSACTIONS_PROPOSED: &str = "TransactionsProposed(address,uint256,bytes32,((address,uint8,uint256,bytes)[],uint256),bytes32,bytes,bytes,uint256)";

/// Governor `ProposalExecuted(bytes32 indexed proposalHash, bytes32 indexed assertionId)`
const SIG_PROPOSAL_EXECUTED: &str = "ProposalExecuted(bytes32,bytes32)";

/// Governor `ProposalDeleted(bytes32 indexed proposalHash, bytes32 indexed assertionId)`
const SIG_PROPOSAL_DELETED: &str = "ProposalDeleted(bytes32,bytes32)";

pub static TRANSACTIONS_PROPOSED_TOPIC: LazyLock<B256> =
    LazyLock::new(|| keccak256(SIG_TRANSACTIONS_PROPOSED.as_bytes()));

pub static PROPOSAL_EXECUTED_TOPIC: LazyLock<B256> =
    LazyLock::new(|| keccak256(SIG_PROPOSAL_EXECUTED.as_bytes()));

pub static PROPOSAL_DELETED_TOPIC: LazyLock<B256> =
    LazyLock::new(|| keccak256(SIG_PROPOSAL_DELETED.as_bytes()));

// ─── Function selectors ──────────────────────────────────────────────────────

/// keccak256("balanceOf(address)")[..4]
pub const SEL_BALANCE_OF: [u8; 4] = [0x70, 0xa0, 0x82, 0x31];

/// keccak256("transfer(address,uint256)")[..4]
pub const SEL_ERC20_TRANSFER: [u8; 4] = [0xa9, 0x05, 0x9c, 0xbb];

pub static SEL_EXECUTE_PROPOSAL: LazyLock<[u8; 4]> =
    LazyLock::new(|| selector("executeProposal((address,uint8,uint256,bytes)[])"));

pub static SEL_PROPOSE_TRANSACTIONS: LazyLock<[u8; 4]> =
    LazyLock::new(|| selector("proposeTransactions((address,uint8,uint256,bytes)[],bytes)"));

pub static SEL_ASSERTION_IDS: LazyLock<[u8; 4]> = LazyLock::new(|| selector("assertionIds(bytes32)"));

pub static SEL_COLLATERAL: LazyLock<[u8; 4]> = LazyLock::new(|| selector("collateral()"));

pub static SEL_BOND_AMOUNT: LazyLock<[u8; 4]> = LazyLock::new(|| selector("bondAmount()"));

/// Compute keccak256 hash of a byte slice.
pub fn keccak256(data: &[u8]) -> B256 {
    use tiny_keccak::{Hasher, Keccak};
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(data);
    hasher.finalize(&mut output);
    B256::from(output)
}

fn selector(sig: &str) -> [u8; 4] {
    let hash = keccak256(sig.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Verify that precomputed hashes match their signatures.
/// Called at startup to catch signature drift.
pub fn verify_topic_hashes() -> Vec<(String, bool)> {
    let topic_checks = [("Transfer(address,address,uint256)", TRANSFER_TOPIC)];
    let selector_checks = [
        ("balanceOf(address)", SEL_BALANCE_OF),
        ("transfer(address,uint256)", SEL_ERC20_TRANSFER),
    ];

    let mut results: Vec<(String, bool)> = topic_checks
        .into_iter()
        .map(|(sig, expected)| (sig.to_string(), keccak256(sig.as_bytes()) == expected))
        .collect();
    results.extend(
        selector_checks
            .into_iter()
            .map(|(sig, expected)| (sig.to_string(), selector(sig) == expected)),
    );
    results
}

// ─── Word-level codec helpers ────────────────────────────────────────────────

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    #[error("truncated ABI payload")]
    Truncated,
    #[error("malformed ABI payload: {0}")]
    Malformed(&'static str),
}

fn word_at(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
    data.get(offset..offset + 32).ok_or(AbiError::Truncated)
}

fn read_u256_at(data: &[u8], offset: usize) -> Result<U256, AbiError> {
    let bytes: [u8; 32] = word_at(data, offset)?
        .try_into()
        .map_err(|_| AbiError::Truncated)?;
    Ok(U256::from_be_bytes(bytes))
}

fn read_usize_at(data: &[u8], offset: usize) -> Result<usize, AbiError> {
    read_u256_at(data, offset)?
        .try_into()
        .map_err(|_| AbiError::Malformed("offset exceeds usize"))
}

fn read_u64_at(data: &[u8], offset: usize) -> Result<u64, AbiError> {
    read_u256_at(data, offset)?
        .try_into()
        .map_err(|_| AbiError::Malformed("value exceeds u64"))
}

fn read_address_at(data: &[u8], offset: usize) -> Result<Address, AbiError> {
    let w = word_at(data, offset)?;
    Ok(Address::from_slice(&w[12..]))
}

/// Decode a dynamic `bytes` field at `offset` (length word, then payload).
fn read_dyn_bytes_at(data: &[u8], offset: usize) -> Result<&[u8], AbiError> {
    let len = read_usize_at(data, offset)?;
    data.get(offset + 32..offset + 32 + len)
        .ok_or(AbiError::Truncated)
}

fn push_u256(out: &mut Vec<u8>, value: U256) {
    out.extend_from_slice(&value.to_be_bytes::<32>());
}

fn push_u64(out: &mut Vec<u8>, value: u64) {
    push_u256(out, U256::from(value));
}

fn push_address(out: &mut Vec<u8>, addr: Address) {
    out.extend_from_slice(&[0u8; 12]);
    out.extend_from_slice(addr.as_slice());
}

fn push_b256(out: &mut Vec<u8>, value: B256) {
    out.extend_from_slice(value.as_slice());
}

/// Append a dynamic `bytes` encoding: length word, then payload padded to 32.
fn push_dyn_bytes(out: &mut Vec<u8>, data: &[u8]) {
    push_u64(out, data.len() as u64);
    out.extend_from_slice(data);
    let rem = data.len() % 32;
    if rem != 0 {
        out.extend(std::iter::repeat(0u8).take(32 - rem));
    }
}

// ─── Governor event decoding ─────────────────────────────────────────────────

/// Decoded `TransactionsProposed` event.
#[derive(Debug, Clone)]
pub struct TransactionsProposedEvent {
    pub proposer: Address,
    pub assertion_id: B256,
    pub proposal_hash: B256,
    /// Unix seconds after which the proposal becomes executable.
    pub challenge_window_ends: u64,
    pub transactions: Vec<ProposedTransaction>,
    pub explanation: String,
    pub rules: String,
}

/// Decode a `TransactionsProposed` log.
///
/// Topics: `[sig, proposer, proposalTime, assertionId]`.
/// Data (tuple of non-indexed args):
///   word 0  offset → Proposal (Transaction[] transactions, uint256 requestTime)
///   word 1  proposalHash
///   word 2  offset → explanation bytes
///   word 3  offset → rules bytes
///   word 4  challengeWindowEnds
pub fn decode_transactions_proposed(
    topics: &[B256],
    data: &[u8],
) -> Result<TransactionsProposedEvent, AbiError> {
    if topics.len() < 4 {
        return Err(AbiError::Malformed("expected 4 topics"));
    }
    let proposer = Address::from_slice(&topics[1][12..]);
    let assertion_id = topics[3];

    let proposal_off = read_usize_at(data, 0)?;
    let proposal_hash = B256::from_slice(word_at(data, 32)?);
    let explanation_off = read_usize_at(data, 64)?;
    let rules_off = read_usize_at(data, 96)?;
    let challenge_window_ends = read_u64_at(data, 128)?;

    // Proposal tuple head: [offset → transactions (relative), requestTime]
    let txs_off = proposal_off + read_usize_at(data, proposal_off)?;
    let transactions = decode_transaction_array(data, txs_off)?;

    let explanation = String::from_utf8_lossy(read_dyn_bytes_at(data, explanation_off)?).into_owned();
    let rules = String::from_utf8_lossy(read_dyn_bytes_at(data, rules_off)?).into_owned();

    Ok(TransactionsProposedEvent {
        proposer,
        assertion_id,
        proposal_hash,
        challenge_window_ends,
        transactions,
        explanation,
        rules,
    })
}

/// Decode a `Transaction[]` at `offset`: length word, element offset table
/// (relative to the table start), then dynamic structs
/// `(to, operation, value, offset → data)`.
fn decode_transaction_array(
    data: &[u8],
    offset: usize,
) -> Result<Vec<ProposedTransaction>, AbiError> {
    let count = read_usize_at(data, offset)?;
    if count > MAX_PROPOSAL_TXS {
        return Err(AbiError::Malformed("transaction count out of range"));
    }
    let base = offset + 32;

    let mut txs = Vec::with_capacity(count);
    for i in 0..count {
        let elem = base + read_usize_at(data, base + i * 32)?;

        let to = read_address_at(data, elem)?;
        let operation: u8 = read_u256_at(data, elem + 32)?
            .try_into()
            .map_err(|_| AbiError::Malformed("operation exceeds u8"))?;
        let value = read_u256_at(data, elem + 64)?;
        let payload_off = elem + read_usize_at(data, elem + 96)?;
        let payload = read_dyn_bytes_at(data, payload_off)?;

        txs.push(ProposedTransaction {
            to,
            operation,
            value,
            data: Bytes::copy_from_slice(payload),
        });
    }
    Ok(txs)
}

/// Decode a `ProposalExecuted` / `ProposalDeleted` log: the proposal hash is
/// the first indexed topic.
pub fn decode_proposal_hash_topic(topics: &[B256]) -> Result<B256, AbiError> {
    topics
        .get(1)
        .copied()
        .ok_or(AbiError::Malformed("missing proposalHash topic"))
}

/// Decode an ERC-20 `Transfer` log into (from, to, amount).
pub fn decode_transfer_log(topics: &[B256], data: &[u8]) -> Result<(Address, Address, U256), AbiError> {
    if topics.len() < 3 {
        return Err(AbiError::Malformed("expected 3 topics"));
    }
    let from = Address::from_slice(&topics[1][12..]);
    let to = Address::from_slice(&topics[2][12..]);
    let amount = read_u256_at(data, 0)?;
    Ok((from, to, amount))
}

// ─── Calldata encoding ───────────────────────────────────────────────────────

/// Encode a `Transaction[]` (length, offset table, dynamic structs).
fn encode_transaction_array(txs: &[ProposedTransaction]) -> Vec<u8> {
    let encoded: Vec<Vec<u8>> = txs.iter().map(encode_transaction_struct).collect();

    let mut out = Vec::new();
    push_u64(&mut out, txs.len() as u64);

    let mut elem_offset = txs.len() * 32;
    for enc in &encoded {
        push_u64(&mut out, elem_offset as u64);
        elem_offset += enc.len();
    }
    for enc in encoded {
        out.extend_from_slice(&enc);
    }
    out
}

fn encode_transaction_struct(tx: &ProposedTransaction) -> Vec<u8> {
    let mut out = Vec::new();
    push_address(&mut out, tx.to);
    push_u64(&mut out, tx.operation as u64);
    push_u256(&mut out, tx.value);
    push_u64(&mut out, 128); // offset → data, relative to struct start
    push_dyn_bytes(&mut out, &tx.data);
    out
}

/// `executeProposal(Transaction[])` calldata.
pub fn encode_execute_proposal(txs: &[ProposedTransaction]) -> Bytes {
    let mut out = Vec::from(*SEL_EXECUTE_PROPOSAL);
    push_u64(&mut out, 32); // offset → array
    out.extend_from_slice(&encode_transaction_array(txs));
    Bytes::from(out)
}

/// `proposeTransactions(Transaction[], bytes explanation)` calldata.
pub fn encode_propose_transactions(txs: &[ProposedTransaction], explanation: &[u8]) -> Bytes {
    let array = encode_transaction_array(txs);
    let mut out = Vec::from(*SEL_PROPOSE_TRANSACTIONS);
    push_u64(&mut out, 64); // offset → array
    push_u64(&mut out, 64 + array.len() as u64); // offset → explanation
    out.extend_from_slice(&array);
    push_dyn_bytes(&mut out, explanation);
    Bytes::from(out)
}

/// `assertionIds(bytes32)` calldata.
pub fn encode_assertion_ids(proposal_hash: B256) -> Bytes {
    let mut out = Vec::from(*SEL_ASSERTION_IDS);
    push_b256(&mut out, proposal_hash);
    Bytes::from(out)
}

/// `collateral()` calldata.
pub fn encode_collateral() -> Bytes {
    Bytes::from(Vec::from(*SEL_COLLATERAL))
}

/// `bondAmount()` calldata.
pub fn encode_bond_amount() -> Bytes {
    Bytes::from(Vec::from(*SEL_BOND_AMOUNT))
}

/// `balanceOf(address)` calldata.
pub fn encode_balance_of(holder: Address) -> Bytes {
    let mut out = Vec::from(SEL_BALANCE_OF);
    push_address(&mut out, holder);
    Bytes::from(out)
}

/// `transfer(address,uint256)` calldata.
pub fn encode_erc20_transfer(to: Address, amount: U256) -> Bytes {
    let mut out = Vec::from(SEL_ERC20_TRANSFER);
    push_address(&mut out, to);
    push_u256(&mut out, amount);
    Bytes::from(out)
}

/// Parse `transfer(address,uint256)` calldata back into (recipient, amount).
/// Used by reconciliation to match reimbursement transactions.
pub fn decode_erc20_transfer(calldata: &[u8]) -> Option<(Address, U256)> {
    if calldata.len() != 68 || calldata[..4] != SEL_ERC20_TRANSFER {
        return None;
    }
    let to = read_address_at(calldata, 4).ok()?;
    let amount = read_u256_at(calldata, 36).ok()?;
    Some((to, amount))
}

// ─── Call response decoding ──────────────────────────────────────────────────

pub fn decode_u256_response(data: &[u8]) -> Result<U256, AbiError> {
    read_u256_at(data, 0)
}

pub fn decode_b256_response(data: &[u8]) -> Result<B256, AbiError> {
    Ok(B256::from_slice(word_at(data, 0)?))
}

pub fn decode_address_response(data: &[u8]) -> Result<Address, AbiError> {
    read_address_at(data, 0)
}

// ─── Test payload construction ───────────────────────────────────────────────

/// Build the data blob of a `TransactionsProposed` log for tests.
#[cfg(test)]
pub fn encode_transactions_proposed_data(
    proposal_hash: B256,
    challenge_window_ends: u64,
    txs: &[ProposedTransaction],
    explanation: &str,
    rules: &str,
) -> Vec<u8> {
    let array = encode_transaction_array(txs);

    // Proposal tuple: [offset → transactions, requestTime] ++ array
    let mut proposal = Vec::new();
    push_u64(&mut proposal, 64);
    push_u64(&mut proposal, 0); // requestTime, unused by the decoder
    proposal.extend_from_slice(&array);

    let head = 5 * 32;
    let explanation_off = head + proposal.len();

    let mut expl = Vec::new();
    push_dyn_bytes(&mut expl, explanation.as_bytes());
    let rules_off = explanation_off + expl.len();

    let mut out = Vec::new();
    push_u64(&mut out, head as u64);
    push_b256(&mut out, proposal_hash);
    push_u64(&mut out, explanation_off as u64);
    push_u64(&mut out, rules_off as u64);
    push_u64(&mut out, challenge_window_ends);
    out.extend_from_slice(&proposal);
    out.extend_from_slice(&expl);
    push_dyn_bytes(&mut out, rules.as_bytes());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_txs() -> Vec<ProposedTransaction> {
        vec![
            ProposedTransaction {
                to: Address::repeat_byte(0x11),
                operation: 0,
                value: U256::ZERO,
                data: encode_erc20_transfer(Address::repeat_byte(0x22), U256::from(1_000_000u64)),
            },
            ProposedTransaction {
                to: Address::repeat_byte(0x33),
                operation: 1,
                value: U256::from(7u64),
                data: Bytes::new(),
            },
        ]
    }

    #[test]
    fn precomputed_hashes_match_signatures() {
        for (sig, ok) in verify_topic_hashes() {
            assert!(ok, "hash mismatch for {sig}");
        }
    }

    #[test]
    fn transactions_proposed_payload_decodes() {
        let txs = sample_txs();
        let hash = B256::repeat_byte(0xaa);
        let data = encode_transactions_proposed_data(hash, 1_700_000_000, &txs, "expl", "rules");
        let topics = vec![
            *TRANSACTIONS_PROPOSED_TOPIC,
            B256::left_padding_from(Address::repeat_byte(0x99).as_slice()),
            B256::ZERO,
            B256::repeat_byte(0xbb),
        ];

        let event = decode_transactions_proposed(&topics, &data).unwrap();
        assert_eq!(event.proposer, Address::repeat_byte(0x99));
        assert_eq!(event.assertion_id, B256::repeat_byte(0xbb));
        assert_eq!(event.proposal_hash, hash);
        assert_eq!(event.challenge_window_ends, 1_700_000_000);
        assert_eq!(event.transactions, txs);
        assert_eq!(event.explanation, "expl");
        assert_eq!(event.rules, "rules");
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let txs = sample_txs();
        let data =
            encode_transactions_proposed_data(B256::ZERO, 0, &txs, "expl", "rules");
        let topics = vec![*TRANSACTIONS_PROPOSED_TOPIC, B256::ZERO, B256::ZERO, B256::ZERO];

        // Cut into the rules payload (beyond mere padding) and into the head.
        assert!(decode_transactions_proposed(&topics, &data[..data.len() - 40]).is_err());
        assert!(decode_transactions_proposed(&topics, &data[..64]).is_err());
        assert!(decode_transactions_proposed(&topics[..2], &data).is_err());
    }

    #[test]
    fn erc20_transfer_calldata_round_trips() {
        let to = Address::repeat_byte(0x42);
        let amount = U256::from(990_000u64);
        let calldata = encode_erc20_transfer(to, amount);
        assert_eq!(decode_erc20_transfer(&calldata), Some((to, amount)));

        // Wrong selector is not a transfer.
        let mut other = calldata.to_vec();
        other[0] ^= 0xff;
        assert_eq!(decode_erc20_transfer(&other), None);
    }

    #[test]
    fn execute_proposal_calldata_carries_selector_and_array() {
        let txs = sample_txs();
        let calldata = encode_execute_proposal(&txs);
        assert_eq!(&calldata[..4], &*SEL_EXECUTE_PROPOSAL);
        // offset word, then array length
        assert_eq!(read_usize_at(&calldata[4..], 0).unwrap(), 32);
        assert_eq!(read_usize_at(&calldata[4..], 32).unwrap(), txs.len());
    }
}
