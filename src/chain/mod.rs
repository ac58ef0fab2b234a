//! Thin read/write facade over the chain.
//!
//! Everything above this module speaks [`ChainReader`]: block numbers, log
//! ranges, contract calls (also used to simulate before sending), balances,
//! receipts, and transaction submission. Addresses, hashes, and amounts are
//! normalized into `alloy` value types here and never re-validated downstream.

pub mod abi;
pub mod signals;

use alloy::network::TransactionBuilder;
use alloy::primitives::{Address, Bytes, B256, U256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, TransactionRequest};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("call reverted: {0}")]
    CallReverted(String),
    #[error("invalid rpc url: {0}")]
    InvalidUrl(String),
    #[error(transparent)]
    Abi(#[from] abi::AbiError),
}

/// A log query over one contract and an inclusive block range.
#[derive(Debug, Clone)]
pub struct LogFilter {
    pub address: Address,
    /// Accepted topic0 hashes (OR).
    pub topics0: Vec<B256>,
    /// Exact-match filter on topic2 (e.g. `Transfer.to`).
    pub topic2: Option<B256>,
    pub from_block: u64,
    pub to_block: u64,
}

/// A raw log as returned by the provider, before event decoding.
#[derive(Debug, Clone)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

/// Read/write chain access used by the poller, coordinator, and policies.
///
/// Implemented by [`RpcChainReader`] in production and by `testing::MockChain`
/// in tests. Consumers are generic over the trait, so no `Send` bound is
/// promised here.
#[allow(async_fn_in_trait)]
pub trait ChainReader {
    async fn block_number(&self) -> Result<u64, ChainError>;

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ChainError>;

    /// `eth_call` against `to` with raw calldata. Doubles as the
    /// simulate-before-send primitive.
    async fn call(
        &self,
        to: Address,
        data: Bytes,
        block: Option<u64>,
    ) -> Result<Bytes, ChainError>;

    async fn native_balance(&self, addr: Address, block: Option<u64>) -> Result<U256, ChainError>;

    async fn erc20_balance(
        &self,
        token: Address,
        holder: Address,
        block: Option<u64>,
    ) -> Result<U256, ChainError>;

    /// Receipt status for a transaction: `None` while unmined, otherwise
    /// `Some(success)`.
    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>, ChainError>;

    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<B256, ChainError>;
}

/// JSON-RPC implementation over an alloy HTTP provider.
pub struct RpcChainReader<P> {
    provider: P,
}

/// Connect to an HTTP RPC endpoint.
pub fn connect(url: &str) -> Result<RpcChainReader<impl Provider>, ChainError> {
    let parsed: reqwest::Url = url
        .parse()
        .map_err(|e| ChainError::InvalidUrl(format!("{e}")))?;
    let provider = ProviderBuilder::new().connect_http(parsed);
    Ok(RpcChainReader { provider })
}

impl<P: Provider> RpcChainReader<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn build_filter(filter: &LogFilter) -> Filter {
        let mut f = Filter::new()
            .address(filter.address)
            .event_signature(filter.topics0.clone())
            .from_block(filter.from_block)
            .to_block(filter.to_block);
        if let Some(topic2) = filter.topic2 {
            f = f.topic2(topic2);
        }
        f
    }
}

impl<P: Provider> ChainReader for RpcChainReader<P> {
    async fn block_number(&self) -> Result<u64, ChainError> {
        self.provider
            .get_block_number()
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ChainError> {
        let logs = self
            .provider
            .get_logs(&Self::build_filter(filter))
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        Ok(logs
            .into_iter()
            .map(|log| RawLog {
                address: log.address(),
                topics: log.topics().to_vec(),
                data: log.data().data.clone(),
                block_number: log.block_number.unwrap_or(0),
                tx_hash: log.transaction_hash.unwrap_or_default(),
                log_index: log.log_index.unwrap_or(0),
            })
            .collect())
    }

    async fn call(
        &self,
        to: Address,
        data: Bytes,
        block: Option<u64>,
    ) -> Result<Bytes, ChainError> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        let call = match block {
            Some(n) => self.provider.call(tx).block(n.into()),
            None => self.provider.call(tx),
        };
        call.await.map_err(|e| ChainError::CallReverted(e.to_string()))
    }

    async fn native_balance(&self, addr: Address, block: Option<u64>) -> Result<U256, ChainError> {
        let query = self.provider.get_balance(addr);
        let query = match block {
            Some(n) => query.block_id(n.into()),
            None => query,
        };
        query.await.map_err(|e| ChainError::Rpc(e.to_string()))
    }

    async fn erc20_balance(
        &self,
        token: Address,
        holder: Address,
        block: Option<u64>,
    ) -> Result<U256, ChainError> {
        let response = self.call(token, abi::encode_balance_of(holder), block).await?;
        Ok(abi::decode_u256_response(&response)?)
    }

    async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>, ChainError> {
        let receipt = self
            .provider
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(receipt.map(|r| r.status()))
    }

    async fn send_transaction(&self, to: Address, data: Bytes) -> Result<B256, ChainError> {
        let tx = TransactionRequest::default().with_to(to).with_input(data);
        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(|e| ChainError::Rpc(e.to_string()))?;
        Ok(*pending.tx_hash())
    }
}

#[cfg(test)]
pub mod testing {
    //! Scripted chain double for poller/coordinator/policy tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MockChain {
        pub head: u64,
        pub logs: Vec<RawLog>,
        pub native: U256,
        /// (token, holder) → balance.
        pub balances: HashMap<(Address, Address), U256>,
        /// proposalHash → assertionId for `assertionIds` calls.
        pub assertion_ids: HashMap<B256, B256>,
        pub collateral: Address,
        /// Whether `executeProposal` simulation succeeds.
        pub simulate_ok: bool,
        pub receipts: HashMap<B256, bool>,
        pub fail_logs: bool,
        pub send_hash: B256,
        pub sent: Mutex<Vec<(Address, Bytes)>>,
    }

    impl MockChain {
        pub fn sent_count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    impl ChainReader for MockChain {
        async fn block_number(&self) -> Result<u64, ChainError> {
            Ok(self.head)
        }

        async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ChainError> {
            if self.fail_logs {
                return Err(ChainError::Rpc("scripted log failure".into()));
            }
            Ok(self
                .logs
                .iter()
                .filter(|log| {
                    log.address == filter.address
                        && log.block_number >= filter.from_block
                        && log.block_number <= filter.to_block
                        && log
                            .topics
                            .first()
                            .is_some_and(|t| filter.topics0.contains(t))
                        && filter
                            .topic2
                            .is_none_or(|t| log.topics.get(2) == Some(&t))
                })
                .cloned()
                .collect())
        }

        async fn call(
            &self,
            to: Address,
            data: Bytes,
            _block: Option<u64>,
        ) -> Result<Bytes, ChainError> {
            if data.len() < 4 {
                return Err(ChainError::CallReverted("empty calldata".into()));
            }
            let sel: [u8; 4] = data[..4].try_into().unwrap();

            if sel == *abi::SEL_ASSERTION_IDS {
                let hash = B256::from_slice(&data[4..36]);
                let id = self.assertion_ids.get(&hash).copied().unwrap_or(B256::ZERO);
                return Ok(Bytes::copy_from_slice(id.as_slice()));
            }
            if sel == abi::SEL_BALANCE_OF {
                let holder = Address::from_slice(&data[16..36]);
                let balance = self
                    .balances
                    .get(&(to, holder))
                    .copied()
                    .unwrap_or(U256::ZERO);
                return Ok(Bytes::copy_from_slice(&balance.to_be_bytes::<32>()));
            }
            if sel == *abi::SEL_COLLATERAL {
                let mut word = [0u8; 32];
                word[12..].copy_from_slice(self.collateral.as_slice());
                return Ok(Bytes::copy_from_slice(&word));
            }
            if sel == *abi::SEL_EXECUTE_PROPOSAL {
                return if self.simulate_ok {
                    Ok(Bytes::new())
                } else {
                    Err(ChainError::CallReverted("assertion not settled".into()))
                };
            }
            Ok(Bytes::new())
        }

        async fn native_balance(
            &self,
            _addr: Address,
            _block: Option<u64>,
        ) -> Result<U256, ChainError> {
            Ok(self.native)
        }

        async fn erc20_balance(
            &self,
            token: Address,
            holder: Address,
            _block: Option<u64>,
        ) -> Result<U256, ChainError> {
            Ok(self
                .balances
                .get(&(token, holder))
                .copied()
                .unwrap_or(U256::ZERO))
        }

        async fn receipt_status(&self, tx_hash: B256) -> Result<Option<bool>, ChainError> {
            Ok(self.receipts.get(&tx_hash).copied())
        }

        async fn send_transaction(&self, to: Address, data: Bytes) -> Result<B256, ChainError> {
            self.sent.lock().unwrap().push((to, data));
            Ok(self.send_hash)
        }
    }
}
