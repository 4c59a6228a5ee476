use async_trait::async_trait;
use ethers::abi::RawLog;
use ethers::contract::EthLogDecode;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Log, TxHash, U256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::chain::TransferFilter;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("transaction not found or not yet mined")]
    ReceiptUnavailable,
    #[error("transaction reverted")]
    Reverted,
    #[error("no token transfer from payer to house found")]
    NoMatchingTransfer,
    #[error("transfer amount {got} below required minimum {required}")]
    InsufficientTransfer { got: U256, required: U256 },
    #[error("ledger read timed out")]
    Timeout,
    #[error("ledger read failed: {0}")]
    Rpc(String),
}

/// Sole admission gate for stakes: confirms the referenced transaction
/// actually moved at least `required_minimum` of the staking token from
/// the payer to the house.
#[async_trait]
pub trait TransferVerifier: Send + Sync {
    async fn verify(
        &self,
        reference: TxHash,
        payer: Address,
        required_minimum: U256,
    ) -> Result<U256, VerifyError>;
}

pub struct ChainVerifier {
    provider: Arc<Provider<Http>>,
    token_address: Address,
    house_address: Address,
    receipt_timeout: Duration,
}

impl ChainVerifier {
    pub fn new(
        provider: Arc<Provider<Http>>,
        token_address: Address,
        house_address: Address,
        receipt_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            token_address,
            house_address,
            receipt_timeout,
        }
    }
}

#[async_trait]
impl TransferVerifier for ChainVerifier {
    async fn verify(
        &self,
        reference: TxHash,
        payer: Address,
        required_minimum: U256,
    ) -> Result<U256, VerifyError> {
        let receipt = tokio::time::timeout(
            self.receipt_timeout,
            self.provider.get_transaction_receipt(reference),
        )
        .await
        .map_err(|_| VerifyError::Timeout)?
        .map_err(|e| VerifyError::Rpc(e.to_string()))?
        .ok_or(VerifyError::ReceiptUnavailable)?;

        if receipt.status != Some(1.into()) {
            return Err(VerifyError::Reverted);
        }

        let amount =
            find_house_transfer(&receipt.logs, self.token_address, payer, self.house_address)
                .ok_or(VerifyError::NoMatchingTransfer)?;

        if amount < required_minimum {
            return Err(VerifyError::InsufficientTransfer {
                got: amount,
                required: required_minimum,
            });
        }

        Ok(amount)
    }
}

/// Scan receipt logs for a token `Transfer(payer -> house)` on the
/// expected contract. Undecodable logs are skipped, not fatal.
pub fn find_house_transfer(
    logs: &[Log],
    token: Address,
    payer: Address,
    house: Address,
) -> Option<U256> {
    for log in logs {
        if log.address != token {
            continue;
        }
        let raw = RawLog {
            topics: log.topics.clone(),
            data: log.data.to_vec(),
        };
        if let Ok(event) = TransferFilter::decode_log(&raw) {
            if event.from == payer && event.to == house {
                return Some(event.value);
            }
        }
    }
    None
}

/// Payment references are ledger transaction hashes; anything else is
/// rejected before touching the provider.
pub fn parse_reference(raw: &str) -> Option<TxHash> {
    let re = regex::Regex::new(r"^0x[0-9a-fA-F]{64}$").ok()?;
    if !re.is_match(raw) {
        return None;
    }
    raw.parse().ok()
}

pub fn parse_payer(raw: &str) -> Option<Address> {
    let re = regex::Regex::new(r"^0x[0-9a-fA-F]{40}$").ok()?;
    if !re.is_match(raw) {
        return None;
    }
    raw.parse().ok()
}
