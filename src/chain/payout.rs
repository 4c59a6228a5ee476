use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TxHash, U256};
use std::sync::Arc;
use thiserror::Error;

use crate::chain::Erc20;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayoutError {
    #[error("house key not configured")]
    HouseKeyMissing,
    #[error("house token balance too low")]
    InsufficientHouseBalance,
    #[error("payout submission failed: {0}")]
    Submission(String),
}

/// On-ledger payout boundary. Failures are reported, never retried here:
/// a blind resubmit risks paying a winner twice.
#[async_trait]
pub trait PayoutIssuer: Send + Sync {
    async fn pay(&self, to: Address, amount: U256) -> Result<TxHash, PayoutError>;
}

type HouseClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// House-funded token wallet. Without a configured key a throwaway
/// wallet is generated so verification still has a receiving address,
/// and payouts fail with `HouseKeyMissing`.
pub struct HouseWallet {
    token: Erc20<HouseClient>,
    address: Address,
    funded: bool,
}

impl HouseWallet {
    pub fn new(
        provider: Provider<Http>,
        chain_id: u64,
        token_address: Address,
        house_private_key: Option<&str>,
    ) -> Result<Self> {
        let (wallet, funded) = match house_private_key {
            Some(key) => {
                let wallet: LocalWallet =
                    key.parse().context("Invalid HOUSE_PRIVATE_KEY")?;
                (wallet, true)
            }
            None => (LocalWallet::new(&mut rand::thread_rng()), false),
        };
        let wallet = wallet.with_chain_id(chain_id);
        let address = wallet.address();

        let client = Arc::new(SignerMiddleware::new(provider, wallet));
        let token = Erc20::new(token_address, client);

        Ok(Self {
            token,
            address,
            funded,
        })
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn is_funded(&self) -> bool {
        self.funded
    }
}

#[async_trait]
impl PayoutIssuer for HouseWallet {
    async fn pay(&self, to: Address, amount: U256) -> Result<TxHash, PayoutError> {
        if !self.funded {
            return Err(PayoutError::HouseKeyMissing);
        }

        let balance = self
            .token
            .balance_of(self.address)
            .call()
            .await
            .map_err(|e| PayoutError::Submission(e.to_string()))?;
        if balance < amount {
            return Err(PayoutError::InsufficientHouseBalance);
        }

        let call = self.token.transfer(to, amount);
        let pending = call
            .send()
            .await
            .map_err(|e| PayoutError::Submission(e.to_string()))?;

        Ok(pending.tx_hash())
    }
}
