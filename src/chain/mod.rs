pub mod payout;
pub mod verifier;

use ethers::prelude::abigen;
use ethers::providers::Middleware;
use ethers::types::U256;
use tracing::warn;

abigen!(
    Erc20,
    r#"[
        event Transfer(address indexed from, address indexed to, uint256 value)
        function transfer(address to, uint256 amount) external returns (bool)
        function balanceOf(address owner) external view returns (uint256)
        function decimals() external view returns (uint8)
        function symbol() external view returns (string)
    ]"#
);

#[derive(Debug, Clone)]
pub struct TokenMeta {
    pub decimals: u8,
    pub symbol: String,
}

impl TokenMeta {
    /// One whole token in base units.
    pub fn one_token(&self) -> U256 {
        U256::exp10(usize::from(self.decimals))
    }
}

/// Read the staking token's metadata, falling back to defaults when the
/// node is unreachable at startup.
pub async fn probe_token_meta<M: Middleware + 'static>(token: &Erc20<M>) -> TokenMeta {
    let decimals = match token.decimals().call().await {
        Ok(d) => d,
        Err(e) => {
            warn!("Token decimals lookup failed, assuming 18: {}", e);
            18
        }
    };
    let symbol = match token.symbol().call().await {
        Ok(s) => s,
        Err(e) => {
            warn!("Token symbol lookup failed, assuming DBET: {}", e);
            "DBET".to_string()
        }
    };
    TokenMeta { decimals, symbol }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_token_scaling() {
        let meta = TokenMeta {
            decimals: 18,
            symbol: "DBET".to_string(),
        };
        assert_eq!(meta.one_token(), U256::exp10(18));

        let six = TokenMeta {
            decimals: 6,
            symbol: "USDC".to_string(),
        };
        assert_eq!(six.one_token(), U256::from(1_000_000u64));
    }
}
