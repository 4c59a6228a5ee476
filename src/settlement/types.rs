use chrono::{DateTime, Utc};
use ethers::types::{Address, TxHash, U256};
use serde::Serialize;
use thiserror::Error;

use crate::chain::verifier::VerifyError;
use crate::data::types::MatchView;

/// Wager lifecycle: PENDING is the only non-terminal state, and the only
/// legal transitions are PENDING -> WON | LOST | VOID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WagerStatus {
    Pending,
    Won,
    Lost,
    Void,
}

impl WagerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WagerStatus::Pending => "PENDING",
            WagerStatus::Won => "WON",
            WagerStatus::Lost => "LOST",
            WagerStatus::Void => "VOID",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(WagerStatus::Pending),
            "WON" => Some(WagerStatus::Won),
            "LOST" => Some(WagerStatus::Lost),
            "VOID" => Some(WagerStatus::Void),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, WagerStatus::Pending)
    }
}

impl std::fmt::Display for WagerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Wager {
    pub id: i64,
    pub match_id: String,
    pub market_key: String,
    pub outcome: String,
    pub payer: Address,
    pub payment_reference: TxHash,
    pub stake_units: U256,
    pub status: WagerStatus,
    pub created_at: DateTime<Utc>,
    pub result_annotation: Option<String>,
    pub payout_reference: Option<String>,
}

/// Admission input as received from the outer request layer, all fields
/// still untrusted strings.
#[derive(Debug, Clone)]
pub struct PlaceWagerRequest {
    pub match_id: String,
    pub market_key: String,
    pub outcome: String,
    pub payer: String,
    pub payment_reference: String,
}

/// A wager enriched with its match's live-or-last-known state.
#[derive(Debug, Clone, Serialize)]
pub struct WagerView {
    pub id: i64,
    pub match_id: String,
    pub market_key: String,
    pub outcome: String,
    pub payer: String,
    pub payment_reference: String,
    pub stake_units: String,
    pub status: WagerStatus,
    pub created_at: DateTime<Utc>,
    pub result_annotation: Option<String>,
    pub payout_reference: Option<String>,
    pub betting_closed: bool,
    pub match_state: Option<MatchView>,
}

/// Why an admission attempt was rejected. Validation and verification
/// failures are terminal for the attempt and always user-visible.
#[derive(Debug, Error)]
pub enum RejectReason {
    #[error("unknown market: {0}")]
    UnknownMarket(String),

    #[error("outcome {outcome} not offered by market {market}")]
    OutcomeNotInMarket { market: String, outcome: String },

    #[error("match {0} is not currently tracked")]
    MatchNotTracked(String),

    #[error("betting closed ({elapsed}s elapsed, closes at {close}s)")]
    BettingClosed { elapsed: i64, close: i64 },

    #[error("malformed payment reference")]
    MalformedReference,

    #[error("malformed payer address")]
    MalformedPayer,

    #[error("payment reference already used")]
    ReferenceAlreadyUsed,

    #[error("payment verification failed: {0}")]
    Verification(#[from] VerifyError),

    #[error("internal error: {0}")]
    Internal(String),
}
