use serde::Serialize;
use std::collections::BTreeMap;

use crate::data::types::Snapshot;

pub const OUTCOME_RADIANT: &str = "Radiant";
pub const OUTCOME_DIRE: &str = "Dire";
pub const OUTCOME_DRAW: &str = "Draw";

/// Fixed payout ratio for one outcome, kept as a rational so stake math
/// stays exact in token base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PayoutRatio {
    pub num: u32,
    pub den: u32,
}

impl PayoutRatio {
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    pub fn display(&self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }
}

pub type ResolveFn = fn(&Snapshot) -> Option<String>;

/// One market definition. The outcome set is the odds-map key set;
/// `resolve` maps a snapshot to one of those outcomes (or none, if the
/// market cannot be decided from this snapshot).
pub struct MarketDef {
    pub label: &'static str,
    pub settle_secs: u32,
    pub snapshot_secs: u32,
    pub odds: BTreeMap<String, PayoutRatio>,
    pub resolve: ResolveFn,
}

impl MarketDef {
    pub fn has_outcome(&self, outcome: &str) -> bool {
        self.odds.contains_key(outcome)
    }

    pub fn ratio_for(&self, outcome: &str) -> Option<PayoutRatio> {
        self.odds.get(outcome).copied()
    }
}

/// Canonical resolution rule: whichever score counter leads wins, a tie
/// resolves to the draw outcome.
pub fn resolve_score_leader(snapshot: &Snapshot) -> Option<String> {
    let score = snapshot.score;
    let outcome = if score.radiant > score.dire {
        OUTCOME_RADIANT
    } else if score.dire > score.radiant {
        OUTCOME_DIRE
    } else {
        OUTCOME_DRAW
    };
    Some(outcome.to_string())
}
