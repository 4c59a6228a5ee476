use serde::Serialize;
use std::collections::BTreeMap;

use crate::markets::types::{
    resolve_score_leader, MarketDef, PayoutRatio, OUTCOME_DIRE, OUTCOME_DRAW, OUTCOME_RADIANT,
};

/// Immutable table of the markets the house offers. Built once at
/// startup, never mutated at runtime.
pub struct MarketCatalog {
    markets: BTreeMap<String, MarketDef>,
}

impl MarketCatalog {
    /// The shipped market set: score leader at 10 and 15 minutes, and
    /// the 30-minute match-winner proxy.
    pub fn standard() -> Self {
        let mut markets = BTreeMap::new();

        markets.insert(
            "MATCH_WINNER".to_string(),
            MarketDef {
                label: "Match Winner",
                settle_secs: 1800,
                snapshot_secs: 1800,
                odds: odds([
                    (OUTCOME_RADIANT, PayoutRatio::new(18, 10)),
                    (OUTCOME_DIRE, PayoutRatio::new(18, 10)),
                    (OUTCOME_DRAW, PayoutRatio::new(0, 1)),
                ]),
                resolve: resolve_score_leader,
            },
        );

        markets.insert(
            "KILLS_10MIN".to_string(),
            MarketDef {
                label: "Kills @10:00 (Leader / Draw)",
                settle_secs: 600,
                snapshot_secs: 600,
                odds: odds([
                    (OUTCOME_RADIANT, PayoutRatio::new(2, 1)),
                    (OUTCOME_DIRE, PayoutRatio::new(2, 1)),
                    (OUTCOME_DRAW, PayoutRatio::new(4, 1)),
                ]),
                resolve: resolve_score_leader,
            },
        );

        markets.insert(
            "KILLS_15MIN".to_string(),
            MarketDef {
                label: "Kills @15:00 (Leader / Draw)",
                settle_secs: 900,
                snapshot_secs: 900,
                odds: odds([
                    (OUTCOME_RADIANT, PayoutRatio::new(5, 2)),
                    (OUTCOME_DIRE, PayoutRatio::new(5, 2)),
                    (OUTCOME_DRAW, PayoutRatio::new(6, 1)),
                ]),
                resolve: resolve_score_leader,
            },
        );

        Self { markets }
    }

    pub fn get(&self, key: &str) -> Option<&MarketDef> {
        self.markets.get(key)
    }

    /// Union of all markets' snapshot offsets, sorted and deduplicated.
    /// This is the set of offsets the tracker captures at.
    pub fn snapshot_targets(&self) -> Vec<u32> {
        let mut targets: Vec<u32> = self.markets.values().map(|m| m.snapshot_secs).collect();
        targets.sort_unstable();
        targets.dedup();
        targets
    }

    pub fn view(&self) -> Vec<MarketSummary> {
        self.markets
            .iter()
            .map(|(key, def)| MarketSummary {
                key: key.clone(),
                label: def.label.to_string(),
                settle_secs: def.settle_secs,
                odds: def
                    .odds
                    .iter()
                    .map(|(outcome, ratio)| {
                        (
                            outcome.clone(),
                            OddsView {
                                num: ratio.num,
                                den: ratio.den,
                                display: ratio.display(),
                            },
                        )
                    })
                    .collect(),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketSummary {
    pub key: String,
    pub label: String,
    pub settle_secs: u32,
    pub odds: BTreeMap<String, OddsView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OddsView {
    pub num: u32,
    pub den: u32,
    pub display: f64,
}

fn odds<const N: usize>(entries: [(&str, PayoutRatio); N]) -> BTreeMap<String, PayoutRatio> {
    entries
        .into_iter()
        .map(|(outcome, ratio)| (outcome.to_string(), ratio))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_targets_sorted_dedup() {
        let catalog = MarketCatalog::standard();
        assert_eq!(catalog.snapshot_targets(), vec![600, 900, 1800]);
    }

    #[test]
    fn test_lookup_and_outcomes() {
        let catalog = MarketCatalog::standard();
        let market = catalog.get("KILLS_15MIN").unwrap();
        assert!(market.has_outcome("Radiant"));
        assert!(market.has_outcome("Draw"));
        assert!(!market.has_outcome("Roshan"));
        assert_eq!(market.ratio_for("Radiant"), Some(PayoutRatio::new(5, 2)));
        assert!(catalog.get("FIRST_BLOOD").is_none());
    }

    #[test]
    fn test_view_exposes_display_odds() {
        let catalog = MarketCatalog::standard();
        let view = catalog.view();
        let kills10 = view.iter().find(|m| m.key == "KILLS_10MIN").unwrap();
        assert_eq!(kills10.settle_secs, 600);
        assert_eq!(kills10.odds["Draw"].display, 4.0);
    }
}
