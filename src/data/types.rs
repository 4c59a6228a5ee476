use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw match entry from the upstream live feed. Every field is optional;
/// entries missing required data are dropped by the validity filter.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveGame {
    #[serde(default)]
    pub match_id: Option<u64>,
    #[serde(default)]
    pub players: Option<Vec<FeedPlayer>>,
    #[serde(default)]
    pub radiant_score: Option<u32>,
    #[serde(default)]
    pub dire_score: Option<u32>,
    #[serde(default)]
    pub game_time: Option<i64>,
    #[serde(default)]
    pub game_mode: Option<u32>,
    #[serde(default)]
    pub lobby_type: Option<u32>,
    #[serde(default)]
    pub average_mmr: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedPlayer {
    #[serde(default)]
    pub hero_id: Option<u32>,
    #[serde(default)]
    pub team: Option<u8>,
    #[serde(default)]
    pub party_id: Option<u64>,
}

impl LiveGame {
    /// Validity filter: a usable entry has a match id, a full ten-player
    /// roster, and both score counters.
    pub fn is_well_formed(&self) -> bool {
        self.match_id.is_some()
            && self.players.as_ref().map(|p| p.len() == 10).unwrap_or(false)
            && self.radiant_score.is_some()
            && self.dire_score.is_some()
    }

    pub fn heroes_for_team(&self, team: u8) -> Vec<u32> {
        self.players
            .as_ref()
            .map(|players| {
                players
                    .iter()
                    .filter(|p| p.team == Some(team))
                    .filter_map(|p| p.hero_id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScorePair {
    pub radiant: u32,
    pub dire: u32,
}

/// Immutable capture of a match's score once elapsed time crosses a
/// configured offset. Written at most once per (match, offset).
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Snapshot {
    pub score: ScorePair,
    pub captured_at_ms: i64,
}

/// Premade-group summary of a match's players (groups of two or more,
/// largest first, capped at six).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartyGroup {
    pub party_id: String,
    pub count: u32,
    pub radiant: u32,
    pub dire: u32,
}

pub fn summarize_parties(players: &[FeedPlayer]) -> Vec<PartyGroup> {
    let mut groups: BTreeMap<u64, PartyGroup> = BTreeMap::new();
    for p in players {
        let Some(party_id) = p.party_id else { continue };
        let group = groups.entry(party_id).or_insert_with(|| PartyGroup {
            party_id: party_id.to_string(),
            count: 0,
            radiant: 0,
            dire: 0,
        });
        group.count += 1;
        match p.team {
            Some(0) => group.radiant += 1,
            Some(1) => group.dire += 1,
            _ => {}
        }
    }

    let mut parties: Vec<PartyGroup> = groups.into_values().filter(|g| g.count >= 2).collect();
    parties.sort_by(|a, b| b.count.cmp(&a.count));
    parties.truncate(6);
    parties
}

/// Mutable per-match state owned by the tracker. The anchored start is
/// set exactly once, on first sighting; everything else refreshes on
/// every poll the match appears in.
#[derive(Debug, Clone)]
pub struct TrackedMatch {
    pub match_id: String,
    pub anchored_start_ms: i64,
    pub score: ScorePair,
    pub radiant_heroes: Vec<u32>,
    pub dire_heroes: Vec<u32>,
    pub game_mode: Option<u32>,
    pub lobby_type: Option<u32>,
    pub average_mmr: Option<u32>,
    pub parties: Vec<PartyGroup>,
    pub last_seen_ms: i64,
    pub snapshots: BTreeMap<u32, Snapshot>,
}

impl TrackedMatch {
    pub fn view(&self, elapsed_secs: i64) -> MatchView {
        MatchView {
            match_id: self.match_id.clone(),
            anchored_start_ms: self.anchored_start_ms,
            elapsed_secs,
            score: Some(self.score),
            radiant_heroes: self.radiant_heroes.clone(),
            dire_heroes: self.dire_heroes.clone(),
            game_mode: self.game_mode,
            lobby_type: self.lobby_type,
            average_mmr: self.average_mmr,
            parties: self.parties.clone(),
            last_seen_ms: Some(self.last_seen_ms),
        }
    }
}

/// Read-only view of a match as exposed to callers. `score` and
/// `last_seen_ms` are absent when the view was rebuilt from a stored
/// record after the match left the feed.
#[derive(Debug, Clone, Serialize)]
pub struct MatchView {
    pub match_id: String,
    pub anchored_start_ms: i64,
    pub elapsed_secs: i64,
    pub score: Option<ScorePair>,
    pub radiant_heroes: Vec<u32>,
    pub dire_heroes: Vec<u32>,
    pub game_mode: Option<u32>,
    pub lobby_type: Option<u32>,
    pub average_mmr: Option<u32>,
    pub parties: Vec<PartyGroup>,
    pub last_seen_ms: Option<i64>,
}

#[cfg(test)]
pub(crate) fn sample_game(match_id: u64, game_time: i64, radiant: u32, dire: u32) -> LiveGame {
    let players = (0..10)
        .map(|i| FeedPlayer {
            hero_id: Some(i + 1),
            team: Some(if i < 5 { 0 } else { 1 }),
            party_id: None,
        })
        .collect();

    LiveGame {
        match_id: Some(match_id),
        players: Some(players),
        radiant_score: Some(radiant),
        dire_score: Some(dire),
        game_time: Some(game_time),
        game_mode: Some(22),
        lobby_type: Some(7),
        average_mmr: Some(4200),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_filter() {
        let game = sample_game(1, 30, 0, 0);
        assert!(game.is_well_formed());

        let mut missing_score = sample_game(2, 30, 0, 0);
        missing_score.dire_score = None;
        assert!(!missing_score.is_well_formed());

        let mut short_roster = sample_game(3, 30, 0, 0);
        if let Some(players) = short_roster.players.as_mut() {
            players.pop();
        }
        assert!(!short_roster.is_well_formed());

        let mut no_id = sample_game(4, 30, 0, 0);
        no_id.match_id = None;
        assert!(!no_id.is_well_formed());
    }

    #[test]
    fn test_summarize_parties() {
        let mk = |team: u8, party_id: Option<u64>| FeedPlayer {
            hero_id: Some(1),
            team: Some(team),
            party_id,
        };

        let players = vec![
            mk(0, Some(7)),
            mk(0, Some(7)),
            mk(0, Some(7)),
            mk(1, Some(9)),
            mk(1, Some(9)),
            mk(1, Some(11)), // solo, dropped
            mk(0, None),
        ];

        let parties = summarize_parties(&players);
        assert_eq!(parties.len(), 2);
        // Largest group first
        assert_eq!(parties[0].party_id, "7");
        assert_eq!(parties[0].count, 3);
        assert_eq!(parties[0].radiant, 3);
        assert_eq!(parties[1].party_id, "9");
        assert_eq!(parties[1].dire, 2);
    }
}
