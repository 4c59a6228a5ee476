use dashmap::DashMap;
use rand::Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::data::feed::FeedClient;
use crate::data::now_ms;
use crate::data::types::{summarize_parties, LiveGame, MatchView, ScorePair, Snapshot, TrackedMatch};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub betting_close_secs: i64,
    pub stale_retention_secs: i64,
    pub match_ceiling_secs: i64,
    pub cooldown_base_secs: u64,
    pub cooldown_jitter_secs: u64,
}

/// Owns all mutable match state. Single writer: only `ingest_at` and
/// `prune_at` mutate the arena, every other component goes through the
/// query methods. The `_at` variants take an explicit clock so sweeps
/// and tests are deterministic.
pub struct MatchTracker {
    matches: DashMap<String, TrackedMatch>,
    snapshot_targets: Vec<u32>,
    cooldown_until_ms: AtomicI64,
    cfg: TrackerConfig,
}

impl MatchTracker {
    pub fn new(snapshot_targets: Vec<u32>, cfg: TrackerConfig) -> Self {
        Self {
            matches: DashMap::new(),
            snapshot_targets,
            cooldown_until_ms: AtomicI64::new(0),
            cfg,
        }
    }

    /// Full-state resync against one poll of the feed: anchor unseen
    /// matches, refresh seen ones, capture due snapshots. The feed's own
    /// elapsed counter is only trusted for anchoring; afterwards elapsed
    /// time is always wall clock minus anchor.
    pub fn ingest_at(&self, games: &[LiveGame], now_ms: i64) {
        for game in games {
            if !game.is_well_formed() {
                debug!("Dropping malformed feed entry: {:?}", game.match_id);
                continue;
            }
            let Some(raw_id) = game.match_id else { continue };
            let match_id = raw_id.to_string();

            let mut entry = self
                .matches
                .entry(match_id.clone())
                .or_insert_with(|| anchor_match(&match_id, game, now_ms));

            refresh_match(&mut entry, game, now_ms);

            let elapsed = (now_ms - entry.anchored_start_ms) / 1000;
            for &target in &self.snapshot_targets {
                if elapsed >= i64::from(target) && !entry.snapshots.contains_key(&target) {
                    let score = entry.score;
                    entry.snapshots.insert(
                        target,
                        Snapshot {
                            score,
                            captured_at_ms: now_ms,
                        },
                    );
                    info!(
                        "Snapshot captured: match={} offset={}s score={}-{}",
                        entry.match_id, target, entry.score.radiant, entry.score.dire
                    );
                }
            }
        }
    }

    /// Drop matches past the hard ceiling unconditionally, and matches
    /// absent from the feed beyond the stale window unless a pending
    /// wager still references them.
    pub fn prune_at(&self, now_ms: i64, referenced: &HashSet<String>) {
        let before = self.matches.len();
        self.matches.retain(|match_id, m| {
            let elapsed = (now_ms - m.anchored_start_ms) / 1000;
            if elapsed > self.cfg.match_ceiling_secs {
                return false;
            }
            let stale = now_ms - m.last_seen_ms > self.cfg.stale_retention_secs * 1000;
            !stale || referenced.contains(match_id)
        });
        let removed = before - self.matches.len();
        if removed > 0 {
            debug!("Pruned {} tracked matches", removed);
        }
    }

    pub fn elapsed_seconds(&self, match_id: &str) -> Option<i64> {
        self.elapsed_seconds_at(match_id, now_ms())
    }

    pub fn elapsed_seconds_at(&self, match_id: &str, now_ms: i64) -> Option<i64> {
        self.matches
            .get(match_id)
            .map(|m| (now_ms - m.anchored_start_ms) / 1000)
    }

    pub fn snapshot(&self, match_id: &str, offset_secs: u32) -> Option<Snapshot> {
        self.matches
            .get(match_id)
            .and_then(|m| m.snapshots.get(&offset_secs).copied())
    }

    pub fn match_view(&self, match_id: &str) -> Option<MatchView> {
        self.match_view_at(match_id, now_ms())
    }

    pub fn match_view_at(&self, match_id: &str, now_ms: i64) -> Option<MatchView> {
        self.matches
            .get(match_id)
            .map(|m| m.view((now_ms - m.anchored_start_ms) / 1000))
    }

    pub fn is_betting_open_at(&self, match_id: &str, now_ms: i64) -> bool {
        match self.elapsed_seconds_at(match_id, now_ms) {
            Some(elapsed) => elapsed <= self.cfg.betting_close_secs,
            None => false,
        }
    }

    /// Matches still open for betting, most advanced first.
    pub fn trackable_at(&self, now_ms: i64) -> Vec<MatchView> {
        let mut views: Vec<MatchView> = self
            .matches
            .iter()
            .map(|m| m.view((now_ms - m.anchored_start_ms) / 1000))
            .filter(|v| v.elapsed_secs <= self.cfg.betting_close_secs)
            .collect();
        views.sort_by(|a, b| b.elapsed_secs.cmp(&a.elapsed_secs));
        views
    }

    pub fn in_cooldown_at(&self, now_ms: i64) -> bool {
        now_ms < self.cooldown_until_ms.load(Ordering::Relaxed)
    }

    /// Suspend polling after a rate-limit response. The window is
    /// jittered so restarts across deployments don't resynchronize.
    pub fn start_cooldown_at(&self, now_ms: i64) {
        let jitter = rand::thread_rng().gen_range(0..=self.cfg.cooldown_jitter_secs);
        let until = now_ms + ((self.cfg.cooldown_base_secs + jitter) * 1000) as i64;
        self.cooldown_until_ms.store(until, Ordering::Relaxed);
        warn!(
            "Feed rate limited, polling suspended for {}s",
            self.cfg.cooldown_base_secs + jitter
        );
    }
}

fn anchor_match(match_id: &str, game: &LiveGame, now_ms: i64) -> TrackedMatch {
    let reported = game.game_time.unwrap_or(0).max(0);
    let anchored_start_ms = now_ms - reported * 1000;
    info!(
        "Tracking new match {} (reported elapsed {}s)",
        match_id, reported
    );
    TrackedMatch {
        match_id: match_id.to_string(),
        anchored_start_ms,
        score: ScorePair { radiant: 0, dire: 0 },
        radiant_heroes: Vec::new(),
        dire_heroes: Vec::new(),
        game_mode: None,
        lobby_type: None,
        average_mmr: None,
        parties: Vec::new(),
        last_seen_ms: now_ms,
        snapshots: BTreeMap::new(),
    }
}

fn refresh_match(entry: &mut TrackedMatch, game: &LiveGame, now_ms: i64) {
    entry.score = ScorePair {
        radiant: game.radiant_score.unwrap_or(entry.score.radiant),
        dire: game.dire_score.unwrap_or(entry.score.dire),
    };
    entry.radiant_heroes = game.heroes_for_team(0);
    entry.dire_heroes = game.heroes_for_team(1);
    entry.game_mode = game.game_mode;
    entry.lobby_type = game.lobby_type;
    entry.average_mmr = game.average_mmr;
    if let Some(players) = &game.players {
        entry.parties = summarize_parties(players);
    }
    entry.last_seen_ms = now_ms;
}

/// Jittered poll loop. Fetch failures are contained per poll; a
/// rate-limit response opens the cooldown window instead of retrying.
/// `referenced` supplies the match ids pending wagers still depend on,
/// so pruning retains them past the stale window.
pub async fn run_poll_loop<F>(
    tracker: Arc<MatchTracker>,
    feed: FeedClient,
    poll_interval_secs: u64,
    poll_jitter_secs: u64,
    referenced: F,
) where
    F: Fn() -> HashSet<String> + Send + 'static,
{
    loop {
        if !tracker.in_cooldown_at(now_ms()) {
            match feed.fetch_live().await {
                Ok(games) => {
                    tracker.ingest_at(&games, now_ms());
                    tracker.prune_at(now_ms(), &referenced());
                }
                Err(e) if e.is_rate_limit() => tracker.start_cooldown_at(now_ms()),
                Err(e) => warn!("Feed poll failed: {}", e),
            }
        }

        let jitter = rand::thread_rng().gen_range(0..=poll_jitter_secs);
        tokio::time::sleep(Duration::from_secs(poll_interval_secs + jitter)).await;
    }
}
