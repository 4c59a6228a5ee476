use ethers::types::U256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::chain::payout::PayoutIssuer;
use crate::chain::verifier::{parse_payer, parse_reference, TransferVerifier};
use crate::data::tracker::MatchTracker;
use crate::data::types::MatchView;
use crate::data::now_ms;
use crate::markets::catalog::MarketCatalog;
use crate::markets::types::PayoutRatio;
use crate::monitoring::logger::CsvLogger;
use crate::settlement::store::{InsertError, NewWager, StoredMatch, WagerStore};
use crate::settlement::types::{
    PlaceWagerRequest, RejectReason, Wager, WagerStatus, WagerView,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub betting_close_secs: i64,
    pub void_grace_secs: i64,
    pub min_stake_units: U256,
}

/// Orchestrates the wager lifecycle: admission against verified
/// payments, and the periodic sweep that moves PENDING wagers to their
/// terminal state.
pub struct SettlementEngine {
    store: Arc<WagerStore>,
    tracker: Arc<MatchTracker>,
    catalog: Arc<MarketCatalog>,
    verifier: Arc<dyn TransferVerifier>,
    payout: Arc<dyn PayoutIssuer>,
    audit: Option<CsvLogger>,
    cfg: EngineConfig,
}

impl SettlementEngine {
    pub fn new(
        store: Arc<WagerStore>,
        tracker: Arc<MatchTracker>,
        catalog: Arc<MarketCatalog>,
        verifier: Arc<dyn TransferVerifier>,
        payout: Arc<dyn PayoutIssuer>,
        audit: Option<CsvLogger>,
        cfg: EngineConfig,
    ) -> Self {
        Self {
            store,
            tracker,
            catalog,
            verifier,
            payout,
            audit,
            cfg,
        }
    }

    pub async fn place_wager(&self, req: PlaceWagerRequest) -> Result<WagerView, RejectReason> {
        self.place_wager_at(req, now_ms()).await
    }

    /// Admission: validate against the catalog and the match clock,
    /// verify the claimed payment on the ledger, then persist PENDING.
    /// The unique insert is the final replay gate.
    pub async fn place_wager_at(
        &self,
        req: PlaceWagerRequest,
        now_ms: i64,
    ) -> Result<WagerView, RejectReason> {
        let market = self
            .catalog
            .get(&req.market_key)
            .ok_or_else(|| RejectReason::UnknownMarket(req.market_key.clone()))?;

        if !market.has_outcome(&req.outcome) {
            return Err(RejectReason::OutcomeNotInMarket {
                market: req.market_key.clone(),
                outcome: req.outcome.clone(),
            });
        }

        let elapsed = self
            .tracker
            .elapsed_seconds_at(&req.match_id, now_ms)
            .ok_or_else(|| RejectReason::MatchNotTracked(req.match_id.clone()))?;
        if elapsed > self.cfg.betting_close_secs {
            return Err(RejectReason::BettingClosed {
                elapsed,
                close: self.cfg.betting_close_secs,
            });
        }

        let reference =
            parse_reference(&req.payment_reference).ok_or(RejectReason::MalformedReference)?;
        let payer = parse_payer(&req.payer).ok_or(RejectReason::MalformedPayer)?;

        // Early rejection with a friendly reason; the insert below is
        // what actually closes the race.
        if self
            .store
            .reference_used(reference)
            .map_err(internal)?
        {
            return Err(RejectReason::ReferenceAlreadyUsed);
        }

        let stake = self
            .verifier
            .verify(reference, payer, self.cfg.min_stake_units)
            .await?;

        // Persist the match record so settlement still has an anchor if
        // the match drops off the feed (or the process restarts).
        if let Some(view) = self.tracker.match_view_at(&req.match_id, now_ms) {
            self.store
                .upsert_match(&stored_from_view(&view))
                .map_err(internal)?;
        }

        let new_wager = NewWager {
            match_id: req.match_id.clone(),
            market_key: req.market_key.clone(),
            outcome: req.outcome.clone(),
            payer,
            payment_reference: reference,
            stake_units: stake,
        };
        let id = match self.store.insert_wager(&new_wager) {
            Ok(id) => id,
            Err(InsertError::DuplicateReference) => return Err(RejectReason::ReferenceAlreadyUsed),
            Err(InsertError::Db(e)) => return Err(internal(e)),
        };

        info!(
            "Wager {} admitted: match={} market={} outcome={} stake={}",
            id, req.match_id, req.market_key, req.outcome, stake
        );

        let wager = self.wager_by_id(id).map_err(internal)?;
        self.audit_event("ADMITTED", &wager, "");
        Ok(self.view_for(wager, now_ms))
    }

    pub async fn sweep(&self) -> anyhow::Result<()> {
        self.sweep_at(now_ms()).await
    }

    /// One settlement pass over every PENDING wager. Failures on one
    /// wager never block the rest.
    pub async fn sweep_at(&self, now_ms: i64) -> anyhow::Result<()> {
        let pending = self.store.pending_wagers()?;
        for wager in pending {
            if let Err(e) = self.settle_wager(&wager, now_ms).await {
                warn!("Settlement of wager {} failed: {:#}", wager.id, e);
            }
        }
        Ok(())
    }

    async fn settle_wager(&self, wager: &Wager, now_ms: i64) -> anyhow::Result<()> {
        let Some(market) = self.catalog.get(&wager.market_key) else {
            // Catalog drift across deploys; the stake cannot be resolved.
            if self
                .store
                .transition(wager.id, WagerStatus::Void, Some("market no longer offered"))?
            {
                warn!("Wager {} voided: market {} gone", wager.id, wager.market_key);
                self.audit_event("VOIDED", wager, "market no longer offered");
            }
            return Ok(());
        };

        let Some(elapsed) = self.elapsed_for(&wager.match_id, now_ms)? else {
            return Ok(());
        };
        if elapsed < i64::from(market.settle_secs) {
            return Ok(()); // not yet due
        }

        let Some(snapshot) = self.tracker.snapshot(&wager.match_id, market.snapshot_secs) else {
            // Upstream data gap: wait out the grace window, then give up.
            if elapsed > i64::from(market.settle_secs) + self.cfg.void_grace_secs {
                if self
                    .store
                    .transition(wager.id, WagerStatus::Void, Some("no snapshot within grace window"))?
                {
                    info!("Wager {} voided: no snapshot for match {}", wager.id, wager.match_id);
                    self.audit_event("VOIDED", wager, "no snapshot within grace window");
                }
            }
            return Ok(());
        };

        let Some(outcome) = (market.resolve)(&snapshot) else {
            return Ok(()); // unresolved from this snapshot; retry next sweep
        };

        let annotation = format!(
            "{} {}-{} @{}s",
            outcome, snapshot.score.radiant, snapshot.score.dire, market.snapshot_secs
        );

        if outcome != wager.outcome {
            if self
                .store
                .transition(wager.id, WagerStatus::Lost, Some(&annotation))?
            {
                info!("Wager {} lost ({})", wager.id, annotation);
                self.audit_event("LOST", wager, &annotation);
            }
            return Ok(());
        }

        // Transition first: once WON, a payout failure must not reopen
        // the wager, and a concurrent settle of the same wager must not
        // pay twice.
        if !self
            .store
            .transition(wager.id, WagerStatus::Won, Some(&annotation))?
        {
            return Ok(());
        }

        let Some(ratio) = market.ratio_for(&wager.outcome) else {
            warn!("Wager {} won but outcome {} has no ratio", wager.id, wager.outcome);
            return Ok(());
        };
        let payout = compute_payout(wager.stake_units, ratio);
        info!("Wager {} won ({}), paying {} units", wager.id, annotation, payout);
        self.audit_event("WON", wager, &annotation);

        match self.payout.pay(wager.payer, payout).await {
            Ok(tx) => {
                self.store
                    .set_payout_reference(wager.id, &format!("{:?}", tx))?;
            }
            Err(e) => {
                // Operational alert; reconciliation is manual by design.
                error!(
                    "Payout of {} units for wager {} failed, manual reconciliation required: {}",
                    payout, wager.id, e
                );
                self.store
                    .set_payout_reference(wager.id, &format!("FAILED: {}", e))?;
                self.audit_event("PAYOUT_FAILED", wager, &e.to_string());
            }
        }

        Ok(())
    }

    /// Matches currently open for betting.
    pub fn trackable_matches(&self) -> Vec<MatchView> {
        self.tracker.trackable_at(now_ms())
    }

    /// Every wager ever admitted, enriched with its match's
    /// live-or-last-known state.
    pub fn list_wagers(&self) -> anyhow::Result<Vec<WagerView>> {
        let now = now_ms();
        let wagers = self.store.list_wagers()?;
        Ok(wagers
            .into_iter()
            .map(|w| self.view_for(w, now))
            .collect())
    }

    fn view_for(&self, wager: Wager, now_ms: i64) -> WagerView {
        let match_state = self
            .tracker
            .match_view_at(&wager.match_id, now_ms)
            .or_else(|| self.stored_view(&wager.match_id, now_ms));
        let betting_closed = match match_state.as_ref() {
            Some(view) => view.elapsed_secs > self.cfg.betting_close_secs,
            None => true,
        };

        WagerView {
            id: wager.id,
            match_id: wager.match_id,
            market_key: wager.market_key,
            outcome: wager.outcome,
            payer: format!("{:?}", wager.payer),
            payment_reference: format!("{:?}", wager.payment_reference),
            stake_units: wager.stake_units.to_string(),
            status: wager.status,
            created_at: wager.created_at,
            result_annotation: wager.result_annotation,
            payout_reference: wager.payout_reference,
            betting_closed,
            match_state,
        }
    }

    fn stored_view(&self, match_id: &str, now_ms: i64) -> Option<MatchView> {
        let m = self.store.get_match(match_id).ok().flatten()?;
        Some(MatchView {
            match_id: m.match_id,
            anchored_start_ms: m.anchored_start_ms,
            elapsed_secs: (now_ms - m.anchored_start_ms) / 1000,
            score: Some(crate::data::types::ScorePair {
                radiant: m.radiant_score,
                dire: m.dire_score,
            }),
            radiant_heroes: m.radiant_heroes,
            dire_heroes: m.dire_heroes,
            game_mode: None,
            lobby_type: None,
            average_mmr: None,
            parties: Vec::new(),
            last_seen_ms: Some(m.last_seen_ms),
        })
    }

    /// Elapsed seconds from the live tracker, falling back to the stored
    /// anchor once the match has left the feed.
    fn elapsed_for(&self, match_id: &str, now_ms: i64) -> anyhow::Result<Option<i64>> {
        if let Some(elapsed) = self.tracker.elapsed_seconds_at(match_id, now_ms) {
            return Ok(Some(elapsed));
        }
        Ok(self
            .store
            .get_match(match_id)?
            .map(|m| (now_ms - m.anchored_start_ms) / 1000))
    }

    fn wager_by_id(&self, id: i64) -> anyhow::Result<Wager> {
        self.store
            .list_wagers()?
            .into_iter()
            .find(|w| w.id == id)
            .ok_or_else(|| anyhow::anyhow!("wager {} vanished after insert", id))
    }

    fn audit_event(&self, event: &str, wager: &Wager, detail: &str) {
        if let Some(audit) = &self.audit {
            if let Err(e) = audit.log_wager(event, wager, detail) {
                warn!("Audit log write failed: {}", e);
            }
        }
    }

    /// Fixed-period sweep loop.
    pub async fn run(self: Arc<Self>, sweep_interval: Duration) {
        loop {
            tokio::time::sleep(sweep_interval).await;
            if let Err(e) = self.sweep().await {
                error!("Settlement sweep failed: {:#}", e);
            }
        }
    }
}

/// Winner payout in token base units: stake × num / den, truncating.
pub fn compute_payout(stake: U256, ratio: PayoutRatio) -> U256 {
    stake * U256::from(ratio.num) / U256::from(ratio.den)
}

fn internal<E: std::fmt::Display>(e: E) -> RejectReason {
    RejectReason::Internal(e.to_string())
}

fn stored_from_view(view: &MatchView) -> StoredMatch {
    StoredMatch {
        match_id: view.match_id.clone(),
        anchored_start_ms: view.anchored_start_ms,
        radiant_score: view.score.map(|s| s.radiant).unwrap_or(0),
        dire_score: view.score.map(|s| s.dire).unwrap_or(0),
        radiant_heroes: view.radiant_heroes.clone(),
        dire_heroes: view.dire_heroes.clone(),
        last_seen_ms: view.last_seen_ms.unwrap_or(view.anchored_start_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ethers::types::{Address, TxHash};
    use std::sync::Mutex;

    use crate::chain::verifier::VerifyError;
    use crate::chain::payout::PayoutError;
    use crate::data::tracker::TrackerConfig;
    use crate::data::types::sample_game;

    struct FakeVerifier {
        amount: U256,
    }

    #[async_trait]
    impl TransferVerifier for FakeVerifier {
        async fn verify(
            &self,
            _reference: TxHash,
            _payer: Address,
            required_minimum: U256,
        ) -> Result<U256, VerifyError> {
            if self.amount < required_minimum {
                return Err(VerifyError::InsufficientTransfer {
                    got: self.amount,
                    required: required_minimum,
                });
            }
            Ok(self.amount)
        }
    }

    #[derive(Default)]
    struct RecordingPayout {
        calls: Mutex<Vec<(Address, U256)>>,
        fail: Option<PayoutError>,
    }

    #[async_trait]
    impl PayoutIssuer for RecordingPayout {
        async fn pay(&self, to: Address, amount: U256) -> Result<TxHash, PayoutError> {
            if let Some(e) = &self.fail {
                return Err(e.clone());
            }
            self.calls
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push((to, amount));
            Ok(TxHash::from([0xAB; 32]))
        }
    }

    const T0: i64 = 1_700_000_000_000;

    fn payer_str(byte: u8) -> String {
        format!("{:?}", Address::from([byte; 20]))
    }

    fn reference_str(byte: u8) -> String {
        format!("{:?}", TxHash::from([byte; 32]))
    }

    fn request(match_id: &str, market: &str, outcome: &str, payer: u8, reference: u8) -> PlaceWagerRequest {
        PlaceWagerRequest {
            match_id: match_id.to_string(),
            market_key: market.to_string(),
            outcome: outcome.to_string(),
            payer: payer_str(payer),
            payment_reference: reference_str(reference),
        }
    }

    fn build_engine(
        stake: u64,
        min_stake: u64,
        payout: Arc<RecordingPayout>,
    ) -> (Arc<SettlementEngine>, Arc<WagerStore>, Arc<MatchTracker>) {
        let store = Arc::new(WagerStore::open_in_memory().unwrap());
        let catalog = Arc::new(MarketCatalog::standard());
        let tracker = Arc::new(MatchTracker::new(
            catalog.snapshot_targets(),
            TrackerConfig {
                betting_close_secs: 300,
                stale_retention_secs: 900,
                match_ceiling_secs: 10_800,
                cooldown_base_secs: 60,
                cooldown_jitter_secs: 60,
            },
        ));
        let engine = Arc::new(SettlementEngine::new(
            store.clone(),
            tracker.clone(),
            catalog,
            Arc::new(FakeVerifier {
                amount: U256::from(stake),
            }),
            payout,
            None,
            EngineConfig {
                betting_close_secs: 300,
                void_grace_secs: 18_000,
                min_stake_units: U256::from(min_stake),
            },
        ));
        (engine, store, tracker)
    }

    #[test]
    fn test_payout_arithmetic() {
        let ratio = PayoutRatio::new(5, 2);
        assert_eq!(compute_payout(U256::from(100u64), ratio), U256::from(250u64));
        // Integer truncation: 7 * 5 / 2 = 17, not 17.5
        assert_eq!(compute_payout(U256::from(7u64), ratio), U256::from(17u64));
        assert_eq!(
            compute_payout(U256::from(100u64), PayoutRatio::new(0, 1)),
            U256::zero()
        );
    }

    #[tokio::test]
    async fn test_admission_validation() {
        let payout = Arc::new(RecordingPayout::default());
        let (engine, store, tracker) = build_engine(1_000, 100, payout);
        tracker.ingest_at(&[sample_game(42, 30, 0, 0)], T0);

        let err = engine
            .place_wager_at(request("42", "FIRST_BLOOD", "Radiant", 1, 1), T0)
            .await
            .unwrap_err();
        assert!(matches!(err, RejectReason::UnknownMarket(_)));

        let err = engine
            .place_wager_at(request("42", "KILLS_10MIN", "Roshan", 1, 1), T0)
            .await
            .unwrap_err();
        assert!(matches!(err, RejectReason::OutcomeNotInMarket { .. }));

        let err = engine
            .place_wager_at(request("nope", "KILLS_10MIN", "Radiant", 1, 1), T0)
            .await
            .unwrap_err();
        assert!(matches!(err, RejectReason::MatchNotTracked(_)));

        let mut bad_ref = request("42", "KILLS_10MIN", "Radiant", 1, 1);
        bad_ref.payment_reference = "0x1234".to_string();
        let err = engine.place_wager_at(bad_ref, T0).await.unwrap_err();
        assert!(matches!(err, RejectReason::MalformedReference));

        let mut bad_payer = request("42", "KILLS_10MIN", "Radiant", 1, 1);
        bad_payer.payer = "grandma".to_string();
        let err = engine.place_wager_at(bad_payer, T0).await.unwrap_err();
        assert!(matches!(err, RejectReason::MalformedPayer));

        assert_eq!(store.list_wagers().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_betting_closed_rejection() {
        let payout = Arc::new(RecordingPayout::default());
        let (engine, store, tracker) = build_engine(1_000, 100, payout);
        tracker.ingest_at(&[sample_game(42, 301, 0, 0)], T0);

        let err = engine
            .place_wager_at(request("42", "KILLS_10MIN", "Radiant", 1, 1), T0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RejectReason::BettingClosed { elapsed: 301, close: 300 }
        ));
        assert_eq!(store.list_wagers().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_replayed_reference_rejected() {
        let payout = Arc::new(RecordingPayout::default());
        let (engine, store, tracker) = build_engine(1_000, 100, payout);
        tracker.ingest_at(&[sample_game(42, 30, 0, 0), sample_game(43, 40, 0, 0)], T0);

        engine
            .place_wager_at(request("42", "KILLS_10MIN", "Radiant", 1, 1), T0)
            .await
            .unwrap();
        let err = engine
            .place_wager_at(request("43", "KILLS_15MIN", "Dire", 2, 1), T0)
            .await
            .unwrap_err();
        assert!(matches!(err, RejectReason::ReferenceAlreadyUsed));
        assert_eq!(store.list_wagers().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stake_below_minimum_rejected() {
        let payout = Arc::new(RecordingPayout::default());
        let (engine, store, tracker) = build_engine(50, 1_000, payout);
        tracker.ingest_at(&[sample_game(42, 30, 0, 0)], T0);

        let err = engine
            .place_wager_at(request("42", "KILLS_10MIN", "Radiant", 1, 1), T0)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RejectReason::Verification(VerifyError::InsufficientTransfer { .. })
        ));
        assert_eq!(store.list_wagers().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_anchor_then_settle_exactly_once() {
        let payout = Arc::new(RecordingPayout::default());
        let (engine, store, tracker) = build_engine(1_000, 100, payout.clone());

        // First sighting reports 30s elapsed: start anchors to now-30s.
        tracker.ingest_at(&[sample_game(42, 30, 0, 0)], T0);

        let won = engine
            .place_wager_at(request("42", "KILLS_10MIN", "Radiant", 1, 1), T0)
            .await
            .unwrap();
        let lost = engine
            .place_wager_at(request("42", "KILLS_10MIN", "Dire", 2, 2), T0)
            .await
            .unwrap();
        assert_eq!(
            won.match_state.as_ref().unwrap().anchored_start_ms,
            T0 - 30_000
        );
        assert!(!won.betting_closed);

        // 570 simulated seconds later the match hits 600s elapsed; this
        // poll captures the 600s snapshot and the sweep settles on it.
        let t1 = T0 + 570_000;
        tracker.ingest_at(&[sample_game(42, 0, 10, 4)], t1);
        engine.sweep_at(t1).await.unwrap();

        let wagers = store.list_wagers().unwrap();
        let won_row = wagers.iter().find(|w| w.id == won.id).unwrap();
        let lost_row = wagers.iter().find(|w| w.id == lost.id).unwrap();
        assert_eq!(won_row.status, WagerStatus::Won);
        assert_eq!(won_row.result_annotation.as_deref(), Some("Radiant 10-4 @600s"));
        assert_eq!(lost_row.status, WagerStatus::Lost);
        assert!(lost_row.payout_reference.is_none());

        // 1000 stake at 2/1
        {
            let calls = payout.calls.lock().unwrap();
            assert_eq!(calls.len(), 1);
            assert_eq!(calls[0].1, U256::from(2_000u64));
        }

        // Sweeping again is a no-op: terminal states are immutable and
        // nothing is paid twice.
        engine.sweep_at(t1 + 60_000).await.unwrap();
        let wagers = store.list_wagers().unwrap();
        assert_eq!(wagers.iter().find(|w| w.id == won.id).unwrap().status, WagerStatus::Won);
        assert_eq!(payout.calls.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_not_due_wagers_skipped() {
        let payout = Arc::new(RecordingPayout::default());
        let (engine, store, tracker) = build_engine(1_000, 100, payout);
        tracker.ingest_at(&[sample_game(42, 30, 0, 0)], T0);
        engine
            .place_wager_at(request("42", "KILLS_15MIN", "Radiant", 1, 1), T0)
            .await
            .unwrap();

        // 600s in, but the market settles at 900s.
        let t1 = T0 + 570_000;
        tracker.ingest_at(&[sample_game(42, 0, 5, 5)], t1);
        engine.sweep_at(t1).await.unwrap();
        assert_eq!(store.pending_wagers().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_vanished_match_voids_after_grace() {
        let payout = Arc::new(RecordingPayout::default());
        let (engine, store, tracker) = build_engine(1_000, 100, payout.clone());
        tracker.ingest_at(&[sample_game(42, 30, 0, 0)], T0);
        let placed = engine
            .place_wager_at(request("42", "KILLS_10MIN", "Radiant", 1, 1), T0)
            .await
            .unwrap();

        // The match vanishes from the feed, but a pending wager
        // references it: retained past the stale window.
        let t_stale = T0 + 901_000;
        tracker.prune_at(t_stale, &store.match_ids_with_pending().unwrap());
        assert!(tracker.elapsed_seconds_at("42", t_stale).is_some());

        // Past due but inside the grace window: stays pending.
        engine.sweep_at(T0 + 1_000_000).await.unwrap();
        assert_eq!(store.pending_wagers().unwrap().len(), 1);

        // No snapshot ever arrives by settle offset + grace: voided.
        let t_void = T0 + (600 + 18_000 + 60) * 1000;
        engine.sweep_at(t_void).await.unwrap();
        let wagers = store.list_wagers().unwrap();
        assert_eq!(wagers[0].id, placed.id);
        assert_eq!(wagers[0].status, WagerStatus::Void);
        assert!(payout.calls.lock().unwrap().is_empty());

        // With no pending reference left the match is prunable.
        tracker.prune_at(t_void, &store.match_ids_with_pending().unwrap());
        assert!(tracker.elapsed_seconds_at("42", t_void).is_none());
    }

    #[tokio::test]
    async fn test_void_uses_stored_anchor_when_pruned() {
        let payout = Arc::new(RecordingPayout::default());
        let (engine, store, tracker) = build_engine(1_000, 100, payout);
        tracker.ingest_at(&[sample_game(42, 30, 0, 0)], T0);
        engine
            .place_wager_at(request("42", "KILLS_10MIN", "Radiant", 1, 1), T0)
            .await
            .unwrap();

        // Hard ceiling removes the match regardless of references; the
        // stored anchor still drives the wager to a terminal state.
        let t_gone = T0 + 10_801_000;
        tracker.prune_at(t_gone, &store.match_ids_with_pending().unwrap());
        assert!(tracker.elapsed_seconds_at("42", t_gone).is_none());

        let t_void = T0 + (600 + 18_000 + 60) * 1000;
        engine.sweep_at(t_void).await.unwrap();
        assert_eq!(store.list_wagers().unwrap()[0].status, WagerStatus::Void);
    }

    #[tokio::test]
    async fn test_payout_failure_keeps_won_status() {
        let payout = Arc::new(RecordingPayout {
            calls: Mutex::new(Vec::new()),
            fail: Some(PayoutError::InsufficientHouseBalance),
        });
        let (engine, store, tracker) = build_engine(1_000, 100, payout);
        tracker.ingest_at(&[sample_game(42, 30, 0, 0)], T0);
        engine
            .place_wager_at(request("42", "KILLS_10MIN", "Radiant", 1, 1), T0)
            .await
            .unwrap();

        let t1 = T0 + 570_000;
        tracker.ingest_at(&[sample_game(42, 0, 10, 4)], t1);
        engine.sweep_at(t1).await.unwrap();

        let wagers = store.list_wagers().unwrap();
        assert_eq!(wagers[0].status, WagerStatus::Won);
        let marker = wagers[0].payout_reference.as_deref().unwrap();
        assert!(marker.starts_with("FAILED:"), "got {marker}");

        // The failure marker is terminal for the sweep too.
        engine.sweep_at(t1 + 60_000).await.unwrap();
        assert_eq!(store.list_wagers().unwrap()[0].status, WagerStatus::Won);
    }

    #[tokio::test]
    async fn test_draw_resolution_pays_draw_backers() {
        let payout = Arc::new(RecordingPayout::default());
        let (engine, store, tracker) = build_engine(1_000, 100, payout.clone());
        tracker.ingest_at(&[sample_game(42, 30, 0, 0)], T0);
        engine
            .place_wager_at(request("42", "KILLS_10MIN", "Draw", 1, 1), T0)
            .await
            .unwrap();

        let t1 = T0 + 570_000;
        tracker.ingest_at(&[sample_game(42, 0, 3, 3)], t1);
        engine.sweep_at(t1).await.unwrap();

        assert_eq!(store.list_wagers().unwrap()[0].status, WagerStatus::Won);
        // 1000 stake at 4/1
        assert_eq!(payout.calls.lock().unwrap()[0].1, U256::from(4_000u64));
    }

    #[tokio::test]
    async fn test_wager_views_enriched_with_match_state() {
        let payout = Arc::new(RecordingPayout::default());
        let (engine, _store, tracker) = build_engine(1_000, 100, payout);
        tracker.ingest_at(&[sample_game(42, 30, 2, 1)], T0);
        engine
            .place_wager_at(request("42", "KILLS_10MIN", "Radiant", 1, 1), T0)
            .await
            .unwrap();

        let views = engine.list_wagers().unwrap();
        assert_eq!(views.len(), 1);
        let state = views[0].match_state.as_ref().unwrap();
        assert_eq!(state.match_id, "42");
        assert_eq!(state.score.unwrap().radiant, 2);
    }
}
