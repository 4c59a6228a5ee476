use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use ethers::types::{TxHash, U256};
use rusqlite::{params, Connection, ErrorCode};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::settlement::types::{Wager, WagerStatus};

/// Last-known state of a match a wager references, persisted at
/// admission so settlement survives the match leaving the feed (and
/// process restarts). The anchored start is never overwritten.
#[derive(Debug, Clone)]
pub struct StoredMatch {
    pub match_id: String,
    pub anchored_start_ms: i64,
    pub radiant_score: u32,
    pub dire_score: u32,
    pub radiant_heroes: Vec<u32>,
    pub dire_heroes: Vec<u32>,
    pub last_seen_ms: i64,
}

#[derive(Debug, Error)]
pub enum InsertError {
    #[error("payment reference already used")]
    DuplicateReference,
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

/// SQLite-backed wager and match store. The UNIQUE constraint on
/// `payment_reference` is the replay-protection boundary: consuming a
/// reference and creating its wager is one insert. The connection sits
/// behind a mutex so admission and the settlement sweep serialize.
pub struct WagerStore {
    conn: Mutex<Connection>,
}

impl WagerStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open database: {}", db_path))?;
        Self::init(conn)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        // The schema's FOREIGN KEY clause is advisory: the code relies on
        // SQLite's standard default of no enforcement (a wager may be
        // admitted before its match is anchored). Some SQLite builds are
        // compiled with SQLITE_DEFAULT_FOREIGN_KEYS=1, so pin the default
        // explicitly to keep behavior identical across environments.
        conn.pragma_update(None, "foreign_keys", false)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                match_id TEXT PRIMARY KEY,
                anchored_start_ms INTEGER NOT NULL,
                radiant_score INTEGER NOT NULL DEFAULT 0,
                dire_score INTEGER NOT NULL DEFAULT 0,
                radiant_heroes TEXT,
                dire_heroes TEXT,
                last_seen_ms INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS wagers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                match_id TEXT NOT NULL,
                market_key TEXT NOT NULL,
                outcome TEXT NOT NULL,
                payer TEXT NOT NULL,
                payment_reference TEXT NOT NULL UNIQUE,
                stake_units TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING',
                created_at TIMESTAMP NOT NULL,
                result_annotation TEXT,
                payout_reference TEXT,
                FOREIGN KEY(match_id) REFERENCES matches(match_id)
            );

            CREATE INDEX IF NOT EXISTS idx_wagers_status ON wagers(status);
            CREATE INDEX IF NOT EXISTS idx_wagers_match_id ON wagers(match_id);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert or refresh a match record. Live fields update, the
    /// anchored start stays whatever the first insert wrote.
    pub fn upsert_match(&self, m: &StoredMatch) -> Result<()> {
        self.conn().execute(
            "INSERT INTO matches (match_id, anchored_start_ms, radiant_score, dire_score, radiant_heroes, dire_heroes, last_seen_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(match_id) DO UPDATE SET
                 radiant_score = excluded.radiant_score,
                 dire_score = excluded.dire_score,
                 radiant_heroes = excluded.radiant_heroes,
                 dire_heroes = excluded.dire_heroes,
                 last_seen_ms = excluded.last_seen_ms",
            params![
                m.match_id,
                m.anchored_start_ms,
                m.radiant_score,
                m.dire_score,
                serde_json::to_string(&m.radiant_heroes)?,
                serde_json::to_string(&m.dire_heroes)?,
                m.last_seen_ms,
            ],
        )?;
        Ok(())
    }

    pub fn get_match(&self, match_id: &str) -> Result<Option<StoredMatch>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT match_id, anchored_start_ms, radiant_score, dire_score, radiant_heroes, dire_heroes, last_seen_ms
             FROM matches WHERE match_id = ?1",
        )?;

        let mut rows = stmt.query_map(params![match_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?;

        match rows.next().transpose()? {
            None => Ok(None),
            Some((match_id, anchored_start_ms, radiant_score, dire_score, rh, dh, last_seen_ms)) => {
                Ok(Some(StoredMatch {
                    match_id,
                    anchored_start_ms,
                    radiant_score,
                    dire_score,
                    radiant_heroes: parse_heroes(rh.as_deref()),
                    dire_heroes: parse_heroes(dh.as_deref()),
                    last_seen_ms,
                }))
            }
        }
    }

    pub fn reference_used(&self, reference: TxHash) -> Result<bool> {
        let count: usize = self.conn().query_row(
            "SELECT COUNT(*) FROM wagers WHERE payment_reference = ?1",
            params![format!("{:?}", reference)],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Atomic consume-and-create: the UNIQUE constraint turns a replayed
    /// reference into `DuplicateReference`, even under concurrent
    /// admissions.
    pub fn insert_wager(&self, wager: &NewWager) -> Result<i64, InsertError> {
        let conn = self.conn();
        let result = conn.execute(
            "INSERT INTO wagers (match_id, market_key, outcome, payer, payment_reference, stake_units, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'PENDING', ?7)",
            params![
                wager.match_id,
                wager.market_key,
                wager.outcome,
                format!("{:?}", wager.payer),
                format!("{:?}", wager.payment_reference),
                wager.stake_units.to_string(),
                Utc::now().to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => Ok(conn.last_insert_rowid()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == ErrorCode::ConstraintViolation =>
            {
                Err(InsertError::DuplicateReference)
            }
            Err(e) => Err(InsertError::Db(e)),
        }
    }

    pub fn pending_wagers(&self) -> Result<Vec<Wager>> {
        self.select_wagers("WHERE status = 'PENDING'")
    }

    pub fn list_wagers(&self) -> Result<Vec<Wager>> {
        self.select_wagers("")
    }

    fn select_wagers(&self, filter: &str) -> Result<Vec<Wager>> {
        let conn = self.conn();
        let sql = format!(
            "SELECT id, match_id, market_key, outcome, payer, payment_reference, stake_units, status, created_at, result_annotation, payout_reference
             FROM wagers {} ORDER BY created_at ASC, id ASC",
            filter
        );
        let mut stmt = conn.prepare(&sql)?;

        let raw: Vec<RawWager> = stmt
            .query_map([], |row| {
                Ok(RawWager {
                    id: row.get(0)?,
                    match_id: row.get(1)?,
                    market_key: row.get(2)?,
                    outcome: row.get(3)?,
                    payer: row.get(4)?,
                    payment_reference: row.get(5)?,
                    stake_units: row.get(6)?,
                    status: row.get(7)?,
                    created_at: row.get(8)?,
                    result_annotation: row.get(9)?,
                    payout_reference: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        raw.into_iter().map(wager_from_raw).collect()
    }

    /// Conditional state transition: only fires while the wager is still
    /// PENDING. Returns false when another path settled it first, which
    /// makes repeated sweeps no-ops.
    pub fn transition(
        &self,
        id: i64,
        to: WagerStatus,
        annotation: Option<&str>,
    ) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE wagers
             SET status = ?1, result_annotation = COALESCE(?2, result_annotation)
             WHERE id = ?3 AND status = 'PENDING'",
            params![to.as_str(), annotation, id],
        )?;
        Ok(updated > 0)
    }

    pub fn set_payout_reference(&self, id: i64, reference: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE wagers SET payout_reference = ?1 WHERE id = ?2",
            params![reference, id],
        )?;
        Ok(())
    }

    pub fn match_ids_with_pending(&self) -> Result<HashSet<String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT DISTINCT match_id FROM wagers WHERE status = 'PENDING'")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    pub fn count_pending(&self) -> Result<usize> {
        let count: usize = self.conn().query_row(
            "SELECT COUNT(*) FROM wagers WHERE status = 'PENDING'",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

#[derive(Debug, Clone)]
pub struct NewWager {
    pub match_id: String,
    pub market_key: String,
    pub outcome: String,
    pub payer: ethers::types::Address,
    pub payment_reference: TxHash,
    pub stake_units: U256,
}

struct RawWager {
    id: i64,
    match_id: String,
    market_key: String,
    outcome: String,
    payer: String,
    payment_reference: String,
    stake_units: String,
    status: String,
    created_at: String,
    result_annotation: Option<String>,
    payout_reference: Option<String>,
}

fn wager_from_raw(raw: RawWager) -> Result<Wager> {
    let status = WagerStatus::parse(&raw.status)
        .with_context(|| format!("Unknown wager status in store: {}", raw.status))?;
    let created_at = DateTime::parse_from_rfc3339(&raw.created_at)
        .context("Bad created_at timestamp in store")?
        .with_timezone(&Utc);

    Ok(Wager {
        id: raw.id,
        match_id: raw.match_id,
        market_key: raw.market_key,
        outcome: raw.outcome,
        payer: raw.payer.parse().context("Bad payer address in store")?,
        payment_reference: raw
            .payment_reference
            .parse()
            .context("Bad payment reference in store")?,
        stake_units: U256::from_dec_str(&raw.stake_units)
            .context("Bad stake amount in store")?,
        status,
        created_at,
        result_annotation: raw.result_annotation,
        payout_reference: raw.payout_reference,
    })
}

fn parse_heroes(raw: Option<&str>) -> Vec<u32> {
    raw.and_then(|s| serde_json::from_str(s).ok()).unwrap_or_default()
}
