use anyhow::Result;
use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;

use crate::settlement::types::Wager;

/// Append-only CSV audit trail of wager lifecycle events.
pub struct CsvLogger {
    log_path: String,
}

impl CsvLogger {
    pub fn new(log_path: String) -> Result<Self> {
        // Create CSV file with headers if it doesn't exist
        if !std::path::Path::new(&log_path).exists() {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .open(&log_path)?;

            writeln!(
                file,
                "timestamp,event,wager_id,match_id,market,outcome,stake_units,status,detail"
            )?;
        }

        Ok(Self { log_path })
    }

    pub fn log_wager(&self, event: &str, wager: &Wager, detail: &str) -> Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.log_path)?;

        writeln!(
            file,
            "{},{},{},{},{},{},{},{},{}",
            Utc::now().to_rfc3339(),
            event,
            wager.id,
            wager.match_id,
            wager.market_key,
            wager.outcome,
            wager.stake_units,
            wager.status,
            detail.replace(',', ";"),
        )?;

        Ok(())
    }
}
