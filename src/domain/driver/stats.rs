use std::collections::BTreeSet;

use serde_json::Value;

use crate::error::{Error, Result};

pub const STATS_MARKER: &str = "Stats:";

/// Extracts the JSON statistics a unit printed after the `Stats:` marker. The first marked line
/// wins; no marked line means the unit reported nothing.
pub fn parse_stats(output: &str) -> Result<Option<Value>> {
    let Some(line) = output.lines().find(|line| line.contains(STATS_MARKER)) else {
        return Ok(None);
    };

    let payload = line.split_once(STATS_MARKER).map(|(_, payload)| payload.trim()).unwrap_or_default();
    serde_json::from_str(payload).map(Some).map_err(|e| Error::StatsParseError(format!("{} in '{}'", e, payload)))
}

/// Like [`parse_stats`], but a malformed line only costs the statistics of this unit.
pub fn collect_stats(role: &str, output: &str) -> Option<Value> {
    match parse_stats(output) {
        Ok(stats) => {
            if stats.is_none() {
                log::debug!("{} reported no statistics", role);
            }
            stats
        }
        Err(e) => {
            log::warn!("Dropping statistics of {}: {}", role, e);
            None
        }
    }
}

/// Rows of the receiver's CSV output as comma-joined strings, header excluded.
pub fn parse_receiver_output(stdout: &str) -> Result<BTreeSet<String>> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).flexible(true).from_reader(stdout.as_bytes());

    let mut rows = BTreeSet::new();
    for record in reader.records() {
        let record = record?;
        rows.insert(record.iter().collect::<Vec<_>>().join(","));
    }
    Ok(rows)
}
