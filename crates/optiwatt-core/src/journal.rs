// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of OptiWatt.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use optiwatt_types::record::TickRecord;

/// Append-only JSON-lines journal of completed ticks
///
/// Purely observational; journal failures are logged and never stall the
/// control loop.
#[derive(Debug, Clone)]
pub struct TickJournal {
    path: PathBuf,
}

impl TickJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &TickRecord) -> Result<()> {
        let line = serde_json::to_string(record).context("serialize tick record")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open journal {}", self.path.display()))?;
        writeln!(file, "{}", line).context("write journal line")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_append_writes_json_lines() {
        let path = std::env::temp_dir().join(format!(
            "optiwatt-journal-test-{}.jsonl",
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        let journal = TickJournal::new(&path);

        let record = TickRecord {
            tick_ts: Utc::now(),
            best_fitness: Some(-1.0),
            generations_run: 12,
            degraded_inputs: vec![],
            published_first_slot: None,
            skipped: false,
        };
        journal.append(&record).unwrap();
        journal.append(&record).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: TickRecord = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(parsed.generations_run, 12);

        let _ = std::fs::remove_file(&path);
    }
}
