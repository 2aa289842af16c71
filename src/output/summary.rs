//! Run summary: per-category outcome counts
//!
//! The engine tallies outcomes as workers report them and returns the final
//! `RunSummary`; the same shape backs the offline `--stats` view rebuilt
//! from the checkpoint log.

use std::collections::BTreeMap;
use std::time::Duration;

/// Outcome counts for one category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CategoryTally {
    /// Jobs completed (including empty-page terminations)
    pub done: u64,

    /// Jobs marked failed-permanent
    pub failed: u64,

    /// Records written for this category
    pub records: u64,
}

/// Final summary of one engine run
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Per-category tallies, keyed by category id
    pub categories: BTreeMap<String, CategoryTally>,

    /// Wall time of the run; None when rebuilt offline from the log
    pub duration: Option<Duration>,

    /// True when the run ended on the stop signal rather than completion
    pub cancelled: bool,
}

impl RunSummary {
    /// Counts one completed job with its record count
    pub fn record_done(&mut self, category: &str, records: u64) {
        let tally = self.categories.entry(category.to_string()).or_default();
        tally.done += 1;
        tally.records += records;
    }

    /// Counts one failed-permanent job
    pub fn record_failed(&mut self, category: &str) {
        let tally = self.categories.entry(category.to_string()).or_default();
        tally.failed += 1;
    }

    pub fn total_done(&self) -> u64 {
        self.categories.values().map(|t| t.done).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.categories.values().map(|t| t.failed).sum()
    }

    pub fn total_records(&self) -> u64 {
        self.categories.values().map(|t| t.records).sum()
    }
}

/// Prints a run summary to stdout in a formatted manner
///
/// # Arguments
///
/// * `summary` - The summary to display
pub fn print_summary(summary: &RunSummary) {
    println!("=== Scrape Summary ===\n");

    if summary.cancelled {
        println!("Run was cancelled; unfinished jobs stay pending for the next run.\n");
    }

    println!("{:<24} {:>8} {:>8} {:>10}", "Category", "Done", "Failed", "Records");
    for (category, tally) in &summary.categories {
        println!(
            "{:<24} {:>8} {:>8} {:>10}",
            category, tally.done, tally.failed, tally.records
        );
    }
    println!(
        "{:<24} {:>8} {:>8} {:>10}",
        "Total",
        summary.total_done(),
        summary.total_failed(),
        summary.total_records()
    );

    if let Some(duration) = summary.duration {
        println!("\nDuration: {}s", duration.as_secs());
    }
}
