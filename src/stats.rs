//! Running totals for summable columns

use std::collections::BTreeMap;
use tracing::debug;

/// Per-column running totals, keyed by physical column index
#[derive(Debug, Default)]
pub struct Statistics {
    totals: BTreeMap<u16, f64>,
    skipped: usize,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a cell's text to the column total. Text that is not a number is
    /// dropped and logged.
    pub fn add(&mut self, column: u16, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        match trimmed.parse::<f64>() {
            Ok(value) if value.is_finite() => {
                *self.totals.entry(column).or_insert(0.0) += value;
            }
            _ => {
                self.skipped += 1;
                debug!(column, value = trimmed, "Non-numeric value skipped in statistics");
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    pub fn total(&self, column: u16) -> Option<f64> {
        self.totals.get(&column).copied()
    }

    /// Values that could not be summed since the last flush
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Drain the totals in column order
    pub fn flush(&mut self) -> Vec<(u16, f64)> {
        self.skipped = 0;
        std::mem::take(&mut self.totals).into_iter().collect()
    }
}
