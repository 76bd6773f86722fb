//! Permissive summarizer for flattened, comma-separated timing dumps.
//!
//! Rows look like `field0, key, ..., duration`. The dumps are produced outside the VM and
//! are often truncated, so a malformed row is recorded as [`RecordSkipped`] and the run
//! carries on. Means are computed once, at report time.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    io::{self, BufRead},
};

use crate::error::{RecordSkipped, ReportGap, SkipReason};

/// A well-formed row.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvRecord {
    /// The second field, trimmed.
    pub key: String,
    /// The last field.
    pub duration: f64,
}

impl CsvRecord {
    pub fn parse(line: &str) -> Result<Self, SkipReason> {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 3 {
            return Err(SkipReason::TooFewFields { found: fields.len() });
        }
        let key = fields[1].trim();
        let raw = fields[fields.len() - 1].trim();
        let duration = raw
            .parse::<f64>()
            .ok()
            .filter(|duration| duration.is_finite())
            .ok_or_else(|| SkipReason::InvalidDuration {
                key: key.to_owned(),
                value: raw.to_owned(),
            })?;
        Ok(Self {
            key: key.to_owned(),
            duration,
        })
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    count: u64,
    total: f64,
}

/// Accumulates per-key duration sums across any number of rows.
#[derive(Debug, Clone, Default)]
pub struct CsvAggregator {
    sums: BTreeMap<String, Accumulator>,
    expected: BTreeSet<String>,
    skipped: Vec<RecordSkipped>,
    lines: usize,
}

impl CsvAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a key that must have samples; a missing one becomes a [`ReportGap`] even if no
    /// row mentions it.
    pub fn expect(&mut self, key: impl Into<String>) -> &mut Self {
        self.expected.insert(key.into());
        self
    }

    /// Consumes one line. Blank lines are ignored but still advance the line count.
    pub fn feed(&mut self, line: &str) {
        self.lines += 1;
        if line.trim().is_empty() {
            return;
        }
        match CsvRecord::parse(line) {
            Ok(record) => {
                let sum = self.sums.entry(record.key).or_default();
                sum.count += 1;
                sum.total += record.duration;
            }
            Err(reason) => {
                // the key is still known, so a category with only bad rows shows up as a gap
                if let SkipReason::InvalidDuration { key, .. } = &reason {
                    self.sums.entry(key.clone()).or_default();
                }
                let skipped = RecordSkipped {
                    line: self.lines,
                    reason,
                };
                tracing::debug!(%skipped, "skipping malformed row");
                self.skipped.push(skipped);
            }
        }
    }

    /// Feeds every line of `reader`.
    pub fn feed_reader<R: BufRead>(&mut self, reader: R) -> io::Result<()> {
        for line in reader.lines() {
            self.feed(&line?);
        }
        Ok(())
    }

    #[must_use]
    pub fn skipped(&self) -> &[RecordSkipped] {
        &self.skipped
    }

    /// Means per key, the skipped rows, and a gap for every key that was seen or expected
    /// but has no valid sample.
    #[must_use]
    pub fn report(&self) -> CsvReport {
        let means = self
            .sums
            .iter()
            .filter(|(_, sum)| sum.count > 0)
            .map(|(key, sum)| (key.clone(), sum.total / sum.count as f64))
            .collect();
        let observed_without_samples = self.sums.iter().filter(|(_, sum)| sum.count == 0).map(|(key, _)| key);
        let expected_without_samples = self
            .expected
            .iter()
            .filter(|key| self.sums.get(*key).is_none_or(|sum| sum.count == 0));
        let gaps = observed_without_samples
            .chain(expected_without_samples)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .map(|key| ReportGap { category: key.clone() })
            .collect();
        CsvReport {
            means,
            gaps,
            skipped: self.skipped.clone(),
        }
    }
}

/// Result of a permissive summary.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvReport {
    /// `(key, mean duration)`, sorted by key.
    pub means: Vec<(String, f64)>,
    pub gaps: Vec<ReportGap>,
    pub skipped: Vec<RecordSkipped>,
}

impl CsvReport {
    #[must_use]
    pub fn mean(&self, key: &str) -> Option<f64> {
        self.means
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|&(_, mean)| mean)
    }
}

/// `key,mean` lines with six decimals.
impl fmt::Display for CsvReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, mean) in &self.means {
            writeln!(f, "{key},{mean:.6}")?;
        }
        Ok(())
    }
}
