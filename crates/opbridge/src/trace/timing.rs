//! Dump segmentation and per-opcode timing.
//!
//! Every event except the last one of a dump is charged with the time until the next event
//! of the same dump. Adjacency never crosses a `DumpEnd` boundary, and events after the last
//! `DumpEnd` belong to a dump that was cut off, so they are dropped.

use std::{collections::BTreeMap, fmt, io::BufRead, iter::FusedIterator, mem};

use super::{EventCategory, TraceEvent, TraceParser};
use crate::error::FormatError;

/// Elapsed ticks between two adjacent events, attributed to the earlier one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub category: EventCategory,
    /// Opcode name for `Op` events, `None` for GC events.
    pub label: Option<String>,
    pub duration: i64,
}

impl Delta {
    fn between(earlier: TraceEvent, earlier_ts: i64, later_ts: i64) -> Self {
        let category = earlier.category();
        let label = match earlier {
            TraceEvent::Op { name, .. } => Some(name),
            _ => None,
        };
        Self {
            category,
            label,
            duration: later_ts.saturating_sub(earlier_ts),
        }
    }
}

/// Splits an event stream into dumps. See [`segment`].
#[derive(Debug)]
pub struct Segments<I> {
    events: I,
    exhausted: bool,
}

impl<I: Iterator<Item = TraceEvent>> Iterator for Segments<I> {
    type Item = Vec<TraceEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }
        let mut dump = Vec::new();
        for event in self.events.by_ref() {
            if event == TraceEvent::DumpEnd {
                return Some(dump);
            }
            dump.push(event);
        }
        self.exhausted = true;
        if !dump.is_empty() {
            tracing::warn!(events = dump.len(), "dropping unterminated dump at end of trace");
        }
        None
    }
}

impl<I: Iterator<Item = TraceEvent>> FusedIterator for Segments<I> {}

/// Lazily groups `events` into dumps, one `Vec` per `DumpEnd`-terminated run.
///
/// The `DumpEnd` markers themselves are not part of any segment. Events after the last
/// `DumpEnd` are discarded with a warning.
pub fn segment<I: IntoIterator<Item = TraceEvent>>(events: I) -> Segments<I::IntoIter> {
    Segments {
        events: events.into_iter(),
        exhausted: false,
    }
}

/// Deltas between adjacent events of one segment. See [`deltas`].
#[derive(Debug, Clone)]
pub struct Deltas<'a> {
    pairs: std::slice::Windows<'a, TraceEvent>,
}

impl Iterator for Deltas<'_> {
    type Item = Delta;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let [earlier, later] = self.pairs.next()? else {
                continue;
            };
            if let (Some(earlier_ts), Some(later_ts)) = (earlier.timestamp(), later.timestamp()) {
                return Some(Delta::between(earlier.clone(), earlier_ts, later_ts));
            }
        }
    }
}

/// Deltas for every adjacent pair of timestamped events in `segment`.
#[must_use]
pub fn deltas(segment: &[TraceEvent]) -> Deltas<'_> {
    Deltas {
        pairs: segment.windows(2),
    }
}

/// Per-dump timing reports over an event stream. See [`dump_reports`].
#[derive(Debug)]
pub struct DumpReports<I> {
    events: I,
    current: TimingReport,
    previous: Option<(TraceEvent, i64)>,
    /// Whether a timestamped event was seen since the last `DumpEnd`.
    open: bool,
}

impl<I: Iterator<Item = TraceEvent>> Iterator for DumpReports<I> {
    type Item = TimingReport;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(event) = self.events.next() else {
                if mem::take(&mut self.open) {
                    tracing::warn!(
                        keys = self.current.len(),
                        "dropping unterminated dump at end of trace"
                    );
                }
                self.current = TimingReport::default();
                self.previous = None;
                return None;
            };
            let Some(timestamp) = event.timestamp() else {
                self.previous = None;
                self.open = false;
                return Some(mem::take(&mut self.current));
            };
            self.open = true;
            if let Some((earlier, earlier_ts)) = self.previous.replace((event, timestamp)) {
                self.current.record(Delta::between(earlier, earlier_ts, timestamp));
            }
        }
    }
}

/// Aggregates each dump of `events` on its own, yielding a report when its `DumpEnd` arrives.
///
/// Equivalent to [`aggregate`] over [`deltas`] of each of [`segment`]'s segments, but holds
/// only the previous event and one dump's per-key totals. The deltas of a dump cut off at the
/// end of the stream never reach a report.
pub fn dump_reports<I: IntoIterator<Item = TraceEvent>>(events: I) -> DumpReports<I::IntoIter> {
    DumpReports {
        events: events.into_iter(),
        current: TimingReport::default(),
        previous: None,
        open: false,
    }
}

/// Report key: event category, then opcode name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimingKey {
    pub category: EventCategory,
    pub label: Option<String>,
}

/// Count and summed duration of one key's deltas.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimingRecord {
    pub count: u64,
    pub total_duration: f64,
}

impl TimingRecord {
    pub fn record(&mut self, duration: i64) {
        self.count += 1;
        self.total_duration += duration as f64;
    }

    /// Mean duration, or `None` before anything was recorded.
    #[must_use]
    pub fn average(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total_duration / self.count as f64)
    }
}

/// Timing statistics per [`TimingKey`], ordered by category then label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingReport {
    records: BTreeMap<TimingKey, TimingRecord>,
}

impl TimingReport {
    pub fn record(&mut self, delta: Delta) {
        self.records
            .entry(TimingKey {
                category: delta.category,
                label: delta.label,
            })
            .or_default()
            .record(delta.duration);
    }

    /// Adds every record of `other` into this report.
    pub fn merge(&mut self, other: Self) {
        for (key, record) in other.records {
            let total = self.records.entry(key).or_default();
            total.count += record.count;
            total.total_duration += record.total_duration;
        }
    }

    #[must_use]
    pub fn get(&self, category: EventCategory, label: Option<&str>) -> Option<&TimingRecord> {
        self.records.get(&TimingKey {
            category,
            label: label.map(str::to_owned),
        })
    }

    pub fn records(&self) -> impl Iterator<Item = (&TimingKey, &TimingRecord)> {
        self.records.iter()
    }

    /// `(opcode name, count, average duration)` for every dispatched opcode, by name.
    pub fn opcodes(&self) -> impl Iterator<Item = (&str, u64, f64)> {
        self.records.iter().filter_map(|(key, record)| {
            let label = key.label.as_deref().filter(|_| key.category == EventCategory::Op)?;
            Some((label, record.count, record.average()?))
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl fmt::Display for TimingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, record) in &self.records {
            let Some(average) = record.average() else {
                continue;
            };
            match &key.label {
                Some(label) => writeln!(f, "{label} - {} - {average:.6}", record.count)?,
                None => writeln!(f, "{} - {} - {average:.6}", key.category, record.count)?,
            }
        }
        Ok(())
    }
}

/// Folds deltas into a report.
pub fn aggregate<I: IntoIterator<Item = Delta>>(deltas: I) -> TimingReport {
    let mut report = TimingReport::default();
    for delta in deltas {
        report.record(delta);
    }
    report
}

/// Parses a whole log and aggregates its timings.
///
/// Only dumps closed by a `DumpEnd` line are counted. The first [`FormatError`] aborts the
/// run; no partial report is returned.
pub fn analyze<R: BufRead>(reader: R) -> Result<TimingReport, FormatError> {
    let _span = tracing::debug_span!("analyze").entered();
    let mut failure = None;
    let events = TraceParser::new(reader).map_while(|event| match event {
        Ok(event) => Some(event),
        Err(err) => {
            failure = Some(err);
            None
        }
    });
    let mut report = TimingReport::default();
    for dump in dump_reports(events) {
        report.merge(dump);
    }
    if let Some(err) = failure {
        return Err(err);
    }
    tracing::debug!(keys = report.len(), "aggregated trace timings");
    Ok(report)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn op(name: &str, timestamp: i64) -> TraceEvent {
        TraceEvent::Op {
            name: name.to_owned(),
            timestamp,
        }
    }

    #[test]
    fn dump_reports_match_per_segment_deltas() {
        let events = vec![
            op("A", 0),
            TraceEvent::GcStart { timestamp: 3 },
            TraceEvent::GcEnd { timestamp: 9 },
            op("B", 10),
            TraceEvent::DumpEnd,
            op("A", 100),
            op("C", 104),
            TraceEvent::DumpEnd,
        ];
        let per_segment: Vec<Delta> = segment(events.clone())
            .flat_map(|dump| deltas(&dump).collect::<Vec<_>>())
            .collect();
        assert_eq!(
            per_segment.iter().map(|delta| delta.duration).collect::<Vec<_>>(),
            vec![3, 6, 1, 4]
        );

        let reports: Vec<TimingReport> = dump_reports(events).collect();
        assert_eq!(reports.len(), 2);
        let mut merged = TimingReport::default();
        for report in reports {
            merged.merge(report);
        }
        assert_eq!(merged, aggregate(per_segment));
    }

    #[test]
    fn unterminated_trailing_dump_is_dropped() {
        let events = vec![op("A", 0), op("B", 5), TraceEvent::DumpEnd, op("A", 100), op("C", 1000)];
        assert_eq!(segment(events.clone()).collect::<Vec<_>>(), vec![vec![op("A", 0), op("B", 5)]]);

        let reports: Vec<TimingReport> = dump_reports(events).collect();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].opcodes().collect::<Vec<_>>(), vec![("A", 1, 5.0)]);

        assert_eq!(segment(vec![TraceEvent::DumpEnd]).count(), 1);
        assert_eq!(segment(Vec::<TraceEvent>::new()).count(), 0);
    }

    #[test]
    fn report_orders_by_category_then_label() {
        let report = aggregate(deltas(&[
            op("Z", 0),
            TraceEvent::GcStart { timestamp: 2 },
            op("A", 5),
            op("Z", 6),
            op("A", 10),
        ]));
        let keys: Vec<String> = report
            .records()
            .map(|(key, _)| format!("{} {}", key.category, key.label.as_deref().unwrap_or("-")))
            .collect();
        assert_eq!(keys, vec!["OP A", "OP Z", "GC START -"]);
        assert_eq!(
            report.opcodes().collect::<Vec<_>>(),
            vec![("A", 1, 1.0), ("Z", 2, 3.0)]
        );
        assert_eq!(report.to_string(), "A - 1 - 1.000000\nZ - 2 - 3.000000\nGC START - 1 - 3.000000\n");
    }

    #[test]
    fn empty_record_has_no_average() {
        assert_eq!(TimingRecord::default().average(), None);
    }
}
