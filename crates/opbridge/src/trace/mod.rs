//! Analysis of execution logs written by the instrumented VM.
//!
//! The strict pipeline is pull-based: [`TraceParser`] reads one line at a time and
//! [`dump_reports`] keeps only the previous event plus the open dump's totals, which are
//! merged into one [`TimingReport`] as each dump closes. The permissive [`CsvAggregator`]
//! handles already-flattened dumps.

pub mod csv;
pub mod parser;
pub mod timing;

pub use csv::{CsvAggregator, CsvRecord, CsvReport};
pub use parser::TraceParser;
pub use timing::{
    Delta, Deltas, DumpReports, Segments, TimingKey, TimingRecord, TimingReport, aggregate, analyze, deltas,
    dump_reports, segment,
};

/// One event of an execution log, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// An opcode was dispatched.
    Op { name: String, timestamp: i64 },
    GcStart { timestamp: i64 },
    GcEnd { timestamp: i64 },
    /// The end of one dump run.
    DumpEnd,
}

impl TraceEvent {
    #[must_use]
    pub fn category(&self) -> EventCategory {
        match self {
            Self::Op { .. } => EventCategory::Op,
            Self::GcStart { .. } => EventCategory::GcStart,
            Self::GcEnd { .. } => EventCategory::GcEnd,
            Self::DumpEnd => EventCategory::DumpEnd,
        }
    }

    /// Clock ticks at which the event was emitted; `DumpEnd` carries none.
    #[must_use]
    pub fn timestamp(&self) -> Option<i64> {
        match self {
            Self::Op { timestamp, .. } | Self::GcStart { timestamp } | Self::GcEnd { timestamp } => Some(*timestamp),
            Self::DumpEnd => None,
        }
    }

    /// The opcode name of an `Op` event.
    #[must_use]
    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Op { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Event kinds, spelled as the log and the timing report spell them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::EnumString)]
pub enum EventCategory {
    #[strum(serialize = "OP")]
    Op,
    #[strum(serialize = "GC START")]
    GcStart,
    #[strum(serialize = "GC END")]
    GcEnd,
    #[strum(serialize = "DUMP END")]
    DumpEnd,
}
