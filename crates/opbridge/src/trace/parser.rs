//! Strict, line-at-a-time parser for the VM's execution log.
//!
//! A log is a sequence of dump blocks separated by arbitrary text:
//!
//! ```text
//! Dump Start Time: 1577836800
//! \t---
//! \tOPCODE, 1: LOAD_CONST, 0, 1000
//! \tGC START: 1010
//! \tGC END: 1042
//! Dump End Time: 1577836801
//! ```
//!
//! Outside a block every line that does not start with a tab is ignored; the first
//! tab-indented line opens a block and is consumed without being classified. Inside a block
//! each line must be an opcode dispatch, a GC boundary or the `Dump End Time` line that
//! closes the block. Anything else is a [`FormatError`] and ends the stream.

use std::{io::BufRead, iter::FusedIterator};

use super::TraceEvent;
use crate::error::FormatError;

const OP_PREFIX: &str = "\tOPCODE,";
const GC_START_PREFIX: &str = "\tGC START";
const GC_END_PREFIX: &str = "\tGC END";
const DUMP_END_PREFIX: &str = "Dump End Time";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Scanning for the tab-indented line that opens the next block.
    OutsideBlock,
    /// Classifying the lines of a block.
    InsideBlock,
    /// End of input or a fatal error was reached.
    Finished,
}

/// Iterator of [`TraceEvent`]s read lazily from a log.
///
/// Reads exactly one line per step, never ahead of the consumer. Fused after the first
/// error.
#[derive(Debug)]
pub struct TraceParser<R> {
    reader: R,
    state: State,
    /// 1-based number of the line in `buf`.
    line_no: usize,
    buf: String,
}

impl<R: BufRead> TraceParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: State::OutsideBlock,
            line_no: 0,
            buf: String::new(),
        }
    }

    /// Number of lines consumed so far.
    #[must_use]
    pub fn lines_read(&self) -> usize {
        self.line_no
    }
}

impl<R: BufRead> Iterator for TraceParser<R> {
    type Item = Result<TraceEvent, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.state == State::Finished {
                return None;
            }
            self.buf.clear();
            match self.reader.read_line(&mut self.buf) {
                Ok(0) => {
                    self.state = State::Finished;
                    return None;
                }
                Ok(_) => self.line_no += 1,
                Err(err) => {
                    self.state = State::Finished;
                    return Some(Err(err.into()));
                }
            }
            let line = self.buf.trim_end_matches(['\n', '\r']);

            match self.state {
                State::OutsideBlock => {
                    if line.starts_with('\t') {
                        self.state = State::InsideBlock;
                    }
                }
                State::InsideBlock => {
                    let result = classify(line, self.line_no);
                    match result {
                        Ok(TraceEvent::DumpEnd) => self.state = State::OutsideBlock,
                        Err(_) => self.state = State::Finished,
                        Ok(_) => {}
                    }
                    return Some(result);
                }
                State::Finished => return None,
            }
        }
    }
}

impl<R: BufRead> FusedIterator for TraceParser<R> {}

fn classify(line: &str, line_no: usize) -> Result<TraceEvent, FormatError> {
    if line.starts_with(DUMP_END_PREFIX) {
        return Ok(TraceEvent::DumpEnd);
    }
    let is_op = line.starts_with(OP_PREFIX);
    if !is_op && !line.starts_with(GC_START_PREFIX) && !line.starts_with(GC_END_PREFIX) {
        return Err(FormatError::UnrecognizedLine {
            line: line_no,
            content: line.to_owned(),
        });
    }

    let Some((_, rest)) = line.split_once(':') else {
        return Err(FormatError::MissingSeparator {
            line: line_no,
            content: line.to_owned(),
        });
    };
    let fields: Vec<&str> = rest.split(',').map(str::trim).collect();
    let missing_field = || FormatError::MissingField {
        line: line_no,
        content: line.to_owned(),
    };
    let min_fields = if is_op { 2 } else { 1 };
    if fields.len() < min_fields || fields.iter().any(|field| field.is_empty()) {
        return Err(missing_field());
    }
    let raw_timestamp = fields[fields.len() - 1];
    let timestamp = raw_timestamp
        .parse::<i64>()
        .map_err(|_| FormatError::InvalidTimestamp {
            line: line_no,
            value: raw_timestamp.to_owned(),
        })?;

    Ok(if is_op {
        TraceEvent::Op {
            name: fields[0].to_owned(),
            timestamp,
        }
    } else if line.starts_with(GC_START_PREFIX) {
        TraceEvent::GcStart { timestamp }
    } else {
        TraceEvent::GcEnd { timestamp }
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn parse(log: &str) -> Vec<Result<TraceEvent, FormatError>> {
        TraceParser::new(log.as_bytes()).collect()
    }

    #[test]
    fn classifies_block_lines() {
        let log = "preamble\n\
                   \tblock start\n\
                   \tOPCODE, 3: LOAD_FAST, 0, 17\n\
                   \tGC START: 20\n\
                   \tGC END: 35\n\
                   Dump End Time: 99\n";
        let events: Vec<TraceEvent> = parse(log).into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                TraceEvent::Op {
                    name: "LOAD_FAST".to_owned(),
                    timestamp: 17
                },
                TraceEvent::GcStart { timestamp: 20 },
                TraceEvent::GcEnd { timestamp: 35 },
                TraceEvent::DumpEnd,
            ]
        );
    }

    #[test]
    fn text_between_blocks_is_skipped() {
        let log = "\tstart\nDump End Time: 1\nnoise\nmore noise\n\tstart\n\tGC START: 4\nDump End Time: 5\n";
        let events: Vec<TraceEvent> = parse(log).into_iter().map(Result::unwrap).collect();
        assert_eq!(
            events,
            vec![
                TraceEvent::DumpEnd,
                TraceEvent::GcStart { timestamp: 4 },
                TraceEvent::DumpEnd
            ]
        );
    }

    #[test]
    fn unknown_line_is_fatal_and_fuses() {
        let log = "\tstart\n\tOPCODE, 1: NOP, 5\n\tBOGUS: 1\n\tOPCODE, 1: NOP, 6\n";
        let mut parser = TraceParser::new(log.as_bytes());
        assert!(matches!(parser.next(), Some(Ok(TraceEvent::Op { .. }))));
        assert!(matches!(
            parser.next(),
            Some(Err(FormatError::UnrecognizedLine { line: 3, .. }))
        ));
        assert!(parser.next().is_none());
        assert_eq!(parser.lines_read(), 3);
    }

    #[test]
    fn malformed_data_lines() {
        assert!(matches!(
            classify("\tGC START 12", 1),
            Err(FormatError::MissingSeparator { line: 1, .. })
        ));
        assert!(matches!(
            classify("\tOPCODE, 1: 12", 2),
            Err(FormatError::MissingField { line: 2, .. })
        ));
        assert!(matches!(
            classify("\tOPCODE, 1: NOP, soon", 3),
            Err(FormatError::InvalidTimestamp { line: 3, ref value }) if value == "soon"
        ));
    }

    #[test]
    fn tolerates_crlf() {
        let events = parse("\tstart\r\n\tGC END: 7\r\nDump End Time\r\n");
        assert!(matches!(events[0], Ok(TraceEvent::GcEnd { timestamp: 7 })));
        assert!(matches!(events[1], Ok(TraceEvent::DumpEnd)));
    }
}
