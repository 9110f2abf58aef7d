//! Request/response correlation for the subprocess's output stream.
//!
//! The subprocess answers requests one line at a time and in order. Every
//! request that expects a reply registers a handler; every complete output
//! line consumes exactly one handler.

use std::collections::VecDeque;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::protocol::LineBuffer;

/// Which pending handler a completed line is matched with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationOrder {
    /// Oldest handler first. Matches an in-order request/response protocol.
    #[default]
    Fifo,
    /// Newest handler first. Reproduces the legacy plugin's pairing, which
    /// misroutes replies once more than one request is outstanding.
    Lifo,
}

impl FromStr for CorrelationOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(Self::Fifo),
            "lifo" => Ok(Self::Lifo),
            other => Err(format!("unknown correlation order: {other}")),
        }
    }
}

/// A completed output line paired with the handler it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch<H> {
    pub handler: H,
    /// The line with surrounding whitespace removed.
    pub line: String,
}

/// Counters exposing protocol (de)synchronisation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    /// Handlers registered so far.
    pub registered: u64,
    /// Lines handed to a handler.
    pub dispatched: u64,
    /// Lines that arrived with no handler pending.
    pub unsolicited: u64,
    /// Handlers currently waiting for a line.
    pub outstanding: usize,
    /// Largest `outstanding` value observed.
    pub high_water: usize,
}

/// Buffers raw output and pairs each complete line with a pending handler.
#[derive(Debug)]
pub struct ResponseCorrelator<H> {
    buffer: LineBuffer,
    pending: VecDeque<H>,
    order: CorrelationOrder,
    warn_threshold: usize,
    stats: CorrelatorStats,
}

impl<H> ResponseCorrelator<H> {
    /// Create a correlator. Registering more than `warn_threshold`
    /// outstanding handlers is reported as a likely desynchronisation.
    pub fn new(order: CorrelationOrder, warn_threshold: usize) -> Self {
        Self {
            buffer: LineBuffer::new(),
            pending: VecDeque::new(),
            order,
            warn_threshold,
            stats: CorrelatorStats::default(),
        }
    }

    /// Queue a handler for the request that was just sent.
    ///
    /// Must be called in send order, once per request that will produce
    /// exactly one output line.
    pub fn register(&mut self, handler: H) {
        self.pending.push_back(handler);
        self.stats.registered += 1;
        self.stats.high_water = self.stats.high_water.max(self.pending.len());

        if self.pending.len() > self.warn_threshold {
            warn!(
                outstanding = self.pending.len(),
                threshold = self.warn_threshold,
                "Pending responses exceed threshold, subprocess may be out of sync"
            );
        }
    }

    /// Feed raw output bytes and collect every line that became complete.
    pub fn on_data(&mut self, bytes: &[u8]) -> Vec<Dispatch<H>> {
        self.buffer.push(bytes);

        let mut dispatched = Vec::new();
        while let Some(line) = self.buffer.next_line() {
            let line = line.trim().to_string();
            match self.take_handler() {
                Some(handler) => {
                    self.stats.dispatched += 1;
                    dispatched.push(Dispatch { handler, line });
                }
                None => {
                    self.stats.unsolicited += 1;
                    debug!(line = %line, "Discarding unsolicited subprocess output");
                }
            }
        }
        dispatched
    }

    fn take_handler(&mut self) -> Option<H> {
        match self.order {
            CorrelationOrder::Fifo => self.pending.pop_front(),
            CorrelationOrder::Lifo => self.pending.pop_back(),
        }
    }

    /// True when no response is outstanding.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub const fn order(&self) -> CorrelationOrder {
        self.order
    }

    pub fn stats(&self) -> CorrelatorStats {
        CorrelatorStats {
            outstanding: self.pending.len(),
            ..self.stats
        }
    }

    /// Drop every pending handler, returning how many were waiting.
    pub fn abandon(&mut self) -> usize {
        let abandoned = self.pending.len();
        self.pending.clear();
        abandoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines<H>(dispatched: &[Dispatch<H>]) -> Vec<&str> {
        dispatched.iter().map(|d| d.line.as_str()).collect()
    }

    #[test]
    fn each_handler_consumed_exactly_once() {
        let mut correlator = ResponseCorrelator::new(CorrelationOrder::Fifo, 8);
        correlator.register("h1");
        correlator.register("h2");
        correlator.register("h3");

        let dispatched = correlator.on_data(b"one\ntwo\nthree\nfour\n");
        let handlers: Vec<_> = dispatched.iter().map(|d| d.handler).collect();
        assert_eq!(handlers, vec!["h1", "h2", "h3"]);
        assert_eq!(lines(&dispatched), vec!["one", "two", "three"]);

        let stats = correlator.stats();
        assert_eq!(stats.dispatched, 3);
        assert_eq!(stats.unsolicited, 1);
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.high_water, 3);
    }

    #[test]
    fn lifo_pairs_newest_first() {
        let mut correlator = ResponseCorrelator::new(CorrelationOrder::Lifo, 8);
        correlator.register(1);
        correlator.register(2);

        let dispatched = correlator.on_data(b"a\nb\n");
        let handlers: Vec<_> = dispatched.iter().map(|d| d.handler).collect();
        assert_eq!(handlers, vec![2, 1]);
    }

    #[test]
    fn partial_lines_wait_for_terminator() {
        let mut correlator = ResponseCorrelator::new(CorrelationOrder::Fifo, 8);
        correlator.register("alice");

        assert!(correlator.on_data(b"  hello the").is_empty());
        assert!(!correlator.is_idle());

        let dispatched = correlator.on_data(b"re  \r\n");
        assert_eq!(lines(&dispatched), vec!["hello there"]);
        assert!(correlator.is_idle());
    }

    #[test]
    fn dispatch_is_chunk_boundary_independent() {
        let stream = b"reply one\nreply two\r\nreply three\n";

        let mut whole = ResponseCorrelator::new(CorrelationOrder::Fifo, 8);
        (0..3).for_each(|i| whole.register(i));
        let expected = whole.on_data(stream);

        for chunk_size in 1..stream.len() {
            let mut chunked = ResponseCorrelator::new(CorrelationOrder::Fifo, 8);
            (0..3).for_each(|i| chunked.register(i));
            let got: Vec<_> = stream
                .chunks(chunk_size)
                .flat_map(|chunk| chunked.on_data(chunk))
                .collect();
            assert_eq!(got, expected, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn unsolicited_lines_are_counted_not_dispatched() {
        let mut correlator: ResponseCorrelator<()> =
            ResponseCorrelator::new(CorrelationOrder::Fifo, 8);
        assert!(correlator.on_data(b"MegaHAL banner\n\n").is_empty());
        assert_eq!(correlator.stats().unsolicited, 2);
    }

    #[test]
    fn abandon_reports_waiting_handlers() {
        let mut correlator = ResponseCorrelator::new(CorrelationOrder::Fifo, 1);
        correlator.register(1);
        correlator.register(2);
        assert_eq!(correlator.stats().high_water, 2);
        assert_eq!(correlator.abandon(), 2);
        assert!(correlator.is_idle());
    }

    #[test]
    fn order_parses_case_insensitively() {
        assert_eq!("FIFO".parse::<CorrelationOrder>(), Ok(CorrelationOrder::Fifo));
        assert_eq!("lifo".parse::<CorrelationOrder>(), Ok(CorrelationOrder::Lifo));
        assert!("stack".parse::<CorrelationOrder>().is_err());
    }
}
