//! Per-event routing.
//!
//! The router is the handler a source drives. For every hashtag entity that
//! exactly matches a tracked keyword it increments the tally, persists the new
//! count and the raw payload, then notifies each sink once. Per-event failures
//! stay inside the router: malformed payloads are dropped, storage write
//! failures are logged, and the stream always continues.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::event::{self, StreamEvent};
use crate::keyword::KeywordSet;
use crate::source::{StreamControl, StreamHandler};
use crate::storage::{CounterStore, CounterStoreExt};
use crate::tally::Tally;

/// What a sink learns about one attributed match.
#[derive(Debug, Clone, Copy)]
pub struct MatchNotice<'a> {
    /// The matched keyword.
    pub keyword: &'a str,
    /// Its count after this match.
    pub count: u64,
    /// The full tally after this match.
    pub tally: &'a Tally,
    /// The event that matched.
    pub event: &'a StreamEvent,
}

/// Receiver of match notifications: a renderer, a publisher, ...
pub trait MatchSink: Send {
    /// Called once per matched keyword per event.
    ///
    /// # Errors
    /// Failures are logged by the router and never stop the stream.
    fn on_match(&mut self, notice: &MatchNotice<'_>) -> std::io::Result<()>;
}

/// Result of routing one raw payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteReport {
    /// The payload could not be decoded and was dropped.
    pub malformed: bool,
    /// Number of keyword attributions made.
    pub matches: usize,
    /// Store writes that failed.
    pub store_failures: usize,
}

impl RouteReport {
    /// Whether any keyword was attributed.
    #[must_use]
    pub const fn matched(&self) -> bool {
        self.matches > 0
    }
}

/// Running totals since the router was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Payloads handed to the router.
    pub events_seen: u64,
    /// Events with at least one attribution.
    pub events_matched: u64,
    /// Payloads dropped as undecodable.
    pub malformed: u64,
    /// Keyword attributions; an event can contribute several.
    pub matches: u64,
    /// Failed store writes.
    pub store_failures: u64,
    /// Statuses reported through `on_error`.
    pub transport_errors: u64,
}

/// Drives tally, store and sinks for each incoming event.
pub struct EventRouter {
    tally: Tally,
    store: Arc<dyn CounterStore>,
    sinks: Vec<Box<dyn MatchSink>>,
    stats: RouterStats,
}

impl std::fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRouter")
            .field("tally", &self.tally)
            .field("sinks", &self.sinks.len())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

impl EventRouter {
    pub fn new(tally: Tally, store: Arc<dyn CounterStore>) -> Self {
        Self {
            tally,
            store,
            sinks: Vec::new(),
            stats: RouterStats::default(),
        }
    }

    /// Add a sink notified after every match.
    pub fn add_sink(&mut self, sink: Box<dyn MatchSink>) {
        self.sinks.push(sink);
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn MatchSink>) -> Self {
        self.add_sink(sink);
        self
    }

    #[must_use]
    pub fn tally(&self) -> &Tally {
        &self.tally
    }

    #[must_use]
    pub fn keywords(&self) -> &Arc<KeywordSet> {
        self.tally.keywords()
    }

    #[must_use]
    pub const fn stats(&self) -> RouterStats {
        self.stats
    }

    /// Give back the tally, dropping the sinks.
    #[must_use]
    pub fn into_tally(self) -> Tally {
        self.tally
    }

    /// Route one raw payload to completion.
    pub fn process(&mut self, raw: &[u8]) -> RouteReport {
        self.stats.events_seen += 1;
        let mut report = RouteReport::default();

        let decoded = match event::decode(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(error = %e, bytes = raw.len(), "Dropping undecodable event");
                self.stats.malformed += 1;
                report.malformed = true;
                return report;
            }
        };

        let event_id = decoded.event.event_id();
        let matched: Vec<String> = decoded
            .event
            .hashtags()
            .filter(|tag| self.tally.keywords().contains(tag))
            .map(str::to_string)
            .collect();

        for keyword in &matched {
            let count = match self.tally.increment(keyword) {
                Ok(count) => count,
                Err(e) => {
                    warn!(error = %e, "Matched keyword missing from tally");
                    continue;
                }
            };
            report.matches += 1;

            if let Err(e) = self.store.set_count(keyword, count) {
                warn!(keyword = %keyword, count, error = %e, "Failed to persist count");
                report.store_failures += 1;
            }

            match &event_id {
                Some(id) => {
                    if let Err(e) = self.store.set(id, decoded.raw.clone()) {
                        warn!(event_id = %id, error = %e, "Failed to persist matched event");
                        report.store_failures += 1;
                    }
                }
                None => debug!(keyword = %keyword, "Matched event has no id; payload not stored"),
            }

            let notice = MatchNotice {
                keyword,
                count,
                tally: &self.tally,
                event: &decoded.event,
            };
            for sink in &mut self.sinks {
                if let Err(e) = sink.on_match(&notice) {
                    warn!(keyword = %keyword, error = %e, "Match sink failed");
                }
            }
        }

        if report.matched() {
            self.stats.events_matched += 1;
            self.stats.matches += report.matches as u64;
        }
        self.stats.store_failures += report.store_failures as u64;
        report
    }
}

impl StreamHandler for EventRouter {
    fn on_data(&mut self, raw: &[u8]) -> StreamControl {
        self.process(raw);
        StreamControl::Continue
    }

    fn on_error(&mut self, status: u16) -> StreamControl {
        self.stats.transport_errors += 1;
        error!(status, "Listener had problems connecting. Status: {status}");
        StreamControl::Continue
    }
}
