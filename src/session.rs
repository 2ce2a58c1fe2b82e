//! Session lifecycle.
//!
//! ```text
//! Created → Authenticated → Streaming → Stopped
//!    └────────────┴─────────────┴──────────↗
//! ```
//!
//! `Stopped` is reached from every state: on normal completion, on operator
//! interruption, or on failure. Whatever the path, the counter store is
//! closed exactly once before [`Session::start`] returns, including when it
//! never opened.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crossbeam_channel::Sender;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::{RaceError, RaceResult, SourceError};
use crate::publish::{ChannelPublisher, PublishedMessage, Subscription};
use crate::router::{EventRouter, MatchSink, RouterStats};
use crate::source::EventSource;
use crate::storage::{open_store, CounterStore, CounterStoreExt, StorageError};
use crate::tally::Tally;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Built, not yet started.
    Created,
    /// The source accepted the credentials.
    Authenticated,
    /// Events are being routed.
    Streaming,
    /// Terminal; the store has been closed.
    Stopped,
}

impl SessionState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Why a session that reached streaming stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The source ran out of events or the handler stopped it.
    Completed,
    /// The operator stopped the process.
    Interrupted,
    /// The source failed mid-stream.
    Failed(String),
}

impl StopReason {
    /// Process exit code for a run that ended this way.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Completed | Self::Interrupted => 0,
            Self::Failed(_) => 1,
        }
    }
}

/// Outcome of a session that reached streaming.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Why streaming ended.
    pub reason: StopReason,
    /// Final in-memory counts.
    pub tally: Tally,
    /// Router totals for the run.
    pub stats: RouterStats,
    /// Channel matches were published on, if publishing was enabled.
    pub channel: Option<String>,
}

impl SessionReport {
    #[must_use]
    pub const fn events_seen(&self) -> u64 {
        self.stats.events_seen
    }

    #[must_use]
    pub const fn events_matched(&self) -> u64 {
        self.stats.events_matched
    }

    /// Final counts in keyword order.
    #[must_use]
    pub fn counts(&self) -> Vec<(String, u64)> {
        self.tally.snapshot()
    }

    /// Final count for `keyword`, if tracked.
    #[must_use]
    pub fn count(&self, keyword: &str) -> Option<u64> {
        self.tally.get(keyword).ok()
    }

    #[must_use]
    pub fn winner(&self) -> Option<&str> {
        self.tally.winner()
    }

    /// Process exit code for this run; see [`StopReason::exit_code`].
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        self.reason.exit_code()
    }
}

/// Holds the open store and closes it once, on `finish` or on drop.
struct StoreGuard {
    store: Option<Arc<dyn CounterStore>>,
}

impl StoreGuard {
    const fn empty() -> Self {
        Self { store: None }
    }

    fn hold(&mut self, store: Arc<dyn CounterStore>) {
        self.store = Some(store);
    }

    /// Close the held store. A no-op when nothing is held.
    fn finish(&mut self) -> Result<(), StorageError> {
        match self.store.take() {
            Some(store) => store.close(),
            None => {
                debug!("No store to close");
                Ok(())
            }
        }
    }
}

impl Drop for StoreGuard {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!(error = %e, "Failed to close counter store");
        }
    }
}

/// One tracking run over an event source.
pub struct Session<S: EventSource> {
    config: SessionConfig,
    source: S,
    store: Option<Arc<dyn CounterStore>>,
    sinks: Vec<Box<dyn MatchSink>>,
    subscribers: Vec<Sender<PublishedMessage>>,
    state: SessionState,
}

impl<S: EventSource> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("state", &self.state)
            .field("sinks", &self.sinks.len())
            .finish_non_exhaustive()
    }
}

impl<S: EventSource> Session<S> {
    pub fn new(config: SessionConfig, source: S) -> Self {
        Self {
            config,
            source,
            store: None,
            sinks: Vec::new(),
            subscribers: Vec::new(),
            state: SessionState::Created,
        }
    }

    /// Notify `sink` after every match.
    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn MatchSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Use an already open store instead of opening the configured path.
    /// The session still closes it.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Receive published matches. Only delivers when publishing is enabled.
    pub fn subscribe(&mut self) -> Subscription {
        let (tx, subscription) = Subscription::pair(ChannelPublisher::DEFAULT_CAPACITY);
        self.subscribers.push(tx);
        subscription
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Run the session to completion.
    ///
    /// # Errors
    /// - `Configuration` if the configuration is invalid
    /// - `Storage` if the store cannot be opened or rehydrated
    /// - `Authentication` if the source rejects the credentials
    ///
    /// Interruption and mid-stream source failures are not errors; they are
    /// reported through [`SessionReport::reason`].
    pub fn start(&mut self) -> RaceResult<SessionReport> {
        if self.state != SessionState::Created {
            return Err(RaceError::internal(format!(
                "session cannot start from state {:?}",
                self.state
            )));
        }
        info!(keywords = ?self.config.keywords, "Session starting");

        let mut guard = StoreGuard::empty();
        let result = self.run(&mut guard);
        let closed = guard.finish();
        self.transition(SessionState::Stopped);

        match (result, closed) {
            (Ok(report), Ok(())) => {
                info!(
                    reason = ?report.reason,
                    events = report.events_seen(),
                    matched = report.events_matched(),
                    "Session stopped"
                );
                Ok(report)
            }
            (Ok(_), Err(e)) => {
                error!(error = %e, "Failed to close counter store");
                Err(e.into())
            }
            (Err(e), closed) => {
                if let Err(close_err) = closed {
                    error!(error = %close_err, "Failed to close counter store");
                }
                error!(error = %e, "Session aborted");
                Err(e)
            }
        }
    }

    fn run(&mut self, guard: &mut StoreGuard) -> RaceResult<SessionReport> {
        // An injected store is owned from the first line so every exit closes it.
        let injected = self.store.take();
        if let Some(store) = &injected {
            guard.hold(Arc::clone(store));
        }

        let config = self.config.clone().validate()?;
        let keywords = Arc::new(config.keyword_set()?);

        let store: Arc<dyn CounterStore> = match injected {
            Some(store) => store,
            None => {
                let store: Arc<dyn CounterStore> = Arc::new(open_store(
                    &config.store.path,
                    Some(config.store.persistent()),
                )?);
                guard.hold(Arc::clone(&store));
                store
            }
        };

        let mut tally = Tally::new(keywords);
        if config.resume {
            rehydrate(&mut tally, store.as_ref())?;
        }

        let mut router = EventRouter::new(tally, Arc::clone(&store));
        for sink in self.sinks.drain(..) {
            router.add_sink(sink);
        }

        let mut channel = None;
        let mut dropped = None;
        if config.publish {
            let mut publisher = ChannelPublisher::register(store.as_ref())?;
            for tx in self.subscribers.drain(..) {
                publisher.attach(tx);
            }
            channel = Some(publisher.channel().to_string());
            dropped = Some(publisher.dropped_counter());
            router.add_sink(Box::new(publisher));
        }

        self.source.authenticate().map_err(RaceError::from)?;
        self.transition(SessionState::Authenticated);

        self.transition(SessionState::Streaming);
        let reason = match self.source.filter(&config.keywords, &mut router) {
            Ok(end) => {
                info!(end = ?end, "Stream ended");
                StopReason::Completed
            }
            Err(SourceError::Interrupted) => {
                debug!("User stopped the process. Farewell my friend!");
                StopReason::Interrupted
            }
            Err(e) => {
                error!(error = %e, "Stream failed");
                StopReason::Failed(e.to_string())
            }
        };

        if let Some(dropped) = dropped {
            let n = dropped.load(Ordering::Relaxed);
            if n > 0 {
                warn!(dropped = n, "Published matches dropped by slow subscribers");
            }
        }

        let stats = router.stats();
        Ok(SessionReport {
            reason,
            tally: router.into_tally(),
            stats,
            channel,
        })
    }

    fn transition(&mut self, to: SessionState) {
        if self.state != to {
            info!(from = ?self.state, to = ?to, "Session state changed");
            self.state = to;
        }
    }
}

/// Load persisted counts into `tally`. Keywords with no stored count stay at
/// zero.
fn rehydrate(tally: &mut Tally, store: &dyn CounterStore) -> RaceResult<()> {
    let keywords = Arc::clone(tally.keywords());
    let mut restored = 0u64;
    for keyword in keywords.iter() {
        if let Some(count) = store.get_count(keyword)? {
            tally.restore(keyword, count)?;
            restored += count;
        }
    }
    info!(restored, "Tally rehydrated from store");
    Ok(())
}
