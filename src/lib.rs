//! # tagrace - Live Hashtag Race
//!
//! tagrace follows a stream of social-media events, counts how often each of
//! a fixed set of hashtags appears, persists the running counts together with
//! every matched event, and draws a live leaderboard in the terminal.
//!
//! ## Core Concepts
//!
//! - **KeywordSet**: The tracked hashtags, in display order
//! - **Tally**: In-memory count per keyword; authoritative for the current run
//! - **CounterStore**: Durable key/value storage for counts and raw events
//! - **EventRouter**: Attributes each streamed event to keywords and drives updates
//! - **Session**: Owns the lifecycle and guarantees the store is closed on exit
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tagrace::{Interrupt, LineSource, Session, SessionConfig, StoreConfig};
//!
//! let interrupt = Interrupt::ctrl_c()?;
//! let config = SessionConfig::new(["rust", "go"], StoreConfig::at("database.db"));
//! let report = Session::new(config, LineSource::stdin(interrupt)).start()?;
//! println!("winner: {:?}", report.winner());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod event;
pub mod keyword;
pub mod logging;
pub mod publish;
pub mod render;
pub mod router;
pub mod session;
pub mod source;
pub mod storage;
pub mod tally;

// Re-export primary types at crate root for convenience
pub use config::{SessionConfig, StoreConfig};
pub use error::{
    AuthenticationError, ConfigurationError, DecodeError, RaceError, RaceResult, SourceError,
    TallyError,
};
pub use event::{DecodedEvent, StreamEvent};
pub use keyword::KeywordSet;
pub use logging::{LogConfig, LogGuard};
pub use publish::{ChannelPublisher, ChannelRegistry, PublishedMatch, Subscription};
pub use render::{render, TerminalRenderer};
pub use router::{EventRouter, MatchNotice, MatchSink, RouteReport, RouterStats};
pub use session::{Session, SessionReport, SessionState, StopReason};
pub use source::{
    ChannelSource, EventSource, Interrupt, InterruptHandle, LineSource, SourceMessage,
    StreamControl, StreamEnd, StreamHandler,
};
pub use storage::{
    open_store, CounterStore, CounterStoreExt, InMemoryCounterStore, PersistentConfig,
    PersistentCounterStore, StorageError,
};
pub use tally::Tally;
