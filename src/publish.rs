//! Match publication.
//!
//! Each session can claim a unique channel id, recorded in the counter store
//! so later sessions never reuse one, and broadcast every match on it as a
//! JSON message to in-process subscribers.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::router::{MatchNotice, MatchSink};
use crate::storage::{CounterStore, CounterStoreExt, StorageError};

/// Store key holding the registry. The `:` keeps it apart from hashtag keys.
pub const CHANNELS_KEY: &str = "tagrace:channels";

/// Channel ids issued so far.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRegistry {
    /// Issued ids, oldest first.
    pub channels: Vec<String>,
}

impl ChannelRegistry {
    /// Read the registry, creating an empty one if the store has none.
    pub fn load(store: &dyn CounterStore) -> Result<Self, StorageError> {
        match store.get_json::<Self>(CHANNELS_KEY)? {
            Some(registry) => Ok(registry),
            None => {
                let registry = Self::default();
                store.set_json(CHANNELS_KEY, &registry)?;
                Ok(registry)
            }
        }
    }

    /// Claim a fresh channel id and persist it.
    pub fn register(store: &dyn CounterStore) -> Result<String, StorageError> {
        let mut registry = Self::load(store)?;
        let channel = loop {
            let candidate = Uuid::new_v4().to_string();
            if !registry.contains(&candidate) {
                break candidate;
            }
        };
        registry.channels.push(channel.clone());
        store.set_json(CHANNELS_KEY, &registry)?;
        info!(channel = %channel, issued = registry.channels.len(), "Publish channel registered");
        Ok(channel)
    }

    #[must_use]
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.iter().any(|c| c == channel)
    }
}

/// Author fields carried in a published match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct PublishedUser {
    pub id: Option<String>,
    pub name: Option<String>,
    pub screen_name: Option<String>,
}

/// JSON body of a published match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedMatch {
    /// Always [`PublishedMatch::EVENT_KIND`].
    pub event: String,
    /// The matched keyword.
    pub hashtag: String,
    /// Event body.
    pub text: Option<String>,
    /// Event author.
    pub user: PublishedUser,
}

impl PublishedMatch {
    pub const EVENT_KIND: &'static str = "tweet";

    #[must_use]
    pub fn from_notice(notice: &MatchNotice<'_>) -> Self {
        let user = notice
            .event
            .user
            .as_ref()
            .map(|u| PublishedUser {
                id: u.id_string(),
                name: u.name.clone(),
                screen_name: u.screen_name.clone(),
            })
            .unwrap_or_default();
        Self {
            event: Self::EVENT_KIND.to_string(),
            hashtag: notice.keyword.to_string(),
            text: notice.event.text.clone(),
            user,
        }
    }
}

/// One message as seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    /// Channel id the message was published on.
    pub channel: String,
    /// Serialized [`PublishedMatch`].
    pub payload: String,
}

/// Receiving end of a publisher.
#[derive(Debug)]
pub struct Subscription {
    rx: Receiver<PublishedMessage>,
}

impl Subscription {
    /// A subscription and the sender a publisher adopts for it.
    pub(crate) fn pair(capacity: usize) -> (Sender<PublishedMessage>, Self) {
        let (tx, rx) = bounded(capacity.max(1));
        (tx, Self { rx })
    }

    /// Block until the next message, or `None` once the publisher is gone
    /// and the queue is empty.
    #[must_use]
    pub fn recv(&self) -> Option<PublishedMessage> {
        self.rx.recv().ok()
    }

    /// Next message, if one is queued.
    #[must_use]
    pub fn try_recv(&self) -> Option<PublishedMessage> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next message.
    #[must_use]
    pub fn recv_timeout(&self, timeout: Duration) -> Option<PublishedMessage> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Drain everything queued right now.
    #[must_use]
    pub fn drain(&self) -> Vec<PublishedMessage> {
        self.rx.try_iter().collect()
    }
}

/// Broadcasts matches on one channel. Never blocks the router: a full or
/// departed subscriber loses the message and the drop is counted.
#[derive(Debug)]
pub struct ChannelPublisher {
    channel: String,
    capacity: usize,
    subscribers: Vec<Sender<PublishedMessage>>,
    published: u64,
    dropped: Arc<AtomicU64>,
}

impl ChannelPublisher {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(channel: impl Into<String>, capacity: usize) -> Self {
        Self {
            channel: channel.into(),
            capacity: capacity.max(1),
            subscribers: Vec::new(),
            published: 0,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a channel in `store` and build a publisher for it.
    pub fn register(store: &dyn CounterStore) -> Result<Self, StorageError> {
        let channel = ChannelRegistry::register(store)?;
        Ok(Self::new(channel, Self::DEFAULT_CAPACITY))
    }

    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Attach a new subscriber.
    pub fn subscribe(&mut self) -> Subscription {
        let (tx, subscription) = Subscription::pair(self.capacity);
        self.attach(tx);
        subscription
    }

    /// Adopt a subscriber created before the channel existed.
    pub(crate) fn attach(&mut self, tx: Sender<PublishedMessage>) {
        self.subscribers.push(tx);
    }

    /// Shared counter of messages dropped because a subscriber was full.
    #[must_use]
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }

    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub const fn published(&self) -> u64 {
        self.published
    }

    /// Send `payload` to every live subscriber.
    pub fn publish(&mut self, payload: String) {
        debug!(channel = %self.channel, "Publishing to channel {}", self.channel);
        let channel = &self.channel;
        let dropped = &self.dropped;
        self.subscribers.retain(|tx| {
            let msg = PublishedMessage {
                channel: channel.clone(),
                payload: payload.clone(),
            };
            match tx.try_send(msg) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            }
        });
        self.published += 1;
    }
}

impl MatchSink for ChannelPublisher {
    fn on_match(&mut self, notice: &MatchNotice<'_>) -> io::Result<()> {
        let body = PublishedMatch::from_notice(notice);
        let payload =
            serde_json::to_string(&body).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        self.publish(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventUser, StreamEvent};
    use crate::keyword::KeywordSet;
    use crate::storage::InMemoryCounterStore;
    use crate::tally::Tally;

    #[test]
    fn test_registry_is_created_lazily_and_appended() {
        let store = InMemoryCounterStore::new();
        assert!(store.get(CHANNELS_KEY).unwrap().is_none());

        let first = ChannelRegistry::register(&store).unwrap();
        let second = ChannelRegistry::register(&store).unwrap();
        assert_ne!(first, second);

        let registry = ChannelRegistry::load(&store).unwrap();
        assert_eq!(registry.channels, vec![first, second]);
        assert!(store.get(CHANNELS_KEY).unwrap().unwrap()["channels"].is_array());
    }

    #[test]
    fn test_publishes_match_payload() {
        let tally = Tally::new(std::sync::Arc::new(KeywordSet::new(["rust"]).unwrap()));
        let event = StreamEvent {
            text: Some("I like #rust".to_string()),
            user: Some(EventUser {
                id: Some(42),
                name: Some("Ferris".to_string()),
                screen_name: Some("ferris".to_string()),
                ..EventUser::default()
            }),
            ..StreamEvent::default()
        };
        let notice = MatchNotice {
            keyword: "rust",
            count: 1,
            tally: &tally,
            event: &event,
        };

        let mut publisher = ChannelPublisher::new("chan-1", 4);
        let sub = publisher.subscribe();
        publisher.on_match(&notice).unwrap();

        let msg = sub.try_recv().unwrap();
        assert_eq!(msg.channel, "chan-1");
        let body: PublishedMatch = serde_json::from_str(&msg.payload).unwrap();
        assert_eq!(body.event, "tweet");
        assert_eq!(body.hashtag, "rust");
        assert_eq!(body.user.id.as_deref(), Some("42"));
        assert_eq!(body.user.screen_name.as_deref(), Some("ferris"));
    }

    #[test]
    fn test_full_subscriber_drops_without_blocking() {
        let mut publisher = ChannelPublisher::new("chan", 1);
        let sub = publisher.subscribe();
        publisher.publish("one".to_string());
        publisher.publish("two".to_string());

        assert_eq!(publisher.dropped(), 1);
        assert_eq!(publisher.published(), 2);
        assert_eq!(sub.drain().len(), 1);
    }

    #[test]
    fn test_departed_subscriber_is_forgotten() {
        let mut publisher = ChannelPublisher::new("chan", 4);
        let kept = publisher.subscribe();
        drop(publisher.subscribe());
        publisher.publish("x".to_string());

        assert_eq!(publisher.subscribers.len(), 1);
        assert_eq!(publisher.dropped(), 0);
        assert_eq!(kept.drain().len(), 1);
    }
}
