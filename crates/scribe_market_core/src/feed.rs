//! crates/scribe_market_core/src/feed.rs
//!
//! In-process change feed backing `MarketStore::subscribe`, built on tokio
//! broadcast channels keyed by topic. Store adapters publish a fresh snapshot
//! after every committed write; subscribers only ever see the latest state.
//!
//! Changes are only delivered within a single process.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::ports::{Change, ChangeStream, Topic};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Default)]
pub struct ChangeHub {
    channels: Arc<DashMap<Topic, broadcast::Sender<Change>>>,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops the topic's channel once nobody is listening.
    fn prune(&self, topic: &Topic) {
        self.channels
            .remove_if(topic, |_, tx| tx.receiver_count() == 0);
    }

    /// True when at least one live stream is watching the topic.
    pub fn has_subscribers(&self, topic: &Topic) -> bool {
        let live = self
            .channels
            .get(topic)
            .map(|tx| tx.receiver_count() > 0)
            .unwrap_or(false);
        if !live {
            self.prune(topic);
        }
        live
    }

    pub fn publish(&self, topic: &Topic, change: Change) {
        let delivered = match self.channels.get(topic) {
            Some(tx) => tx.send(change).is_ok(),
            None => return,
        };
        if !delivered {
            self.prune(topic);
        }
    }

    pub fn subscribe(&self, topic: Topic) -> ChangeStream {
        // Subscribing under the entry guard keeps a concurrent prune from orphaning the receiver.
        let rx = self
            .channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        // A lagged receiver skips ahead; the next snapshot carries the full state anyway.
        let stream = BroadcastStream::new(rx).filter_map(|result| result.ok());
        Box::pin(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::NotificationInbox;
    use uuid::Uuid;

    #[tokio::test]
    async fn subscribers_receive_published_snapshots() {
        let hub = ChangeHub::new();
        let user = Uuid::new_v4();
        let topic = Topic::Inbox(user);

        let mut stream = hub.subscribe(topic.clone());
        assert!(hub.has_subscribers(&topic));

        hub.publish(&topic, Change::Inbox(NotificationInbox::empty(user)));

        let received = tokio::time::timeout(std::time::Duration::from_millis(100), stream.next())
            .await
            .expect("timeout")
            .expect("stream ended");
        match received {
            Change::Inbox(inbox) => assert_eq!(inbox.user_id, user),
            other => panic!("unexpected change: {:?}", other),
        }
    }

    #[tokio::test]
    async fn dropping_the_stream_unsubscribes() {
        let hub = ChangeHub::new();
        let topic = Topic::Chat("a-b".to_string());
        let stream = hub.subscribe(topic.clone());
        drop(stream);
        assert!(!hub.has_subscribers(&topic));
    }

    #[tokio::test]
    async fn abandoned_topics_are_pruned() {
        let hub = ChangeHub::new();
        let user = Uuid::new_v4();
        let kept = hub.subscribe(Topic::OpenAssignments);
        let stream = hub.subscribe(Topic::Inbox(user));
        assert_eq!(hub.channels.len(), 2);

        drop(stream);
        hub.publish(
            &Topic::Inbox(user),
            Change::Inbox(NotificationInbox::empty(user)),
        );
        assert_eq!(hub.channels.len(), 1);
        assert!(hub.has_subscribers(&Topic::OpenAssignments));

        // Resubscribing recreates the channel.
        let _again = hub.subscribe(Topic::Inbox(user));
        assert!(hub.has_subscribers(&Topic::Inbox(user)));
        drop(kept);
    }
}
