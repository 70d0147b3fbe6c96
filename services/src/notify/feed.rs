//! Typed event source over storage row changes.
//!
//! Observers never see the transport's own event vocabulary: a channel
//! delivers `FeedEvent`s, either a row change, a transient delivery problem,
//! or a fatal relation error meaning the feed cannot serve this table/filter
//! at all. Channels are keyed per `(table, filter)` pair and fan out through
//! tokio broadcast senders, created lazily and pruned once the last
//! subscriber is gone.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, strum::Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A single row-level change as reported by the storage layer.
#[derive(Debug, Clone)]
pub struct RowChange {
    pub table: String,
    pub op: ChangeOp,
    pub row: Value,
}

/// What a feed channel can deliver.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Change(RowChange),
    /// Timeout/reconnect-worthy hiccup. The transport retries; observers
    /// only log.
    TransientError(String),
    /// The feed cannot deliver events for this table/filter at all.
    Fatal(String),
}

/// Row predicate attached to a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowFilter {
    All,
    /// `column = value`, compared against the row's JSON field.
    Eq(String, String),
}

impl RowFilter {
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            RowFilter::All => true,
            RowFilter::Eq(column, value) => match row.get(column) {
                Some(Value::String(s)) => s == value,
                Some(other) => other.to_string() == *value,
                None => false,
            },
        }
    }

    pub fn key(&self) -> String {
        match self {
            RowFilter::All => "*".into(),
            RowFilter::Eq(column, value) => format!("{column}=eq.{value}"),
        }
    }
}

pub fn channel_key(table: &str, filter: &RowFilter) -> String {
    format!("{table}:{}", filter.key())
}

/// Source of feed channels, as seen by the multiplexer.
pub trait ChangeFeed: Send + Sync {
    fn open_channel(&self, table: &str, filter: &RowFilter) -> broadcast::Receiver<FeedEvent>;
}

struct ChannelSlot {
    sender: broadcast::Sender<FeedEvent>,
    table: String,
    filter: RowFilter,
}

/// In-process feed hub.
///
/// The engine's own writers publish into it after every successful storage
/// mutation; any number of observers subscribe through `ChangeFeed`. Channels
/// with no remaining receivers are removed on the next delivery to them.
#[derive(Default)]
pub struct InProcessFeed {
    channels: RwLock<HashMap<String, ChannelSlot>>,
}

impl InProcessFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fans a row change out to every channel watching its table whose
    /// filter accepts the row.
    pub fn publish(&self, change: RowChange) {
        self.deliver(&change.table, |slot| {
            slot.filter
                .matches(&change.row)
                .then(|| FeedEvent::Change(change.clone()))
        });
    }

    /// Signals a reconnect-worthy hiccup to every channel on `table`.
    pub fn raise_transient(&self, table: &str, reason: &str) {
        self.deliver(table, |_| Some(FeedEvent::TransientError(reason.to_string())));
    }

    /// Signals that the feed can no longer serve `table` at all.
    pub fn raise_fatal(&self, table: &str, reason: &str) {
        self.deliver(table, |_| Some(FeedEvent::Fatal(reason.to_string())));
    }

    fn deliver<F>(&self, table: &str, event_for: F)
    where
        F: Fn(&ChannelSlot) -> Option<FeedEvent>,
    {
        let mut channels = self.channels.write().expect("feed lock poisoned");
        let mut dead = Vec::new();

        for (key, slot) in channels.iter() {
            if slot.table != table {
                continue;
            }
            if let Some(event) = event_for(slot) {
                let _ = slot.sender.send(event);
                if slot.sender.receiver_count() == 0 {
                    log::info!("removing feed channel '{key}': no subscribers left");
                    dead.push(key.clone());
                }
            }
        }

        for key in dead {
            channels.remove(&key);
        }
    }
}

impl ChangeFeed for InProcessFeed {
    fn open_channel(&self, table: &str, filter: &RowFilter) -> broadcast::Receiver<FeedEvent> {
        let key = channel_key(table, filter);
        let mut channels = self.channels.write().expect("feed lock poisoned");
        channels
            .entry(key)
            .or_insert_with(|| ChannelSlot {
                sender: broadcast::channel(CHANNEL_CAPACITY).0,
                table: table.to_string(),
                filter: filter.clone(),
            })
            .sender
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn channel_keys_are_stable_per_table_and_filter() {
        assert_eq!(channel_key("attendance_records", &RowFilter::All), "attendance_records:*");
        assert_eq!(
            channel_key(
                "attendance_records",
                &RowFilter::Eq("session_id".into(), "7".into())
            ),
            "attendance_records:session_id=eq.7"
        );
    }

    #[test]
    fn eq_filter_matches_string_and_numeric_fields() {
        let filter = RowFilter::Eq("session_id".into(), "7".into());
        assert!(filter.matches(&json!({"session_id": 7})));
        assert!(filter.matches(&json!({"session_id": "7"})));
        assert!(!filter.matches(&json!({"session_id": 8})));
        assert!(!filter.matches(&json!({"other": 7})));
    }

    #[tokio::test]
    async fn publish_reaches_matching_subscribers_only() {
        let feed = InProcessFeed::new();
        let mut rx_all = feed.open_channel("attendance_records", &RowFilter::All);
        let mut rx_seven = feed.open_channel(
            "attendance_records",
            &RowFilter::Eq("session_id".into(), "7".into()),
        );

        feed.publish(RowChange {
            table: "attendance_records".into(),
            op: ChangeOp::Insert,
            row: json!({"session_id": 9}),
        });

        assert!(matches!(rx_all.try_recv(), Ok(FeedEvent::Change(_))));
        assert!(rx_seven.try_recv().is_err());
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let feed = InProcessFeed::new();
        feed.publish(RowChange {
            table: "attendance_sessions".into(),
            op: ChangeOp::Update,
            row: json!({"id": 1}),
        });
    }

    #[tokio::test]
    async fn dropped_receivers_prune_the_channel() {
        let feed = InProcessFeed::new();
        {
            let _rx = feed.open_channel("attendance_records", &RowFilter::All);
        }
        feed.publish(RowChange {
            table: "attendance_records".into(),
            op: ChangeOp::Insert,
            row: json!({"session_id": 1}),
        });
        assert!(feed.channels.read().unwrap().is_empty());
    }
}
