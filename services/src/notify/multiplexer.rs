//! Debouncing subscription engine over the change feed.
//!
//! Each subscription channel runs a small two-state machine on its own tokio
//! task. In `Live` state, raw change events restart a debounce timer and the
//! caller's `on_change` fires exactly once per burst. A fatal relation error
//! (or the feed closing) tears the channel down and degrades it to `Polling`:
//! `on_change` fires immediately, then on a fixed interval, until the caller
//! unsubscribes. Transient channel errors are logged and left to the
//! underlying transport to recover from.

use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, Instant};

use super::feed::{ChangeFeed, FeedEvent, RowFilter, channel_key};

pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
pub const POLL_INTERVAL: Duration = Duration::from_millis(30_000);

/// Coalesced refresh signal delivered to an observer.
pub type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ChannelState {
    Live,
    Polling,
    Closed,
}

/// Coarse health as dashboards see it: `Degraded` once any channel has
/// fallen back to polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Health {
    Live,
    Degraded,
}

pub struct ChangeMultiplexer {
    feed: Arc<dyn ChangeFeed>,
}

impl ChangeMultiplexer {
    pub fn new(feed: Arc<dyn ChangeFeed>) -> Self {
        Self { feed }
    }

    /// Subscribes with the default 500 ms debounce window.
    pub fn subscribe(
        &self,
        table: &str,
        filter: RowFilter,
        on_change: ChangeCallback,
    ) -> Subscription {
        self.subscribe_with(table, filter, on_change, DEFAULT_DEBOUNCE_WINDOW)
    }

    pub fn subscribe_with(
        &self,
        table: &str,
        filter: RowFilter,
        on_change: ChangeCallback,
        debounce_window: Duration,
    ) -> Subscription {
        Subscription {
            channels: vec![self.open(table, &filter, on_change, debounce_window)],
        }
    }

    /// Opens one channel per `(table, filter)` pair, each with its own
    /// debounce, sharing one callback. The returned subscription tears all of
    /// them down at once.
    pub fn subscribe_all(
        &self,
        targets: &[(&str, RowFilter)],
        on_change: ChangeCallback,
        debounce_window: Duration,
    ) -> Subscription {
        let channels = targets
            .iter()
            .map(|(table, filter)| self.open(table, filter, on_change.clone(), debounce_window))
            .collect();
        Subscription { channels }
    }

    fn open(
        &self,
        table: &str,
        filter: &RowFilter,
        on_change: ChangeCallback,
        window: Duration,
    ) -> ChannelHandle {
        let key = channel_key(table, filter);
        let rx = self.feed.open_channel(table, filter);
        let state = Arc::new(Mutex::new(ChannelState::Live));

        log::debug!("channel {key}: subscribed, debounce window {window:?}");
        let task = tokio::spawn(run_channel(
            rx,
            key.clone(),
            on_change,
            window,
            Arc::clone(&state),
        ));

        ChannelHandle { key, state, task }
    }
}

struct ChannelHandle {
    key: String,
    state: Arc<Mutex<ChannelState>>,
    task: JoinHandle<()>,
}

impl ChannelHandle {
    fn state(&self) -> ChannelState {
        *self.state.lock().expect("channel state lock poisoned")
    }

    fn close(&self) {
        {
            let mut state = self.state.lock().expect("channel state lock poisoned");
            if *state == ChannelState::Closed {
                return;
            }
            log::info!("channel {}: {} -> {}", self.key, *state, ChannelState::Closed);
            *state = ChannelState::Closed;
        }
        // Aborting cancels a pending debounce timer or polling interval with it.
        self.task.abort();
    }
}

/// Handle for one subscription (one or more feed channels).
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    channels: Vec<ChannelHandle>,
}

impl Subscription {
    /// Idempotent teardown. Safe mid-debounce, mid-poll, after a fatal-error
    /// fallback has already torn the channel down, and on repeated calls.
    pub fn unsubscribe(&self) {
        for channel in &self.channels {
            channel.close();
        }
    }

    /// State of the subscription's first channel. Single-channel
    /// subscriptions only ever have one.
    pub fn state(&self) -> ChannelState {
        self.channels
            .first()
            .map(ChannelHandle::state)
            .unwrap_or(ChannelState::Closed)
    }

    pub fn channel_states(&self) -> Vec<(String, ChannelState)> {
        self.channels
            .iter()
            .map(|c| (c.key.clone(), c.state()))
            .collect()
    }

    pub fn health(&self) -> Health {
        if self
            .channels
            .iter()
            .any(|c| c.state() == ChannelState::Polling)
        {
            Health::Degraded
        } else {
            Health::Live
        }
    }

    pub fn is_closed(&self) -> bool {
        self.channels
            .iter()
            .all(|c| c.state() == ChannelState::Closed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

async fn run_channel(
    mut rx: broadcast::Receiver<FeedEvent>,
    key: String,
    on_change: ChangeCallback,
    window: Duration,
    state: Arc<Mutex<ChannelState>>,
) {
    let reason = live_loop(&mut rx, &key, &on_change, window).await;
    drop(rx);

    {
        let mut state = state.lock().expect("channel state lock poisoned");
        // An unsubscribe that raced the fatal transition wins; Closed is terminal.
        if *state == ChannelState::Closed {
            return;
        }
        log::warn!(
            "channel {key}: {} -> {} ({reason}); polling every {POLL_INTERVAL:?}",
            *state,
            ChannelState::Polling
        );
        *state = ChannelState::Polling;
    }

    let mut ticker = time::interval(POLL_INTERVAL);
    loop {
        // First tick completes immediately: one refresh right away, then one
        // per interval until the task is aborted.
        ticker.tick().await;
        on_change();
    }
}

/// Live half of the channel state machine. Returns the reason the channel has
/// to degrade to polling.
async fn live_loop(
    rx: &mut broadcast::Receiver<FeedEvent>,
    key: &str,
    on_change: &ChangeCallback,
    window: Duration,
) -> String {
    let mut pending = false;
    let debounce = time::sleep(window);
    tokio::pin!(debounce);

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Ok(FeedEvent::Change(change)) => {
                    log::debug!("channel {key}: {} on {}", change.op, change.table);
                    pending = true;
                    debounce.as_mut().reset(Instant::now() + window);
                }
                Ok(FeedEvent::TransientError(reason)) => {
                    // Reconnecting is the transport's responsibility.
                    log::warn!("channel {key}: transient feed error: {reason}");
                }
                Ok(FeedEvent::Fatal(reason)) => {
                    return format!("fatal relation error: {reason}");
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // Dropped events still mean at least one change happened.
                    log::warn!("channel {key}: lagged, {skipped} events dropped");
                    pending = true;
                    debounce.as_mut().reset(Instant::now() + window);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return "feed channel closed".into();
                }
            },
            _ = &mut debounce, if pending => {
                pending = false;
                on_change();
            }
        }
    }
}
