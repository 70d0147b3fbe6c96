//! Change notification layer: a typed row-change feed plus the multiplexer
//! that debounces it for dashboard observers.

pub mod feed;
pub mod multiplexer;

pub use feed::{ChangeFeed, ChangeOp, FeedEvent, InProcessFeed, RowChange, RowFilter, channel_key};
pub use multiplexer::{
    ChangeCallback, ChangeMultiplexer, ChannelState, Health, Subscription, DEFAULT_DEBOUNCE_WINDOW,
    POLL_INTERVAL,
};
