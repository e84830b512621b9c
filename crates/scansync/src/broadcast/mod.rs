//! Status persistence and live item updates.
//!
//! Every status change goes through the [`StatusSink`], which writes the
//! row and then hands a snapshot to an [`UpdateNotifier`].

pub mod item_updates;
pub mod sink;

pub use item_updates::{
    FanoutNotifier, ItemNotification, ItemUpdateBroadcaster, UpdateNotifier,
};
pub use sink::{SinkError, StatusSink};
