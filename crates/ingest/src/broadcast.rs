//! Non-blocking broadcast seam for realtime subscribers.

use tokio::sync::mpsc;

/// Pushes serialized events to realtime subscribers.
///
/// Implementations must not block: ingest throughput never waits on slow
/// subscribers.
pub trait Broadcaster: Send + Sync {
    /// Enqueues the message, dropping it if the channel cannot accept.
    fn broadcast(&self, msg: Vec<u8>);
}

/// Broadcaster backed by a bounded channel; the consumer side feeds
/// whatever realtime transport is wired behind it.
pub struct ChannelBroadcaster {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelBroadcaster {
    /// Creates a broadcaster with the given channel depth, returning the
    /// receiving half for the subscriber pump.
    pub fn new(depth: usize) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(depth);
        (Self { tx }, rx)
    }
}

impl Broadcaster for ChannelBroadcaster {
    fn broadcast(&self, msg: Vec<u8>) {
        // Dropped on a full or closed channel; slow subscribers must not
        // backpressure ingest.
        let _ = self.tx.try_send(msg);
    }
}
