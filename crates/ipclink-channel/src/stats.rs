use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Live counters for one channel binding.
#[derive(Debug, Default)]
pub struct ChannelStats {
    messages_sent: AtomicU64,
    frames_sent: AtomicU64,
    retries: AtomicU64,
    backpressure: AtomicU64,
    messages_received: AtomicU64,
    frames_received: AtomicU64,
}

/// Point-in-time copy of [`ChannelStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub messages_sent: u64,
    pub frames_sent: u64,
    pub retries: u64,
    pub backpressure: u64,
    pub messages_received: u64,
    pub frames_received: u64,
}

impl ChannelStats {
    pub(crate) fn record_sent(&self, frames: u64) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
        self.frames_sent.fetch_add(frames, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_backpressure(&self) {
        self.backpressure.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            backpressure: self.backpressure.load(Ordering::Relaxed),
            messages_received: self.messages_received.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counters() {
        let stats = ChannelStats::default();
        stats.record_sent(3);
        stats.record_sent(1);
        stats.record_retry();
        stats.record_backpressure();
        stats.record_frame_received();
        stats.record_frame_received();
        stats.record_message_received();

        let snap = stats.snapshot();
        assert_eq!(snap.messages_sent, 2);
        assert_eq!(snap.frames_sent, 4);
        assert_eq!(snap.retries, 1);
        assert_eq!(snap.backpressure, 1);
        assert_eq!(snap.frames_received, 2);
        assert_eq!(snap.messages_received, 1);
    }

    #[test]
    fn snapshot_serializes_flat() {
        let json = serde_json::to_value(StatsSnapshot::default()).expect("snapshot serializes");
        assert_eq!(json["frames_sent"], 0);
        assert_eq!(json.as_object().map(|o| o.len()), Some(6));
    }
}
