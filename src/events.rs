// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Extraction Progress Events
 * Telemetry handed to an external progress reporter
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use crate::types::Technique;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Calibrated {
        point: String,
        techniques: Vec<Technique>,
    },
    LengthResolved {
        fingerprint: String,
        length: usize,
    },
    /// `position` is 1-based, `code` is a Unicode code point
    PositionResolved {
        fingerprint: String,
        position: usize,
        code: u32,
    },
    /// Character fell outside the active alphabet; full code point range was searched
    CharsetDegraded {
        fingerprint: String,
        position: usize,
    },
    TechniqueSwitched {
        point: String,
        from: Technique,
        to: Technique,
    },
    RowFinished {
        index: usize,
        success: bool,
    },
    BreakerTripped {
        blocks: u32,
    },
}

/// Receives progress events. Implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Forwards events into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: ProgressEvent) {
        // Receiver gone means nobody is listening any more
        let _ = self.tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(ProgressEvent::BreakerTripped { blocks: 3 });

        assert_eq!(rx.recv().await, Some(ProgressEvent::BreakerTripped { blocks: 3 }));
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(ProgressEvent::RowFinished {
            index: 0,
            success: true,
        });
    }
}
