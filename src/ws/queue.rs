//! FIFO buffer for outbound messages awaiting transmission

use crate::ws::events::WsMessage;
use std::collections::VecDeque;
use tracing::warn;

/// Messages queued while the connection is down, flushed in FIFO order once
/// it is back. Bounded: when full, the oldest message is dropped so a
/// sustained disconnect cannot grow the queue without limit.
pub struct OutboundQueue {
    items: VecDeque<WsMessage>,
    max_size: usize,
}

impl OutboundQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Append a message to the tail
    pub fn push(&mut self, message: WsMessage) {
        if self.items.len() >= self.max_size {
            if let Some(dropped) = self.items.pop_front() {
                warn!(
                    event_type = %dropped.event_type,
                    max_size = self.max_size,
                    "Outbound queue full, dropping oldest message"
                );
            }
        }
        self.items.push_back(message);
    }

    /// Pop the head for a transmission attempt
    pub fn pop_front(&mut self) -> Option<WsMessage> {
        self.items.pop_front()
    }

    /// Restore a message to the head after a failed transmission, preserving
    /// the original relative order for the next flush attempt
    pub fn restore_front(&mut self, message: WsMessage) {
        self.items.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
