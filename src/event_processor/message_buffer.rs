/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

use std::collections::{BTreeMap, VecDeque};

use crate::{
    messages::ConsensusMessage,
    types::{
        basic::{BufferSize, View},
        crypto_primitives::VerifyingKey,
    },
};

/// Buffer of progress messages received for views ahead of the replica's current view.
///
/// Its size is bounded by its capacity (a number of messages). When the capacity is reached, messages for
/// the highest views are removed first to make space for messages for lower views. A message for a view
/// at least as high as every buffered view is dropped instead.
pub(crate) struct MessageBuffer {
    capacity: BufferSize,
    buffer: BTreeMap<View, VecDeque<(VerifyingKey, ConsensusMessage)>>,
    len: usize,
}

impl MessageBuffer {
    pub(crate) fn new(capacity: BufferSize) -> Self {
        Self {
            capacity,
            buffer: BTreeMap::new(),
            len: 0,
        }
    }

    /// Try inserting `msg` for `view`. Returns whether the message was buffered.
    pub(crate) fn insert(&mut self, view: View, origin: VerifyingKey, msg: ConsensusMessage) -> bool {
        if self.capacity.int() == 0 {
            return false;
        }

        if self.len >= self.capacity.int() {
            let highest_view = match self.buffer.keys().next_back() {
                Some(highest_view) => *highest_view,
                None => return false,
            };
            if view >= highest_view {
                return false;
            }
            self.remove_highest_viewed_msg();
        }

        self.buffer
            .entry(view)
            .or_default()
            .push_back((origin, msg));
        self.len += 1;
        true
    }

    /// If there are messages for `view` in the buffer, remove and return the one received earliest.
    pub(crate) fn pop(&mut self, view: View) -> Option<(VerifyingKey, ConsensusMessage)> {
        let msg_queue = self.buffer.get_mut(&view)?;
        let msg = msg_queue.pop_front();
        if msg_queue.is_empty() {
            self.buffer.remove(&view);
        }
        if msg.is_some() {
            self.len -= 1;
        }
        msg
    }

    /// Remove all messages for views less than `cur_view`.
    pub(crate) fn remove_expired_msgs(&mut self, cur_view: View) {
        self.buffer = self.buffer.split_off(&cur_view);
        self.len = self.buffer.values().map(VecDeque::len).sum();
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    fn remove_highest_viewed_msg(&mut self) {
        let highest_view = match self.buffer.keys().next_back() {
            Some(view) => *view,
            None => return,
        };
        if let Some(msg_queue) = self.buffer.get_mut(&highest_view) {
            if msg_queue.pop_back().is_some() {
                self.len -= 1;
            }
            if msg_queue.is_empty() {
                self.buffer.remove(&highest_view);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rand_core::OsRng;

    use super::*;
    use crate::{
        messages::NewView,
        types::{certificates::QuorumCertificate, crypto_primitives::SigningKey},
    };

    fn new_view(view: u64) -> ConsensusMessage {
        NewView {
            view: View::new(view),
            high_qc: QuorumCertificate::genesis_qc(),
        }
        .into()
    }

    fn view_of(msg: Option<(VerifyingKey, ConsensusMessage)>) -> Option<View> {
        msg.and_then(|(_, msg)| msg.view())
    }

    #[test]
    fn messages_are_returned_per_view_in_arrival_order() {
        let origin = SigningKey::generate(&mut OsRng).verifying_key();
        let mut buffer = MessageBuffer::new(BufferSize::new(8));

        assert!(buffer.insert(View::new(5), origin, new_view(5)));
        assert!(buffer.insert(View::new(3), origin, new_view(3)));
        assert!(buffer.insert(View::new(5), origin, new_view(5)));
        assert_eq!(buffer.len(), 3);

        assert!(buffer.pop(View::new(4)).is_none());
        assert_eq!(view_of(buffer.pop(View::new(5))), Some(View::new(5)));
        assert_eq!(view_of(buffer.pop(View::new(5))), Some(View::new(5)));
        assert!(buffer.pop(View::new(5)).is_none());
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn full_buffer_evicts_highest_views_first() {
        let origin = SigningKey::generate(&mut OsRng).verifying_key();
        let mut buffer = MessageBuffer::new(BufferSize::new(2));

        assert!(buffer.insert(View::new(4), origin, new_view(4)));
        assert!(buffer.insert(View::new(9), origin, new_view(9)));

        // Not lower than the highest buffered view, so dropped.
        assert!(!buffer.insert(View::new(9), origin, new_view(9)));
        assert!(!buffer.insert(View::new(12), origin, new_view(12)));

        // Lower, so the message for view 9 makes space for it.
        assert!(buffer.insert(View::new(6), origin, new_view(6)));
        assert_eq!(buffer.len(), 2);
        assert!(buffer.pop(View::new(9)).is_none());
        assert!(buffer.pop(View::new(6)).is_some());
    }

    #[test]
    fn expired_messages_are_removed() {
        let origin = SigningKey::generate(&mut OsRng).verifying_key();
        let mut buffer = MessageBuffer::new(BufferSize::new(8));
        for view in 2..6 {
            buffer.insert(View::new(view), origin, new_view(view));
        }

        buffer.remove_expired_msgs(View::new(4));
        assert_eq!(buffer.len(), 2);
        assert!(buffer.pop(View::new(3)).is_none());
        assert!(buffer.pop(View::new(4)).is_some());
    }

    #[test]
    fn zero_capacity_buffers_nothing() {
        let origin = SigningKey::generate(&mut OsRng).verifying_key();
        let mut buffer = MessageBuffer::new(BufferSize::new(0));
        assert!(!buffer.insert(View::new(1), origin, new_view(1)));
    }
}
