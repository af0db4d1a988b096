// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::api::PpId;
use crate::api::SendOptions;
use crate::api::StreamId;
use crate::packet::data::Data;
use crate::tx::MessageKey;
use crate::tx::OutboundChunk;
use crate::types::Ssn;
use crate::types::StreamKey;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::time::Instant;

/// The FIFO of DATA chunks awaiting their first transmission.
///
/// Messages are fragmented to the MTU when they are enqueued, so all
/// fragments of one message sit contiguously in the queue, already carrying
/// their stream sequence number. TSNs are not assigned here; the send loop
/// assigns them in strict send order.
pub(crate) struct SendQueue {
    queue: VecDeque<OutboundChunk>,

    /// The last assigned SSN per stream. Created on the first ordered
    /// message to a stream and kept for the sender's lifetime.
    stream_seqnums: HashMap<StreamId, Ssn>,

    /// Payload bytes currently queued. This is the application's
    /// backpressure signal.
    buffered_amount: usize,
}

impl SendQueue {
    pub fn new() -> Self {
        Self { queue: VecDeque::new(), stream_seqnums: HashMap::new(), buffered_amount: 0 }
    }

    /// Fragments `payload` to `mtu`-sized chunks and enqueues them. All
    /// fragments of the message get the same stream sequence number; the
    /// first carries the beginning flag and the last the ending flag.
    pub fn enqueue_message(
        &mut self,
        stream_id: StreamId,
        ppid: PpId,
        payload: Vec<u8>,
        options: &SendOptions,
        mtu: usize,
        now: Instant,
    ) {
        let stream_key = StreamKey::new(options.unordered, stream_id);
        let ssn = if options.unordered {
            // The field is carried but has no meaning for unordered delivery.
            Ssn(0)
        } else {
            self.next_ssn(stream_id)
        };

        let num_fragments = payload.len().div_ceil(mtu).max(1);
        self.buffered_amount += payload.len();

        let mut fragments = payload.chunks(mtu);
        for i in 0..num_fragments {
            let fragment = fragments.next().unwrap_or(&[]);
            self.queue.push_back(OutboundChunk {
                tsn: None,
                data: Data {
                    stream_key,
                    ssn,
                    ppid,
                    payload: fragment.to_vec(),
                    is_beginning: i == 0,
                    is_end: i == num_fragments - 1,
                },
                created_at: now,
                last_sent_at: None,
                send_count: 0,
                lifetime: options.lifetime,
                max_retransmissions: options.max_retransmissions,
            });
        }
    }

    fn next_ssn(&mut self, stream_id: StreamId) -> Ssn {
        match self.stream_seqnums.get_mut(&stream_id) {
            Some(last) => {
                *last += 1;
                *last
            }
            None => {
                self.stream_seqnums.insert(stream_id, Ssn(0));
                Ssn(0)
            }
        }
    }

    pub fn dequeue(&mut self) -> Option<OutboundChunk> {
        let chunk = self.queue.pop_front()?;
        self.buffered_amount -= chunk.data.payload.len();
        Some(chunk)
    }

    /// Drops the still-queued fragments of an abandoned message. Fragments
    /// of one message are contiguous, and a partially sent message always
    /// has its remainder at the head of the queue.
    pub fn discard_message_fragments(&mut self, key: MessageKey) {
        while let Some(front) = self.queue.front() {
            if front.message_key() != key {
                break;
            }
            let chunk = self.queue.pop_front().unwrap();
            self.buffered_amount -= chunk.data.payload.len();
            log::debug!(
                "discarding queued fragment of abandoned message, sid={}, ssn={}",
                key.0.id(),
                key.1
            );
        }
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn buffered_amount(&self) -> usize {
        self.buffered_amount
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
