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

use crate::packet::data::Data;
use crate::types::Ssn;
use crate::types::StreamKey;
use crate::types::Tsn;
use std::time::Duration;
use std::time::Instant;

pub(crate) mod congestion;
pub(crate) mod data_sender;
pub(crate) mod outstanding_data;
pub(crate) mod retransmission_timeout;
pub(crate) mod send_queue;

/// Identifies the message a fragment belongs to. All fragments of one
/// message share the key and are contiguous in assigned TSN.
pub(crate) type MessageKey = (StreamKey, Ssn);

/// A DATA chunk tracked by the sender, together with its transmission state.
///
/// A chunk lives in exactly one place at a time: the send queue (not yet
/// sent, `tsn` unassigned), the unconfirmed table (sent, not cumulatively
/// acked) or the abandoned table (given up on, waiting for the advanced peer
/// ack point to pass it).
#[derive(Debug)]
pub(crate) struct OutboundChunk {
    /// Assigned when the chunk is first handed to the wire, not when it is
    /// enqueued.
    pub tsn: Option<Tsn>,
    pub data: Data,
    pub created_at: Instant,
    pub last_sent_at: Option<Instant>,

    /// Number of times this chunk has been put on the wire. Zero while
    /// queued; RTT is only measured when it is exactly one (Karn's rule).
    pub send_count: u16,

    /// RFC 3758 lifetime limit. `None` means unlimited.
    pub lifetime: Option<Duration>,

    /// RFC 3758 retransmission limit. `None` means unlimited.
    pub max_retransmissions: Option<u16>,
}

impl OutboundChunk {
    pub fn message_key(&self) -> MessageKey {
        (self.data.stream_key, self.data.ssn)
    }

    /// The RFC 3758 abandonment test. Only meaningful when partial
    /// reliability has been negotiated; callers gate on that.
    pub fn should_be_abandoned(&self, now: Instant) -> bool {
        if self.lifetime.is_some_and(|lifetime| now.duration_since(self.created_at) > lifetime) {
            return true;
        }
        self.max_retransmissions.is_some_and(|max| self.send_count > max)
    }
}
