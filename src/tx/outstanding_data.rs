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

use crate::api::StreamId;
use crate::packet::data_chunk::DataChunk;
use crate::packet::forward_tsn_chunk::ForwardTsnChunk;
use crate::packet::forward_tsn_chunk::SkippedStream;
use crate::packet::sack_chunk::GapAckBlock;
use crate::tx::MessageKey;
use crate::tx::OutboundChunk;
use crate::types::Ssn;
use crate::types::Tsn;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::time::Duration;
use std::time::Instant;

/// Keeps track of DATA chunks that have been sent at least once and handles
/// acking, gap-reported misses, timeout extraction and abandoning.
///
/// A chunk sits in exactly one of `unconfirmed` (in flight) or `abandoned`
/// (given up on, RFC 3758); `missing` only flags unconfirmed TSNs for
/// immediate retransmission. Chunks leave when the cumulative ack passes
/// them.
///
/// All TSN keys live within half the sequence ring of the cumulative ack
/// point, so the serial-number ordering of [`Tsn`] keeps the maps
/// consistently ordered across wrap-around.
pub(crate) struct OutstandingData {
    /// Chunks sent but not yet cumulatively acked, by TSN.
    unconfirmed: BTreeMap<Tsn, OutboundChunk>,

    /// TSNs flagged by peer gap reports for retransmission on the next tick.
    missing: BTreeSet<Tsn>,

    /// Chunks the sender has given up on, but whose TSN the advanced peer
    /// ack point has not yet passed on the receiver side.
    abandoned: BTreeMap<Tsn, OutboundChunk>,

    /// The highest TSN for which the peer has confirmed all preceding TSNs.
    /// Starts one before the first TSN the sender assigns.
    cumulative_ack_tsn: Tsn,

    /// RFC 3758: the cumulative TSN the peer could ack if it knew about the
    /// locally abandoned chunks. Never older than `cumulative_ack_tsn`.
    advanced_peer_ack_point: Tsn,

    /// Sum of payload bytes over `unconfirmed`.
    outstanding_bytes: usize,
}

impl OutstandingData {
    pub fn new(initial_tsn: Tsn) -> Self {
        Self {
            unconfirmed: BTreeMap::new(),
            missing: BTreeSet::new(),
            abandoned: BTreeMap::new(),
            cumulative_ack_tsn: initial_tsn - 1,
            advanced_peer_ack_point: initial_tsn - 1,
            outstanding_bytes: 0,
        }
    }

    fn is_consistent(&self) -> bool {
        let actual: usize = self.unconfirmed.values().map(|c| c.data.payload.len()).sum();
        actual == self.outstanding_bytes
            && self.missing.iter().all(|tsn| self.unconfirmed.contains_key(tsn))
            && self.advanced_peer_ack_point >= self.cumulative_ack_tsn
    }

    pub fn cumulative_ack_tsn(&self) -> Tsn {
        self.cumulative_ack_tsn
    }

    pub fn advanced_peer_ack_point(&self) -> Tsn {
        self.advanced_peer_ack_point
    }

    pub fn outstanding_bytes(&self) -> usize {
        self.outstanding_bytes
    }

    pub fn is_empty(&self) -> bool {
        self.unconfirmed.is_empty()
    }

    pub fn has_missing(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn get_unconfirmed(&self, tsn: Tsn) -> Option<&OutboundChunk> {
        self.unconfirmed.get(&tsn)
    }

    pub fn is_abandoned(&self, tsn: Tsn) -> bool {
        self.abandoned.contains_key(&tsn)
    }

    /// Inserts a freshly sent chunk. Its TSN and send state must have been
    /// stamped by the send loop.
    pub fn insert(&mut self, tsn: Tsn, chunk: OutboundChunk) {
        debug_assert!(chunk.tsn == Some(tsn));
        self.outstanding_bytes += chunk.data.payload.len();
        self.unconfirmed.insert(tsn, chunk);
        debug_assert!(self.is_consistent());
    }

    /// Removes every TSN up to and including `sack_tsn` from all tables and
    /// advances the cumulative ack point, RFC 4960 §6.3.2. Each TSN is
    /// visited exactly once; a bound on the walk guards against pathological
    /// wrap. A TSN found in no table has already been warned about in a
    /// previous pass or indicates peer misbehaviour, which is logged and
    /// skipped, never fatal.
    pub fn remove_acked(&mut self, sack_tsn: Tsn) {
        let mut safety = self.unconfirmed.len() + self.abandoned.len() + 1;
        while self.cumulative_ack_tsn != sack_tsn && safety > 0 {
            safety -= 1;
            let tsn = self.cumulative_ack_tsn + 1;

            let in_unconfirmed = match self.unconfirmed.remove(&tsn) {
                Some(chunk) => {
                    self.outstanding_bytes -= chunk.data.payload.len();
                    true
                }
                None => false,
            };
            let in_missing = self.missing.remove(&tsn);
            let in_abandoned = self.abandoned.remove(&tsn).is_some();
            if !in_unconfirmed && !in_missing && !in_abandoned {
                log::warn!("SACK acked {tsn} which was not outstanding");
            }

            self.cumulative_ack_tsn = tsn;
        }
        self.cumulative_ack_tsn = sack_tsn;

        // RFC 3758 C1: the advanced peer ack point never falls behind the
        // cumulative ack point.
        if self.advanced_peer_ack_point < self.cumulative_ack_tsn {
            self.advanced_peer_ack_point = self.cumulative_ack_tsn;
        }
        debug_assert!(self.is_consistent());
    }

    /// Flags a gap-reported TSN for retransmission on the next tick.
    pub fn mark_missing(&mut self, tsn: Tsn) {
        if self.missing.contains(&tsn) {
            return;
        }
        if !self.unconfirmed.contains_key(&tsn) {
            log::warn!("gap report for {tsn} which is not unconfirmed");
            return;
        }
        self.missing.insert(tsn);
    }

    /// Walks a SACK's gap ack blocks and flags every TSN reported missing
    /// below them. Blocks are offsets from the SACK's cumulative TSN ack;
    /// a block that is out of order or further away than `max_distance`
    /// ends processing, as everything after it is untrustworthy.
    pub fn handle_gap_reports(
        &mut self,
        cumulative_tsn_ack: Tsn,
        gap_ack_blocks: &[GapAckBlock],
        max_distance: u32,
    ) {
        let mut prev_end: u16 = 0;
        for block in gap_ack_blocks {
            if block.start as u32 > max_distance {
                log::warn!(
                    "gap ack block start {} is beyond the outstanding window, ignoring the rest",
                    block.start
                );
                break;
            }
            if block.start <= prev_end || block.end < block.start {
                log::warn!(
                    "malformed gap ack block [{}, {}], ignoring the rest",
                    block.start,
                    block.end
                );
                break;
            }
            for offset in (prev_end + 1)..block.start {
                self.mark_missing(cumulative_tsn_ack + offset as u32);
            }
            prev_end = block.end;
        }
        debug_assert!(self.is_consistent());
    }

    /// Takes up to `max` gap-reported chunks, in sequence order, stamping
    /// their retransmission on the way out. Stale entries whose chunk is no
    /// longer unconfirmed are dropped without consuming budget.
    pub fn take_missing(&mut self, max: usize, now: Instant) -> Vec<DataChunk> {
        let mut chunks = Vec::new();
        let mut processed = Vec::new();

        for &tsn in self.missing.iter() {
            if chunks.len() >= max {
                break;
            }
            processed.push(tsn);
            match self.unconfirmed.get_mut(&tsn) {
                Some(chunk) => {
                    chunk.last_sent_at = Some(now);
                    chunk.send_count = chunk.send_count.saturating_add(1);
                    chunks.push(DataChunk { tsn, data: chunk.data.clone() });
                }
                None => log::warn!("missing chunk {tsn} is not unconfirmed, dropping"),
            }
        }
        for tsn in processed {
            self.missing.remove(&tsn);
        }
        debug_assert!(self.is_consistent());
        chunks
    }

    /// Takes up to `max` chunks whose retransmission timeout has expired,
    /// in sequence order, stamping their retransmission on the way out.
    pub fn take_timed_out(&mut self, max: usize, now: Instant, rto: Duration) -> Vec<DataChunk> {
        let mut chunks = Vec::new();
        for (&tsn, chunk) in self.unconfirmed.iter_mut() {
            if chunks.len() >= max {
                break;
            }
            let expired = chunk
                .last_sent_at
                .is_some_and(|sent_at| now.duration_since(sent_at) > rto);
            if expired {
                chunk.last_sent_at = Some(now);
                chunk.send_count = chunk.send_count.saturating_add(1);
                chunks.push(DataChunk { tsn, data: chunk.data.clone() });
            }
        }
        chunks
    }

    /// Abandons the chunk at `tsn` together with all unconfirmed fragments
    /// of the same message (RFC 3758 A3); a receiver must never see a later
    /// fragment of a message whose earlier fragments were skipped over.
    /// Returns the message key so the caller can drop still-queued fragments
    /// of the message.
    pub fn abandon(&mut self, tsn: Tsn) -> Option<MessageKey> {
        let chunk = self.unconfirmed.remove(&tsn)?;
        self.outstanding_bytes -= chunk.data.payload.len();
        self.missing.remove(&tsn);

        let key = chunk.message_key();
        let whole_message = chunk.data.is_beginning && chunk.data.is_end;
        log::debug!("abandoning chunk {tsn}, sid={}, ssn={}", key.0.id(), key.1);
        self.abandoned.insert(tsn, chunk);

        if !whole_message {
            let siblings: Vec<Tsn> = self
                .unconfirmed
                .iter()
                .filter(|(_, c)| c.message_key() == key)
                .map(|(&t, _)| t)
                .collect();
            for sibling in siblings {
                let chunk = self.unconfirmed.remove(&sibling).unwrap();
                self.outstanding_bytes -= chunk.data.payload.len();
                self.missing.remove(&sibling);
                self.abandoned.insert(sibling, chunk);
            }
        }
        debug_assert!(self.is_consistent());
        Some(key)
    }

    /// Abandons every unconfirmed chunk that meets the RFC 3758 test and
    /// returns the keys of the affected messages.
    pub fn expire_outstanding_chunks(&mut self, now: Instant) -> Vec<MessageKey> {
        let expired: Vec<Tsn> = self
            .unconfirmed
            .iter()
            .filter(|(_, chunk)| chunk.should_be_abandoned(now))
            .map(|(&tsn, _)| tsn)
            .collect();

        let mut keys = Vec::new();
        for tsn in expired {
            // Abandoning one fragment moves its siblings as well, so later
            // entries may already be gone.
            if let Some(key) = self.abandon(tsn) {
                keys.push(key);
            }
        }
        keys
    }

    /// Advances the peer ack point across contiguously abandoned TSNs
    /// (RFC 3758 A5). Advancing stops early when the FORWARD-TSN announcing
    /// the new point would no longer fit `mtu` (rule C4): picking up a chunk
    /// of a not-yet-skipped ordered stream grows the chunk by one entry.
    pub fn advance_peer_ack_point(&mut self, mtu: usize) {
        let mut streams: BTreeSet<StreamId> = self
            .abandoned
            .iter()
            .filter(|(&tsn, c)| tsn <= self.advanced_peer_ack_point && c.data.stream_key.is_ordered())
            .map(|(_, c)| c.data.stream_key.id())
            .collect();

        loop {
            let next = self.advanced_peer_ack_point + 1;
            let Some(chunk) = self.abandoned.get(&next) else {
                break;
            };
            if chunk.data.stream_key.is_ordered() {
                let stream_id = chunk.data.stream_key.id();
                if !streams.contains(&stream_id)
                    && ForwardTsnChunk::size_with_skipped_streams(streams.len() + 1) > mtu
                {
                    log::warn!(
                        "FORWARD-TSN would exceed the MTU, holding ack point at {}",
                        self.advanced_peer_ack_point
                    );
                    break;
                }
                streams.insert(stream_id);
            }
            self.advanced_peer_ack_point = next;
        }
        debug_assert!(self.is_consistent());
    }

    /// Returns true when the advanced peer ack point has moved beyond the
    /// cumulative ack point, so the peer needs to be told.
    pub fn should_send_forward_tsn(&self) -> bool {
        self.advanced_peer_ack_point > self.cumulative_ack_tsn
    }

    /// Creates a FORWARD-TSN chunk for the current advanced peer ack point,
    /// carrying the highest abandoned stream sequence number of every
    /// ordered stream covered by it.
    pub fn create_forward_tsn(&self) -> ForwardTsnChunk {
        let mut skipped_per_stream: BTreeMap<StreamId, Ssn> = BTreeMap::new();
        for (&tsn, chunk) in &self.abandoned {
            if tsn > self.advanced_peer_ack_point {
                break;
            }
            if chunk.data.stream_key.is_ordered() {
                let entry =
                    skipped_per_stream.entry(chunk.data.stream_key.id()).or_insert(chunk.data.ssn);
                if chunk.data.ssn > *entry {
                    *entry = chunk.data.ssn;
                }
            }
        }

        let skipped_streams = skipped_per_stream
            .iter()
            .map(|(&stream_id, &ssn)| SkippedStream::new(stream_id, ssn))
            .collect();

        ForwardTsnChunk { new_cumulative_tsn: self.advanced_peer_ack_point, skipped_streams }
    }
}
