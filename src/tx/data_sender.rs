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

use crate::api::BurstCompleteCallback;
use crate::api::DEFAULT_MTU;
use crate::api::Options;
use crate::api::PpId;
use crate::api::SendChunkCallback;
use crate::api::SendOptions;
use crate::api::StreamId;
use crate::packet::chunk::Chunk;
use crate::packet::data_chunk::DataChunk;
use crate::packet::forward_tsn_chunk::ForwardTsnChunk;
use crate::packet::sack_chunk::SackChunk;
use crate::tx::congestion::CongestionControl;
use crate::tx::outstanding_data::OutstandingData;
use crate::tx::retransmission_timeout::RetransmissionTimeout;
use crate::tx::send_queue::SendQueue;
use crate::types::Tsn;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;
use tokio::sync::Notify;

/// The reliable data sender of one SCTP association.
///
/// Application messages are fragmented and queued by [`Self::send_data`], a
/// dedicated worker started by [`Self::start_sending`] drains the queue
/// within the congestion and receiver windows, and peer SACKs are fed in
/// through [`Self::handle_sack`]. Outgoing chunks are handed to the send
/// callback; the association frames them into packets.
///
/// All entry points may be called from any task or thread. Mutable state
/// sits behind a single lock, held for the duration of one send-loop tick,
/// one SACK, or one message enqueue, and never while a callback runs.
pub struct DataSender {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    options: Options,
    on_send: SendChunkCallback,
    on_burst_complete: Option<BurstCompleteCallback>,
    state: Mutex<SenderState>,
    signal: Notify,
    started: AtomicBool,
    closed: AtomicBool,
}

struct SenderState {
    send_queue: SendQueue,
    outstanding: OutstandingData,
    congestion: CongestionControl,
    rto: RetransmissionTimeout,

    /// The TSN to assign to the next freshly sent DATA chunk.
    next_tsn: Tsn,

    /// If the association negotiated RFC 3758 forward-TSN support.
    partial_reliability: bool,

    /// Set on timer-driven retransmission, cleared by any SACK. While set,
    /// the burst budget is a single chunk per tick.
    in_retransmit_mode: bool,

    /// The value and time of the last emitted FORWARD-TSN, for duplicate
    /// suppression.
    last_forward_tsn: Option<(Tsn, Instant)>,

    rtx_packets_count: usize,
    rtx_bytes_count: u64,
}

impl DataSender {
    /// Creates a sender for the association `name` (used in log lines only).
    /// `initial_tsn` is the TSN of the first DATA chunk that will be sent
    /// and `initial_a_rwnd` the window the peer advertised during the
    /// handshake. An `options.mtu` of zero selects the default MTU.
    pub fn new(
        name: &str,
        options: &Options,
        initial_tsn: Tsn,
        initial_a_rwnd: u32,
        on_send: SendChunkCallback,
        on_burst_complete: Option<BurstCompleteCallback>,
    ) -> Self {
        let mut options = options.clone();
        if options.mtu == 0 {
            options.mtu = DEFAULT_MTU;
        }
        let state = SenderState {
            send_queue: SendQueue::new(),
            outstanding: OutstandingData::new(initial_tsn),
            congestion: CongestionControl::new(options.mtu, initial_a_rwnd),
            rto: RetransmissionTimeout::new(&options),
            next_tsn: initial_tsn,
            partial_reliability: false,
            in_retransmit_mode: false,
            last_forward_tsn: None,
            rtx_packets_count: 0,
            rtx_bytes_count: 0,
        };
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                options,
                on_send,
                on_burst_complete,
                state: Mutex::new(state),
                signal: Notify::new(),
                started: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Tells the sender whether the association negotiated the Partial
    /// Reliability Extension (RFC 3758). Lifetime and retransmission limits
    /// on messages only take effect when it did.
    pub fn set_supports_partial_reliability(&self, supported: bool) {
        self.inner.state.lock().unwrap().partial_reliability = supported;
    }

    /// Updates the stored initial advertised receiver window, typically when
    /// the peer's real window becomes known after the handshake. Does not
    /// directly alter the current receiver window.
    pub fn set_receiver_window(&self, a_rwnd: u32) {
        self.inner.state.lock().unwrap().congestion.set_initial_remote_a_rwnd(a_rwnd);
    }

    /// Fragments `payload` and queues it for transmission on `stream_id`.
    /// The whole message is enqueued atomically; concurrent calls interleave
    /// at message boundaries, never between fragments.
    ///
    /// There is no local failure: backpressure is applied by watching
    /// [`Self::buffered_amount`], and with partial reliability a message may
    /// silently end up abandoned instead of delivered.
    pub fn send_data(
        &self,
        stream_id: StreamId,
        ppid: PpId,
        payload: Vec<u8>,
        options: &SendOptions,
    ) {
        {
            let mut state = self.inner.state.lock().unwrap();
            state.send_queue.enqueue_message(
                stream_id,
                ppid,
                payload,
                options,
                self.inner.options.mtu,
                Instant::now(),
            );
        }
        self.inner.signal.notify_one();
    }

    /// Processes a SACK decoded from the peer, RFC 4960 §6.2.1 and
    /// RFC 3758 §3.5. Peer protocol violations are logged and skipped; they
    /// never tear down the association from here.
    pub fn handle_sack(&self, sack: &SackChunk) {
        let forward_tsn = {
            let mut state = self.inner.state.lock().unwrap();
            state.handle_sack(sack, Instant::now(), &self.inner.options)
        };
        if let Some(chunk) = forward_tsn {
            (self.inner.on_send)(Chunk::ForwardTsn(chunk));
        }
        self.inner.signal.notify_one();
    }

    /// Spawns the send-loop worker on the current tokio runtime. Calling it
    /// again is a no-op.
    pub fn start_sending(&self) {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        tokio::spawn(async move {
            inner.run().await;
        });
    }

    /// Requests worker shutdown. The loop finishes its current iteration
    /// and exits; queued and in-flight chunks are left untouched. Calling it
    /// again is a no-op, and dropping the sender closes it as well.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::debug!("[{}] closing", self.inner.name);
        self.inner.signal.notify_one();
    }

    /// Payload bytes queued but not yet handed to the wire.
    pub fn buffered_amount(&self) -> usize {
        self.inner.state.lock().unwrap().send_queue.buffered_amount()
    }

    /// The TSN that will be assigned to the next freshly sent DATA chunk.
    pub fn next_tsn(&self) -> Tsn {
        self.inner.state.lock().unwrap().next_tsn
    }

    /// Number of send-loop ticks that retransmitted at least one chunk.
    pub fn rtx_packets_count(&self) -> usize {
        self.inner.state.lock().unwrap().rtx_packets_count
    }

    /// Total payload bytes retransmitted.
    pub fn rtx_bytes_count(&self) -> u64 {
        self.inner.state.lock().unwrap().rtx_bytes_count
    }
}

impl Drop for DataSender {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    async fn run(&self) {
        log::debug!("[{}] send loop started", self.name);
        while !self.closed.load(Ordering::SeqCst) {
            let wait = self.do_send(Instant::now());
            tokio::select! {
                _ = self.signal.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
        log::debug!("[{}] send loop stopped", self.name);
    }

    /// Runs one send-loop tick and returns how long to wait for the next
    /// one. Callbacks are invoked after the state lock has been released.
    fn do_send(&self, now: Instant) -> Duration {
        let (chunks, wait) = {
            let mut state = self.state.lock().unwrap();
            state.tick(now, &self.options)
        };
        for chunk in chunks {
            (self.on_send)(chunk);
        }
        if let Some(on_burst_complete) = &self.on_burst_complete {
            on_burst_complete();
        }
        wait
    }
}

impl SenderState {
    /// One iteration of the send loop: refresh the advanced peer ack point,
    /// then spend the burst budget on gap-reported misses, timed-out chunks
    /// and new chunks, in that priority order.
    fn tick(&mut self, now: Instant, options: &Options) -> (Vec<Chunk>, Duration) {
        let budget = if self.in_retransmit_mode
            || self.congestion.cwnd() < self.outstanding.outstanding_bytes()
            || self.congestion.rwnd() == 0
        {
            1
        } else {
            options.max_burst
        };

        let mut chunks: Vec<Chunk> = Vec::new();

        if self.partial_reliability {
            if let Some(forward_tsn) = self.maybe_send_forward_tsn(now, options.mtu) {
                chunks.push(Chunk::ForwardTsn(forward_tsn));
            }
        }

        let mut retransmitted_bytes: u64 = 0;
        let mut sent = 0;

        for chunk in self.outstanding.take_missing(budget, now) {
            log::debug!("retransmitting gap-reported chunk {}", chunk.tsn);
            retransmitted_bytes += chunk.data.payload.len() as u64;
            chunks.push(Chunk::Data(chunk));
            sent += 1;
        }

        if sent < budget {
            let timed_out = self.outstanding.take_timed_out(budget - sent, now, self.rto.rto());
            if !timed_out.is_empty() && !self.in_retransmit_mode {
                // T3 expiry: collapse the window and, once an RTT has been
                // measured, back off the timer. RFC 4960 §6.3.3.
                self.congestion.on_retransmission_timeout();
                if self.rto.has_rtt() {
                    self.rto.backoff();
                }
                self.in_retransmit_mode = true;
            }
            for chunk in timed_out {
                log::debug!("retransmitting timed-out chunk {}, rto={:?}", chunk.tsn, self.rto.rto());
                retransmitted_bytes += chunk.data.payload.len() as u64;
                chunks.push(Chunk::Data(chunk));
                sent += 1;
            }
        }

        if retransmitted_bytes > 0 {
            self.rtx_packets_count += 1;
            self.rtx_bytes_count += retransmitted_bytes;
        }

        while sent < budget {
            let Some(mut chunk) = self.send_queue.dequeue() else {
                break;
            };
            if self.partial_reliability && chunk.should_be_abandoned(now) {
                log::debug!(
                    "dropping queued chunk that expired before its first send, sid={}, ssn={}",
                    chunk.data.stream_key.id(),
                    chunk.data.ssn
                );
                continue;
            }
            let tsn = match chunk.tsn {
                Some(tsn) => tsn,
                None => {
                    let tsn = self.next_tsn;
                    self.next_tsn += 1;
                    chunk.tsn = Some(tsn);
                    tsn
                }
            };
            chunk.last_sent_at = Some(now);
            chunk.send_count = 1;
            chunks.push(Chunk::Data(DataChunk { tsn, data: chunk.data.clone() }));
            self.outstanding.insert(tsn, chunk);
            sent += 1;
        }

        (chunks, self.wait_duration(options))
    }

    /// How long the send loop sleeps unless it is signalled, per the state
    /// left behind by this tick.
    fn wait_duration(&self, options: &Options) -> Duration {
        if !self.send_queue.is_empty() || self.outstanding.has_missing() {
            if self.congestion.rwnd() > 0
                && self.congestion.cwnd() > self.outstanding.outstanding_bytes()
            {
                options.burst_period
            } else {
                self.rto.rto()
            }
        } else if !self.outstanding.is_empty() {
            self.rto.rto()
        } else {
            options.rto_initial
        }
    }

    fn handle_sack(
        &mut self,
        sack: &SackChunk,
        now: Instant,
        options: &Options,
    ) -> Option<ForwardTsnChunk> {
        self.in_retransmit_mode = false;

        let cum_at_entry = self.outstanding.cumulative_ack_tsn();
        let max_distance = cum_at_entry.distance_to(self.next_tsn);

        // Measure the RTT from the cumulatively acked chunk, but only when
        // it was transmitted exactly once (Karn's rule), and remember its
        // size for the congestion window update.
        let mut acked_chunk_size = 0;
        let mut rtt_sample = None;
        if let Some(chunk) = self.outstanding.get_unconfirmed(sack.cumulative_tsn_ack) {
            acked_chunk_size = chunk.data.payload.len();
            if chunk.send_count == 1 {
                rtt_sample = chunk.last_sent_at.map(|sent_at| now.duration_since(sent_at));
            }
        }
        if let Some(rtt) = rtt_sample {
            self.rto.observe_rtt(rtt);
        }

        // RFC 3758 A2: an ack of an abandoned chunk must not grow cwnd.
        let update_cwnd = !self.outstanding.is_abandoned(sack.cumulative_tsn_ack);

        let advanced = sack.cumulative_tsn_ack > cum_at_entry;
        let valid = sack.cumulative_tsn_ack >= cum_at_entry
            && cum_at_entry.distance_to(sack.cumulative_tsn_ack) <= max_distance;
        if valid {
            if advanced {
                self.outstanding.remove_acked(sack.cumulative_tsn_ack);
            }
            self.outstanding.handle_gap_reports(
                sack.cumulative_tsn_ack,
                &sack.gap_ack_blocks,
                max_distance,
            );
        } else {
            log::warn!(
                "ignoring stale or spurious SACK, cum_ack={} (cum={}, next={})",
                sack.cumulative_tsn_ack,
                cum_at_entry,
                self.next_tsn
            );
        }

        self.congestion.update_rwnd(sack.a_rwnd, self.outstanding.outstanding_bytes());

        if valid && advanced && update_cwnd {
            self.congestion
                .on_cumulative_ack(self.outstanding.outstanding_bytes(), acked_chunk_size);
        }

        if self.partial_reliability {
            return self.maybe_send_forward_tsn(now, options.mtu);
        }
        None
    }

    /// RFC 3758 A5: abandon what is over its budget, advance the peer ack
    /// point across the abandoned chunks and decide whether a FORWARD-TSN
    /// needs to go out. Emission is suppressed while an identical one is
    /// younger than one RTO.
    fn maybe_send_forward_tsn(&mut self, now: Instant, mtu: usize) -> Option<ForwardTsnChunk> {
        if !self.partial_reliability {
            debug_assert!(false, "partial reliability has not been negotiated");
            log::error!("attempted to abandon chunks without negotiated partial reliability");
            return None;
        }

        for key in self.outstanding.expire_outstanding_chunks(now) {
            self.send_queue.discard_message_fragments(key);
        }
        self.outstanding.advance_peer_ack_point(mtu);

        if !self.outstanding.should_send_forward_tsn() {
            return None;
        }
        let ack_point = self.outstanding.advanced_peer_ack_point();
        if let Some((last_tsn, last_at)) = self.last_forward_tsn {
            if last_tsn == ack_point && now.duration_since(last_at) < self.rto.rto() {
                return None;
            }
        }
        self.last_forward_tsn = Some((ack_point, now));
        log::debug!("sending FORWARD-TSN, new_cumulative_tsn={ack_point}");
        Some(self.outstanding.create_forward_tsn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::sack_chunk::GapAckBlock;
    use crate::types::Ssn;
    use itertools::Itertools;

    fn make_sender(initial_tsn: u32, a_rwnd: u32) -> (DataSender, Arc<Mutex<Vec<Chunk>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        let sender = DataSender::new(
            "test",
            &Options::default(),
            Tsn(initial_tsn),
            a_rwnd,
            Box::new(move |chunk| sink.lock().unwrap().push(chunk)),
            None,
        );
        (sender, sent)
    }

    fn sack(cumulative_tsn_ack: u32, a_rwnd: u32, gap_ack_blocks: Vec<GapAckBlock>) -> SackChunk {
        SackChunk {
            cumulative_tsn_ack: Tsn(cumulative_tsn_ack),
            a_rwnd,
            gap_ack_blocks,
            duplicate_tsns: vec![],
        }
    }

    fn sent_data(sent: &Arc<Mutex<Vec<Chunk>>>) -> Vec<(Tsn, bool, bool, Ssn, usize)> {
        sent.lock()
            .unwrap()
            .iter()
            .filter_map(|chunk| match chunk {
                Chunk::Data(c) => Some((
                    c.tsn,
                    c.data.is_beginning,
                    c.data.is_end,
                    c.data.ssn,
                    c.data.payload.len(),
                )),
                _ => None,
            })
            .collect()
    }

    fn sent_forward_tsns(sent: &Arc<Mutex<Vec<Chunk>>>) -> Vec<ForwardTsnChunk> {
        sent.lock()
            .unwrap()
            .iter()
            .filter_map(|chunk| match chunk {
                Chunk::ForwardTsn(c) => Some(ForwardTsnChunk {
                    new_cumulative_tsn: c.new_cumulative_tsn,
                    skipped_streams: c.skipped_streams.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn fragments_and_acks_a_message() {
        let (sender, sent) = make_sender(100, 8192);

        sender.send_data(StreamId(0), PpId(53), vec![0; 3000], &SendOptions::default());
        assert_eq!(sender.buffered_amount(), 3000);

        sender.inner.do_send(Instant::now());
        assert_eq!(sender.buffered_amount(), 0);
        assert_eq!(
            sent_data(&sent),
            vec![
                (Tsn(100), true, false, Ssn(0), 1300),
                (Tsn(101), false, false, Ssn(0), 1300),
                (Tsn(102), false, true, Ssn(0), 400),
            ]
        );
        assert_eq!(sender.next_tsn(), Tsn(103));

        sender.handle_sack(&sack(102, 8192, vec![]));

        let state = sender.inner.state.lock().unwrap();
        assert!(state.outstanding.is_empty());
        assert_eq!(state.outstanding.cumulative_ack_tsn(), Tsn(102));
        assert_eq!(state.outstanding.outstanding_bytes(), 0);
    }

    #[test]
    fn gap_report_triggers_fast_retransmit() {
        let (sender, sent) = make_sender(100, 8192);

        sender.send_data(StreamId(0), PpId(53), vec![0; 3000], &SendOptions::default());
        sender.inner.do_send(Instant::now());
        sender.handle_sack(&sack(102, 8192, vec![]));

        sender.send_data(StreamId(0), PpId(53), vec![1; 100], &SendOptions::default());
        sender.send_data(StreamId(0), PpId(53), vec![2; 100], &SendOptions::default());
        sender.inner.do_send(Instant::now());
        sent.lock().unwrap().clear();

        // 104 received, 103 missing.
        sender.handle_sack(&sack(102, 8192, vec![GapAckBlock::new(2, 2)]));
        sender.inner.do_send(Instant::now());

        assert_eq!(sent_data(&sent), vec![(Tsn(103), true, true, Ssn(1), 100)]);
        assert_eq!(sender.rtx_packets_count(), 1);
        let rto_before = {
            let state = sender.inner.state.lock().unwrap();
            assert_eq!(state.outstanding.get_unconfirmed(Tsn(103)).unwrap().send_count, 2);
            state.rto.rto()
        };

        // Karn's rule: acking the retransmitted chunk must not feed the RTT
        // estimator.
        sender.handle_sack(&sack(103, 8192, vec![]));
        assert_eq!(sender.inner.state.lock().unwrap().rto.rto(), rto_before);
    }

    #[test]
    fn missing_chunk_is_only_retransmitted_once_per_report() {
        let (sender, sent) = make_sender(100, 8192);

        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        sender.inner.do_send(Instant::now());
        sender.handle_sack(&sack(99, 8192, vec![GapAckBlock::new(2, 2)]));
        sent.lock().unwrap().clear();

        let now = Instant::now();
        sender.inner.do_send(now);
        assert_eq!(sent_data(&sent).len(), 1);

        // Without a new gap report the next tick has nothing to do.
        sender.inner.do_send(now);
        assert_eq!(sent_data(&sent).len(), 1);
    }

    #[test]
    fn t3_timeout_collapses_congestion_window() {
        let (sender, sent) = make_sender(200, 128_000);

        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        let t0 = Instant::now();
        sender.inner.do_send(t0);
        assert_eq!(sent_data(&sent).len(), 1);

        {
            let mut state = sender.inner.state.lock().unwrap();
            // One second of measured RTT puts the RTO at exactly 3s.
            state.rto.observe_rtt(Duration::from_secs(1));
            assert_eq!(state.rto.rto(), Duration::from_secs(3));
            state.congestion.set_cwnd(16 * 1024);
            state.congestion.set_ssthresh(32 * 1024);
        }

        sent.lock().unwrap().clear();
        sender.inner.do_send(t0 + Duration::from_secs(4));

        assert_eq!(sent_data(&sent), vec![(Tsn(200), true, true, Ssn(0), 100)]);
        let state = sender.inner.state.lock().unwrap();
        assert_eq!(state.outstanding.get_unconfirmed(Tsn(200)).unwrap().send_count, 2);
        assert_eq!(state.congestion.ssthresh(), 8192);
        assert_eq!(state.congestion.cwnd(), 1300);
        assert_eq!(state.rto.rto(), Duration::from_secs(6));
        assert!(state.in_retransmit_mode);
    }

    #[test]
    fn retransmit_mode_limits_burst_and_clears_on_sack() {
        let (sender, sent) = make_sender(200, 128_000);

        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        let t0 = Instant::now();
        sender.inner.do_send(t0);

        // Force a T3 retransmission, then queue two more messages: in
        // retransmit mode only one chunk goes out per tick.
        sender.inner.do_send(t0 + Duration::from_secs(4));
        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        sent.lock().unwrap().clear();
        sender.inner.do_send(t0 + Duration::from_secs(4));
        assert_eq!(sent_data(&sent).len(), 1);

        sender.handle_sack(&sack(201, 128_000, vec![]));
        assert!(!sender.inner.state.lock().unwrap().in_retransmit_mode);
        sender.inner.do_send(t0 + Duration::from_secs(4));
        assert_eq!(sent_data(&sent).len(), 2);
    }

    #[test]
    fn zero_receiver_window_limits_burst_to_one() {
        let (sender, sent) = make_sender(100, 0);

        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        sender.inner.do_send(Instant::now());

        assert_eq!(sent_data(&sent).len(), 1);
    }

    #[test]
    fn lifetime_expiry_abandons_message_and_emits_forward_tsn() {
        let (sender, sent) = make_sender(50, 128_000);
        sender.set_supports_partial_reliability(true);

        let options =
            SendOptions { lifetime: Some(Duration::from_millis(100)), ..Default::default() };
        sender.send_data(StreamId(0), PpId(53), vec![0; 5120], &options);

        let t0 = Instant::now();
        sender.inner.do_send(t0);
        assert_eq!(
            sent_data(&sent).iter().map(|c| c.0).collect_vec(),
            vec![Tsn(50), Tsn(51), Tsn(52), Tsn(53)]
        );

        // No SACK arrives; 200ms later every chunk is over its lifetime.
        sender.inner.do_send(t0 + Duration::from_millis(200));

        let forward_tsns = sent_forward_tsns(&sent);
        assert_eq!(forward_tsns.len(), 1);
        assert_eq!(forward_tsns[0].new_cumulative_tsn, Tsn(53));
        assert_eq!(
            forward_tsns[0].skipped_streams,
            vec![crate::packet::forward_tsn_chunk::SkippedStream::new(StreamId(0), Ssn(0))]
        );

        let state = sender.inner.state.lock().unwrap();
        assert!(state.outstanding.is_empty());
        assert!(state.send_queue.is_empty());
        assert_eq!(state.outstanding.advanced_peer_ack_point(), Tsn(53));
    }

    #[test]
    fn duplicate_forward_tsn_is_suppressed_within_one_rto() {
        let (sender, sent) = make_sender(50, 128_000);
        sender.set_supports_partial_reliability(true);

        let options =
            SendOptions { lifetime: Some(Duration::from_millis(100)), ..Default::default() };
        sender.send_data(StreamId(0), PpId(53), vec![0; 5120], &options);

        let t0 = Instant::now();
        sender.inner.do_send(t0);
        sender.inner.do_send(t0 + Duration::from_millis(200));
        assert_eq!(sent_forward_tsns(&sent).len(), 1);

        // Unchanged state and less than one RTO elapsed: no new FORWARD-TSN.
        sender.inner.do_send(t0 + Duration::from_millis(210));
        assert_eq!(sent_forward_tsns(&sent).len(), 1);

        // After an RTO it is announced again.
        sender.inner.do_send(t0 + Duration::from_millis(200) + Duration::from_secs(4));
        assert_eq!(sent_forward_tsns(&sent).len(), 2);
    }

    #[test]
    fn queued_fragments_of_expired_message_are_dropped() {
        let (sender, sent) = make_sender(50, 128_000);
        sender.set_supports_partial_reliability(true);

        // Eight fragments; the first burst sends four and leaves four queued.
        let options =
            SendOptions { lifetime: Some(Duration::from_millis(100)), ..Default::default() };
        sender.send_data(StreamId(0), PpId(53), vec![0; 8 * 1300], &options);

        let t0 = Instant::now();
        sender.inner.do_send(t0);
        assert_eq!(sent_data(&sent).len(), 4);
        assert_eq!(sender.buffered_amount(), 4 * 1300);

        sender.inner.do_send(t0 + Duration::from_millis(200));

        // The in-flight half was abandoned and the queued half dropped.
        assert_eq!(sent_data(&sent).len(), 4);
        assert_eq!(sender.buffered_amount(), 0);
        let state = sender.inner.state.lock().unwrap();
        assert!(state.outstanding.is_empty());
        assert_eq!(state.outstanding.advanced_peer_ack_point(), Tsn(53));
    }

    #[test]
    fn sack_for_abandoned_chunk_does_not_grow_cwnd() {
        let (sender, _sent) = make_sender(50, 128_000);
        sender.set_supports_partial_reliability(true);

        let options =
            SendOptions { lifetime: Some(Duration::from_millis(100)), ..Default::default() };
        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &options);

        let t0 = Instant::now();
        sender.inner.do_send(t0);
        sender.inner.do_send(t0 + Duration::from_millis(200));

        let cwnd_before = sender.inner.state.lock().unwrap().congestion.cwnd();
        sender.handle_sack(&sack(50, 128_000, vec![]));
        assert_eq!(sender.inner.state.lock().unwrap().congestion.cwnd(), cwnd_before);
    }

    #[test]
    fn tsn_wraps_around() {
        let initial = u32::MAX - 1;
        let (sender, sent) = make_sender(initial, 8192);

        for _ in 0..3 {
            sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        }
        sender.inner.do_send(Instant::now());

        assert_eq!(
            sent_data(&sent).iter().map(|c| c.0).collect_vec(),
            vec![Tsn(u32::MAX - 1), Tsn(u32::MAX), Tsn(0)]
        );

        sender.handle_sack(&sack(0, 8192, vec![]));
        let state = sender.inner.state.lock().unwrap();
        assert!(state.outstanding.is_empty());
        assert_eq!(state.outstanding.cumulative_ack_tsn(), Tsn(0));
    }

    #[test]
    fn stale_sack_is_ignored() {
        let (sender, _sent) = make_sender(100, 8192);

        sender.send_data(StreamId(0), PpId(53), vec![0; 3000], &SendOptions::default());
        sender.inner.do_send(Instant::now());
        sender.handle_sack(&sack(102, 8192, vec![]));

        // An older cumulative ack must not roll the state back, but its
        // window update still applies.
        sender.handle_sack(&sack(100, 4096, vec![]));
        let state = sender.inner.state.lock().unwrap();
        assert_eq!(state.outstanding.cumulative_ack_tsn(), Tsn(102));
        assert_eq!(state.congestion.rwnd(), 4096);
    }

    #[test]
    fn spurious_sack_beyond_outstanding_window_is_ignored() {
        let (sender, _sent) = make_sender(100, 8192);

        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        sender.inner.do_send(Instant::now());

        sender.handle_sack(&sack(5000, 8192, vec![]));
        let state = sender.inner.state.lock().unwrap();
        assert_eq!(state.outstanding.cumulative_ack_tsn(), Tsn(99));
        assert!(state.outstanding.get_unconfirmed(Tsn(100)).is_some());
    }

    #[test]
    fn first_sack_acking_nothing_is_harmless() {
        let (sender, _sent) = make_sender(100, 8192);

        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        sender.inner.do_send(Instant::now());

        // The peer acks "nothing received yet", TSN 99.
        sender.handle_sack(&sack(99, 8192, vec![]));
        let state = sender.inner.state.lock().unwrap();
        assert_eq!(state.outstanding.cumulative_ack_tsn(), Tsn(99));
        assert!(state.outstanding.get_unconfirmed(Tsn(100)).is_some());
    }

    #[test]
    fn rtt_measurement_updates_rto() {
        let (sender, _sent) = make_sender(100, 8192);

        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        sender.inner.do_send(Instant::now());
        assert!(!sender.inner.state.lock().unwrap().rto.has_rtt());

        sender.handle_sack(&sack(100, 8192, vec![]));
        assert!(sender.inner.state.lock().unwrap().rto.has_rtt());
    }

    #[test]
    fn slow_start_grows_cwnd_when_window_is_full() {
        // A tiny advertised window keeps the flight above cwnd.
        let (sender, _sent) = make_sender(100, 100_000);
        {
            let mut state = sender.inner.state.lock().unwrap();
            state.congestion.set_cwnd(1300);
        }

        sender.send_data(StreamId(0), PpId(53), vec![0; 3000], &SendOptions::default());
        sender.inner.do_send(Instant::now());

        // Ack the first chunk: 1700 bytes remain outstanding, above cwnd.
        sender.handle_sack(&sack(100, 100_000, vec![]));
        let state = sender.inner.state.lock().unwrap();
        assert_eq!(state.congestion.cwnd(), 2600);
    }

    #[test]
    fn wait_time_follows_queue_and_window_state() {
        let (sender, _sent) = make_sender(100, 8192);
        let options = &sender.inner.options;

        // Idle: initial RTO.
        assert_eq!(sender.inner.do_send(Instant::now()), options.rto_initial);

        // Data queued and windows open: burst period. The window must still
        // be open after the burst itself.
        sender.inner.state.lock().unwrap().congestion.set_cwnd(20_000);
        sender.send_data(StreamId(0), PpId(53), vec![0; 10 * 1300], &SendOptions::default());
        let t0 = Instant::now();
        assert_eq!(sender.inner.do_send(t0), options.burst_period);

        // Only unconfirmed data left: current RTO.
        {
            let mut state = sender.inner.state.lock().unwrap();
            while state.send_queue.dequeue().is_some() {}
        }
        assert_eq!(sender.inner.do_send(t0), options.rto_initial);
    }

    #[tokio::test]
    async fn worker_drains_queue_and_close_stops_it() {
        let (sender, sent) = make_sender(100, 8192);
        sender.start_sending();
        sender.start_sending();

        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        for _ in 0..200 {
            if !sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sent_data(&sent), vec![(Tsn(100), true, true, Ssn(0), 100)]);

        sender.close();
        sender.close();
        tokio::time::sleep(Duration::from_millis(50)).await;

        // A message sent after close is queued but the loop no longer runs.
        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sent_data(&sent).len(), 1);
    }

    #[tokio::test]
    async fn burst_complete_callback_fires_after_burst() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let bursts = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&sent);
        let burst_sink = Arc::clone(&bursts);
        let sender = DataSender::new(
            "test",
            &Options::default(),
            Tsn(100),
            8192,
            Box::new(move |chunk| sink.lock().unwrap().push(chunk)),
            Some(Box::new(move || *burst_sink.lock().unwrap() += 1)),
        );
        sender.start_sending();

        sender.send_data(StreamId(0), PpId(53), vec![0; 100], &SendOptions::default());
        for _ in 0..200 {
            if !sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!sent.lock().unwrap().is_empty());
        assert!(*bursts.lock().unwrap() >= 1);

        sender.close();
    }
}
