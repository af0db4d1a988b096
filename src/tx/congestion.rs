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

use std::cmp::max;
use std::cmp::min;

/// Base for the initial congestion window, RFC 4960 §7.2.1.
const INITIAL_CWND_BYTES: usize = 4380;

/// Congestion and receiver-window state of the association.
///
/// `cwnd`/`ssthresh` follow RFC 4960 §7.2; the receiver window is the peer's
/// advertised window minus what is already in flight. The window never drops
/// below one MTU.
pub(crate) struct CongestionControl {
    mtu: usize,

    /// Congestion Window. Number of bytes that may be in-flight (sent, not acked).
    cwnd: usize,

    /// Slow start threshold, separating slow start from congestion avoidance.
    ssthresh: usize,

    /// Receiver window: bytes the peer has advertised buffer space for,
    /// minus the outstanding bytes.
    rwnd: usize,

    /// The window the peer advertised at construction, or the last value set
    /// through [`Self::set_initial_remote_a_rwnd`].
    initial_remote_a_rwnd: u32,
}

impl CongestionControl {
    pub fn new(mtu: usize, initial_remote_a_rwnd: u32) -> Self {
        Self {
            mtu,
            // From <https://datatracker.ietf.org/doc/html/rfc4960#section-7.2.1>:
            //
            //   The initial cwnd before DATA transmission [...] MUST be set to
            //   min(4*MTU, max (2*MTU, 4380 bytes)).
            cwnd: min(4 * mtu, max(2 * mtu, INITIAL_CWND_BYTES)),
            ssthresh: initial_remote_a_rwnd as usize,
            rwnd: initial_remote_a_rwnd as usize,
            initial_remote_a_rwnd,
        }
    }

    pub fn cwnd(&self) -> usize {
        self.cwnd
    }

    pub fn rwnd(&self) -> usize {
        self.rwnd
    }

    #[cfg(test)]
    pub fn ssthresh(&self) -> usize {
        self.ssthresh
    }

    /// Updates the stored initial advertised window. The association calls
    /// this when the peer's window becomes known, before traffic flows, so
    /// the slow start threshold is re-derived from it. The current receiver
    /// window is not touched; it follows from the next SACK.
    pub fn set_initial_remote_a_rwnd(&mut self, a_rwnd: u32) {
        log::debug!("initial peer a_rwnd={} ({})", a_rwnd, self.initial_remote_a_rwnd);
        self.initial_remote_a_rwnd = a_rwnd;
        self.ssthresh = a_rwnd as usize;
    }

    /// Recomputes the receiver window from a SACK's advertised window and
    /// the bytes still outstanding.
    pub fn update_rwnd(&mut self, a_rwnd: u32, outstanding_bytes: usize) {
        self.rwnd = (a_rwnd as usize).saturating_sub(outstanding_bytes);
    }

    /// Grows the congestion window on a SACK that advanced the cumulative
    /// TSN ack point and did not ack an abandoned chunk, RFC 4960 §7.2.1 and
    /// §7.2.2. `outstanding_bytes` is the in-flight amount after the acked
    /// chunks were removed.
    pub fn on_cumulative_ack(&mut self, outstanding_bytes: usize, acked_chunk_size: usize) {
        // The window only grows while it is fully utilized.
        let is_fully_utilized = self.cwnd <= outstanding_bytes;
        let old_cwnd = self.cwnd;

        if self.cwnd < self.ssthresh {
            if is_fully_utilized {
                self.cwnd += min(acked_chunk_size, self.mtu);
                log::debug!("SS increase cwnd={} ({})", self.cwnd, old_cwnd);
            }
        } else if is_fully_utilized {
            self.cwnd += self.mtu;
            log::debug!("CA increase cwnd={} ({}), ssthresh={}", self.cwnd, old_cwnd, self.ssthresh);
        }
    }

    /// Collapses the window on a T3 retransmission, RFC 4960 §6.3.3.
    pub fn on_retransmission_timeout(&mut self) {
        let old_cwnd = self.cwnd;
        self.ssthresh = max(self.cwnd / 2, 4 * self.mtu);
        self.cwnd = self.mtu;
        log::debug!(
            "t3-rtx: cwnd={} ({}), ssthresh={}",
            self.cwnd,
            old_cwnd,
            self.ssthresh
        );
    }

    #[cfg(test)]
    pub fn set_cwnd(&mut self, cwnd: usize) {
        self.cwnd = cwnd;
    }

    #[cfg(test)]
    pub fn set_ssthresh(&mut self, ssthresh: usize) {
        self.ssthresh = ssthresh;
    }
}
