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

use crate::api::Options;
use std::cmp::min;
use std::time::Duration;

const RTO_ALPHA: f64 = 0.125;
const RTO_BETA: f64 = 0.25;

/// Retransmission timeout calculation per RFC 4960 §6.3.1.
///
/// Maintains the smoothed round-trip time and its variation and derives the
/// RTO from them, clamped between the configured minimum and maximum. Until
/// the first measurement the RTO stays at its configured initial value.
/// Callers only feed measurements for chunks that were transmitted exactly
/// once (Karn's rule).
pub(crate) struct RetransmissionTimeout {
    min_rto: Duration,
    max_rto: Duration,
    has_rtt: bool,
    srtt: f64,
    rtt_var: f64,
    rto: Duration,
}

impl RetransmissionTimeout {
    pub fn new(options: &Options) -> Self {
        Self {
            min_rto: options.rto_min,
            max_rto: options.rto_max,
            has_rtt: false,
            srtt: 0.0,
            rtt_var: 0.0,
            rto: options.rto_initial,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Returns true once at least one round-trip time has been measured.
    pub fn has_rtt(&self) -> bool {
        self.has_rtt
    }

    pub fn observe_rtt(&mut self, measured_rtt: Duration) {
        let rtt = measured_rtt.as_secs_f64();

        if !self.has_rtt {
            self.srtt = rtt;
            self.rtt_var = rtt / 2.0;
            self.has_rtt = true;
        } else {
            self.rtt_var = (1.0 - RTO_BETA) * self.rtt_var + RTO_BETA * (self.srtt - rtt).abs();
            self.srtt = (1.0 - RTO_ALPHA) * self.srtt + RTO_ALPHA * rtt;
        }

        let rto = (self.srtt + 4.0 * self.rtt_var)
            .clamp(self.min_rto.as_secs_f64(), self.max_rto.as_secs_f64());
        self.rto = Duration::from_secs_f64(rto);
    }

    /// Backs off the timer on T3 retransmission, RFC 4960 §6.3.3 rule E2.
    /// Callers only back off once an RTT has been measured.
    pub fn backoff(&mut self) {
        self.rto = min(self.rto.saturating_mul(2), self.max_rto);
    }
}
