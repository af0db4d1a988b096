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

use crate::packet::chunk::Chunk;
use std::fmt;
use std::time::Duration;

pub use crate::tx::data_sender::DataSender;

/// The MTU used when the association supplies zero at construction.
pub const DEFAULT_MTU: usize = 1300;

/// Stream Identifier
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StreamId(pub u16);

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payload Protocol Identifier (PPID)
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct PpId(pub u32);

impl fmt::Debug for PpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for PpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Send options for sending messages.
#[derive(Default)]
pub struct SendOptions {
    /// If the message should be sent with unordered message delivery.
    pub unordered: bool,

    /// If set, the message is abandoned when it hasn't been fully acked
    /// before the lifetime has expired. This is only available if the peer
    /// supports the Partial Reliability Extension (RFC 3758).
    pub lifetime: Option<Duration>,

    /// If set, limits the number of times a chunk of this message is put on
    /// the wire. This is only available if the peer supports the Partial
    /// Reliability Extension (RFC 3758).
    pub max_retransmissions: Option<u16>,
}

/// Callback invoked for every chunk the sender wants on the wire.
///
/// The callback is invoked with no internal lock held and must not re-enter
/// the sender.
pub type SendChunkCallback = Box<dyn Fn(Chunk) + Send + Sync>;

/// Callback invoked at the end of every send-loop burst, after all chunks of
/// that burst have been handed to the send callback. Associations typically
/// use it to flush a packet.
pub type BurstCompleteCallback = Box<dyn Fn() + Send + Sync>;

/// User configurable options with protocol defaults.
#[derive(Clone)]
pub struct Options {
    /// Maximum size of a DATA chunk payload. A value of zero selects
    /// [`DEFAULT_MTU`]. This does not include any overhead from lower
    /// layers.
    pub mtu: usize,

    /// Maximum number of DATA chunks put on the wire in one send-loop tick
    /// while the congestion and receiver windows are open.
    pub max_burst: usize,

    /// How long the send loop sleeps between bursts when there is more data
    /// to send and the windows are open.
    pub burst_period: Duration,

    /// Initial RTO value, used until the first RTT measurement and as the
    /// idle wait of the send loop.
    pub rto_initial: Duration,

    /// Minimum RTO value.
    pub rto_min: Duration,

    /// Maximum RTO value, which also bounds the exponential backoff applied
    /// on T3 retransmission.
    pub rto_max: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            max_burst: 4,
            burst_period: Duration::from_millis(50),
            rto_initial: Duration::from_millis(3000),
            rto_min: Duration::from_millis(1000),
            rto_max: Duration::from_millis(60000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_protocol_defaults() {
        let options = Options::default();
        assert_eq!(options.mtu, 1300);
        assert_eq!(options.max_burst, 4);
        assert_eq!(options.burst_period, Duration::from_millis(50));
        assert_eq!(options.rto_initial, Duration::from_secs(3));
        assert_eq!(options.rto_min, Duration::from_secs(1));
        assert_eq!(options.rto_max, Duration::from_secs(60));
    }
}
