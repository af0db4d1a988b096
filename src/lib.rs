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

//! The reliable data-sender subsystem of an SCTP association endpoint.
//!
//! This crate accepts application messages, fragments them into DATA chunks,
//! assigns transmission sequence numbers, enforces congestion and
//! receiver-flow control, and retransmits on gap reports and timeouts
//! (RFC 4960 §6/§7). When the Partial Reliability extension (RFC 3758) has
//! been negotiated, it also abandons chunks that exceed their lifetime or
//! retransmission budget and advances the peer's cumulative ack point with
//! FORWARD-TSN chunks.
//!
//! Control-chunk handshakes, packet framing and receive-side reassembly are
//! the association's business; this crate only consumes decoded
//! [`packet::sack_chunk::SackChunk`]s and hands outgoing chunks to a
//! callback.

pub mod api;
pub mod packet;
pub mod types;

pub(crate) mod tx;

/// Returns the version of this crate.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
