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

use crate::packet::AsSerializableTlv;
use crate::packet::ChunkParseError;
use crate::packet::SerializableTlv;
use crate::packet::TLV_HEADER_SIZE;
use crate::packet::data_chunk;
use crate::packet::data_chunk::DataChunk;
use crate::packet::forward_tsn_chunk;
use crate::packet::forward_tsn_chunk::ForwardTsnChunk;
use crate::packet::read_u16_be;
use crate::packet::sack_chunk;
use crate::packet::sack_chunk::SackChunk;
use crate::packet::write_u16_be;
use anyhow::Error;
use anyhow::ensure;
use std::cmp;
use std::fmt;

/// Intermediate representation of a chunk for which the type hasn't been fully discriminated, see
/// <https://datatracker.ietf.org/doc/html/rfc9260#section-3.2>.
///
/// ```txt
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |  Chunk Type   |  Chunk Flags  |         Chunk Length          |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// \                                                               \
/// /                          Chunk Value                          /
/// \                                                               \
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Debug)]
pub struct RawChunk<'a> {
    pub(crate) typ: u8,
    pub(crate) flags: u8,
    pub(crate) value: &'a [u8],
}

impl<'a> RawChunk<'a> {
    /// Reads a chunk from `bytes` and returns a raw representation of the frame and the remaining
    /// data that was not consumed when reading this chunk.
    pub fn from_bytes(bytes: &'a [u8]) -> Result<(Self, &'a [u8]), Error> {
        ensure!(bytes.len() >= TLV_HEADER_SIZE, ChunkParseError::InvalidLength);

        let length = read_u16_be!(&bytes[2..4]) as usize;
        ensure!(length >= TLV_HEADER_SIZE && length <= bytes.len(), ChunkParseError::InvalidLength);

        // Chunks are padded to four-byte alignment on the wire.
        let padded_length = (length + 3) & !3;
        let end_offset = cmp::min(padded_length, bytes.len());

        Ok((
            Self { typ: bytes[0], flags: bytes[1], value: &bytes[TLV_HEADER_SIZE..length] },
            &bytes[end_offset..],
        ))
    }
}

/// Writes a chunk header with the provided arguments and returns the remaining part of the chunk
/// (its value) that may be filled in by the caller with additional data.
#[inline]
pub fn write_chunk_header(typ: u8, flags: u8, value_size: usize, output: &mut [u8]) -> &mut [u8] {
    let serialized_size = TLV_HEADER_SIZE + value_size;
    assert!(output.len() >= serialized_size);
    output[0] = typ;
    output[1] = flags;
    write_u16_be!(&mut output[2..4], serialized_size as u16);
    &mut output[TLV_HEADER_SIZE..serialized_size]
}

/// The chunks the data sender produces and consumes.
#[derive(Debug)]
pub enum Chunk {
    Data(DataChunk),
    Sack(SackChunk),
    ForwardTsn(ForwardTsnChunk),
}

impl TryFrom<RawChunk<'_>> for Chunk {
    type Error = Error;

    fn try_from(raw: RawChunk<'_>) -> Result<Self, Error> {
        match raw.typ {
            data_chunk::CHUNK_TYPE => DataChunk::try_from(raw).map(Chunk::Data),
            sack_chunk::CHUNK_TYPE => SackChunk::try_from(raw).map(Chunk::Sack),
            forward_tsn_chunk::CHUNK_TYPE => ForwardTsnChunk::try_from(raw).map(Chunk::ForwardTsn),
            _ => Err(ChunkParseError::InvalidType.into()),
        }
    }
}

impl AsSerializableTlv for Chunk {
    fn as_serializable(&self) -> &dyn SerializableTlv {
        match self {
            Chunk::Data(s) => s,
            Chunk::Sack(s) => s,
            Chunk::ForwardTsn(s) => s,
        }
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chunk::Data(s) => s.fmt(f),
            Chunk::Sack(s) => s.fmt(f),
            Chunk::ForwardTsn(s) => s.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Tsn;

    #[test]
    fn rejects_truncated_header() {
        assert!(RawChunk::from_bytes(&[0x00, 0x03]).is_err());
    }

    #[test]
    fn rejects_length_beyond_buffer() {
        // Claims 20 bytes but only 8 are present.
        assert!(RawChunk::from_bytes(&[0x00, 0x03, 0x00, 0x14, 1, 2, 3, 4]).is_err());
    }

    #[test]
    fn consumes_padding() {
        // A 6-byte chunk padded to 8, followed by the next chunk's header.
        const BYTES: &[u8] = &[
            0xc0, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x07, 0x03, 0x00, 0x00, 0x04,
        ];
        let (raw, remaining) = RawChunk::from_bytes(BYTES).unwrap();
        assert_eq!(raw.typ, 0xc0);
        assert_eq!(raw.value.len(), 4);
        assert_eq!(remaining, &[0x03, 0x00, 0x00, 0x04]);
    }

    #[test]
    fn discriminates_known_chunks() {
        // Minimal FORWARD-TSN chunk.
        const BYTES: &[u8] = &[0xc0, 0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x2a];
        let chunk = Chunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).unwrap();
        match chunk {
            Chunk::ForwardTsn(c) => assert_eq!(c.new_cumulative_tsn, Tsn(42)),
            _ => panic!("wrong chunk type"),
        }
    }

    #[test]
    fn rejects_unknown_chunk_type() {
        const BYTES: &[u8] = &[0x3f, 0x00, 0x00, 0x04];
        assert!(Chunk::try_from(RawChunk::from_bytes(BYTES).unwrap().0).is_err());
    }
}
