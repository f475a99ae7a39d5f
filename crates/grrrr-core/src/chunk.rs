//! Packetizer: split a serialized blob into DATA packets.

use bytes::Bytes;

use crate::wire::Packet;

/// Default DATA payload size in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 10;

/// Split `blob` into consecutive DATA packets of `chunk_size` bytes.
///
/// Sequence numbers start at 1 and are dense. Only the final packet may be
/// shorter than `chunk_size`, and only the final packet has `is_last` set.
/// An empty blob yields no packets. A `chunk_size` of zero falls back to
/// [`DEFAULT_CHUNK_SIZE`].
pub fn packetize(blob: &Bytes, chunk_size: usize) -> Vec<Packet> {
    let size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    let total = blob.len().div_ceil(size);

    (0..total)
        .map(|i| {
            let start = i * size;
            let end = (start + size).min(blob.len());
            Packet::data((i + 1) as u32, blob.slice(start..end), i + 1 == total)
        })
        .collect()
}

/// Concatenate payloads in the order given.
pub fn reassemble<'a>(chunks: impl IntoIterator<Item = &'a Bytes>) -> Vec<u8> {
    let mut out = Vec::new();
    for c in chunks {
        out.extend_from_slice(c);
    }
    out
}
