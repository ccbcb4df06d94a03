//! C1: EBML variable-length ID/size reader (spec §4.1).
//!
//! This is the only primitive the WebM demuxer needs: reading a
//! variable-length element ID followed by a variable-length size, and
//! reading a bare variable-length integer (used for in-block track
//! numbers). Both share the same length-prefix encoding; only whether the
//! length-marker bit is kept in the output differs.
//!
//! Reads are `async`, over `AsyncRead`, rather than blocking `std::io::Read`:
//! the demuxer built on top of this is driven from the playback
//! controller's frame loop, which must stay concurrently selectable against
//! control signals while waiting on a source helper's stdout pipe (spec
//! §5's suspension points).

use crate::error::{Error, Result};
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::io::{AsyncRead, AsyncReadExt, ReadBuf};

/// Wraps an `AsyncRead` and exposes a running byte count.
///
/// EBML gives no random access, so the only way the WebM demuxer can tell
/// when a size-bounded container (Tracks, TrackEntry, BlockGroup) ends is
/// to track how many bytes of its declared size have actually been
/// consumed. `Reader::inner_mut().position()` gives that count without
/// every nested parser having to thread a byte budget through by hand.
pub struct Counting<R> {
    inner: R,
    count: u64,
}

impl<R> Counting<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self { inner, count: 0 }
    }

    /// Total bytes read through this wrapper so far.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.count
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for Counting<R> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let before = buf.filled().len();
        let poll = Pin::new(&mut self.inner).poll_read(cx, buf);
        if poll.is_ready() {
            self.count += (buf.filled().len() - before) as u64;
        }
        poll
    }
}

/// One parsed EBML element header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ElementHeader {
    /// Element ID, marker bits intact (spec: "the ID keeps its marker
    /// bits").
    pub id: u32,
    /// Element size, or `None` if the size field was all-ones ("unknown
    /// size" — legal on streamed Segment/Cluster elements).
    pub size: Option<u64>,
}

/// Reads EBML element headers and bare varints from an arbitrary async byte
/// source.
pub struct Reader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> Reader<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads one element header: a variable-length ID followed by a
    /// variable-length size.
    ///
    /// Returns `Ok(None)` on a clean end-of-stream at the element boundary
    /// (spec: "end-of-stream at element boundary returns an EOF signal, not
    /// a failure"). A short read *inside* an element (ID byte present but
    /// continuation bytes or the size field truncated) is fatal.
    pub async fn read_element(&mut self) -> Result<Option<ElementHeader>> {
        let Some(first) = self.read_byte_allow_eof().await? else {
            return Ok(None);
        };

        let id_len = vint_length(first)
            .ok_or(Error::ContainerMalformed("invalid EBML ID length marker"))?;
        let id = self.read_vint_value(first, id_len, false).await? as u32;

        let Some(size_first) = self.read_byte_allow_eof().await? else {
            return Err(Error::ContainerMalformed("truncated element: missing size"));
        };
        let size_len = vint_length(size_first)
            .ok_or(Error::ContainerMalformed("invalid EBML size length marker"))?;
        let raw_size = self.read_vint_value(size_first, size_len, true).await?;

        let all_ones = raw_size == (1u64 << (7 * size_len)) - 1;
        let size = if all_ones { None } else { Some(raw_size) };

        Ok(Some(ElementHeader { id, size }))
    }

    /// Reads a bare variable-length integer (used for in-block track
    /// numbers), stripping the length-marker bit. Returns the value and its
    /// encoded length in bytes.
    pub async fn read_varint(&mut self) -> Result<Option<(u64, u8)>> {
        let Some(first) = self.read_byte_allow_eof().await? else {
            return Ok(None);
        };
        let len = vint_length(first)
            .ok_or(Error::ContainerMalformed("invalid varint length marker"))?;
        let value = self.read_vint_value(first, len, true).await?;
        Ok(Some((value, len)))
    }

    /// Reads exactly `n` bytes, treating any EOF as fatal (used once inside
    /// an element body).
    pub async fn read_exact_fatal(&mut self, buf: &mut [u8]) -> Result<()> {
        self.inner
            .read_exact(buf)
            .await
            .map_err(|_| Error::ContainerMalformed("short read inside element"))
    }

    /// Discards exactly `n` bytes of element body (used to skip elements
    /// the demuxer isn't interested in).
    pub async fn skip(&mut self, mut n: u64) -> Result<()> {
        let mut scratch = [0u8; 4096];
        while n > 0 {
            let chunk = n.min(scratch.len() as u64) as usize;
            self.read_exact_fatal(&mut scratch[..chunk]).await?;
            n -= chunk as u64;
        }
        Ok(())
    }

    pub fn inner_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    async fn read_byte_allow_eof(&mut self) -> Result<Option<u8>> {
        let mut b = [0u8; 1];
        match self.inner.read(&mut b).await {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(b[0])),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_vint_value(&mut self, first: u8, len: u8, strip_marker: bool) -> Result<u64> {
        let mut value = if strip_marker {
            u64::from(first & !(0x80u8 >> (len - 1)))
        } else {
            u64::from(first)
        };

        if len > 1 {
            let mut rest = vec![0u8; (len - 1) as usize];
            self.read_exact_fatal(&mut rest).await?;
            for b in rest {
                value = (value << 8) | u64::from(b);
            }
        }

        Ok(value)
    }
}

/// Position (1..=8) of the first set bit in `first_byte`, MSB first; `None`
/// if the byte is zero (no valid length marker for the 1..4 byte IDs / 1..8
/// byte sizes this format uses).
fn vint_length(first_byte: u8) -> Option<u8> {
    (0..8).find(|i| first_byte & (0x80 >> i) != 0).map(|i| i + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn reads_single_byte_id_and_size() {
        // Timecode (0xE7, 1-byte id) with size 1.
        let data = [0xE7, 0x81];
        let mut r = Reader::new(Cursor::new(&data[..]));
        let header = r.read_element().await.unwrap().unwrap();
        assert_eq!(header.id, 0xE7);
        assert_eq!(header.size, Some(1));
    }

    #[tokio::test]
    async fn reads_multi_byte_id() {
        // Segment: 0x18538067 (4-byte id), size 0x01 (1 byte, value 1).
        let data = [0x18, 0x53, 0x80, 0x67, 0x81];
        let mut r = Reader::new(Cursor::new(&data[..]));
        let header = r.read_element().await.unwrap().unwrap();
        assert_eq!(header.id, 0x1853_8067);
        assert_eq!(header.size, Some(1));
    }

    #[tokio::test]
    async fn unknown_size_is_all_ones() {
        // Cluster (0x1F43B675) with an unknown (all-ones) 1-byte size.
        let data = [0x1F, 0x43, 0xB6, 0x75, 0xFF];
        let mut r = Reader::new(Cursor::new(&data[..]));
        let header = r.read_element().await.unwrap().unwrap();
        assert_eq!(header.size, None);
    }

    #[tokio::test]
    async fn clean_eof_at_boundary_is_not_an_error() {
        let mut r = Reader::new(Cursor::new(&[][..]));
        assert!(r.read_element().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn short_read_inside_element_is_fatal() {
        // 4-byte ID declared, but stream cuts off after 2 bytes.
        let data = [0x18, 0x53];
        let mut r = Reader::new(Cursor::new(&data[..]));
        assert!(r.read_element().await.is_err());
    }

    #[tokio::test]
    async fn varint_strips_marker_bit() {
        // Track number 1, single byte varint: 0x81 -> value 1.
        let data = [0x81];
        let mut r = Reader::new(Cursor::new(&data[..]));
        let (value, len) = r.read_varint().await.unwrap().unwrap();
        assert_eq!(value, 1);
        assert_eq!(len, 1);
    }

    #[tokio::test]
    async fn varint_two_byte_value() {
        // length marker 0x40 => 2 bytes; 0x4F 0xFF -> strip top 2 bits of
        // first byte (0x0F), concat with 0xFF -> 0x0FFF.
        let data = [0x4F, 0xFF];
        let mut r = Reader::new(Cursor::new(&data[..]));
        let (value, len) = r.read_varint().await.unwrap().unwrap();
        assert_eq!(len, 2);
        assert_eq!(value, 0x0FFF);
    }
}
