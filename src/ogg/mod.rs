//! C4: OGG page writer and reader (spec §4.4).
//!
//! Every page this crate ever builds carries exactly one Opus packet's
//! worth of segments computed up front, so the writer side never needs to
//! split a packet across page boundaries. The reader is still written to
//! reassemble packets that *do* span multiple segments within a page (OGG's
//! normal "continues until a segment < 255" rule), since that's simply how
//! the format works, not an assumption this crate gets to make about its
//! own output.

use crate::error::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt};

/// Header-type flag bit for "beginning of stream".
pub const FLAG_BOS: u8 = 0x02;
/// Header-type flag bit for "end of stream".
pub const FLAG_EOS: u8 = 0x04;

const PAGE_HEADER_LEN: usize = 27;
const CRC_OFFSET: usize = 22;

const fn build_crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ crate::constants::OGG_CRC_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static CRC_TABLE: [u32; 256] = build_crc_table();

/// CRC-32 over `data`, MSB-first, no reflection, no final XOR (spec §4.4).
#[must_use]
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = 0u32;
    for &byte in data {
        let index = ((crc >> 24) ^ u32::from(byte)) & 0xFF;
        crc = (crc << 8) ^ CRC_TABLE[index as usize];
    }
    crc
}

/// Segment table for a packet of `packet_len` bytes: 255 for each full
/// segment, then the residue (possibly 0, the terminator segment).
fn segment_table(packet_len: usize) -> Vec<u8> {
    let mut segments = Vec::new();
    let mut remaining = packet_len;
    while remaining >= 255 {
        segments.push(255);
        remaining -= 255;
    }
    segments.push(remaining as u8);
    segments
}

/// Builds one complete OGG page around `packet`.
fn build_page(packet: &[u8], granule_position: u64, serial: u32, sequence: u32, flags: u8) -> Vec<u8> {
    let segments = segment_table(packet.len());

    let mut page = Vec::with_capacity(PAGE_HEADER_LEN + segments.len() + packet.len());
    page.extend_from_slice(b"OggS");
    page.push(0); // stream structure version
    page.push(flags);
    page.extend_from_slice(&granule_position.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&0u32.to_le_bytes()); // CRC placeholder
    page.push(segments.len() as u8);
    page.extend_from_slice(&segments);
    page.extend_from_slice(packet);

    let crc = crc32(&page);
    page[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
    page
}

/// Builds page 0: the OpusHead BOS page, granule 0 (spec §4.4).
#[must_use]
pub fn build_opus_head_page(opus_head: &[u8], serial: u32) -> Vec<u8> {
    build_page(opus_head, 0, serial, 0, FLAG_BOS)
}

/// Builds page 1: the OpusTags page, granule 0 (spec §4.4).
#[must_use]
pub fn build_opus_tags_page(serial: u32) -> Vec<u8> {
    const VENDOR: &[u8] = b"opuscast";

    let mut payload = Vec::with_capacity(8 + 4 + VENDOR.len() + 4);
    payload.extend_from_slice(b"OpusTags");
    payload.extend_from_slice(&(VENDOR.len() as u32).to_le_bytes());
    payload.extend_from_slice(VENDOR);
    payload.extend_from_slice(&0u32.to_le_bytes()); // user comment count

    build_page(&payload, 0, serial, 1, 0)
}

/// Builds an audio page carrying one Opus packet.
#[must_use]
pub fn build_audio_page(packet: &[u8], granule_position: u64, serial: u32, sequence: u32, eos: bool) -> Vec<u8> {
    build_page(packet, granule_position, serial, sequence, if eos { FLAG_EOS } else { 0 })
}

/// Recomputes a page's CRC with its stored CRC field zeroed and compares
/// against what's actually stored (spec §8 "OGG well-formedness").
#[must_use]
pub fn verify_page_crc(page: &[u8]) -> bool {
    if page.len() < PAGE_HEADER_LEN {
        return false;
    }
    let stored = u32::from_le_bytes([
        page[CRC_OFFSET],
        page[CRC_OFFSET + 1],
        page[CRC_OFFSET + 2],
        page[CRC_OFFSET + 3],
    ]);
    let mut zeroed = page.to_vec();
    zeroed[CRC_OFFSET..CRC_OFFSET + 4].fill(0);
    crc32(&zeroed) == stored
}

/// Reads OGG pages from an async byte source, reassembling them into
/// complete Opus packets (spec §4.6.2 frame loop).
pub struct PageReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> PageReader<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads the next page's worth of packets, or `None` on a clean EOF at
    /// a page boundary.
    pub async fn read_packets(&mut self) -> Result<Option<Vec<Vec<u8>>>> {
        let Some(header) = self.read_header().await? else {
            return Ok(None);
        };

        let segment_count = header[26] as usize;
        let mut segment_table = vec![0u8; segment_count];
        // Propagate via `?` rather than collapsing to `ContainerMalformed`:
        // a closed pipe mid-page must fold through `From<io::Error>` into
        // `StreamClosed` so the controller's one-retry policy (spec §7, §8
        // scenario 4) actually fires.
        self.inner.read_exact(&mut segment_table).await?;

        let mut packets = Vec::new();
        let mut current = Vec::new();
        for &seg_len in &segment_table {
            let mut chunk = vec![0u8; seg_len as usize];
            self.inner.read_exact(&mut chunk).await?;
            current.extend_from_slice(&chunk);
            if seg_len < 255 {
                packets.push(std::mem::take(&mut current));
            }
        }

        Ok(Some(packets))
    }

    async fn read_header(&mut self) -> Result<Option<[u8; PAGE_HEADER_LEN]>> {
        let mut header = [0u8; PAGE_HEADER_LEN];
        let first = self.inner.read(&mut header[0..1]).await?;
        if first == 0 {
            return Ok(None);
        }
        self.inner.read_exact(&mut header[1..]).await?;

        if &header[0..4] != b"OggS" {
            return Err(Error::ContainerMalformed("missing OggS page magic"));
        }
        Ok(Some(header))
    }
}
