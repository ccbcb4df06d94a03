//! C3: Opus loudness estimator and OpusHead gain patching (spec §4.3).
//!
//! Deliberately does not decode: songbird's own Opus support comes from the
//! `audiopus` FFI bindings, but this engine never links a decoder at all
//! (spec §1 non-goal: "no true ITU-R BS.1770 LUFS measurement"). The
//! heuristic below trades accuracy for the ability to run on raw packet
//! bytes alone.

use crate::config::EngineConfig;

/// Reference packet size, bytes, corresponding to roughly 128 kbps at 20 ms
/// framing.
const REFERENCE_PACKET_SIZE: f64 = crate::constants::REFERENCE_PACKET_SIZE_BYTES;

/// Computes the output gain (dB) to apply to a stream, from up to
/// `analysis_frames` leading Opus packets.
///
/// Returns `0.0` when given no packets (spec §8: "when the analysis buffer
/// is empty the gain is 0").
#[must_use]
pub fn estimate_gain_db(packets: &[Vec<u8>], config: &EngineConfig) -> f64 {
    if packets.is_empty() {
        return 0.0;
    }

    let avg_packet_size = mean(packets.iter().map(|p| p.len() as f64));
    let avg_byte_energy = mean(packets.iter().map(|p| packet_rms(p)));

    let size_factor_db = 20.0 * (avg_packet_size / REFERENCE_PACKET_SIZE + 0.01).log10();
    let energy_factor_db = 20.0 * (avg_byte_energy / 50.0 + 0.01).log10();

    let estimated_rms_db =
        (0.7 * energy_factor_db + 0.3 * size_factor_db - 14.0).clamp(-40.0, 0.0);

    (config.target_lufs - estimated_rms_db).clamp(-config.gain_range_db, config.gain_range_db)
}

fn mean(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let count = values.clone().count().max(1) as f64;
    values.sum::<f64>() / count
}

/// Root-mean-square of `byte - 128` over a packet's bytes, starting from the
/// byte immediately after the TOC byte (packet[0]).
fn packet_rms(packet: &[u8]) -> f64 {
    let body = packet.get(1..).unwrap_or(&[]);
    if body.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = body
        .iter()
        .map(|&b| {
            let centered = f64::from(b) - 128.0;
            centered * centered
        })
        .sum();
    (sum_sq / body.len() as f64).sqrt()
}

/// Length in bytes of a valid OpusHead codec-private block.
pub const OPUS_HEAD_LEN: usize = 19;

/// Magic bytes that must prefix an OpusHead block.
pub const OPUS_HEAD_MAGIC: &[u8; 8] = b"OpusHead";

/// Writes `gain_db` into an OpusHead's Q7.8 `output_gain` field (bytes
/// 16..18, little-endian signed).
///
/// A no-op (returns `false`) if `head` isn't at least [`OPUS_HEAD_LEN`]
/// bytes starting with [`OPUS_HEAD_MAGIC`] — spec §4.3: "the magic ... and
/// minimum length ... are verified before patching; otherwise the patch is
/// a no-op."
pub fn set_output_gain(head: &mut [u8], gain_db: f64) -> bool {
    if !is_valid_opus_head(head) {
        return false;
    }
    let q78 = (gain_db * 256.0).round();
    let clamped = q78.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
    head[16..18].copy_from_slice(&clamped.to_le_bytes());
    true
}

/// Reads an OpusHead's `output_gain` field back into dB, or `None` if
/// `head` isn't a valid OpusHead.
#[must_use]
pub fn get_output_gain(head: &[u8]) -> Option<f64> {
    if !is_valid_opus_head(head) {
        return None;
    }
    let raw = i16::from_le_bytes([head[16], head[17]]);
    Some(f64::from(raw) / 256.0)
}

/// Whether `head` is at least [`OPUS_HEAD_LEN`] bytes and starts with
/// [`OPUS_HEAD_MAGIC`]. Exposed so callers holding onto a demuxer's
/// codec-private bytes across the stream's lifetime (spec §4.2: "loss of
/// OpusHead mid-stream yields a fatal error") can detect corruption before
/// it reaches the gain patch or an OGG header page.
#[must_use]
pub fn is_valid_opus_head(head: &[u8]) -> bool {
    head.len() >= OPUS_HEAD_LEN && &head[0..8] == OPUS_HEAD_MAGIC
}

/// Opus mode family, decoded from a packet's TOC byte (RFC 6716 §3.1).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Mode {
    Silk,
    Hybrid,
    Celt,
}

/// Audio bandwidth, decoded from a packet's TOC byte.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Bandwidth {
    Narrowband,
    Mediumband,
    Wideband,
    SuperWideband,
    Fullband,
}

/// Decodes the TOC byte's configuration number (bits 3..7) into mode,
/// bandwidth, and frame length. Exposed for diagnostics only (spec §4.3);
/// the estimator itself is mode-agnostic.
#[must_use]
pub fn opus_toc_info(toc_byte: u8) -> (Mode, Bandwidth, f64) {
    use Bandwidth::{Fullband, Mediumband, Narrowband, SuperWideband, Wideband};
    use Mode::{Celt, Hybrid, Silk};

    let config = toc_byte >> 3;
    match config {
        0..=3 => (Silk, Narrowband, [10.0, 20.0, 40.0, 60.0][config as usize]),
        4..=7 => (Silk, Mediumband, [10.0, 20.0, 40.0, 60.0][(config - 4) as usize]),
        8..=11 => (Silk, Wideband, [10.0, 20.0, 40.0, 60.0][(config - 8) as usize]),
        12..=13 => (Hybrid, SuperWideband, [10.0, 20.0][(config - 12) as usize]),
        14..=15 => (Hybrid, Fullband, [10.0, 20.0][(config - 14) as usize]),
        16..=19 => (Celt, Narrowband, [2.5, 5.0, 10.0, 20.0][(config - 16) as usize]),
        20..=23 => (Celt, Wideband, [2.5, 5.0, 10.0, 20.0][(config - 20) as usize]),
        24..=27 => (Celt, SuperWideband, [2.5, 5.0, 10.0, 20.0][(config - 24) as usize]),
        28..=31 => (Celt, Fullband, [2.5, 5.0, 10.0, 20.0][(config - 28) as usize]),
        _ => unreachable!("config is a 5-bit field"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn head_with_gain(gain_raw: i16) -> Vec<u8> {
        let mut head = vec![0u8; OPUS_HEAD_LEN];
        head[0..8].copy_from_slice(OPUS_HEAD_MAGIC);
        head[8] = 1; // version
        head[9] = 2; // channels
        head[10..12].copy_from_slice(&0x0F80u16.to_le_bytes());
        head[12..16].copy_from_slice(&48_000u32.to_le_bytes());
        head[16..18].copy_from_slice(&gain_raw.to_le_bytes());
        head[18] = 0;
        head
    }

    #[test]
    fn gain_is_zero_with_no_packets() {
        let config = EngineConfig::default();
        assert_eq!(estimate_gain_db(&[], &config), 0.0);
    }

    #[test]
    fn gain_is_bounded() {
        let config = EngineConfig::default();
        // A pathologically loud synthetic packet set.
        let packets: Vec<Vec<u8>> = (0..50)
            .map(|_| vec![255u8; 400])
            .collect();
        let gain = estimate_gain_db(&packets, &config);
        assert!((-12.0..=12.0).contains(&gain));
    }

    #[test]
    fn q78_round_trip_plus_six() {
        let mut head = head_with_gain(0);
        assert!(set_output_gain(&mut head, 6.0));
        assert_eq!(&head[16..18], &[0x00, 0x06]);
        let back = get_output_gain(&head).unwrap();
        assert!((back - 6.0).abs() <= 1.0 / 256.0);
    }

    #[test]
    fn q78_round_trip_negative() {
        let mut head = head_with_gain(0);
        assert!(set_output_gain(&mut head, -3.5));
        // round(-3.5 * 256) = -896 = 0xFC80; little-endian bytes [0x80, 0xFC].
        assert_eq!(&head[16..18], &[0x80, 0xFC]);
    }

    #[test]
    fn patch_is_noop_on_invalid_head() {
        let mut not_a_head = vec![0u8; 19];
        assert!(!set_output_gain(&mut not_a_head, 5.0));
        assert!(get_output_gain(&not_a_head).is_none());

        let mut too_short = b"OpusHead".to_vec();
        assert!(!set_output_gain(&mut too_short, 5.0));
    }

    #[test]
    fn toc_info_covers_all_mode_bands() {
        // config 0 -> SILK NB 10ms.
        let (mode, bw, ms) = opus_toc_info(0b0000_0_00 << 0);
        assert_eq!(mode, Mode::Silk);
        assert_eq!(bw, Bandwidth::Narrowband);
        assert_eq!(ms, 10.0);

        // config 16 -> CELT NB 2.5ms: top 5 bits = 16 -> byte = 16<<3 = 0x80.
        let (mode, bw, ms) = opus_toc_info(0x80);
        assert_eq!(mode, Mode::Celt);
        assert_eq!(bw, Bandwidth::Narrowband);
        assert_eq!(ms, 2.5);

        // config 14 -> Hybrid FB 10ms: byte = 14<<3 = 0x70.
        let (mode, bw, ms) = opus_toc_info(0x70);
        assert_eq!(mode, Mode::Hybrid);
        assert_eq!(bw, Bandwidth::Fullband);
        assert_eq!(ms, 10.0);
    }
}
