//! Fixed constants making up the engine's configuration surface (spec §6).
//!
//! These are compile-time constants rather than [`EngineConfig`](crate::config::EngineConfig)
//! fields because spec §6 lists them as fixed, not user-tunable; `EngineConfig`
//! exists for the handful of values a deployment legitimately wants to override.

use std::time::Duration;

/// Sample rate of the Opus streams this engine ever produces or consumes.
pub const SAMPLE_RATE_HZ: u32 = 48_000;

/// Samples per 20 ms Opus frame at 48 kHz; also the OGG granule-position
/// increment for one audio page.
pub const OPUS_SAMPLES_PER_FRAME: u64 = 960;

/// Length of one Opus frame.
pub const FRAME_LEN: Duration = Duration::from_millis(20);

/// Target integrated loudness for the heuristic normalizer (§4.3).
pub const TARGET_LUFS: f64 = -14.0;

/// Symmetric clamp applied to the computed output gain, in dB (§4.3).
pub const GAIN_RANGE_DB: f64 = 12.0;

/// Number of leading Opus packets fed into the loudness estimator before
/// headers and buffered packets are flushed (§4.2, §4.3).
pub const ANALYSIS_FRAMES: usize = 50;

/// Reference packet size (bytes) used by the loudness heuristic's size
/// factor, approximating 128 kbps at 20 ms framing (§4.3).
pub const REFERENCE_PACKET_SIZE_BYTES: f64 = 130.0;

/// Cumulative preload bytes at which a preload task signals "ready" even if
/// the source helper has not reached EOF (§4.5).
pub const PRELOAD_READY_THRESHOLD_BYTES: usize = 65_536;

/// Initial capacity reserved for a preload buffer (§3, §4.5).
pub const PRELOAD_INITIAL_CAPACITY_BYTES: usize = 1_048_576;

/// Chunk size used when filling the preload buffer from the source helper.
pub const PRELOAD_READ_CHUNK_BYTES: usize = 8 * 1024;

/// How long the controller waits for a preload slot to become ready before
/// abandoning it and starting a fresh stream (§4.5).
pub const PRELOAD_WAIT: Duration = Duration::from_secs(3);

/// Maximum number of previously-played URLs retained by [`RadioState`](crate::radio::RadioState)
/// before an arbitrary entry is evicted (§3, §8).
pub const RADIO_HISTORY_MAX: usize = 100;

/// Maximum number of tracks appended to the queue by a single radio refill
/// (§4.6.3).
pub const RADIO_MAX_SONGS_PER_REFILL: usize = 6;

/// Tracks whose formatted duration exceeds this many seconds are excluded
/// from radio refill suggestions (§4.6.3).
pub const RADIO_DURATION_LIMIT_SECS: u64 = 420;

/// Number of most-recently-played titles seeded into a radio refill request
/// (§4.6.3).
pub const RADIO_HISTORY_SEED_COUNT: usize = 5;

/// Default preallocated capacity of a guild's track queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// Every Nth frame, the controller recomputes `current_position` from the
/// playback clock rather than doing it unconditionally (§4.6.2).
pub const POSITION_UPDATE_FRAME_INTERVAL: u64 = 50;

/// Fixed OGG serial number used for every emitted stream (§4.4, §6; open
/// question in spec §9 — preserved verbatim for bit-compatible behaviour).
pub const OPUS_SERIAL: u32 = 0x0001_E240;

/// CRC-32 polynomial used by the OGG page checksum (MSB-first, no
/// reflection, no final XOR).
pub const OGG_CRC_POLY: u32 = 0x04C1_1DB7;

/// Remaining queued-track threshold below which a radio refill is triggered
/// proactively, ahead of queue exhaustion (§4.6 step 3).
pub const RADIO_REFILL_LOOKAHEAD: usize = 2;

/// Default `yt-dlp` output format selector for non-Twitch sources (§6).
pub const YTDLP_FORMAT_SELECTOR: &str = "251/250/bestaudio[ext=webm]/bestaudio/best";

/// Idle tick inside the pause sub-loop (§4.6.2, §5 "100 ms pause-idle
/// timers").
pub const PAUSE_TICK: Duration = Duration::from_millis(100);
