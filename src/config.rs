//! Ambient configuration, passed explicitly into component constructors
//! instead of read from process-wide globals.

use derivative::Derivative;
use std::path::PathBuf;

/// Executable paths and credentials the engine's child-process helpers need.
///
/// The original bot reached for these as ambient globals
/// (`YtdlpExecutable`, `FfmpegExecutable`, `OpenRouterAPIKey`); here they are
/// threaded explicitly through [`crate::source`] and [`crate::radio`]
/// constructors (spec §9's "ambient globals" redesign flag).
#[derive(Clone, Derivative)]
#[derivative(Debug)]
pub struct Environment {
    /// Path (or bare name, resolved via `PATH`) to the `yt-dlp` binary.
    pub ytdlp_executable: PathBuf,
    /// Path (or bare name) to the `ffmpeg` binary, used only for the Twitch
    /// transcoding pipeline.
    pub ffmpeg_executable: PathBuf,
    /// API key for the external suggestion service used by radio refill.
    /// `None` disables radio mode entirely (refill always reports
    /// [`crate::error::Error::SuggestionUnavailable`]).
    #[derivative(Debug = "ignore")]
    pub suggestion_api_key: Option<String>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            ytdlp_executable: PathBuf::from("yt-dlp"),
            ffmpeg_executable: PathBuf::from("ffmpeg"),
            suggestion_api_key: None,
        }
    }
}

impl Environment {
    /// Sets the `yt-dlp` executable path.
    #[must_use]
    pub fn ytdlp_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.ytdlp_executable = path.into();
        self
    }

    /// Sets the `ffmpeg` executable path.
    #[must_use]
    pub fn ffmpeg_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_executable = path.into();
        self
    }

    /// Sets the suggestion-service API key.
    #[must_use]
    pub fn suggestion_api_key(mut self, key: impl Into<String>) -> Self {
        self.suggestion_api_key = Some(key.into());
        self
    }
}

/// Numeric knobs for the playback engine, defaulting to the values fixed by
/// spec §6.
///
/// Most of these are *documented as fixed* in the specification (the
/// loudness heuristic's constants in particular must not drift, or the
/// engine stops being bit-compatible with itself across releases) but are
/// still modelled as fields rather than bare constants where a deployment
/// might reasonably want to retune queue capacity or preload thresholds.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct EngineConfig {
    /// Target integrated loudness, dB LUFS-equivalent (§4.3).
    pub target_lufs: f64,
    /// Symmetric gain clamp, in dB (§4.3).
    pub gain_range_db: f64,
    /// Opus packets analyzed for loudness before normal streaming resumes
    /// (§4.2, §4.3).
    pub analysis_frames: usize,
    /// Preload "ready" threshold in bytes (§4.5).
    pub preload_ready_threshold_bytes: usize,
    /// Initial preload buffer capacity in bytes (§3, §4.5).
    pub preload_initial_capacity_bytes: usize,
    /// How long to wait for a preload slot before abandoning it, in
    /// milliseconds (§4.5).
    pub preload_wait_ms: u64,
    /// Maximum size of the radio play-history set (§3).
    pub radio_history_max: usize,
    /// Maximum tracks appended per radio refill (§4.6.3).
    pub radio_max_songs_per_refill: usize,
    /// Duration cutoff (seconds) above which a radio suggestion is skipped
    /// (§4.6.3).
    pub radio_duration_limit_s: u64,
    /// Preallocated queue capacity (§3).
    pub default_queue_capacity: usize,
    /// Frame interval on which `current_position` is recomputed (§4.6.2).
    pub position_update_frame_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            target_lufs: TARGET_LUFS,
            gain_range_db: GAIN_RANGE_DB,
            analysis_frames: ANALYSIS_FRAMES,
            preload_ready_threshold_bytes: PRELOAD_READY_THRESHOLD_BYTES,
            preload_initial_capacity_bytes: PRELOAD_INITIAL_CAPACITY_BYTES,
            preload_wait_ms: PRELOAD_WAIT.as_millis() as u64,
            radio_history_max: RADIO_HISTORY_MAX,
            radio_max_songs_per_refill: RADIO_MAX_SONGS_PER_REFILL,
            radio_duration_limit_s: RADIO_DURATION_LIMIT_SECS,
            default_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            position_update_frame_interval: POSITION_UPDATE_FRAME_INTERVAL,
        }
    }
}

impl EngineConfig {
    /// Sets the analysis window size, in packets.
    #[must_use]
    pub fn analysis_frames(mut self, frames: usize) -> Self {
        self.analysis_frames = frames;
        self
    }

    /// Sets the preallocated queue capacity.
    #[must_use]
    pub fn default_queue_capacity(mut self, capacity: usize) -> Self {
        self.default_queue_capacity = capacity;
        self
    }

    /// Sets the preload readiness threshold, in bytes.
    #[must_use]
    pub fn preload_ready_threshold_bytes(mut self, bytes: usize) -> Self {
        self.preload_ready_threshold_bytes = bytes;
        self
    }

    /// Sets the radio play-history cap.
    #[must_use]
    pub fn radio_history_max(mut self, max: usize) -> Self {
        self.radio_history_max = max;
        self
    }
}
