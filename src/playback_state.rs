//! Per-guild transport-facing playback flags (spec §3).

use std::time::{Duration, Instant};

/// Tracks the state a single guild's controller reports outward: whether a
/// track is active, whether the transport has been told "speaking", and the
/// clock used to derive `current_position`.
///
/// Exactly one playback task owns this per guild (spec §5); everywhere else
/// in the crate only reads it.
#[derive(Debug)]
pub struct PlaybackState {
    is_playing: bool,
    is_speaking: bool,
    is_paused: bool,
    /// `now - song_start_instant` is the position we'd report if not
    /// paused; kept as an absolute instant (rather than accumulated
    /// duration) so seeks and resumes are a single assignment (spec §4.6.1,
    /// §4.6.2 control-signal handling).
    song_start_instant: Option<Instant>,
    /// Position at the moment pause was requested; used to recompute
    /// `song_start_instant` on resume (spec §8 scenario 6).
    paused_at_offset: Duration,
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self {
            is_playing: false,
            is_speaking: false,
            is_paused: false,
            song_start_instant: None,
            paused_at_offset: Duration::ZERO,
        }
    }
}

impl PlaybackState {
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    #[must_use]
    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.is_paused
    }

    /// Marks a track as started (or restarted after a seek), `seek_offset`
    /// seconds into its stream (spec §4.6.1).
    pub fn start_track(&mut self, seek_offset: Duration) {
        self.is_playing = true;
        self.is_paused = false;
        self.is_speaking = true;
        self.song_start_instant = Some(Instant::now() - seek_offset);
    }

    /// Marks playback as stopped; the transport should be told
    /// "not speaking".
    pub fn stop(&mut self) {
        self.is_playing = false;
        self.is_paused = false;
        self.is_speaking = false;
        self.song_start_instant = None;
    }

    /// Derives the current playback position from the clock. Returns zero
    /// before any track has started.
    #[must_use]
    pub fn current_position(&self) -> Duration {
        if self.is_paused {
            return self.paused_at_offset;
        }
        match self.song_start_instant {
            Some(start) => Instant::now().saturating_duration_since(start),
            None => Duration::ZERO,
        }
    }

    /// Pauses playback, capturing the current position (spec §4.6.2).
    pub fn pause(&mut self) {
        if self.is_paused {
            return;
        }
        self.paused_at_offset = self.current_position();
        self.is_paused = true;
        self.is_speaking = false;
    }

    /// Resumes playback, shifting the start instant so that
    /// `current_position` continues from where it was paused (spec §8
    /// scenario 6).
    pub fn resume(&mut self) {
        if !self.is_paused {
            return;
        }
        self.is_paused = false;
        self.is_speaking = true;
        self.song_start_instant = Some(Instant::now() - self.paused_at_offset);
    }
}
