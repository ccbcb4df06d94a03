//! Per-guild track queue (spec §3).

use crate::track::Track;

/// Ordered sequence of [`Track`]s plus a current-index cursor.
///
/// Invariant: `-1 <= current < tracks.len() as isize`; `current ==
/// tracks.len() - 1` after the last track iff `loop_enabled` is false and
/// radio mode is off (radio mode lives in [`crate::radio::RadioState`] and
/// is consulted by the controller, not by the queue itself).
#[derive(Clone, Debug, Default)]
pub struct Queue {
    tracks: Vec<Track>,
    /// `-1` before the first track has been taken from the queue.
    current: isize,
    loop_enabled: bool,
    shuffle_enabled: bool,
}

impl Queue {
    /// Creates an empty queue preallocated to `capacity` tracks.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tracks: Vec::with_capacity(capacity),
            current: -1,
            loop_enabled: false,
            shuffle_enabled: false,
        }
    }

    /// Appends a track to the end of the queue.
    pub fn push(&mut self, track: Track) {
        self.tracks.push(track);
    }

    /// Number of tracks currently queued (including already-played ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Current cursor position, or `None` before playback has started.
    #[must_use]
    pub fn current_index(&self) -> Option<usize> {
        usize::try_from(self.current).ok()
    }

    /// The track at the cursor, if any.
    #[must_use]
    pub fn current(&self) -> Option<&Track> {
        self.current_index().and_then(|i| self.tracks.get(i))
    }

    #[must_use]
    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn set_loop_enabled(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    #[must_use]
    pub fn shuffle_enabled(&self) -> bool {
        self.shuffle_enabled
    }

    pub fn set_shuffle_enabled(&mut self, enabled: bool) {
        self.shuffle_enabled = enabled;
    }

    /// Number of tracks still to play after the cursor, saturating at 0.
    #[must_use]
    pub fn remaining(&self) -> usize {
        let played = self.current.max(-1) + 1;
        self.tracks.len().saturating_sub(played as usize)
    }

    /// The track one past the cursor, if queued (used by preload, spec
    /// §4.6 step 4).
    #[must_use]
    pub fn peek_next(&self) -> Option<&Track> {
        let next = self.current + 1;
        usize::try_from(next).ok().and_then(|i| self.tracks.get(i))
    }

    /// Empties the queue and resets the cursor to before the first track.
    pub fn clear(&mut self) {
        self.tracks.clear();
        self.current = -1;
    }

    /// Advances the cursor by one slot, per spec §4.6 step 1.
    ///
    /// If `loop_enabled` and the queue is non-empty, wraps the cursor back
    /// to `-1` (so the *next* call to `advance` starts again from index 0)
    /// and reports [`AdvanceResult::Looped`]. Otherwise advances normally,
    /// reporting [`AdvanceResult::Track`] while a track remains, or
    /// [`AdvanceResult::EndOfQueue`] once exhausted.
    pub fn advance(&mut self) -> AdvanceResult {
        if self.loop_enabled && !self.tracks.is_empty() && self.current >= 0 {
            self.current = -1;
            return AdvanceResult::Looped;
        }

        self.current += 1;
        if (self.current as usize) < self.tracks.len() {
            AdvanceResult::Track
        } else {
            AdvanceResult::EndOfQueue
        }
    }

    /// Titles of the last `n` tracks played so far (most recent last),
    /// used to seed radio refill requests (§4.6.3).
    #[must_use]
    pub fn recent_titles(&self, n: usize) -> Vec<&str> {
        let Some(played_through) = self.current_index() else {
            return Vec::new();
        };
        let start = (played_through + 1).saturating_sub(n);
        self.tracks[start..=played_through]
            .iter()
            .map(|t| t.title.as_str())
            .collect()
    }

    /// Appends freshly-suggested tracks (radio refill, §4.6.3).
    pub fn extend(&mut self, tracks: impl IntoIterator<Item = Track>) {
        self.tracks.extend(tracks);
    }
}

/// Outcome of [`Queue::advance`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdvanceResult {
    /// A track is now at the cursor; play it.
    Track,
    /// Looping wrapped the cursor back before the first track.
    Looped,
    /// No more tracks; the main loop must consult radio mode before
    /// deciding to exit (§4.6 step 1).
    EndOfQueue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::SourceKind;

    fn track(n: u32) -> Track {
        Track::new(
            format!("https://example.invalid/{n}"),
            format!("Track {n}"),
            "3:00",
            180,
            "someone",
            SourceKind::YouTube,
        )
    }

    #[test]
    fn advance_walks_forward_then_ends() {
        let mut q = Queue::with_capacity(4);
        q.push(track(1));
        q.push(track(2));

        assert_eq!(q.advance(), AdvanceResult::Track);
        assert_eq!(q.current().unwrap().title, "Track 1");
        assert_eq!(q.advance(), AdvanceResult::Track);
        assert_eq!(q.current().unwrap().title, "Track 2");
        assert_eq!(q.advance(), AdvanceResult::EndOfQueue);
    }

    #[test]
    fn loop_wraps_cursor_to_start() {
        let mut q = Queue::with_capacity(4);
        q.push(track(1));
        q.set_loop_enabled(true);

        assert_eq!(q.advance(), AdvanceResult::Track);
        assert_eq!(q.advance(), AdvanceResult::Looped);
        assert_eq!(q.advance(), AdvanceResult::Track);
        assert_eq!(q.current().unwrap().title, "Track 1");
    }

    #[test]
    fn remaining_counts_down_as_cursor_advances() {
        let mut q = Queue::with_capacity(4);
        q.push(track(1));
        q.push(track(2));
        q.push(track(3));

        assert_eq!(q.remaining(), 3);
        q.advance();
        assert_eq!(q.remaining(), 2);
        q.advance();
        assert_eq!(q.remaining(), 1);
    }

    #[test]
    fn peek_next_reflects_upcoming_track() {
        let mut q = Queue::with_capacity(4);
        q.push(track(1));
        q.push(track(2));
        assert_eq!(q.peek_next().unwrap().title, "Track 1");
        q.advance();
        assert_eq!(q.peek_next().unwrap().title, "Track 2");
    }
}
