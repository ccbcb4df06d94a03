//! Track data model (spec §3).

use std::fmt;

/// Which external source a track's URL resolves against.
///
/// This is the "polymorphism over sources" design note from spec §9: the
/// playback core only ever depends on the byte-stream contract produced by
/// [`crate::source::SourceBackend`], not on which of these four the track
/// actually came from. `SourceKind` exists purely to pick the right backend
/// and invocation shape (e.g. Twitch's transcode pipeline vs. every other
/// source's direct WebM demux).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SourceKind {
    YouTube,
    Twitch,
    Spotify,
    SoundCloud,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::YouTube => "youtube",
            SourceKind::Twitch => "twitch",
            SourceKind::Spotify => "spotify",
            SourceKind::SoundCloud => "soundcloud",
        };
        f.write_str(name)
    }
}

/// An immutable queue entry.
///
/// Tracks are created by the enqueue path and destroyed only when the queue
/// is cleared; nothing in the playback engine ever mutates one in place.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Track {
    /// Source URL; doubles as the track's identity for radio-history and
    /// preload-slot matching.
    pub url: String,
    /// Display title.
    pub title: String,
    /// Pre-formatted duration string (e.g. `"3:42"`), as produced upstream
    /// by whatever queried the source's metadata.
    pub duration: String,
    /// Duration in whole seconds, used by radio refill's length filter
    /// (§4.6.3) without having to reparse `duration`.
    pub duration_secs: u64,
    /// Display name of whoever queued this track.
    pub requester: String,
    /// Which backend produced/will produce this track's byte stream.
    pub source: SourceKind,
}

impl Track {
    /// Creates a new track. `duration_secs` should be derived from the same
    /// source metadata that produced `duration`; the engine does not
    /// attempt to parse `duration` back into seconds.
    #[must_use]
    pub fn new(
        url: impl Into<String>,
        title: impl Into<String>,
        duration: impl Into<String>,
        duration_secs: u64,
        requester: impl Into<String>,
        source: SourceKind,
    ) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            duration: duration.into(),
            duration_secs,
            requester: requester.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_lowercase_source_name() {
        assert_eq!(SourceKind::YouTube.to_string(), "youtube");
        assert_eq!(SourceKind::SoundCloud.to_string(), "soundcloud");
    }
}
