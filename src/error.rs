//! Crate-wide error handling.
//!
//! Every component surfaces failures through this single enum rather than a
//! type per module: [`Error`] is small and flat, and always bubbles up to the
//! playback controller, which is the only place that decides whether to
//! retry, advance, or terminate (see the propagation policy in spec §7).

use core::fmt;
use std::{error::Error as StdError, io::Error as IoError, process::Output};

/// Convenience type for fallible return of engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The engine's error taxonomy (spec §7).
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The source helper process failed to start (spawn error, missing
    /// executable).
    SourceUnavailable(IoError),
    /// The source helper ran, but exited unsuccessfully.
    SourceProcessFailed(Output),
    /// EBML/WebM structure did not parse, or the OGG page magic was wrong.
    ContainerMalformed(&'static str),
    /// The OpusHead codec-private block was absent, too short, or lost
    /// mid-stream.
    MissingOpusHead,
    /// The underlying reader reported a closed pipe mid-track.
    StreamClosed,
    /// The downstream transport's outbound channel is gone.
    TransportGone,
    /// An I/O error not covered by a more specific variant above.
    Io(IoError),
    /// The suggestion backend failed or returned nothing usable.
    SuggestionUnavailable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::SourceUnavailable(e) => write!(f, "source helper failed to start: {e}"),
            Error::SourceProcessFailed(o) => {
                write!(f, "source helper exited with status {:?}", o.status)
            },
            Error::ContainerMalformed(why) => write!(f, "malformed container: {why}"),
            Error::MissingOpusHead => write!(f, "stream is missing a valid OpusHead"),
            Error::StreamClosed => write!(f, "stream closed"),
            Error::TransportGone => {
                write!(f, "downstream transport is no longer accepting packets")
            },
            Error::Io(e) => e.fmt(f),
            Error::SuggestionUnavailable => write!(f, "suggestion backend unavailable"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::SourceUnavailable(e) | Error::Io(e) => Some(e),
            Error::SourceProcessFailed(_)
            | Error::ContainerMalformed(_)
            | Error::MissingOpusHead
            | Error::StreamClosed
            | Error::TransportGone
            | Error::SuggestionUnavailable => None,
        }
    }
}

impl From<IoError> for Error {
    fn from(e: IoError) -> Self {
        // Most child readers surface a dropped pipe as a plain io::Error;
        // fold it into the variant the controller already has a retry
        // policy for instead of forcing every call site to special-case it.
        use std::io::ErrorKind::{BrokenPipe, ConnectionReset, UnexpectedEof};
        match e.kind() {
            BrokenPipe | UnexpectedEof | ConnectionReset => Error::StreamClosed,
            _ => Error::Io(e),
        }
    }
}

impl Error {
    /// Matches spec §7's `StreamClosed` condition: the reader reports
    /// "closed"/"already closed" or an unexpected pipe EOF.
    #[must_use]
    pub fn is_stream_closed(&self) -> bool {
        matches!(self, Error::StreamClosed)
    }
}
