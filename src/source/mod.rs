//! Source backends: the "polymorphism over sources" capability set (spec
//! §9) the playback core depends on instead of a type per streaming site.
//!
//! The controller never branches on [`crate::track::SourceKind`] itself —
//! only [`SourceBackend::fetch`] does, picking between the direct WebM
//! pipeline ([`ytdlp`]) and the transcoding pipeline ([`twitch`]). Search
//! and playlist expansion are part of the same capability set (spec §9)
//! even though the playback engine itself never calls them; they exist so
//! radio refill (§4.6.3) has somewhere to resolve suggested titles into
//! tracks without the controller needing a second trait.

pub mod twitch;
pub mod ytdlp;

use crate::{
    config::Environment,
    error::Result,
    track::{SourceKind, Track},
};
use async_trait::async_trait;
use tokio::io::AsyncRead;

/// How many candidate results a single search call returns, when a caller
/// doesn't otherwise bound it.
const DEFAULT_SEARCH_LIMIT: usize = 5;

/// Byte stream fetched for one track, tagged with whether it still needs
/// C2's WebM demuxing or is already framed OGG/Opus (spec §4.6.1).
pub enum FetchedAudio {
    /// Raw WebM/Opus bytes; the caller must run this through
    /// [`crate::webm::spawn`] before framing.
    WebM(Box<dyn AsyncRead + Send + Unpin>),
    /// Already-framed OGG/Opus bytes (the Twitch transcoding pipeline);
    /// the caller frames this directly with [`crate::ogg::PageReader`].
    Ogg(Box<dyn AsyncRead + Send + Unpin>),
}

/// The capability set the playback core depends on instead of a source-kind
/// match (spec §9).
#[async_trait]
pub trait SourceBackend: Send + Sync {
    /// Starts streaming `track`'s audio.
    async fn fetch(&self, track: &Track) -> Result<FetchedAudio>;

    /// Searches for tracks matching a free-text query (used by radio
    /// refill, §4.6.3, to resolve a suggested title into a playable URL).
    async fn search(&self, query: &str, requester: &str) -> Result<Vec<Track>>;

    /// Expands a playlist URL into its member tracks.
    async fn fetch_playlist(&self, url: &str, requester: &str) -> Result<Vec<Track>>;
}

/// The engine's only real [`SourceBackend`]: shells out to `yt-dlp` (and,
/// for Twitch, `ffmpeg`) as described in spec §6.
pub struct ChildProcessBackend {
    environment: Environment,
}

impl ChildProcessBackend {
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self { environment }
    }
}

#[async_trait]
impl SourceBackend for ChildProcessBackend {
    async fn fetch(&self, track: &Track) -> Result<FetchedAudio> {
        match track.source {
            SourceKind::Twitch => {
                let chain = twitch::spawn(&self.environment, &track.url).await?;
                Ok(FetchedAudio::Ogg(Box::new(chain)))
            },
            SourceKind::YouTube | SourceKind::Spotify | SourceKind::SoundCloud => {
                let chain = ytdlp::spawn(&self.environment, &track.url).await?;
                Ok(FetchedAudio::WebM(Box::new(chain)))
            },
        }
    }

    async fn search(&self, query: &str, requester: &str) -> Result<Vec<Track>> {
        ytdlp::search(&self.environment, query, DEFAULT_SEARCH_LIMIT, requester).await
    }

    async fn fetch_playlist(&self, url: &str, requester: &str) -> Result<Vec<Track>> {
        ytdlp::fetch_playlist(&self.environment, url, requester).await
    }
}
