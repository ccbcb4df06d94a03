//! Twitch source helper pipeline: `yt-dlp | ffmpeg` transcoding to OGG/Opus
//! (spec §6).
//!
//! Twitch streams don't arrive as WebM/Opus the way YouTube's does, so
//! rather than teaching C2 a second container format, the bot transcodes
//! with ffmpeg before the bytes ever reach this crate's parsing code. The
//! controller treats this pipeline's stdout as already-framed OGG/Opus and
//! feeds it straight to C4's page reader (spec §4.6.1).

use crate::{
    config::Environment,
    error::{Error, Result},
    process::ProcessChain,
};
use std::process::Stdio;
use tokio::process::Command;

/// Spawns `yt-dlp --no-live-from-start ... | ffmpeg -c:a libopus ... -f ogg
/// pipe:1` and returns the chain with ffmpeg's stdout as the final reader.
pub async fn spawn(environment: &Environment, url: &str) -> Result<ProcessChain> {
    let mut ytdlp = Command::new(&environment.ytdlp_executable)
        .args([
            "-o",
            "-",
            "--no-playlist",
            "-f",
            "bestaudio/best",
            "--no-live-from-start",
            "--no-part",
            "--no-cache-dir",
            url,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(Error::SourceUnavailable)?;

    let ytdlp_stdout = ytdlp.stdout.take().expect("yt-dlp spawned with a piped stdout");

    let ffmpeg = Command::new(&environment.ffmpeg_executable)
        .args([
            "-hide_banner",
            "-loglevel",
            "warning",
            "-i",
            "pipe:0",
            "-vn",
            "-c:a",
            "libopus",
            "-b:a",
            "128k",
            "-ar",
            "48000",
            "-ac",
            "2",
            "-application",
            "audio",
            "-frame_duration",
            "20",
            "-f",
            "ogg",
            "pipe:1",
        ])
        .stdin(Stdio::from(
            ytdlp_stdout
                .try_into_std()
                .map_err(|_| Error::ContainerMalformed("could not hand off yt-dlp stdout to ffmpeg"))?,
        ))
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(Error::SourceUnavailable)?;

    Ok(ProcessChain::new(vec![ytdlp, ffmpeg]))
}
