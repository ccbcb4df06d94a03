//! Non-Twitch source helper invocation (spec §6).
//!
//! Grounded on the teacher's `input::ytdl::YoutubeDl`: a thin `Command`
//! wrapper plus `-j`/JSON parsing for metadata lookups. The teacher asks
//! yt-dlp to resolve a direct HTTP URL it then streams itself; this engine
//! instead pipes yt-dlp's own stdout straight into the WebM demuxer, so the
//! only shapes it needs from yt-dlp are "give me bytes" and "give me JSON".

use crate::{
    config::Environment,
    constants::YTDLP_FORMAT_SELECTOR,
    error::{Error, Result},
    process::ProcessChain,
    track::{SourceKind, Track},
};
use serde_json::Value;
use std::process::Stdio;
use tokio::process::Command;

/// Spawns `yt-dlp` against `url`, piping WebM/Opus bytes on stdout (spec
/// §6: `-f "251/250/bestaudio[ext=webm]/bestaudio/best" -o - --no-playlist`).
pub async fn spawn(environment: &Environment, url: &str) -> Result<ProcessChain> {
    let child = Command::new(&environment.ytdlp_executable)
        .args(["-f", YTDLP_FORMAT_SELECTOR, "-o", "-", "--no-playlist", url])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(Error::SourceUnavailable)?;
    Ok(ProcessChain::single(child))
}

/// Runs `yt-dlp -j` against a search query or playlist URL and parses each
/// JSON line into a [`Track`]. Shared by [`crate::source::search`] and
/// [`crate::source::fetch_playlist`].
async fn query_json(environment: &Environment, args: &[&str], requester: &str) -> Result<Vec<Track>> {
    let output = Command::new(&environment.ytdlp_executable)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(Error::SourceUnavailable)?;

    if !output.status.success() {
        return Err(Error::SourceProcessFailed(output));
    }

    let mut tracks = Vec::new();
    for line in output.stdout.split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }
        let Ok(entry) = serde_json::from_slice::<Value>(line) else {
            continue;
        };
        if let Some(track) = entry_to_track(&entry, requester) {
            tracks.push(track);
        }
    }
    Ok(tracks)
}

fn entry_to_track(entry: &Value, requester: &str) -> Option<Track> {
    let url = entry
        .get("webpage_url")
        .or_else(|| entry.get("url"))
        .and_then(Value::as_str)?;
    let title = entry.get("title").and_then(Value::as_str).unwrap_or(url);
    let duration_secs = entry.get("duration").and_then(Value::as_f64).unwrap_or(0.0) as u64;

    Some(Track::new(
        url,
        title,
        format_duration(duration_secs),
        duration_secs,
        requester,
        SourceKind::YouTube,
    ))
}

fn format_duration(total_secs: u64) -> String {
    let minutes = total_secs / 60;
    let seconds = total_secs % 60;
    format!("{minutes}:{seconds:02}")
}

/// Searches yt-dlp's default extractor (`ytsearch<n>:`) for `query`.
pub async fn search(environment: &Environment, query: &str, limit: usize, requester: &str) -> Result<Vec<Track>> {
    let search_spec = format!("ytsearch{limit}:{query}");
    query_json(environment, &["-j", "--no-playlist", &search_spec], requester).await
}

/// Expands a playlist URL into its member tracks via `--flat-playlist`.
pub async fn fetch_playlist(environment: &Environment, url: &str, requester: &str) -> Result<Vec<Track>> {
    query_json(environment, &["-j", "--flat-playlist", url], requester).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn entry_to_track_prefers_webpage_url_and_formats_duration() {
        let entry = json!({
            "webpage_url": "https://youtu.be/abc",
            "title": "A Song",
            "duration": 125.0,
        });
        let track = entry_to_track(&entry, "someone").unwrap();
        assert_eq!(track.url, "https://youtu.be/abc");
        assert_eq!(track.duration, "2:05");
        assert_eq!(track.duration_secs, 125);
    }

    #[test]
    fn entry_to_track_skips_entries_without_a_url() {
        let entry = json!({ "title": "No URL" });
        assert!(entry_to_track(&entry, "someone").is_none());
    }
}
