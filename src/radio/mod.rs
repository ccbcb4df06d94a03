//! Radio mode: auto-refill from suggested titles (spec §3 `RadioState`,
//! §4.6.3).
//!
//! [`RadioState`] only tracks the bookkeeping (enabled flag, seed, played-URL
//! history, refill-in-progress singleton); the actual refill work —
//! suggest, search, filter, collect — is the free function
//! [`collect_refill_tracks`] so it can be unit-tested without a controller,
//! a queue, or locks in the picture. The controller is the one that holds
//! the radio lock and the queue lock (spec §5 lock order: playback → queue
//! → radio → preload) around calling it.

use crate::{config::EngineConfig, source::SourceBackend, track::Track};
use async_trait::async_trait;
use std::collections::HashSet;

/// The external text-generation collaborator that turns a seed + recently
/// played titles into a list of suggested song titles (spec §1 "LLM-based
/// playlist/radio suggestion generation" — explicitly out of scope, consumed
/// here only through this capability).
#[async_trait]
pub trait SuggestionBackend: Send + Sync {
    /// Suggests up to some backend-chosen number of song titles/queries,
    /// given the radio seed and the last few played titles.
    async fn suggest(&self, seed: &str, recent_titles: &[&str]) -> crate::error::Result<Vec<String>>;
}

/// Per-guild radio bookkeeping (spec §3).
#[derive(Debug)]
pub struct RadioState {
    enabled: bool,
    seed: String,
    history: HashSet<String>,
    history_max: usize,
    refill_in_progress: bool,
}

impl RadioState {
    /// Builds a disabled radio state with no history, capped per `config`.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        Self {
            enabled: false,
            seed: String::new(),
            history: HashSet::new(),
            history_max: config.radio_history_max,
            refill_in_progress: false,
        }
    }

    #[must_use]
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Turns radio mode on with the given seed query.
    pub fn enable(&mut self, seed: impl Into<String>) {
        self.enabled = true;
        self.seed = seed.into();
    }

    /// Turns radio mode off. History is left intact — re-enabling resumes
    /// with the same dedupe set.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    #[must_use]
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    #[must_use]
    pub fn has_played(&self, url: &str) -> bool {
        self.history.contains(url)
    }

    /// A point-in-time clone of the played-URL set, handed to
    /// [`collect_refill_tracks`] so it can run without holding the radio
    /// lock for the duration of a search/suggest round trip.
    #[must_use]
    pub fn history_snapshot(&self) -> HashSet<String> {
        self.history.clone()
    }

    /// Adds `url` to played history, evicting one arbitrary entry first if
    /// already at `history_max` (spec §3, §9 open question: the reference
    /// evicts an arbitrary map entry, not FIFO — preserved verbatim here via
    /// `HashSet`'s unspecified iteration order).
    pub fn remember(&mut self, url: impl Into<String>) {
        let url = url.into();
        if self.history.contains(&url) {
            return;
        }
        if self.history.len() >= self.history_max {
            if let Some(evict) = self.history.iter().next().cloned() {
                self.history.remove(&evict);
            }
        }
        self.history.insert(url);
    }

    #[must_use]
    pub fn refill_in_progress(&self) -> bool {
        self.refill_in_progress
    }

    /// Claims the refill-in-progress flag. Returns `false` (without
    /// changing state) if a refill is already running — the "at most one
    /// refill task per guild" invariant (spec §3, §8).
    #[must_use]
    pub fn try_start_refill(&mut self) -> bool {
        if self.refill_in_progress {
            return false;
        }
        self.refill_in_progress = true;
        true
    }

    /// Releases the refill-in-progress flag. Idempotent.
    pub fn finish_refill(&mut self) {
        self.refill_in_progress = false;
    }
}

/// Runs one radio refill attempt (spec §4.6.3): suggest, then search and
/// filter each suggestion, collecting up to `config.radio_max_songs_per_refill`
/// tracks. A suggestion-service failure is silent — an empty result, per
/// spec §7's `SuggestionUnavailable` policy — not propagated as an error.
pub async fn collect_refill_tracks(
    seed: &str,
    recent_titles: &[&str],
    already_played: &HashSet<String>,
    suggestions: &dyn SuggestionBackend,
    source: &dyn SourceBackend,
    requester: &str,
    config: EngineConfig,
) -> Vec<Track> {
    let Ok(suggested_titles) = suggestions.suggest(seed, recent_titles).await else {
        return Vec::new();
    };

    let mut collected = Vec::new();
    for title in suggested_titles {
        if collected.len() >= config.radio_max_songs_per_refill {
            break;
        }
        let Ok(candidates) = source.search(&title, requester).await else {
            continue;
        };
        let accepted = candidates
            .into_iter()
            .find(|candidate| !already_played.contains(&candidate.url) && candidate.duration_secs <= config.radio_duration_limit_s);
        if let Some(track) = accepted {
            collected.push(track);
        }
    }
    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Result, track::SourceKind};
    use async_trait::async_trait;

    fn track(url: &str, duration_secs: u64) -> Track {
        Track::new(url, url, "0:00", duration_secs, "radio", SourceKind::YouTube)
    }

    struct StubSuggestions {
        titles: Vec<&'static str>,
    }

    #[async_trait]
    impl SuggestionBackend for StubSuggestions {
        async fn suggest(&self, _seed: &str, _recent_titles: &[&str]) -> Result<Vec<String>> {
            Ok(self.titles.iter().map(ToString::to_string).collect())
        }
    }

    struct FailingSuggestions;

    #[async_trait]
    impl SuggestionBackend for FailingSuggestions {
        async fn suggest(&self, _seed: &str, _recent_titles: &[&str]) -> Result<Vec<String>> {
            Err(crate::error::Error::SuggestionUnavailable)
        }
    }

    struct StubSource {
        results: Vec<Track>,
    }

    #[async_trait]
    impl SourceBackend for StubSource {
        async fn fetch(&self, _track: &Track) -> Result<crate::source::FetchedAudio> {
            unimplemented!("not exercised by radio refill tests")
        }

        async fn search(&self, query: &str, _requester: &str) -> Result<Vec<Track>> {
            Ok(self.results.iter().filter(|t| t.title == query).cloned().collect())
        }

        async fn fetch_playlist(&self, _url: &str, _requester: &str) -> Result<Vec<Track>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn history_eviction_caps_at_configured_max() {
        let config = EngineConfig::default().radio_history_max(3);
        let mut radio = RadioState::new(config);

        radio.remember("A");
        radio.remember("B");
        radio.remember("C");
        radio.remember("D");

        assert_eq!(radio.history_len(), 3);
        assert!(radio.has_played("D"));
        let survivors = ["A", "B", "C"].iter().filter(|u| radio.has_played(u)).count();
        assert_eq!(survivors, 2);
    }

    #[test]
    fn remembering_an_existing_url_does_not_change_size() {
        let mut radio = RadioState::new(EngineConfig::default());
        radio.remember("A");
        radio.remember("B");
        let before = radio.history_len();
        radio.remember("A");
        assert_eq!(radio.history_len(), before);
    }

    #[test]
    fn try_start_refill_is_single_entry() {
        let mut radio = RadioState::new(EngineConfig::default());
        assert!(radio.try_start_refill());
        assert!(!radio.try_start_refill());
        radio.finish_refill();
        assert!(radio.try_start_refill());
    }

    #[tokio::test]
    async fn collect_filters_duplicates_and_overlong_tracks() {
        let suggestions = StubSuggestions {
            titles: vec!["Song A", "Song B", "Song C"],
        };
        let source = StubSource {
            results: vec![
                track("https://example.invalid/a", 200),
                track("https://example.invalid/b", 500), // too long
                track("https://example.invalid/c", 100),
            ]
            .into_iter()
            .zip(["Song A", "Song B", "Song C"])
            .map(|(mut t, title)| {
                t.title = title.to_string();
                t
            })
            .collect(),
        };
        let mut played = HashSet::new();
        played.insert("https://example.invalid/a".to_string());

        let config = EngineConfig::default();
        let collected = collect_refill_tracks("seed", &[], &played, &suggestions, &source, "someone", config).await;

        let urls: Vec<_> = collected.iter().map(|t| t.url.as_str()).collect();
        assert_eq!(urls, vec!["https://example.invalid/c"]);
    }

    #[tokio::test]
    async fn suggestion_failure_yields_empty_result_not_an_error() {
        let source = StubSource { results: Vec::new() };
        let played = HashSet::new();
        let collected =
            collect_refill_tracks("seed", &[], &played, &FailingSuggestions, &source, "someone", EngineConfig::default()).await;
        assert!(collected.is_empty());
    }
}
