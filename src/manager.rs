//! Multi-guild registry (spec §13 supplemented surface).
//!
//! The teacher's [`Songbird`](crate) maps guild IDs to `Call`s behind a
//! `DashMap`, plus a sharder and client-data cell it needs to route gateway
//! traffic. None of that gateway/sharder coupling belongs in this crate
//! (spec §1); what survives is the map itself, keyed the same way, handing
//! back a [`Controller`] instead of a `Call`.

use crate::{config::EngineConfig, controller::Controller, id::GuildId, radio::SuggestionBackend, source::SourceBackend, transport::OutboundTransport};
use dashmap::DashMap;
use std::sync::Arc;

/// Maps each guild to its own playback controller, spawning one on first
/// use.
///
/// A `PlaybackManager` is cheap to share: clone the `Arc` it's usually held
/// behind rather than the manager itself. Every guild's controller is
/// independent — there is no cross-guild state here beyond the map.
pub struct PlaybackManager {
    controllers: DashMap<GuildId, Controller>,
    source: Arc<dyn SourceBackend>,
    suggestions: Arc<dyn SuggestionBackend>,
    config: EngineConfig,
}

impl PlaybackManager {
    /// Builds an empty registry. `source` and `suggestions` are shared by
    /// every guild's controller; `config` seeds each new controller's
    /// queue/radio/preload tuning.
    #[must_use]
    pub fn new(source: Arc<dyn SourceBackend>, suggestions: Arc<dyn SuggestionBackend>, config: EngineConfig) -> Self {
        Self {
            controllers: DashMap::new(),
            source,
            suggestions,
            config,
        }
    }

    /// Retrieves the controller for `guild`, if one has already been
    /// created.
    #[must_use]
    pub fn get(&self, guild: GuildId) -> Option<Controller> {
        self.controllers.get(&guild).map(|entry| entry.clone())
    }

    /// Retrieves the controller for `guild`, spawning one bound to
    /// `transport` if none exists yet.
    ///
    /// This is the "join" operation: a guild's controller is created the
    /// first time its voice transport becomes available, and lives for as
    /// long as the manager does thereafter (spec §13 — no gateway-driven
    /// teardown here, just the map).
    pub fn get_or_join(&self, guild: GuildId, transport: Arc<dyn OutboundTransport>) -> Controller {
        self.controllers
            .entry(guild)
            .or_insert_with(|| Controller::spawn(Arc::clone(&self.source), Arc::clone(&self.suggestions), transport, self.config))
            .clone()
    }

    /// Drops the controller for `guild`, stopping its playback task (the
    /// only owner of the task's signal sender is the entry being removed,
    /// so the task's main loop observes the channel close and exits).
    ///
    /// Returns `true` if a controller was present to remove.
    pub fn leave(&self, guild: GuildId) -> bool {
        self.controllers.remove(&guild).is_some()
    }

    /// Whether `guild` currently has a controller.
    #[must_use]
    pub fn contains(&self, guild: GuildId) -> bool {
        self.controllers.contains_key(&guild)
    }

    /// Number of guilds with an active controller.
    #[must_use]
    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{track::{SourceKind, Track}, transport::test_util::RecordingTransport};
    use async_trait::async_trait;
    use std::num::NonZeroU64;

    struct NoSource;

    #[async_trait]
    impl SourceBackend for NoSource {
        async fn fetch(&self, _track: &Track) -> crate::error::Result<crate::source::FetchedAudio> {
            unimplemented!("not exercised by manager tests")
        }

        async fn search(&self, _query: &str, _requester: &str) -> crate::error::Result<Vec<Track>> {
            Ok(Vec::new())
        }

        async fn fetch_playlist(&self, _url: &str, _requester: &str) -> crate::error::Result<Vec<Track>> {
            Ok(Vec::new())
        }
    }

    struct NoSuggestions;

    #[async_trait]
    impl SuggestionBackend for NoSuggestions {
        async fn suggest(&self, _seed: &str, _recent_titles: &[&str]) -> crate::error::Result<Vec<String>> {
            Ok(Vec::new())
        }
    }

    fn guild(n: u64) -> GuildId {
        GuildId(NonZeroU64::new(n).unwrap())
    }

    fn manager() -> PlaybackManager {
        PlaybackManager::new(Arc::new(NoSource), Arc::new(NoSuggestions), EngineConfig::default())
    }

    #[test]
    fn get_on_unknown_guild_is_none() {
        let manager = manager();
        assert!(manager.get(guild(1)).is_none());
    }

    #[tokio::test]
    async fn get_or_join_is_idempotent_per_guild() {
        let manager = manager();
        let (transport, _rx) = RecordingTransport::new(4);
        let transport = Arc::new(transport);

        let first = manager.get_or_join(guild(1), transport.clone());
        let second = manager.get_or_join(guild(1), transport);

        first.enqueue(Track::new("https://example.invalid/a", "A", "0:05", 5, "someone", SourceKind::Twitch));
        assert_eq!(second.queue_len(), 1);
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn distinct_guilds_get_distinct_controllers() {
        let manager = manager();
        let (t1, _rx1) = RecordingTransport::new(4);
        let (t2, _rx2) = RecordingTransport::new(4);

        manager.get_or_join(guild(1), Arc::new(t1));
        manager.get_or_join(guild(2), Arc::new(t2));

        assert_eq!(manager.len(), 2);
        assert!(manager.contains(guild(1)));
        assert!(manager.contains(guild(2)));
    }

    #[tokio::test]
    async fn leave_removes_the_controller() {
        let manager = manager();
        let (transport, _rx) = RecordingTransport::new(4);
        manager.get_or_join(guild(1), Arc::new(transport));

        assert!(manager.leave(guild(1)));
        assert!(!manager.contains(guild(1)));
        assert!(!manager.leave(guild(1)));
    }
}
