//! Minimal newtype used to key per-guild engine state.
//!
//! The original crate's `id.rs` carries three ID types plus conversions for
//! two different gateway front-ends; the playback engine only ever needs to
//! key its own per-guild state (queue, controller handle, radio, preload
//! slot), so only [`GuildId`] survives the transform.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    num::NonZeroU64,
};

/// Opaque identifier for a guild's playback state.
///
/// The engine does not interpret this value; whatever owns the Discord
/// gateway connection is responsible for handing it a stable ID per guild.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct GuildId(pub NonZeroU64);

impl Display for GuildId {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        Display::fmt(&self.0, f)
    }
}

impl From<NonZeroU64> for GuildId {
    fn from(id: NonZeroU64) -> Self {
        Self(id)
    }
}
