//! opuscast: the guild playback engine behind a multi-guild voice music bot.
//!
//! This crate is the hard engineering core carved out of a larger bot: it
//! owns nothing about Discord's gateway, command parsing, or embed
//! rendering. What it owns is turning a per-guild queue of tracks into a
//! continuous stream of 20 ms Opus frames, with skip/stop/pause/resume/
//! seek, gapless preloading of the next track, LLM-seeded radio refill, and
//! per-track loudness normalization.
//!
//! ## Layout
//!
//! Reading order mirrors the data flow, leaves first:
//!
//! * [`ebml`] — C1: variable-length EBML ID/size parsing.
//! * [`webm`] — C2: the WebM demuxer built on C1, with frame-accurate skip
//!   seeking and loudness-analysis buffering.
//! * [`loudness`] — C3: a heuristic loudness estimator (no decoder linked)
//!   and the OpusHead `output_gain` patch it drives.
//! * [`ogg`] — C4: the OGG page writer/reader every demuxed stream is
//!   wrapped in before reaching the transport.
//! * [`preload`] — C5: the per-guild background buffer that demuxes the
//!   next track ahead of time for gapless playback.
//! * [`controller`] — C6: the playback state machine tying the queue,
//!   preload slot, and control signals together into one frame loop per
//!   guild.
//!
//! [`source`], [`radio`], and [`transport`] are the external-interface
//! traits the controller depends on without bundling a concrete Discord
//! gateway, LLM client, or command layer (spec §6, §9). [`manager`] is the
//! multi-guild registry tying a [`id::GuildId`] to its controller handle.

#![warn(clippy::pedantic, rust_2018_idioms)]
#![allow(
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod constants;
pub mod controller;
pub mod ebml;
pub mod error;
pub mod id;
pub mod loudness;
pub mod manager;
pub mod ogg;
pub mod playback_state;
pub mod preload;
pub mod process;
pub mod queue;
pub mod radio;
pub mod source;
pub mod track;
pub mod transport;
pub mod webm;

pub use config::{EngineConfig, Environment};
pub use controller::Controller;
pub use error::{Error, Result};
pub use id::GuildId;
pub use manager::PlaybackManager;
pub use queue::Queue;
pub use track::{SourceKind, Track};
