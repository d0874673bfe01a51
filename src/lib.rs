//! Playlist-driven audio graph: one decoder fanned out to an arbitrary
//! number of heterogeneous sinks (playback, encoding, fingerprinting,
//! loudness measurement), connected through a filter graph that resamples
//! and mixes according to per-item and per-sink gain/peak metadata.
//!
//! Grounded in `proteus-core`'s module layout (`src/lib.rs` re-exporting a
//! flat set of top-level types) and in the libgroove C library this crate's
//! object model (`File`, `Playlist`, `Sink`, `Buffer`) is distilled from.

pub mod buffer;
pub mod dsp;
pub mod encoder_sink;
pub mod error;
pub mod file;
pub mod filter_graph;
pub mod logging;
pub mod playback_sink;
pub mod playlist;
pub mod queue;
pub mod sink;
pub mod sink_map;
pub mod tools;

pub mod format;

pub use buffer::{Buffer, Payload};
pub use encoder_sink::{Encoder, EncoderSink};
pub use error::{Error, Result};
pub use file::{
    create_rand_name, File, FrameSource, SeekRequest, Tag, APPEND, DONT_OVERWRITE, MATCH_CASE,
};
pub use filter_graph::{FilterGraph, GraphInputs};
pub use format::{
    audio_formats_equal, channel_layout_count, channel_layout_default,
    sample_format_bytes_per_sample, AudioFormat, ChannelLayout, SampleFormat,
};
pub use logging::{set_logging, LogLevel};
pub use playback_sink::{PlaybackEvent, PlaybackSink};
pub use playlist::{FillMode, ItemId, Playlist, PlaylistItem};
pub use sink::{BufferGet, NoCallbacks, Sink, SinkCallbacks, SinkConfig, SinkItem};
pub use sink_map::{GroupKey, GroupTap, SinkMap};
pub use tools::loudness_to_replaygain;

use std::sync::atomic::{AtomicBool, Ordering};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Idempotent process-wide setup. There is no global registry of live
/// playlists to build here (each [`Playlist`] owns its worker thread and is
/// torn down independently via [`Playlist::destroy`]), so this amounts to
/// installing a default logger if the host application hasn't installed one
/// of its own.
///
/// Returns `false` if already initialized, matching the common "did this
/// call do anything" convention for idempotent setup functions.
pub fn init() -> bool {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return false;
    }
    log::set_max_level(log::LevelFilter::Info);
    true
}

/// Process-wide teardown counterpart to [`init`]. Playlists and sinks are
/// still responsible for their own `destroy`/`detach` calls; this only
/// resets the process-wide init flag so a later `init()` call is observed
/// as a fresh start.
pub fn finish() {
    INITIALIZED.store(false, Ordering::SeqCst);
}

/// `version_major`/`version_minor`/`version_patch`/`version_string`, derived
/// from the crate's own `Cargo.toml` version at compile time rather than
/// hand-maintained constants.
pub fn version_major() -> u32 {
    parse_version_component(0)
}

pub fn version_minor() -> u32 {
    parse_version_component(1)
}

pub fn version_patch() -> u32 {
    parse_version_component(2)
}

pub fn version_string() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

fn parse_version_component(index: usize) -> u32 {
    env!("CARGO_PKG_VERSION")
        .split('.')
        .nth(index)
        .and_then(|part| part.parse().ok())
        .unwrap_or(0)
}
