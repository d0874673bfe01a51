//! Integration tests for the playlist decode pipeline's multi-sink fan-out:
//! fan-out identity, order preservation, and sentinel-once behavior.
//!
//! Uses a small in-memory [`FrameSource`] instead of real media files so the
//! tests run deterministically with no audio toolchain and no real output
//! device.

use std::sync::Arc;
use std::time::{Duration, Instant};

use audiograph::{
    AudioFormat, BufferGet, ChannelLayout, File, FillMode, FrameSource, NoCallbacks, Playlist,
    Result, SampleFormat, Sink, SinkConfig,
};

/// Yields fixed-size chunks of a caller-supplied ramp, looping through
/// `Ok(None)` exactly once at end of stream (then `panic`s if pulled again,
/// to catch a decode loop that doesn't respect `ItemEnded`).
struct RampSource {
    format: AudioFormat,
    total_frames: usize,
    chunk_frames: usize,
    cursor: usize,
}

impl RampSource {
    fn new(format: AudioFormat, total_frames: usize, chunk_frames: usize) -> Self {
        Self {
            format,
            total_frames,
            chunk_frames,
            cursor: 0,
        }
    }
}

impl FrameSource for RampSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn duration(&self) -> Option<f64> {
        Some(self.total_frames as f64 / self.format.sample_rate as f64)
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let frame = (seconds * self.format.sample_rate as f64).round() as usize;
        self.cursor = frame.min(self.total_frames);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Vec<f32>>> {
        if self.cursor >= self.total_frames {
            return Ok(None);
        }
        let channels = self.format.channels() as usize;
        let end = (self.cursor + self.chunk_frames).min(self.total_frames);
        let samples: Vec<f32> = (self.cursor..end)
            .flat_map(|frame| std::iter::repeat(frame as f32 / self.total_frames as f32).take(channels))
            .collect();
        self.cursor = end;
        Ok(Some(samples))
    }
}

fn mono(rate: u32) -> AudioFormat {
    AudioFormat::new(rate, ChannelLayout::Mono, SampleFormat::F32, false)
}

fn drain_until<F: Fn() -> bool>(timeout: Duration, mut poll: F) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if poll() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

#[test]
fn two_compatible_sinks_observe_identical_buffer_sequences() {
    let playlist = Playlist::create();

    let sink_a = Sink::new(
        SinkConfig {
            audio_format: mono(8_000),
            disable_resample: true,
            buffer_sample_count: 0,
            buffer_size: 4_096,
        },
        Box::new(NoCallbacks),
    );
    let sink_b = Sink::new(
        SinkConfig {
            audio_format: mono(8_000),
            disable_resample: true,
            buffer_sample_count: 0,
            buffer_size: 4_096,
        },
        Box::new(NoCallbacks),
    );
    sink_a.attach(&playlist);
    sink_b.attach(&playlist);

    let source = RampSource::new(mono(8_000), 4_000, 256);
    let file = Arc::new(File::from_source("ramp.raw", Box::new(source)));
    playlist.insert(file, 1.0, 1.0, None);
    playlist.play();

    let mut positions_a = Vec::new();
    let mut positions_b = Vec::new();
    loop {
        match (sink_a.buffer_get(true), sink_b.buffer_get(true)) {
            (BufferGet::Yes(a), BufferGet::Yes(b)) => {
                assert_eq!(a.pos(), b.pos(), "fan-out identity: pos must match");
                assert_eq!(a.frame_count(), b.frame_count());
                assert_eq!(a.format(), b.format());
                positions_a.push(a.pos());
                positions_b.push(b.pos());
            }
            (BufferGet::End, BufferGet::End) => break,
            other => panic!("sinks diverged: {:?}", other),
        }
    }

    assert_eq!(positions_a, positions_b);
    // Order preservation: strictly increasing `pos` within a single item.
    for window in positions_a.windows(2) {
        assert!(window[1] > window[0], "pos must strictly increase: {:?}", window);
    }

    sink_a.detach();
    sink_b.detach();
    playlist.destroy();
}

#[test]
fn heterogeneous_sinks_each_see_their_own_output_format() {
    let playlist = Playlist::create();

    let stereo_48k = AudioFormat::new(48_000, ChannelLayout::Stereo, SampleFormat::F32, false);
    let sink_x = Sink::new(
        SinkConfig {
            audio_format: stereo_48k,
            disable_resample: false,
            buffer_sample_count: 0,
            buffer_size: 4_096,
        },
        Box::new(NoCallbacks),
    );
    sink_x.attach(&playlist);

    let source = RampSource::new(mono(44_100), 4_410, 512);
    let file = Arc::new(File::from_source("ramp.raw", Box::new(source)));
    playlist.insert(file, 1.0, 1.0, None);
    playlist.play();

    let mut saw_any = false;
    loop {
        match sink_x.buffer_get(true) {
            BufferGet::Yes(buf) => {
                assert_eq!(buf.format(), stereo_48k);
                saw_any = true;
            }
            BufferGet::End => break,
            BufferGet::No => break,
        }
    }
    assert!(saw_any, "expected at least one resampled buffer");

    sink_x.detach();
    playlist.destroy();
}

#[test]
fn sentinel_observed_exactly_once_at_end_of_playlist() {
    let playlist = Playlist::create();

    let sink = Sink::new(
        SinkConfig {
            audio_format: mono(8_000),
            disable_resample: true,
            buffer_sample_count: 0,
            buffer_size: 4_096,
        },
        Box::new(NoCallbacks),
    );
    sink.attach(&playlist);

    let source = RampSource::new(mono(8_000), 800, 256);
    let file = Arc::new(File::from_source("ramp.raw", Box::new(source)));
    playlist.insert(file, 1.0, 1.0, None);
    playlist.play();

    let mut ends_seen = 0;
    let ok = drain_until(Duration::from_secs(5), || {
        match sink.buffer_get(true) {
            BufferGet::Yes(_) => false,
            BufferGet::End => {
                ends_seen += 1;
                true
            }
            BufferGet::No => false,
        }
    });
    assert!(ok, "expected to observe the end-of-playlist sentinel");
    assert_eq!(ends_seen, 1);

    sink.detach();
    playlist.destroy();
}

#[test]
fn any_sink_full_bounds_fill_to_its_threshold() {
    let playlist = Playlist::create();
    playlist.set_fill_mode(FillMode::AnySinkFull);

    let slow_sink = Sink::new(
        SinkConfig {
            audio_format: mono(8_000),
            disable_resample: true,
            buffer_sample_count: 0,
            buffer_size: 256,
        },
        Box::new(NoCallbacks),
    );
    slow_sink.attach(&playlist);

    // Long source, small sink buffer: the slow sink should cap decode.
    let source = RampSource::new(mono(8_000), 80_000, 256);
    let file = Arc::new(File::from_source("ramp.raw", Box::new(source)));
    playlist.insert(file, 1.0, 1.0, None);
    playlist.play();

    // Let the decode worker run well past the threshold without draining.
    std::thread::sleep(Duration::from_millis(300));
    let threshold_bytes = 256 * mono(8_000).bytes_per_frame();
    let one_frame_worth = 256 * mono(8_000).bytes_per_frame();
    assert!(
        slow_sink.fill_level() as usize <= threshold_bytes + one_frame_worth,
        "fill {} exceeded threshold {} + one frame",
        slow_sink.fill_level(),
        threshold_bytes
    );

    slow_sink.detach();
    playlist.destroy();
}
