//! Integration tests for seek-flush correctness and purge safety.

use std::sync::Arc;
use std::time::Duration;

use audiograph::{
    AudioFormat, BufferGet, ChannelLayout, File, FrameSource, NoCallbacks, Playlist, Result,
    SampleFormat, Sink, SinkConfig,
};

/// A source whose samples encode their own frame index, so a test can
/// recover the exact seconds position a buffer was decoded from.
struct IndexedSource {
    format: AudioFormat,
    total_frames: usize,
    chunk_frames: usize,
    cursor: usize,
}

impl IndexedSource {
    fn new(format: AudioFormat, total_frames: usize, chunk_frames: usize) -> Self {
        Self {
            format,
            total_frames,
            chunk_frames,
            cursor: 0,
        }
    }
}

impl FrameSource for IndexedSource {
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
        let end = (self.cursor + self.chunk_frames).min(self.total_frames);
        let samples: Vec<f32> = (self.cursor..end).map(|frame| frame as f32).collect();
        self.cursor = end;
        Ok(Some(samples))
    }
}

fn mono(rate: u32) -> AudioFormat {
    AudioFormat::new(rate, ChannelLayout::Mono, SampleFormat::F32, false)
}

fn sink(format: AudioFormat) -> Arc<Sink> {
    Sink::new(
        SinkConfig {
            audio_format: format,
            disable_resample: true,
            buffer_sample_count: 0,
            buffer_size: 8_192,
        },
        Box::new(NoCallbacks),
    )
}

#[test]
fn seek_flushes_queue_and_next_buffer_lands_near_target() {
    let playlist = Playlist::create();
    let rate = 1_000;

    let s = sink(mono(rate));
    s.attach(&playlist);

    let source = IndexedSource::new(mono(rate), 3_000, 100); // 3.0s total, 0.1s chunks
    let file = Arc::new(File::from_source("indexed.raw", Box::new(source)));
    let item = playlist.insert(file, 1.0, 1.0, None);
    playlist.play();

    // Let a little audio decode and queue up first.
    std::thread::sleep(Duration::from_millis(80));

    playlist.seek(item, 2.5);

    // Drain until we see a buffer whose pos is at or after the seek target;
    // every buffer observed from here on must never regress below it.
    let mut saw_post_seek = false;
    let mut last_pos = f64::MIN;
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        match s.buffer_get(true) {
            BufferGet::Yes(buf) => {
                if !saw_post_seek {
                    if buf.pos() >= 2.5 - 0.01 {
                        saw_post_seek = true;
                        last_pos = buf.pos();
                    }
                    // Buffers queued before the seek flush may still be
                    // in flight; keep draining until we cross the target.
                    continue;
                }
                assert!(
                    buf.pos() + 1e-6 >= last_pos,
                    "pos regressed after seek: {} then {}",
                    last_pos,
                    buf.pos()
                );
                last_pos = buf.pos();
            }
            BufferGet::End => break,
            BufferGet::No => break,
        }
    }
    assert!(saw_post_seek, "never observed a buffer at/after the seek target");

    s.detach();
    playlist.destroy();
}

#[test]
fn remove_purges_item_from_every_sink_queue() {
    let playlist = Playlist::create();
    let rate = 1_000;

    let s1 = sink(mono(rate));
    let s2 = sink(mono(rate));
    s1.attach(&playlist);
    s2.attach(&playlist);

    let source_a = IndexedSource::new(mono(rate), 500, 50);
    let source_b = IndexedSource::new(mono(rate), 500, 50);
    let file_a = Arc::new(File::from_source("a.raw", Box::new(source_a)));
    let file_b = Arc::new(File::from_source("b.raw", Box::new(source_b)));
    let item_a = playlist.insert(file_a, 1.0, 1.0, None);
    let _item_b = playlist.insert(file_b, 1.0, 1.0, None);
    playlist.play();
    std::thread::sleep(Duration::from_millis(150));

    playlist.remove(item_a);

    // Give the purge a moment, then confirm neither sink ever yields a
    // buffer whose item is the removed one.
    std::thread::sleep(Duration::from_millis(50));
    for s in [&s1, &s2] {
        loop {
            match s.buffer_get(false) {
                BufferGet::Yes(buf) => {
                    assert_ne!(buf.item(), Some(item_a), "purged item resurfaced in a sink queue");
                }
                BufferGet::End | BufferGet::No => break,
            }
        }
    }

    s1.detach();
    s2.detach();
    playlist.destroy();
}
