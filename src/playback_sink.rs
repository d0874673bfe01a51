//! Playback sink: wraps a [`Sink`] configured with `disable_resample =
//! false` and drives a real-time audio device.
//!
//! Grounded in `proteus-lib`'s playback worker
//! (`playback/player/runtime/worker/runner.rs`): a dedicated helper thread
//! opens the output device via `rodio::OutputStreamBuilder`, retries on
//! failure, and feeds a `rodio::Sink` from a channel of decoded chunks. A
//! genuine hardware/driver real-time callback is not a contract `rodio`
//! exposes to callers, so the helper thread plays the role of both the
//! "helper" and the "device callback" here, publishing its position through
//! the same wait-free triple buffer either way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use dasp_ring_buffer::Bounded;
use log::{error, warn};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamBuilder, Sink as RodioSink};
use triple_buffer::TripleBuffer;

use crate::format::AudioFormat;
use crate::playlist::ItemId;
use crate::queue::{BoundedQueue, NoHooks, Popped};
use crate::sink::{BufferGet, NoCallbacks, Sink, SinkConfig};

const OUTPUT_STREAM_OPEN_RETRIES: u32 = 3;
const OUTPUT_STREAM_OPEN_RETRY_MS: u64 = 200;
/// Minimum ring-buffer capacity: 4 seconds of audio.
const MIN_RING_SECONDS: f64 = 4.0;

/// Events emitted by a playback sink, polled/awaited by client threads.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    NowPlaying(Option<ItemId>),
    BufferUnderrun,
    DeviceOpened,
    DeviceClosed,
    DeviceReopened,
    DeviceOpenError(String),
    EndOfPlaylist,
}

/// A single-writer/single-reader time stamp `(frame_index, delay, timestamp)`.
/// Published by the helper thread, read lock-free by [`PlaybackSink::position`].
#[derive(Debug, Clone, Copy, Default)]
struct TimeStamp {
    frame_index: u64,
    delay: f64,
    /// Wall-clock seconds (`Instant`-relative) at which `frame_index` was
    /// published.
    timestamp_secs: f64,
    /// Position, in seconds into the current item, corresponding to
    /// `frame_index`.
    play_pos: f64,
    item: Option<ItemId>,
}

struct PlayHeadState {
    prebuffering: bool,
    device_open: bool,
}

/// Wraps a [`Sink`] and drives a real-time audio device.
pub struct PlaybackSink {
    sink: Arc<Sink>,
    ring: Arc<Mutex<Bounded<Vec<f32>>>>,
    play_head: Mutex<PlayHeadState>,
    events: BoundedQueue<PlaybackEvent>,
    abort: Arc<AtomicBool>,
    ts_writer: Mutex<triple_buffer::Input<TimeStamp>>,
    ts_reader: Mutex<triple_buffer::Output<TimeStamp>>,
    epoch: Instant,
    /// Device's current native format. Fixed for the lifetime of a
    /// [`Self::create`] sink; tracks the most recently opened format for a
    /// [`Self::create_exact_format`] sink, which reopens the device whenever
    /// the format changes across an item boundary.
    device_format: Mutex<AudioFormat>,
    /// Whether the device should be reopened to match each item's own
    /// format rather than resampling every item to one fixed format.
    exact_format: bool,
    helper: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSink {
    /// `config.disable_resample` is forced to `false`: a playback sink
    /// always resamples every item to one fixed device format, given at
    /// construction.
    pub fn create(config: SinkConfig) -> Arc<PlaybackSink> {
        Self::new_internal(config, false)
    }

    /// `use_exact_audio_format` mode: the underlying sink's filter-graph
    /// resample stage is disabled, so each item's buffers keep their own
    /// native format, and the helper thread reopens the device whenever
    /// that format changes across an item boundary, emitting
    /// `DEVICE_CLOSED` then `DEVICE_REOPENED` around the transition, with
    /// the ring buffer cleared so there is no audible wrap-around of
    /// stale-format frames into the new format.
    pub fn create_exact_format(config: SinkConfig) -> Arc<PlaybackSink> {
        Self::new_internal(config, true)
    }

    fn new_internal(mut config: SinkConfig, exact_format: bool) -> Arc<PlaybackSink> {
        config.disable_resample = exact_format;
        let sink = Sink::new(config, Box::new(NoCallbacks));

        let ring_frames =
            ((config.audio_format.sample_rate as f64 * MIN_RING_SECONDS) as usize).max(1);
        let channels = config.audio_format.channels().max(1) as usize;
        let ring = Arc::new(Mutex::new(Bounded::from(vec![
            0.0;
            ring_frames * channels
        ])));

        let (ts_input, ts_output) = TripleBuffer::new(&TimeStamp::default()).split();

        Arc::new(PlaybackSink {
            sink,
            ring,
            play_head: Mutex::new(PlayHeadState {
                prebuffering: true,
                device_open: false,
            }),
            events: BoundedQueue::new(Box::new(NoHooks)),
            abort: Arc::new(AtomicBool::new(false)),
            ts_writer: Mutex::new(ts_input),
            ts_reader: Mutex::new(ts_output),
            epoch: Instant::now(),
            device_format: Mutex::new(config.audio_format),
            exact_format,
            helper: Mutex::new(None),
        })
    }

    pub fn device_audio_format(&self) -> AudioFormat {
        *self.device_format.lock().unwrap()
    }

    /// `attach(playback_sink, playlist)`: attaches the underlying sink and
    /// spawns the helper thread.
    pub fn attach(self: &Arc<Self>, playlist: &Arc<crate::playlist::Playlist>) {
        self.sink.attach(playlist);
        let this = self.clone();
        let handle = thread::spawn(move || this.helper_loop());
        *self.helper.lock().unwrap() = Some(handle);
    }

    /// `detach(playback_sink)`: stops the helper thread and detaches the
    /// underlying sink.
    pub fn detach(self: &Arc<Self>) {
        self.abort.store(true, Ordering::SeqCst);
        if let Some(handle) = self.helper.lock().unwrap().take() {
            let _ = handle.join();
        }
        self.sink.detach();
    }

    pub fn set_gain(&self, gain: f64) {
        self.sink.set_gain(gain);
    }

    pub fn event_get(&self, block: bool) -> Option<PlaybackEvent> {
        match self.events.get(block) {
            Popped::Item(event) => Some(event),
            Popped::Aborted | Popped::Empty => None,
        }
    }

    pub fn event_peek(&self, block: bool) -> Option<PlaybackEvent> {
        match self.events.peek(block, |e| e.clone()) {
            Popped::Item(event) => Some(event),
            Popped::Aborted | Popped::Empty => None,
        }
    }

    /// `seconds = play_pos + (now - (T + D + (pos_index - F)/sample_rate))`.
    /// Since the helper thread publishes a fresh time stamp at `pos_index ==
    /// F` (frame_index is always the play head's own frame here), this
    /// reduces to `play_pos + (now - (T + D))`.
    pub fn position(&self) -> Option<(ItemId, f64)> {
        let mut reader = self.ts_reader.lock().unwrap();
        let ts = *reader.read();
        let item = ts.item?;
        let now = self.epoch.elapsed().as_secs_f64();
        let elapsed = now - (ts.timestamp_secs + ts.delay);
        Some((item, ts.play_pos + elapsed))
    }

    fn publish_timestamp(&self, item: Option<ItemId>, play_pos: f64, delay: f64, frame_index: u64) {
        let ts = TimeStamp {
            frame_index,
            delay,
            timestamp_secs: self.epoch.elapsed().as_secs_f64(),
            play_pos,
            item,
        };
        self.ts_writer.lock().unwrap().write(ts);
    }

    fn open_output_stream_with_retry() -> Option<OutputStream> {
        for attempt in 1..=OUTPUT_STREAM_OPEN_RETRIES {
            match OutputStreamBuilder::open_default_stream() {
                Ok(stream) => return Some(stream),
                Err(err) => {
                    if attempt == OUTPUT_STREAM_OPEN_RETRIES {
                        error!(
                            "failed to open default output stream after {} attempts: {}",
                            OUTPUT_STREAM_OPEN_RETRIES, err
                        );
                        return None;
                    }
                    warn!(
                        "open_default_stream attempt {}/{} failed: {}",
                        attempt, OUTPUT_STREAM_OPEN_RETRIES, err
                    );
                    thread::sleep(Duration::from_millis(OUTPUT_STREAM_OPEN_RETRY_MS));
                }
            }
        }
        None
    }

    /// Helper thread. Two jobs, run from one loop since `rodio` exposes no
    /// genuine hardware callback for this crate to hook directly (see module
    /// doc): (1) drain the underlying sink into the playback ring buffer,
    /// tagging each decoded frame's originating item/position; (2) drain
    /// fixed-size chunks out of the ring buffer into the `rodio::Sink`,
    /// publishing a fresh time stamp per chunk.
    fn helper_loop(self: Arc<Self>) {
        let stream = match Self::open_output_stream_with_retry() {
            Some(stream) => stream,
            None => {
                self.events
                    .put(PlaybackEvent::DeviceOpenError("no output device".into()));
                return;
            }
        };
        let mixer = stream.mixer().clone();
        let mut device_sink = RodioSink::connect_new(&mixer);
        self.play_head.lock().unwrap().device_open = true;
        self.events.put(PlaybackEvent::DeviceOpened);

        let mut current_format = self.device_audio_format();
        let mut channels = current_format.channels().max(1) as usize;
        let mut sample_rate = current_format.sample_rate;
        let mut chunk_frames = (sample_rate as usize / 20).max(1); // ~50ms device chunks
        let half_buffer_period = Duration::from_millis(((MIN_RING_SECONDS * 1000.0) / 2.0) as u64);

        let mut frames_played: u64 = 0;
        let mut current_item: Option<ItemId> = None;
        // Provenance of ring-buffer contents not yet drained to the device,
        // oldest first: (item, pos_at_start_of_run, frame_count_in_run).
        let mut provenance: std::collections::VecDeque<(Option<ItemId>, f64, usize)> =
            std::collections::VecDeque::new();
        let mut end_of_playlist_pending = false;
        // A buffer pulled in a different format than the device is
        // currently open at (exact-format mode only); held until the ring
        // fully drains the prior format so there is no wrap-around, then
        // used to reopen the device.
        let mut pending_format_switch: Option<crate::buffer::Buffer> = None;

        loop {
            if self.abort.load(Ordering::SeqCst) {
                break;
            }

            // (1) Top up the ring buffer from the underlying sink.
            let mut filled_any = false;
            if pending_format_switch.is_none() {
                loop {
                    let ring_len = self.ring.lock().unwrap().len();
                    let ring_capacity = self.ring.lock().unwrap().max_len();
                    if ring_len + chunk_frames * channels > ring_capacity {
                        break;
                    }
                    match self.sink.buffer_get(false) {
                        BufferGet::Yes(buf) => {
                            if self.exact_format && buf.format() != current_format {
                                pending_format_switch = Some(buf);
                                break;
                            }
                            let item = buf.item();
                            let samples = buf.samples().map(|s| s.to_vec()).unwrap_or_default();
                            let frame_count = samples.len() / channels.max(1);
                            provenance.push_back((item, buf.pos(), frame_count));
                            let mut ring = self.ring.lock().unwrap();
                            for sample in samples {
                                let _ = ring.push(sample);
                            }
                            drop(ring);
                            buf.unref();
                            filled_any = true;
                        }
                        BufferGet::End => {
                            end_of_playlist_pending = true;
                            break;
                        }
                        BufferGet::No => break,
                    }
                }
            }

            // Once the ring has fully drained the previous format's audio,
            // reopen the device at the pending buffer's format.
            if pending_format_switch.is_some() && self.ring.lock().unwrap().len() == 0 {
                let buf = pending_format_switch.take().unwrap();
                self.events.put(PlaybackEvent::DeviceClosed);

                current_format = buf.format();
                channels = current_format.channels().max(1) as usize;
                sample_rate = current_format.sample_rate;
                chunk_frames = (sample_rate as usize / 20).max(1);
                *self.device_format.lock().unwrap() = current_format;

                let ring_frames = ((sample_rate as f64 * MIN_RING_SECONDS) as usize).max(1);
                *self.ring.lock().unwrap() = Bounded::from(vec![0.0; ring_frames * channels]);
                device_sink = RodioSink::connect_new(&mixer);
                self.play_head.lock().unwrap().prebuffering = true;

                self.events.put(PlaybackEvent::DeviceReopened);

                let item = buf.item();
                let samples = buf.samples().map(|s| s.to_vec()).unwrap_or_default();
                let frame_count = samples.len() / channels.max(1);
                provenance.push_back((item, buf.pos(), frame_count));
                let mut ring = self.ring.lock().unwrap();
                for sample in samples {
                    let _ = ring.push(sample);
                }
                drop(ring);
                buf.unref();
                filled_any = true;
            }

            {
                let mut play_head = self.play_head.lock().unwrap();
                if play_head.prebuffering
                    && self.ring.lock().unwrap().len() >= chunk_frames * channels
                {
                    play_head.prebuffering = false;
                }
            }

            // (2) Drain one device-sized chunk out of the ring buffer.
            let prebuffering = self.play_head.lock().unwrap().prebuffering;
            if !prebuffering {
                let want = chunk_frames * channels;
                let mut ring = self.ring.lock().unwrap();
                let available = ring.len().min(want);
                if available > 0 {
                    let chunk: Vec<f32> = (0..available).filter_map(|_| ring.pop()).collect();
                    let ring_remaining = ring.len();
                    drop(ring);

                    let (item, pos) = consume_provenance(&mut provenance, available / channels.max(1));
                    if item != current_item {
                        current_item = item;
                        self.events.put(PlaybackEvent::NowPlaying(item));
                    }

                    device_sink.append(SamplesBuffer::new(
                        channels as u16,
                        sample_rate,
                        chunk,
                    ));
                    frames_played += (available / channels.max(1)) as u64;

                    let delay = ring_remaining as f64 / channels.max(1) as f64 / sample_rate.max(1) as f64;
                    self.publish_timestamp(current_item, pos, delay, frames_played);
                } else if end_of_playlist_pending && !filled_any {
                    current_item = None;
                    self.events.put(PlaybackEvent::NowPlaying(None));
                    self.events.put(PlaybackEvent::EndOfPlaylist);
                    end_of_playlist_pending = false;
                    self.play_head.lock().unwrap().prebuffering = true;
                } else if !filled_any {
                    self.events.put(PlaybackEvent::BufferUnderrun);
                    self.play_head.lock().unwrap().prebuffering = true;
                }
            }

            thread::sleep(half_buffer_period.min(Duration::from_millis(20)));
        }

        self.events.put(PlaybackEvent::DeviceClosed);
    }
}

/// Consume `frames` worth of provenance entries from the front of the
/// queue, returning the `(item, pos)` the *first* consumed frame belongs to,
/// the provenance of the chunk about to be handed to the device.
fn consume_provenance(
    provenance: &mut std::collections::VecDeque<(Option<ItemId>, f64, usize)>,
    mut frames: usize,
) -> (Option<ItemId>, f64) {
    let mut result = None;
    while frames > 0 {
        let Some(front) = provenance.front_mut() else {
            break;
        };
        if result.is_none() {
            result = Some((front.0, front.1));
        }
        if front.2 <= frames {
            frames -= front.2;
            provenance.pop_front();
        } else {
            front.2 -= frames;
            frames = 0;
        }
    }
    result.unwrap_or((None, 0.0))
}
