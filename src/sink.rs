//! Sink: an output endpoint with a desired audio format, a bounded
//! queue of buffers, lifecycle callbacks, and a per-sink gain.
//!
//! The queue underneath is [`crate::queue::BoundedQueue`]; a sink's
//! `QueueHooks` implementation tracks the byte-fill counter: a byte-count
//! counter against a minimum-full threshold computed at attach.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::buffer::Buffer;
use crate::format::AudioFormat;
use crate::playlist::{ItemId, Playlist};
use crate::queue::{BoundedQueue, Popped, QueueHooks};

/// An item observed from a sink's queue: either a decoded/encoded buffer or
/// the distinguished, non-refcounted end-of-playlist sentinel.
///
/// Modeling the sentinel as an enum variant rather than a special
/// non-refcounted `Buffer` value (as in the C original's
/// `end_of_q_sentinel` static pointer) makes identity comparison trivial via
/// pattern matching.
#[derive(Debug, Clone)]
pub enum SinkItem {
    Buffer(Buffer),
    EndOfPlaylist,
}

/// Capability/trait set a sink consumer implements for the open extension
/// points (`flush`/`purge`/`pause`/`play`).
pub trait SinkCallbacks: Send + Sync {
    fn flush(&self, _sink: &Sink) {}
    fn purge(&self, _sink: &Sink, _item: ItemId) {}
    fn pause(&self, _sink: &Sink) {}
    fn play(&self, _sink: &Sink) {}
}

/// No-op callback set, for sinks that don't need lifecycle hooks.
pub struct NoCallbacks;
impl SinkCallbacks for NoCallbacks {}

/// Per-sink configuration supplied at construction.
#[derive(Debug, Clone, Copy)]
pub struct SinkConfig {
    pub audio_format: AudioFormat,
    pub disable_resample: bool,
    /// Requested fixed frame count per buffer; 0 lets the filter graph
    /// decide the per-tap pull policy.
    pub buffer_sample_count: usize,
    /// Queue capacity, in sample frames, used to compute the minimum-full
    /// byte threshold at attach.
    pub buffer_size: usize,
}

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Output endpoint attached to a playlist.
pub struct Sink {
    pub(crate) id: u64,
    config: Mutex<SinkConfig>,
    gain: Mutex<f64>,
    queue: BoundedQueue<SinkItem>,
    fill_bytes: Arc<AtomicI64>,
    threshold_bytes: Mutex<usize>,
    callbacks: Box<dyn SinkCallbacks>,
    /// Weak back-pointer to the owning playlist, valid only between attach
    /// and detach.
    playlist: Mutex<Option<Weak<Playlist>>>,
}

/// `BUFFER_NO/YES/END`, returned by `buffer_get`/`buffer_peek`.
#[derive(Debug, Clone)]
pub enum BufferGet {
    No,
    Yes(Buffer),
    End,
}

impl Sink {
    pub fn new(config: SinkConfig, callbacks: Box<dyn SinkCallbacks>) -> Arc<Sink> {
        let fill_bytes = Arc::new(AtomicI64::new(0));
        let hooks = FillHooksShared {
            inner: fill_bytes.clone(),
        };
        Arc::new(Sink {
            id: NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed),
            config: Mutex::new(config),
            gain: Mutex::new(1.0),
            queue: BoundedQueue::new(Box::new(hooks)),
            fill_bytes,
            threshold_bytes: Mutex::new(0),
            callbacks,
            playlist: Mutex::new(None),
        })
    }

    pub fn config(&self) -> SinkConfig {
        *self.config.lock().unwrap()
    }

    pub fn gain(&self) -> f64 {
        *self.gain.lock().unwrap()
    }

    /// `attach(sink, playlist)`: computes the minimum-full byte threshold
    /// and registers with the playlist's sink map. Fatal (a programmer
    /// contract violation) if already attached.
    pub fn attach(self: &Arc<Self>, playlist: &Arc<Playlist>) {
        let mut guard = self.playlist.lock().unwrap();
        assert!(guard.is_none(), "sink attached twice");
        *guard = Some(Arc::downgrade(playlist));
        drop(guard);

        let config = self.config();
        *self.threshold_bytes.lock().unwrap() =
            config.buffer_size * config.audio_format.bytes_per_frame();

        playlist.attach_sink(self.clone());
    }

    /// `detach(sink)`: aborts and flushes the queue, unregisters from the
    /// sink map, clears the back-pointer. Idempotent after success.
    pub fn detach(self: &Arc<Self>) {
        let playlist = {
            let mut guard = self.playlist.lock().unwrap();
            guard.take().and_then(|w| w.upgrade())
        };
        self.queue.abort();
        self.queue.flush();
        self.queue.reset();
        if let Some(playlist) = playlist {
            playlist.detach_sink(self);
        }
    }

    pub(crate) fn put(&self, item: SinkItem) {
        self.queue.put(item);
    }

    /// `buffer_get(sink, &out, block)`. `END` is returned without calling
    /// `flush`; the caller typically reinitializes its own state (e.g. an
    /// encoder) before the next item.
    pub fn buffer_get(&self, block: bool) -> BufferGet {
        match self.queue.get(block) {
            Popped::Item(SinkItem::Buffer(buf)) => BufferGet::Yes(buf),
            Popped::Item(SinkItem::EndOfPlaylist) => BufferGet::End,
            Popped::Aborted | Popped::Empty => BufferGet::No,
        }
    }

    /// `buffer_peek(sink, block)`: same shape as `buffer_get` without
    /// popping.
    pub fn buffer_peek(&self, block: bool) -> BufferGet {
        match self.queue.peek(block, |item| item.clone()) {
            Popped::Item(SinkItem::Buffer(buf)) => BufferGet::Yes(buf),
            Popped::Item(SinkItem::EndOfPlaylist) => BufferGet::End,
            Popped::Aborted | Popped::Empty => BufferGet::No,
        }
    }

    /// `set_gain(sink, g)`: updates gain, then re-places this sink in the
    /// owning playlist's sink map (a gain change can move it into a
    /// different compatibility group) and marks the filter graph for
    /// rebuild.
    pub fn set_gain(self: &Arc<Self>, gain: f64) {
        *self.gain.lock().unwrap() = gain;
        if let Some(playlist) = self
            .playlist
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|w| w.upgrade())
        {
            playlist.regroup_sink(self.clone());
        }
    }

    pub fn fill_level(&self) -> i64 {
        self.fill_bytes.load(Ordering::SeqCst)
    }

    pub fn is_full(&self) -> bool {
        self.fill_level() >= *self.threshold_bytes.lock().unwrap() as i64
    }

    /// Whether the sentinel is anywhere in the queue, not just at the front.
    /// A sink can have undrained buffers queued ahead of the sentinel, so a
    /// front-only peek would miss it until those buffers are consumed.
    pub fn contains_end_of_playlist(&self) -> bool {
        self.queue
            .any(|item| matches!(item, SinkItem::EndOfPlaylist))
    }

    pub(crate) fn flush(&self) {
        self.queue.flush();
        self.callbacks.flush(self);
    }

    /// Purge the queue of buffers referencing `item`, then invoke the
    /// `purge(item)` callback, as part of the item-remove protocol.
    pub(crate) fn purge_item(&self, item: ItemId) {
        self.queue.purge(|i| match i {
            SinkItem::Buffer(buf) => buf.item() == Some(item),
            SinkItem::EndOfPlaylist => false,
        });
        self.callbacks.purge(self, item);
    }
}

/// Adapter wiring [`FillHooks`]' counter to a shared `Arc` the [`Sink`]
/// itself can read without locking the queue.
struct FillHooksShared {
    inner: Arc<AtomicI64>,
}

impl QueueHooks<SinkItem> for FillHooksShared {
    fn on_put(&self, item: &SinkItem) {
        if let SinkItem::Buffer(buf) = item {
            self.inner
                .fetch_add(buf.size_bytes() as i64, Ordering::SeqCst);
        }
    }

    fn on_get(&self, item: &SinkItem) {
        if let SinkItem::Buffer(buf) = item {
            self.inner
                .fetch_sub(buf.size_bytes() as i64, Ordering::SeqCst);
        }
    }

    fn cleanup(&self, item: SinkItem) {
        if let SinkItem::Buffer(buf) = item {
            self.inner
                .fetch_sub(buf.size_bytes() as i64, Ordering::SeqCst);
            buf.unref();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleFormat};

    fn fmt() -> AudioFormat {
        AudioFormat::new(44_100, ChannelLayout::Stereo, SampleFormat::F32, false)
    }

    fn sink() -> Arc<Sink> {
        Sink::new(
            SinkConfig {
                audio_format: fmt(),
                disable_resample: false,
                buffer_sample_count: 0,
                buffer_size: 4,
            },
            Box::new(NoCallbacks),
        )
    }

    #[test]
    fn buffer_get_yields_end_without_popping_consumer_state() {
        let s = sink();
        s.put(SinkItem::EndOfPlaylist);
        assert!(matches!(s.buffer_get(false), BufferGet::End));
        assert!(matches!(s.buffer_get(false), BufferGet::No));
    }

    #[test]
    fn fill_level_tracks_enqueued_buffer_bytes() {
        let s = sink();
        let item = ItemId::for_test(1);
        let buf = Buffer::new_decoded(vec![0.0; 8], fmt(), item, 0.0, 0);
        let size = buf.size_bytes() as i64;
        s.put(SinkItem::Buffer(buf));
        assert_eq!(s.fill_level(), size);
        let _ = s.buffer_get(false);
        assert_eq!(s.fill_level(), 0);
    }

    #[test]
    fn purge_item_removes_only_matching_buffers() {
        let s = sink();
        let a = ItemId::for_test(1);
        let b = ItemId::for_test(2);
        s.put(SinkItem::Buffer(Buffer::new_decoded(
            vec![0.0; 2],
            fmt(),
            a,
            0.0,
            0,
        )));
        s.put(SinkItem::Buffer(Buffer::new_decoded(
            vec![0.0; 2],
            fmt(),
            b,
            0.0,
            0,
        )));
        s.purge_item(a);
        match s.buffer_get(false) {
            BufferGet::Yes(buf) => assert_eq!(buf.item(), Some(b)),
            other => panic!("expected remaining buffer for item b, got {:?}", other),
        }
    }
}
