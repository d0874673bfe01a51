//! Playlist & decode engine: the playlist's ordered items, the single
//! decode worker thread, the lazy filter graph, and the sink registry.
//!
//! Grounded in `proteus-lib`'s `track/container.rs` decode-worker-thread
//! shape (one thread per source, `Arc<AtomicBool>` abort flag, `log::warn!`
//! on transient errors), generalized to a multi-sink fan-out with a single
//! playlist-wide decode cursor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

use log::warn;

use crate::buffer::Buffer;
use crate::file::File;
use crate::filter_graph::{FilterGraph, GraphInputs};
use crate::sink::{Sink, SinkItem};
use crate::sink_map::SinkMap;

/// Identity of a playlist item, unique within the process. Cheap to copy and
/// compare, used as the `item` provenance field carried by every [`Buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemId(u64);

static NEXT_ITEM_ID: AtomicU64 = AtomicU64::new(1);

impl ItemId {
    fn next() -> Self {
        ItemId(NEXT_ITEM_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[cfg(test)]
    pub fn for_test(id: u64) -> Self {
        ItemId(id)
    }
}

/// One entry in the playlist's ordered sequence.
pub struct PlaylistItem {
    pub id: ItemId,
    pub file: Arc<File>,
    pub gain: f64,
    pub peak: f64,
}

/// Fill-mode constants controlling when the decode worker considers the
/// playlist "full" and should stop decoding ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillMode {
    /// The playlist is "full" when *any* sink's fill exceeds its threshold.
    AnySinkFull,
    /// The playlist is "full" only when *every* sink's fill exceeds its
    /// threshold.
    EverySinkFull,
}

impl Default for FillMode {
    fn default() -> Self {
        FillMode::AnySinkFull
    }
}

/// Internal decode-cursor and rebuild-tracking state, guarded by a single
/// mutex shared with the decode worker.
struct DecodeState {
    items: Vec<PlaylistItem>,
    /// Index into `items` of the item currently being decoded, if any.
    cursor: Option<usize>,
    seconds_within_item: f64,
    /// Bumped on every `seek()` call. The decode loop captures this before
    /// releasing the lock for a blocking decode step, so a position update
    /// produced by that step can be discarded if a seek landed while it was
    /// running, instead of clobbering the seek's target position.
    seek_generation: u64,
    gain: f64,
    fill_mode: FillMode,
    paused: bool,
    /// Last `paused` value forwarded to the current item's file, so the
    /// pause hint fires once per transition rather than every decode step.
    last_paused: bool,
    rebuild_graph: bool,
    cached_input_format: Option<crate::format::AudioFormat>,
    cached_vol_peak: Option<(f64, f64)>,
    sent_end_of_playlist: bool,
    sinks: SinkMap,
    graph: FilterGraph,
}

impl DecodeState {
    fn item_index(&self, id: ItemId) -> Option<usize> {
        self.items.iter().position(|i| i.id == id)
    }
}

/// Ordered sequence of playlist items, owning the decode worker, sink
/// registry, and filter graph.
pub struct Playlist {
    state: Mutex<DecodeState>,
    decode_head_cond: Condvar,
    sink_drain_cond: Condvar,
    abort: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Playlist {
    pub fn create() -> Arc<Playlist> {
        let playlist = Arc::new(Playlist {
            state: Mutex::new(DecodeState {
                items: Vec::new(),
                cursor: None,
                seconds_within_item: 0.0,
                seek_generation: 0,
                gain: 1.0,
                fill_mode: FillMode::default(),
                paused: true,
                last_paused: true,
                rebuild_graph: true,
                cached_input_format: None,
                cached_vol_peak: None,
                sent_end_of_playlist: false,
                sinks: SinkMap::new(),
                graph: FilterGraph::new(),
            }),
            decode_head_cond: Condvar::new(),
            sink_drain_cond: Condvar::new(),
            abort: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        });

        let worker_playlist = playlist.clone();
        let handle = thread::spawn(move || worker_playlist.decode_loop());
        *playlist.worker.lock().unwrap() = Some(handle);
        playlist
    }

    /// `Playlist::destroy`: sets the abort flag, wakes the decode worker, and
    /// joins it.
    pub fn destroy(self: &Arc<Self>) {
        self.abort.store(true, Ordering::SeqCst);
        self.decode_head_cond.notify_all();
        self.sink_drain_cond.notify_all();
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }

    /// Clears the paused flag. The decode worker forwards the transition to
    /// the current item's file as a hint on its next step; decoding and
    /// fan-out to sinks are never gated on this flag.
    pub fn play(&self) {
        let mut state = self.state.lock().unwrap();
        state.paused = false;
        self.decode_head_cond.notify_all();
    }

    /// Sets the paused flag. Forwarded to the current item's file as a hint;
    /// does not stop the decode worker from fanning out already-decoded
    /// buffers to sinks.
    pub fn pause(&self) {
        self.state.lock().unwrap().paused = true;
    }

    pub fn playing(&self) -> bool {
        !self.state.lock().unwrap().paused
    }

    /// Insert `file` with the given replay-gain `gain`/`peak`, positioned
    /// immediately before `before_item` (or appended when `None`). Returns
    /// the new item's [`ItemId`].
    pub fn insert(
        &self,
        file: Arc<File>,
        gain: f64,
        peak: f64,
        before_item: Option<ItemId>,
    ) -> ItemId {
        let mut state = self.state.lock().unwrap();
        let id = ItemId::next();
        let item = PlaylistItem {
            id,
            file,
            gain,
            peak,
        };
        let was_empty = state.items.is_empty();
        match before_item.and_then(|b| state.item_index(b)) {
            Some(idx) => state.items.insert(idx, item),
            None => state.items.push(item),
        }
        if state.cursor.is_none() {
            state.cursor = Some(state.item_index(id).unwrap());
        }
        if was_empty {
            self.decode_head_cond.notify_all();
        }
        id
    }

    /// `remove(item)`: unlinks the item, advances the cursor if it pointed
    /// at it, purges every sink's queue of buffers referencing it, and
    /// signals `sink_drain_cond`.
    pub fn remove(&self, item: ItemId) {
        let mut state = self.state.lock().unwrap();
        let Some(idx) = state.item_index(item) else {
            return;
        };

        let cursor_was_here = state.cursor == Some(idx);
        state.items.remove(idx);

        state.cursor = match state.cursor {
            Some(cursor_idx) if cursor_idx > idx => Some(cursor_idx - 1),
            Some(cursor_idx) if cursor_idx == idx => {
                if idx < state.items.len() {
                    Some(idx)
                } else {
                    None
                }
            }
            other => other,
        };
        if cursor_was_here {
            self.decode_head_cond.notify_all();
        }

        for sink in state.sinks.sinks() {
            sink.purge_item(item);
        }

        self.sink_drain_cond.notify_all();
    }

    /// Remove every item and reset the decode cursor.
    pub fn clear(&self) {
        let mut state = self.state.lock().unwrap();
        let removed: Vec<ItemId> = state.items.iter().map(|i| i.id).collect();
        state.items.clear();
        state.cursor = None;
        for sink in state.sinks.sinks() {
            for id in &removed {
                sink.purge_item(*id);
            }
        }
        self.sink_drain_cond.notify_all();
    }

    pub fn count(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    /// `seek(item, seconds)`: sets the decode cursor to `item` and requests
    /// a flushing seek on its file. Bumps `seek_generation` so an in-flight
    /// decode step started before this call can't overwrite the seek target
    /// once it completes.
    pub fn seek(&self, item: ItemId, seconds: f64) {
        let mut state = self.state.lock().unwrap();
        let Some(idx) = state.item_index(item) else {
            return;
        };
        state.cursor = Some(idx);
        state.seconds_within_item = seconds;
        state.seek_generation += 1;
        state.items[idx].file.request_seek(seconds, true);
        self.decode_head_cond.notify_all();
    }

    /// Current play position, as `(item, seconds)`. `None` once the
    /// playlist has run past its last item.
    pub fn position(&self) -> Option<(ItemId, f64)> {
        let state = self.state.lock().unwrap();
        let idx = state.cursor?;
        Some((state.items[idx].id, state.seconds_within_item))
    }

    pub fn set_gain(&self, gain: f64) {
        let mut state = self.state.lock().unwrap();
        state.gain = gain;
        state.rebuild_graph = true;
    }

    /// Update an item's replay-gain `gain`/`peak`. If it is the current
    /// decode cursor, marks the graph for rebuild on the next decode step.
    pub fn set_item_gain_peak(&self, item: ItemId, gain: f64, peak: f64) {
        let mut state = self.state.lock().unwrap();
        let is_cursor = state.cursor.map(|idx| state.items[idx].id) == Some(item);
        if let Some(idx) = state.item_index(item) {
            state.items[idx].gain = gain;
            state.items[idx].peak = peak;
        }
        if is_cursor {
            state.rebuild_graph = true;
        }
    }

    pub fn set_fill_mode(&self, mode: FillMode) {
        let mut state = self.state.lock().unwrap();
        state.fill_mode = mode;
        // Force an immediate recheck rather than waiting for the next drain
        // signal, so a mode change that newly satisfies "full" or "not full"
        // takes effect without depending on unrelated sink activity.
        self.sink_drain_cond.notify_all();
    }

    pub(crate) fn attach_sink(&self, sink: Arc<Sink>) {
        let mut state = self.state.lock().unwrap();
        state.sinks.attach(sink);
        state.rebuild_graph = true;
        self.sink_drain_cond.notify_all();
    }

    pub(crate) fn detach_sink(&self, sink: &Arc<Sink>) {
        let mut state = self.state.lock().unwrap();
        state.sinks.detach(sink);
        state.rebuild_graph = true;
    }

    /// Re-place an already-attached sink in the sink map, e.g. after a gain
    /// change that may move it into a different compatibility group. Detach
    /// then attach rather than mutating in place, mirroring `attach_sink`'s
    /// grouping logic instead of duplicating it.
    pub(crate) fn regroup_sink(&self, sink: Arc<Sink>) {
        let mut state = self.state.lock().unwrap();
        state.sinks.detach(&sink);
        state.sinks.attach(sink);
        state.rebuild_graph = true;
        self.sink_drain_cond.notify_all();
    }

    pub(crate) fn mark_rebuild(&self) {
        self.state.lock().unwrap().rebuild_graph = true;
    }

    fn every_sink_full(state: &DecodeState) -> bool {
        let sinks = state.sinks.sinks();
        if sinks.is_empty() {
            return false;
        }
        match state.fill_mode {
            FillMode::AnySinkFull => sinks.iter().any(|s| s.is_full()),
            FillMode::EverySinkFull => sinks.iter().all(|s| s.is_full()),
        }
    }

    /// The decode worker loop.
    fn decode_loop(self: Arc<Self>) {
        loop {
            if self.abort.load(Ordering::SeqCst) {
                return;
            }

            let mut state = self.state.lock().unwrap();

            // Pause never gates this loop: already-decoded buffers keep
            // fanning out to sinks while paused. It is only honored, below,
            // as a hint forwarded to the current item's file.
            if state.cursor.is_none() {
                if state.cursor.is_none() && !state.sent_end_of_playlist {
                    for sink in state.sinks.sinks() {
                        sink.put(SinkItem::EndOfPlaylist);
                    }
                    state.sent_end_of_playlist = true;
                }
                let (guard, timeout) = self
                    .decode_head_cond
                    .wait_timeout(state, std::time::Duration::from_millis(200))
                    .unwrap();
                state = guard;
                let _ = timeout;
                if self.abort.load(Ordering::SeqCst) {
                    return;
                }
                drop(state);
                continue;
            }

            state.sent_end_of_playlist = false;

            if Self::every_sink_full(&state) {
                let (guard, _timeout) = self
                    .sink_drain_cond
                    .wait_timeout(state, std::time::Duration::from_millis(200))
                    .unwrap();
                state = guard;
                if self.abort.load(Ordering::SeqCst) {
                    return;
                }
                drop(state);
                continue;
            }

            let idx = state.cursor.unwrap();
            let file = state.items[idx].file.clone();
            let item_id = state.items[idx].id;
            let item_gain = state.items[idx].gain;
            let item_peak = state.items[idx].peak;

            let vol = state.gain * item_gain;
            let vp = (vol, item_peak);
            let in_format = file.audio_format();

            let needs_rebuild = state.rebuild_graph
                || state.cached_input_format != Some(in_format)
                || state.cached_vol_peak != Some(vp);

            if needs_rebuild {
                let groups = state.sinks.groups();
                state.graph.rebuild(GraphInputs {
                    in_format,
                    vol,
                    peak: item_peak,
                    groups: &groups,
                });
                state.cached_input_format = Some(in_format);
                state.cached_vol_peak = Some(vp);
                state.rebuild_graph = false;
            }

            // Release the playlist lock around the blocking decode step: only
            // the brief bookkeeping above and below needs the lock, not the
            // decode itself.
            let seek_generation = state.seek_generation;
            let paused = state.paused;
            let pause_changed = paused != state.last_paused;
            state.last_paused = paused;
            drop(state);

            if pause_changed {
                file.apply_pause(paused);
            }

            match self.decode_one_step(&file, item_id) {
                DecodeStep::Produced(pos) => {
                    let mut state = self.state.lock().unwrap();
                    // A seek that landed while this step was decoding bumps
                    // the generation counter; discard a stale position in
                    // that case instead of clobbering the seek's target.
                    if state.cursor == Some(idx) && state.seek_generation == seek_generation {
                        state.seconds_within_item = pos;
                    }
                }
                DecodeStep::ItemEnded => {
                    let mut state = self.state.lock().unwrap();
                    if state.cursor == Some(idx) {
                        let next_idx = idx + 1;
                        if next_idx < state.items.len() {
                            state.items[next_idx].file.request_seek(0.0, false);
                            state.cursor = Some(next_idx);
                            state.seconds_within_item = 0.0;
                        } else {
                            state.cursor = None;
                        }
                        state.rebuild_graph = true;
                        self.decode_head_cond.notify_all();
                    }
                }
                DecodeStep::Error(msg) => {
                    warn!("decode error on item: {}", msg);
                }
            }
        }
    }

    /// Perform one decode step: honor any pending seek, decode one chunk,
    /// push it through the filter graph, and enqueue per-sink buffers.
    /// Grounded in `track/container.rs`'s per-packet decode loop, adapted to
    /// fan out into a sink map instead of a single buffer map.
    fn decode_one_step(&self, file: &Arc<File>, item_id: ItemId) -> DecodeStep {
        if let Some(seek) = file.take_seek() {
            if let Some(pos) = seek.pos {
                match file.apply_seek(pos) {
                    Ok(()) => {
                        if seek.flush {
                            let state = self.state.lock().unwrap();
                            for sink in state.sinks.sinks() {
                                sink.flush();
                            }
                        }
                    }
                    Err(e) => {
                        warn!("seek failed, continuing from prior position: {}", e);
                    }
                }
            }
        }

        let samples = match file.next_frame() {
            Ok(Some(samples)) => samples,
            Ok(None) => return DecodeStep::ItemEnded,
            Err(e) => return DecodeStep::Error(e.to_string()),
        };

        let in_format = file.audio_format();
        let frame_count = if in_format.channels() == 0 {
            0
        } else {
            samples.len() / in_format.channels() as usize
        };
        let pos_start = {
            let state = self.state.lock().unwrap();
            state.seconds_within_item
        };

        let mut state = self.state.lock().unwrap();
        let outputs = state.graph.process(&samples, in_format);
        for (group_key, (group_format, group_samples)) in outputs {
            let Some(sinks) = state.sinks.sinks_in_group(group_key) else {
                continue;
            };
            if sinks.is_empty() {
                continue;
            }
            let buffer = Buffer::new_decoded(group_samples, group_format, item_id, pos_start, 0);
            for sink in sinks {
                sink.put(SinkItem::Buffer(buffer.buf_ref()));
            }
            buffer.unref();
        }
        drop(state);

        let secs = if in_format.sample_rate == 0 {
            pos_start
        } else {
            pos_start + frame_count as f64 / in_format.sample_rate as f64
        };
        DecodeStep::Produced(secs)
    }
}

enum DecodeStep {
    Produced(f64),
    ItemEnded,
    Error(String),
}

impl std::fmt::Debug for Playlist {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playlist").finish_non_exhaustive()
    }
}
