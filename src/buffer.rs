//! Reference-counted buffer: a decoded PCM frame or an encoded byte blob,
//! shared safely across a decode thread and an arbitrary number of sink
//! consumers.
//!
//! The original ref/unref takes an internal mutex and frees the payload when
//! the count reaches zero. `std::sync::Arc` already gives us this exact
//! invariant atomically and without a mutex: [`Buffer::buf_ref`] clones the
//! handle (increments the strong count) and [`Buffer::unref`] consumes a clone
//! (decrements it, freeing the payload on the last drop).

use std::sync::Arc;

use crate::format::AudioFormat;
use crate::playlist::ItemId;

/// What a buffer carries: decoded PCM or an encoder's emitted byte range.
#[derive(Debug)]
pub enum Payload {
    /// Interleaved decoded PCM samples.
    Decoded(Vec<f32>),
    /// Opaque encoded bytes (a container packet, or a header/trailer blob).
    Encoded(Vec<u8>),
}

#[derive(Debug)]
struct Inner {
    payload: Payload,
    frame_count: usize,
    size_bytes: usize,
    format: AudioFormat,
    /// Originating playlist item. `None` for encoder header/trailer buffers,
    /// which carry no audio provenance.
    item: Option<ItemId>,
    /// Seconds into `item` at which this buffer begins.
    pos: f64,
    pts: i64,
}

/// A reference-counted carrier of decoded PCM or encoded bytes, plus
/// provenance `(item, pos, pts, format)`.
#[derive(Debug, Clone)]
pub struct Buffer(Arc<Inner>);

impl Buffer {
    /// Build a decoded-variant buffer.
    pub fn new_decoded(
        samples: Vec<f32>,
        format: AudioFormat,
        item: ItemId,
        pos: f64,
        pts: i64,
    ) -> Self {
        let frame_count = if format.channels() == 0 {
            0
        } else {
            samples.len() / format.channels() as usize
        };
        let size_bytes = samples.len() * std::mem::size_of::<f32>();
        Buffer(Arc::new(Inner {
            payload: Payload::Decoded(samples),
            frame_count,
            size_bytes,
            format,
            item: Some(item),
            pos,
            pts,
        }))
    }

    /// Build an encoded-variant buffer (container bytes emitted by an encoder
    /// sink). `item` is `None` for format header/trailer buffers.
    pub fn new_encoded(
        bytes: Vec<u8>,
        format: AudioFormat,
        item: Option<ItemId>,
        pos: f64,
        pts: i64,
    ) -> Self {
        let size_bytes = bytes.len();
        Buffer(Arc::new(Inner {
            payload: Payload::Encoded(bytes),
            frame_count: 0,
            size_bytes,
            format,
            item,
            pos,
            pts,
        }))
    }

    /// Take another reference to this buffer (`groove_buffer_ref`).
    pub fn buf_ref(&self) -> Buffer {
        self.clone()
    }

    /// Drop this reference. The payload is released once the last reference
    /// is dropped (`groove_buffer_unref`); this is the same as letting `self`
    /// go out of scope, spelled out for parity with the public API surface.
    pub fn unref(self) {
        drop(self)
    }

    /// Number of live references to this buffer's payload.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn payload(&self) -> &Payload {
        &self.0.payload
    }

    pub fn samples(&self) -> Option<&[f32]> {
        match &self.0.payload {
            Payload::Decoded(samples) => Some(samples),
            Payload::Encoded(_) => None,
        }
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match &self.0.payload {
            Payload::Encoded(bytes) => Some(bytes),
            Payload::Decoded(_) => None,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.0.frame_count
    }

    pub fn size_bytes(&self) -> usize {
        self.0.size_bytes
    }

    pub fn format(&self) -> AudioFormat {
        self.0.format
    }

    pub fn item(&self) -> Option<ItemId> {
        self.0.item
    }

    pub fn pos(&self) -> f64 {
        self.0.pos
    }

    /// Presentation timestamp.
    pub fn pts(&self) -> i64 {
        self.0.pts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleFormat};

    fn fmt() -> AudioFormat {
        AudioFormat::new(44_100, ChannelLayout::Stereo, SampleFormat::F32, false)
    }

    #[test]
    fn ref_and_unref_balance_leaves_payload_alive_until_last_drop() {
        let item = ItemId::for_test(1);
        let buf = Buffer::new_decoded(vec![0.0; 4], fmt(), item, 0.0, 0);
        assert_eq!(buf.ref_count(), 1);
        let r1 = buf.buf_ref();
        assert_eq!(buf.ref_count(), 2);
        r1.unref();
        assert_eq!(buf.ref_count(), 1);
    }

    #[test]
    fn frame_count_derives_from_channel_count() {
        let item = ItemId::for_test(1);
        let buf = Buffer::new_decoded(vec![0.0; 8], fmt(), item, 0.0, 0);
        assert_eq!(buf.frame_count(), 4);
    }
}
