//! Encoded-buffer path: wraps a [`Sink`] configured with
//! `disable_resample = true` for whatever format the encoder wants, and
//! bookkeeps the header/trailer/sentinel protocol an encoder session needs.
//!
//! The actual container/codec encoder is out of scope here (it does not
//! implement codec or container algorithms); callers supply one through the
//! [`Encoder`] trait, the same capability-trait pattern used for
//! [`crate::sink::SinkCallbacks`].

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::error::Result;
use crate::format::AudioFormat;
use crate::sink::{BufferGet, NoCallbacks, Sink, SinkConfig};

/// Abstract contract for an encoder/container writer consumed by
/// [`EncoderSink`].
pub trait Encoder: Send {
    /// Emit a format-header byte range for a new session.
    fn header(&mut self) -> Result<Vec<u8>>;
    /// Encode one decoded buffer's worth of samples into container packets.
    fn encode(&mut self, samples: &[f32], format: AudioFormat) -> Result<Vec<u8>>;
    /// Emit a format-trailer byte range and reset internal state for reuse.
    fn trailer(&mut self) -> Result<Vec<u8>>;
}

/// Drives an [`Encoder`] from a sink's decoded buffers, wrapping each
/// emitted byte range in an encoded [`Buffer`] carrying the originating
/// item and the source buffer's `pos`.
pub struct EncoderSink {
    sink: Arc<Sink>,
    encoder: Box<dyn Encoder>,
    session_open: bool,
}

impl EncoderSink {
    pub fn new(config: SinkConfig, encoder: Box<dyn Encoder>) -> Arc<std::sync::Mutex<EncoderSink>> {
        let config = SinkConfig {
            disable_resample: true,
            ..config
        };
        let sink = Sink::new(config, Box::new(NoCallbacks));
        Arc::new(std::sync::Mutex::new(EncoderSink {
            sink,
            encoder,
            session_open: false,
        }))
    }

    pub fn sink(&self) -> &Arc<Sink> {
        &self.sink
    }

    /// Pull one decoded buffer from the underlying sink and run it through
    /// the encoder, returning the encoded [`Buffer`](s) produced (header on
    /// session start, the encoded audio, and a trailer when the sentinel is
    /// observed). Mirrors `buffer_get`'s blocking/non-blocking contract.
    pub fn pull(&mut self, block: bool) -> Result<Vec<Buffer>> {
        match self.sink.buffer_get(block) {
            BufferGet::Yes(buf) => {
                let mut out = Vec::new();
                if !self.session_open {
                    let header = self.encoder.header()?;
                    out.push(Buffer::new_encoded(header, buf.format(), None, 0.0, 0));
                    self.session_open = true;
                }
                let item = buf.item();
                let pos = buf.pos();
                let samples = buf.samples().map(|s| s.to_vec()).unwrap_or_default();
                let format = buf.format();
                buf.unref();
                let encoded = self.encoder.encode(&samples, format)?;
                out.push(Buffer::new_encoded(encoded, format, item, pos, 0));
                Ok(out)
            }
            BufferGet::End => {
                // On receiving the sentinel, flush encoder/container state
                // and re-arm for a new session. `flush` is not called on the
                // underlying sink here; that's left to the caller's
                // reinitialization.
                let trailer = self.encoder.trailer()?;
                self.session_open = false;
                Ok(vec![Buffer::new_encoded(trailer, AudioFormat::new(
                    0,
                    crate::format::ChannelLayout::Mono,
                    crate::format::SampleFormat::F32,
                    false,
                ), None, 0.0, 0)])
            }
            BufferGet::No => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleFormat};
    use crate::playlist::ItemId;
    use crate::sink::SinkItem;

    struct CountingEncoder {
        headers: u32,
        trailers: u32,
    }

    impl Encoder for CountingEncoder {
        fn header(&mut self) -> Result<Vec<u8>> {
            self.headers += 1;
            Ok(vec![0xFF])
        }
        fn encode(&mut self, samples: &[f32], _format: AudioFormat) -> Result<Vec<u8>> {
            Ok(vec![samples.len() as u8])
        }
        fn trailer(&mut self) -> Result<Vec<u8>> {
            self.trailers += 1;
            Ok(vec![0xFE])
        }
    }

    fn fmt() -> AudioFormat {
        AudioFormat::new(44_100, ChannelLayout::Stereo, SampleFormat::F32, false)
    }

    #[test]
    fn first_pull_emits_header_then_audio() {
        let encoder_sink = EncoderSink::new(
            SinkConfig {
                audio_format: fmt(),
                disable_resample: false,
                buffer_sample_count: 0,
                buffer_size: 4,
            },
            Box::new(CountingEncoder {
                headers: 0,
                trailers: 0,
            }),
        );
        let item = ItemId::for_test(1);
        encoder_sink.lock().unwrap().sink().put(SinkItem::Buffer(
            Buffer::new_decoded(vec![0.0; 4], fmt(), item, 0.0, 0),
        ));
        let bufs = encoder_sink.lock().unwrap().pull(false).unwrap();
        assert_eq!(bufs.len(), 2);
        assert!(bufs[0].item().is_none());
        assert_eq!(bufs[1].item(), Some(item));
    }

    #[test]
    fn sentinel_emits_trailer_and_rearms_session() {
        let encoder_sink = EncoderSink::new(
            SinkConfig {
                audio_format: fmt(),
                disable_resample: false,
                buffer_sample_count: 0,
                buffer_size: 4,
            },
            Box::new(CountingEncoder {
                headers: 0,
                trailers: 0,
            }),
        );
        encoder_sink.lock().unwrap().sink().put(SinkItem::EndOfPlaylist);
        let bufs = encoder_sink.lock().unwrap().pull(false).unwrap();
        assert_eq!(bufs.len(), 1);
        assert!(bufs[0].item().is_none());
    }
}
