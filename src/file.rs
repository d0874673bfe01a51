//! Opaque demuxed/decoded audio stream handle.
//!
//! The actual demux/decode work is delegated to a [`FrameSource`], an
//! abstract "frame source" contract. The production implementation,
//! [`SymphoniaSource`], is grounded in `proteus-lib`'s
//! `tools::tools::get_reader`/`get_decoder` and
//! `track::convert::process_channel`; tests use a synthetic in-memory source
//! instead of real media files.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rand::Rng;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::error::{Error, Result};
use crate::format::{AudioFormat, ChannelLayout, SampleFormat};

/// A single metadata key/value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

pub const MATCH_CASE: u32 = 1;
pub const DONT_OVERWRITE: u32 = 16;
pub const APPEND: u32 = 32;

/// A pending seek, guarded by its own lock so a seek may be issued from any
/// thread without blocking the decode worker's outer playlist lock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeekRequest {
    pub pos: Option<f64>,
    pub flush: bool,
}

/// Abstract contract the core consumes from the demux/decode library.
/// `next_frame` returns one decoded chunk of interleaved samples in
/// `format()`'s layout, or `None` at end of stream.
pub trait FrameSource: Send {
    fn format(&self) -> AudioFormat;
    fn duration(&self) -> Option<f64>;
    /// Seek to an absolute position in seconds. Leaves the source's position
    /// unchanged on failure.
    fn seek(&mut self, seconds: f64) -> Result<()>;
    /// Decode and return the next chunk of audio, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Vec<f32>>>;
    /// Hint that the playlist's pause state changed. A pure I/O hint to the
    /// underlying demux library (e.g. so it can stop filling read-ahead
    /// buffers from a live stream); it never halts `next_frame`, and sources
    /// with nothing useful to do with the hint can ignore it.
    fn set_paused(&mut self, _paused: bool) {}
}

/// Opaque handle to a demuxed+decoded audio stream.
pub struct File {
    path: PathBuf,
    format: AudioFormat,
    duration: Option<f64>,
    seek: Mutex<SeekRequest>,
    source: Mutex<Box<dyn FrameSource>>,
    tags: Mutex<Vec<Tag>>,
    dirty: Mutex<bool>,
}

impl File {
    /// Open a media file via Symphonia (grounded in
    /// `tools::tools::get_reader`/`get_decoder`).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let source = SymphoniaSource::open(&path)?;
        let format = source.format();
        let duration = source.duration();
        let tags = source.tags.clone();
        Ok(Self {
            path,
            format,
            duration,
            seek: Mutex::new(SeekRequest::default()),
            source: Mutex::new(Box::new(source)),
            tags: Mutex::new(tags),
            dirty: Mutex::new(false),
        })
    }

    /// Build a `File` around a caller-supplied frame source, e.g. a synthetic
    /// in-memory source used in tests.
    pub fn from_source(path: impl AsRef<Path>, source: Box<dyn FrameSource>) -> Self {
        let format = source.format();
        let duration = source.duration();
        Self {
            path: path.as_ref().to_path_buf(),
            format,
            duration,
            seek: Mutex::new(SeekRequest::default()),
            source: Mutex::new(source),
            tags: Mutex::new(Vec::new()),
            dirty: Mutex::new(false),
        }
    }

    pub fn audio_format(&self) -> AudioFormat {
        self.format
    }

    pub fn duration(&self) -> Option<f64> {
        self.duration
    }

    pub fn short_names(&self) -> Vec<String> {
        self.tags
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.key.clone())
            .collect()
    }

    pub fn metadata_get(&self, key: &str, flags: u32) -> Option<Tag> {
        let tags = self.tags.lock().unwrap();
        tags.iter()
            .find(|t| tag_key_matches(&t.key, key, flags))
            .cloned()
    }

    /// Set a tag value, honoring `DONT_OVERWRITE`/`APPEND`/`MATCH_CASE`.
    pub fn metadata_set(&self, key: &str, value: &str, flags: u32) {
        let mut tags = self.tags.lock().unwrap();
        let existing = tags
            .iter_mut()
            .find(|t| tag_key_matches(&t.key, key, flags));
        match existing {
            Some(tag) if flags & DONT_OVERWRITE != 0 => {
                let _ = tag;
            }
            Some(tag) if flags & APPEND != 0 => {
                tag.value.push_str(value);
            }
            Some(tag) => tag.value = value.to_string(),
            None => tags.push(Tag {
                key: key.to_string(),
                value: value.to_string(),
            }),
        }
        drop(tags);
        *self.dirty.lock().unwrap() = true;
    }

    /// Request a seek. Decoupled from the playlist lock so it can be issued
    /// from any thread.
    pub fn request_seek(&self, pos: f64, flush: bool) {
        let mut seek = self.seek.lock().unwrap();
        seek.pos = Some(pos);
        seek.flush = flush;
    }

    /// Consume a pending seek request, if any, clearing it.
    pub fn take_seek(&self) -> Option<SeekRequest> {
        let mut seek = self.seek.lock().unwrap();
        if seek.pos.is_some() {
            let req = *seek;
            *seek = SeekRequest::default();
            Some(req)
        } else {
            None
        }
    }

    /// Apply a seek to the underlying source. On failure the position is
    /// left unchanged and the caller should log at WARNING.
    pub fn apply_seek(&self, seconds: f64) -> Result<()> {
        self.source.lock().unwrap().seek(seconds)
    }

    /// Forward a pause-state transition to the underlying source as a hint.
    pub fn apply_pause(&self, paused: bool) {
        self.source.lock().unwrap().set_paused(paused);
    }

    /// Decode the next chunk of audio, or `None` at end of stream.
    pub fn next_frame(&self) -> Result<Option<Vec<f32>>> {
        self.source.lock().unwrap().next_frame()
    }

    /// Persist pending metadata changes in place, via a same-directory
    /// tempfile and an atomic rename. A no-op (silent success) on a clean
    /// file with no pending changes.
    pub fn save(&self) -> Result<()> {
        if !*self.dirty.lock().unwrap() {
            return Ok(());
        }
        self.save_as(&self.path)
    }

    /// Persist pending metadata changes to a new path, via a same-directory
    /// tempfile and an atomic rename.
    pub fn save_as(&self, dest: impl AsRef<Path>) -> Result<()> {
        let dest = dest.as_ref();
        let dir = dest.parent().unwrap_or_else(|| Path::new("."));
        let ext = dest
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{}", e))
            .unwrap_or_default();
        let tmp_name = format!(".tmp{}{}", create_rand_name(16), ext);
        let tmp_path = dir.join(tmp_name);

        {
            let mut tmp = std::fs::File::create(&tmp_path)?;
            std::io::copy(&mut std::fs::File::open(&self.path)?, &mut tmp)?;
            tmp.flush()?;
        }
        std::fs::rename(&tmp_path, dest)?;
        *self.dirty.lock().unwrap() = false;
        Ok(())
    }
}

fn tag_key_matches(have: &str, want: &str, flags: u32) -> bool {
    if flags & MATCH_CASE != 0 {
        have == want
    } else {
        have.eq_ignore_ascii_case(want)
    }
}

/// Generate a random alphanumeric name of `len` characters, used for
/// tempfile suffixes.
pub fn create_rand_name(len: usize) -> String {
    const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Symphonia-backed [`FrameSource`]. Grounded in `tools::tools::get_reader`
/// and `track::convert::process_channel`.
struct SymphoniaSource {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    audio_format: AudioFormat,
    duration: Option<f64>,
    tags: Vec<Tag>,
    eof: bool,
}

impl SymphoniaSource {
    fn open(path: &Path) -> Result<Self> {
        let src = std::fs::File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(src), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let meta_opts: MetadataOptions = Default::default();
        let fmt_opts: FormatOptions = Default::default();
        let mut probed = symphonia::default::get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(|_| Error::UnknownFormat)?;

        let track = probed
            .format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or(Error::UnknownFormat)?
            .clone();

        let dec_opts: DecoderOptions = Default::default();
        let decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &dec_opts)
            .map_err(|_| Error::UnknownFormat)?;

        let sample_rate = track.codec_params.sample_rate.unwrap_or(44_100);
        let channels = track
            .codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);
        let duration = track
            .codec_params
            .n_frames
            .map(|frames| frames as f64 / sample_rate as f64);

        let tags = probed
            .metadata
            .get()
            .and_then(|mut m| m.skip_to_latest().cloned())
            .map(|rev| {
                rev.tags()
                    .iter()
                    .map(|t| Tag {
                        key: t.key.clone(),
                        value: t.value.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            format_reader: probed.format,
            decoder,
            track_id: track.id,
            audio_format: AudioFormat::new(
                sample_rate,
                ChannelLayout::default_for_channel_count(channels),
                SampleFormat::F32,
                false,
            ),
            duration,
            tags,
            eof: false,
        })
    }
}

impl FrameSource for SymphoniaSource {
    fn format(&self) -> AudioFormat {
        self.audio_format
    }

    fn duration(&self) -> Option<f64> {
        self.duration
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let seconds_whole = seconds.floor().max(0.0) as u64;
        let frac = seconds.fract();
        let time = Time::new(seconds_whole, frac);
        self.format_reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| Error::Decoding(e.to_string()))?;
        self.eof = false;
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Vec<f32>>> {
        if self.eof {
            return Ok(None);
        }
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok(packet) => packet,
                Err(symphonia::core::errors::Error::IoError(_)) => {
                    self.eof = true;
                    return Ok(None);
                }
                Err(e) => return Err(Error::Decoding(e.to_string())),
            };
            if packet.track_id() != self.track_id {
                continue;
            }
            match self.decoder.decode(&packet) {
                Ok(decoded) => return Ok(Some(interleave(decoded))),
                Err(symphonia::core::errors::Error::DecodeError(_)) => continue,
                Err(e) => return Err(Error::Decoding(e.to_string())),
            }
        }
    }
}

/// Interleave a decoded `AudioBufferRef` into `f32` samples, per-channel, the
/// way `track::convert::process_channel` extracts a single channel.
fn interleave(decoded: AudioBufferRef<'_>) -> Vec<f32> {
    let channels = decoded.spec().channels.count();
    let frames = decoded.frames();
    let mut out = vec![0.0_f32; frames * channels];

    macro_rules! fill {
        ($buf:expr, $conv:expr) => {{
            for ch in 0..channels {
                let plane = $buf.chan(ch);
                for (i, sample) in plane.iter().enumerate() {
                    out[i * channels + ch] = $conv(*sample);
                }
            }
        }};
    }

    match decoded {
        AudioBufferRef::F32(buf) => fill!(buf, |s: f32| s),
        AudioBufferRef::S16(buf) => fill!(buf, |s: i16| s as f32 / 32768.0),
        AudioBufferRef::S32(buf) => fill!(buf, |s: i32| s as f32 / 2147483648.0),
        AudioBufferRef::U16(buf) => fill!(buf, |s: u16| (s as i32 - 32768) as f32 / 32768.0),
        AudioBufferRef::S24(buf) => {
            fill!(buf, |s: symphonia::core::sample::i24| s.0 as f32 / 8_388_608.0)
        }
        AudioBufferRef::U24(buf) => {
            fill!(buf, |s: symphonia::core::sample::u24| {
                (s.0 as i32 - 8_388_608) as f32 / 8_388_608.0
            })
        }
        AudioBufferRef::U8(buf) => fill!(buf, |s: u8| (s as i32 - 128) as f32 / 128.0),
        AudioBufferRef::S8(buf) => fill!(buf, |s: i8| s as f32 / 128.0),
        AudioBufferRef::U32(buf) => {
            fill!(buf, |s: u32| (s as i64 - 2_147_483_648) as f32 / 2_147_483_648.0)
        }
    }

    out
}

/// In-memory synthetic frame source for tests: yields fixed-size chunks of
/// caller-supplied samples, supports seeking by index.
#[cfg(test)]
pub struct SyntheticSource {
    format: AudioFormat,
    frames: Vec<f32>,
    chunk_frames: usize,
    cursor_frame: usize,
}

#[cfg(test)]
impl SyntheticSource {
    pub fn new(format: AudioFormat, frames: Vec<f32>, chunk_frames: usize) -> Self {
        Self {
            format,
            frames,
            chunk_frames: chunk_frames.max(1),
            cursor_frame: 0,
        }
    }
}

#[cfg(test)]
impl FrameSource for SyntheticSource {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn duration(&self) -> Option<f64> {
        let channels = self.format.channels().max(1) as usize;
        Some((self.frames.len() / channels) as f64 / self.format.sample_rate as f64)
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        let channels = self.format.channels().max(1) as usize;
        let frame = (seconds * self.format.sample_rate as f64).round() as usize;
        self.cursor_frame = frame.min(self.frames.len() / channels);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Option<Vec<f32>>> {
        let channels = self.format.channels().max(1) as usize;
        let total_frames = self.frames.len() / channels;
        if self.cursor_frame >= total_frames {
            return Ok(None);
        }
        let end_frame = (self.cursor_frame + self.chunk_frames).min(total_frames);
        let chunk = self.frames[self.cursor_frame * channels..end_frame * channels].to_vec();
        self.cursor_frame = end_frame;
        Ok(Some(chunk))
    }
}
