//! Per-group `aformat` stage: sample-rate conversion and channel remixing.
//!
//! `aformat`/`asplit` are named here as an abstract collaborator; no
//! resampling crate in the retrieval pack handles a dynamic,
//! runtime-determined channel count cleanly (the `dasp` interpolation types
//! are generic over a fixed-size `Frame`), so this stage is a small
//! hand-rolled linear resampler carrying fractional phase across calls.
//! `dasp_ring_buffer` (already a dependency, used for the playback ring
//! buffer) remains the ecosystem choice for the buffering it needs.

use crate::format::AudioFormat;

/// Streaming sample-rate + channel-count converter with state carried across
/// calls, so a filter-graph tap can feed it one decoded frame at a time.
#[derive(Debug, Clone)]
pub struct Resampler {
    in_channels: usize,
    out_channels: usize,
    ratio: f64, // in_rate / out_rate
    /// Fractional read position into the (virtual) input stream, in input
    /// frames, carried across calls.
    phase: f64,
    /// Last input frame seen, for interpolating across call boundaries.
    last_frame: Vec<f32>,
}

impl Resampler {
    pub fn new(in_format: AudioFormat, out_format: AudioFormat) -> Self {
        let in_channels = in_format.channels() as usize;
        let out_channels = out_format.channels() as usize;
        Self {
            in_channels,
            out_channels,
            ratio: in_format.sample_rate as f64 / out_format.sample_rate as f64,
            phase: 0.0,
            last_frame: vec![0.0; in_channels.max(1)],
        }
    }

    /// Convert one chunk of interleaved input samples (in `in_channels`
    /// layout) into interleaved output samples (`out_channels` layout, at the
    /// output sample rate). Leftover fractional phase is retained for the
    /// next call, so callers may feed arbitrarily-sized chunks.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.in_channels == 0 {
            return Vec::new();
        }
        let in_frames = input.len() / self.in_channels;
        if in_frames == 0 {
            return Vec::new();
        }

        let get_in_frame = |idx: isize| -> &[f32] {
            if idx < 0 {
                &self.last_frame
            } else {
                let idx = idx as usize;
                &input[idx * self.in_channels..(idx + 1) * self.in_channels]
            }
        };

        let mut out = Vec::new();
        // `phase` is the fractional input-frame position of the next output
        // sample, relative to the start of `input` (frame 0 == `input[0..]`,
        // frame -1 == the carried-over `last_frame`).
        while self.phase < in_frames as f64 {
            let idx0 = self.phase.floor() as isize - 1;
            let idx1 = idx0 + 1;
            let frac = self.phase - self.phase.floor();
            let a = get_in_frame(idx0);
            let b = if idx1 < in_frames as isize {
                get_in_frame(idx1)
            } else {
                get_in_frame(in_frames as isize - 1)
            };
            push_remixed_frame(a, b, frac as f32, self.in_channels, self.out_channels, &mut out);
            self.phase += self.ratio;
        }
        self.phase -= in_frames as f64;

        if in_frames > 0 {
            self.last_frame
                .copy_from_slice(&input[(in_frames - 1) * self.in_channels..in_frames * self.in_channels]);
        }

        out
    }
}

/// Linearly interpolate frame `a`→`b` by `frac`, then remix from
/// `in_channels` to `out_channels`, appending the result to `out`.
fn push_remixed_frame(
    a: &[f32],
    b: &[f32],
    frac: f32,
    in_channels: usize,
    out_channels: usize,
    out: &mut Vec<f32>,
) {
    let mut interpolated = [0.0_f32; 8];
    for c in 0..in_channels.min(8) {
        interpolated[c] = a[c] + (b[c] - a[c]) * frac;
    }

    match (in_channels, out_channels) {
        (a, b) if a == b => out.extend_from_slice(&interpolated[..in_channels]),
        (1, n) => {
            // Mono source: duplicate to every output channel.
            for _ in 0..n {
                out.push(interpolated[0]);
            }
        }
        (m, 1) => {
            // Downmix to mono: average the source channels.
            let sum: f32 = interpolated[..m].iter().sum();
            out.push(sum / m as f32);
        }
        (m, n) if n > m => {
            // Upmix: carry the source channels through, silence the rest.
            out.extend_from_slice(&interpolated[..m]);
            out.extend(std::iter::repeat(0.0).take(n - m));
        }
        (m, n) => {
            // Downmix to fewer (but >1) channels: drop the extra channels.
            let _ = m;
            out.extend_from_slice(&interpolated[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleFormat};

    fn fmt(rate: u32, layout: ChannelLayout) -> AudioFormat {
        AudioFormat::new(rate, layout, SampleFormat::F32, false)
    }

    #[test]
    fn passthrough_when_rates_and_channels_match() {
        let mut r = Resampler::new(
            fmt(44_100, ChannelLayout::Stereo),
            fmt(44_100, ChannelLayout::Stereo),
        );
        let input = vec![0.1, 0.2, 0.3, 0.4];
        let out = r.process(&input);
        assert_eq!(out.len(), input.len());
    }

    #[test]
    fn upsampling_produces_more_frames() {
        let mut r = Resampler::new(
            fmt(22_050, ChannelLayout::Mono),
            fmt(44_100, ChannelLayout::Mono),
        );
        let input = vec![0.0; 100];
        let out = r.process(&input);
        // ~2x the frames, modulo a little startup phase slack.
        assert!(out.len() >= 190 && out.len() <= 202, "got {}", out.len());
    }

    #[test]
    fn mono_to_stereo_duplicates_channel() {
        let mut r = Resampler::new(
            fmt(44_100, ChannelLayout::Mono),
            fmt(44_100, ChannelLayout::Stereo),
        );
        let out = r.process(&[0.5, -0.5]);
        assert_eq!(out, vec![0.5, 0.5, -0.5, -0.5]);
    }

    #[test]
    fn phase_carries_across_chunk_boundaries() {
        let mut r = Resampler::new(
            fmt(48_000, ChannelLayout::Mono),
            fmt(44_100, ChannelLayout::Mono),
        );
        let mut total = 0;
        for _ in 0..10 {
            total += r.process(&vec![0.0; 4800]).len();
        }
        // 48000 input frames at 48k -> 44.1k should yield ~44100 output frames.
        assert!((total as i64 - 44_100).abs() < 50, "got {}", total);
    }
}
