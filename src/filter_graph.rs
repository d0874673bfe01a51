//! Filter graph builder: given one decoded input format and a set of
//! per-sink-group output formats/gains, builds a resample/mix/split graph
//! with one tap per group.
//!
//! ```text
//!   source(F_in)
//!      |
//!   [volume or compand]       -- global+item volume stage
//!      |
//!   (asplit N)                -- only when there are N >= 2 groups
//!      |-- [volume g_1] [aformat F_1] -> sink_tap_1
//!      |-- [volume g_2] [aformat F_2] -> sink_tap_2
//!      `-- ...
//! ```
//!
//! No external filter-library crate is depended on: this module owns the
//! stages directly, the way `proteus-lib`'s `dsp::effects` module owns its
//! gain/limiter/reverb stages rather than delegating to one. `volume`,
//! `compand`, `aformat`, and `asplit` are named here only as the abstract
//! collaborators the core assembles and runs.

use crate::dsp::compander::{Compander, CompanderParams};
use crate::dsp::resample::Resampler;
use crate::dsp::{db_to_linear, linear_to_db};
use crate::format::AudioFormat;
use crate::sink_map::{GroupKey, GroupTap};

/// Inputs the builder needs to decide whether to rebuild and, if so, how.
pub struct GraphInputs<'a> {
    pub in_format: AudioFormat,
    pub vol: f64,
    pub peak: f64,
    pub groups: &'a [GroupTap],
}

struct GroupStage {
    key: GroupKey,
    format: AudioFormat,
    disable_resample: bool,
    resampler: Option<Resampler>,
    gain: f64,
    buffer_sample_count: usize,
    /// Carried-over samples below `buffer_sample_count` frames, held until
    /// the next call accumulates enough to emit a full-size tap buffer.
    pending: Vec<f32>,
}

enum VolumeStage {
    Unity,
    Linear(f64),
    Compander(Compander),
}

/// The current compiled graph: a shared volume/compand stage followed by
/// one resample+gain tap per sink group.
pub struct FilterGraph {
    in_format: Option<AudioFormat>,
    cached_vol: Option<f64>,
    cached_peak: Option<f64>,
    volume_stage: VolumeStage,
    groups: Vec<GroupStage>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self {
            in_format: None,
            cached_vol: None,
            cached_peak: None,
            volume_stage: VolumeStage::Unity,
            groups: Vec::new(),
        }
    }

    /// Rebuild the graph for a new input format / sink-group topology /
    /// volume-peak pair. Cheap to call whenever any rebuild trigger fires;
    /// callers gate on their own cached-state check.
    pub fn rebuild(&mut self, inputs: GraphInputs<'_>) {
        self.in_format = Some(inputs.in_format);
        self.cached_vol = Some(inputs.vol);
        self.cached_peak = Some(inputs.peak);

        // Volume-stage selection.
        let amp = inputs.vol * inputs.peak.min(1.0);
        self.volume_stage = if amp < 1.0 {
            VolumeStage::Linear(inputs.vol)
        } else if (amp - 1.0).abs() < f64::EPSILON {
            VolumeStage::Unity
        } else {
            let makeup_db = 20.0 * (inputs.vol as f32).log10();
            VolumeStage::Compander(Compander::new(makeup_db, CompanderParams::default()))
        };

        self.groups = inputs
            .groups
            .iter()
            .map(|tap| {
                let resampler = if tap.disable_resample {
                    None
                } else {
                    Some(Resampler::new(inputs.in_format, tap.format))
                };
                GroupStage {
                    key: tap.key,
                    format: tap.format,
                    disable_resample: tap.disable_resample,
                    resampler,
                    gain: tap.gain,
                    buffer_sample_count: tap.buffer_sample_count,
                    pending: Vec::new(),
                }
            })
            .collect();
    }

    /// Whether the cached graph may still be reused for `inputs`, answered
    /// in O(1). Exposed for callers that want to check before paying for a
    /// `rebuild`. Mirrors the `(F_in, vol, peak, group_count)` rebuild-trigger
    /// tuple: a gain or peak change alone must also force a rebuild, since
    /// either can flip the volume stage between unity/linear/compander.
    pub fn matches(&self, in_format: AudioFormat, vol: f64, peak: f64, group_count: usize) -> bool {
        self.in_format == Some(in_format)
            && self.cached_vol == Some(vol)
            && self.cached_peak == Some(peak)
            && self.groups.len() == group_count
    }

    /// Push one chunk of interleaved input samples through the graph,
    /// returning each group's tap output keyed by [`GroupKey`].
    pub fn process(
        &mut self,
        samples: &[f32],
        in_format: AudioFormat,
    ) -> Vec<(GroupKey, (AudioFormat, Vec<f32>))> {
        let mut shared = samples.to_vec();
        match &mut self.volume_stage {
            VolumeStage::Unity => {}
            VolumeStage::Linear(vol) => crate::dsp::volume::apply_linear(&mut shared, *vol),
            VolumeStage::Compander(compander) => {
                compander.process(&mut shared, in_format.sample_rate)
            }
        }

        let mut results = Vec::new();
        for group in self.groups.iter_mut() {
            let mut out = if let Some(resampler) = &mut group.resampler {
                resampler.process(&shared)
            } else {
                shared.clone()
            };
            if (group.gain - 1.0).abs() > f64::EPSILON {
                crate::dsp::volume::apply_linear(&mut out, group.gain);
            }
            let out_format = if group.disable_resample {
                in_format
            } else {
                group.format
            };
            let channels = out_format.channels().max(1) as usize;

            if group.buffer_sample_count == 0 {
                if !out.is_empty() {
                    results.push((group.key, (out_format, out)));
                }
                continue;
            }

            group.pending.extend(out);
            let frame_len = group.buffer_sample_count * channels;
            while group.pending.len() >= frame_len {
                let chunk: Vec<f32> = group.pending.drain(..frame_len).collect();
                results.push((group.key, (out_format, chunk)));
            }
        }
        results
    }
}

impl Default for FilterGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// `20*log10(linear)`, used to derive compander makeup gain from a linear
/// volume multiplier.
pub fn vol_to_makeup_db(vol: f64) -> f32 {
    linear_to_db(vol as f32)
}

/// Inverse of [`vol_to_makeup_db`], exposed for symmetry/tests.
pub fn makeup_db_to_vol(db: f32) -> f64 {
    db_to_linear(db) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{ChannelLayout, SampleFormat};
    use crate::sink_map::GroupTap;

    fn fmt(rate: u32, layout: ChannelLayout) -> AudioFormat {
        AudioFormat::new(rate, layout, SampleFormat::F32, false)
    }

    #[test]
    fn single_group_unity_volume_passes_through_unchanged() {
        let mut graph = FilterGraph::new();
        let in_format = fmt(44_100, ChannelLayout::Stereo);
        let tap = GroupTap {
            key: 0,
            format: in_format,
            disable_resample: true,
            buffer_sample_count: 0,
            gain: 1.0,
        };
        graph.rebuild(GraphInputs {
            in_format,
            vol: 1.0,
            peak: 1.0,
            groups: &[tap],
        });
        let input = vec![0.5, -0.5, 0.25, -0.25];
        let outputs = graph.process(&input, in_format);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].1 .1, input);
    }

    #[test]
    fn low_volume_scales_linearly() {
        let mut graph = FilterGraph::new();
        let in_format = fmt(44_100, ChannelLayout::Mono);
        let tap = GroupTap {
            key: 0,
            format: in_format,
            disable_resample: true,
            buffer_sample_count: 0,
            gain: 1.0,
        };
        graph.rebuild(GraphInputs {
            in_format,
            vol: 0.5,
            peak: 1.0,
            groups: &[tap],
        });
        let outputs = graph.process(&[1.0, 1.0], in_format);
        assert_eq!(outputs[0].1 .1, vec![0.5, 0.5]);
    }

    #[test]
    fn two_groups_produce_independent_taps() {
        let mut graph = FilterGraph::new();
        let in_format = fmt(44_100, ChannelLayout::Stereo);
        let taps = vec![
            GroupTap {
                key: 0,
                format: fmt(44_100, ChannelLayout::Stereo),
                disable_resample: true,
                buffer_sample_count: 0,
                gain: 1.0,
            },
            GroupTap {
                key: 1,
                format: fmt(22_050, ChannelLayout::Mono),
                disable_resample: false,
                buffer_sample_count: 0,
                gain: 1.0,
            },
        ];
        graph.rebuild(GraphInputs {
            in_format,
            vol: 1.0,
            peak: 1.0,
            groups: &taps,
        });
        let outputs = graph.process(&[0.1, 0.2, 0.3, 0.4], in_format);
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].0, 0);
        assert_eq!(outputs[1].0, 1);
    }
}
