//! Sink map: groups attached sinks by compatible output format under a
//! single filter-graph tap.
//!
//! Two sinks are compatible iff either may serve as the other's "example":
//! same `buffer_sample_count` (or one is 0, which matches anything on both
//! sides), same gain, and same audio format when resampling is enabled for
//! both.

use std::sync::Arc;

use crate::format::AudioFormat;
use crate::sink::{Sink, SinkConfig};

/// Identity of a group within the sink map, stable across rebuilds as long
/// as the group's membership doesn't change.
pub type GroupKey = usize;

struct Group {
    sinks: Vec<Arc<Sink>>,
}

impl Group {
    fn example(&self) -> &Arc<Sink> {
        &self.sinks[0]
    }
}

/// Grouping of attached sinks by compatible output format.
pub struct SinkMap {
    groups: Vec<Group>,
}

/// One group's tap parameters, as the filter graph builder needs them.
pub struct GroupTap {
    pub key: GroupKey,
    pub format: AudioFormat,
    pub disable_resample: bool,
    pub buffer_sample_count: usize,
    pub gain: f64,
}

impl SinkMap {
    pub fn new() -> Self {
        Self { groups: Vec::new() }
    }

    pub fn attach(&mut self, sink: Arc<Sink>) {
        for group in &mut self.groups {
            if compatible(group.example(), &sink) {
                group.sinks.push(sink);
                return;
            }
        }
        self.groups.push(Group { sinks: vec![sink] });
    }

    pub fn detach(&mut self, sink: &Arc<Sink>) {
        for group in &mut self.groups {
            group.sinks.retain(|s| !Arc::ptr_eq(s, sink));
        }
        self.groups.retain(|g| !g.sinks.is_empty());
    }

    /// All attached sinks across every group, in group then insertion order.
    pub fn sinks(&self) -> Vec<Arc<Sink>> {
        self.groups
            .iter()
            .flat_map(|g| g.sinks.iter().cloned())
            .collect()
    }

    /// The sinks belonging to group `key`, if it still exists.
    pub fn sinks_in_group(&self, key: GroupKey) -> Option<Vec<Arc<Sink>>> {
        self.groups.get(key).map(|g| g.sinks.clone())
    }

    /// One tap descriptor per group, in group order. Group `i`'s tap
    /// corresponds to `sinks_in_group(i)`.
    pub fn groups(&self) -> Vec<GroupTap> {
        self.groups
            .iter()
            .enumerate()
            .map(|(key, group)| {
                let example = group.example();
                let config = example.config();
                GroupTap {
                    key,
                    format: config.audio_format,
                    disable_resample: config.disable_resample,
                    buffer_sample_count: config.buffer_sample_count,
                    gain: example.gain(),
                }
            })
            .collect()
    }
}

impl Default for SinkMap {
    fn default() -> Self {
        Self::new()
    }
}

fn compatible(example: &Arc<Sink>, candidate: &Arc<Sink>) -> bool {
    let a = example.config();
    let b = candidate.config();

    if !sample_count_compatible(a.buffer_sample_count, b.buffer_sample_count) {
        return false;
    }

    if example.gain() != candidate.gain() {
        return false;
    }

    if !a.disable_resample && !b.disable_resample && a.audio_format != b.audio_format {
        return false;
    }

    true
}

fn sample_count_compatible(a: usize, b: usize) -> bool {
    a == 0 || b == 0 || a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ChannelLayout;
    use crate::sink::NoCallbacks;
    use crate::format::SampleFormat;

    fn fmt() -> AudioFormat {
        AudioFormat::new(44_100, ChannelLayout::Stereo, SampleFormat::F32, false)
    }

    fn sink(buffer_sample_count: usize) -> Arc<Sink> {
        Sink::new(
            SinkConfig {
                audio_format: fmt(),
                disable_resample: false,
                buffer_sample_count,
                buffer_size: 4,
            },
            Box::new(NoCallbacks),
        )
    }

    #[test]
    fn compatible_sinks_join_one_group() {
        let mut map = SinkMap::new();
        map.attach(sink(0));
        map.attach(sink(0));
        assert_eq!(map.groups().len(), 1);
    }

    #[test]
    fn zero_buffer_sample_count_matches_anything() {
        assert!(sample_count_compatible(0, 512));
        assert!(sample_count_compatible(512, 0));
        assert!(!sample_count_compatible(256, 512));
    }

    #[test]
    fn detach_dissolves_empty_group() {
        let mut map = SinkMap::new();
        let s = sink(0);
        map.attach(s.clone());
        map.detach(&s);
        assert_eq!(map.groups().len(), 0);
    }
}
