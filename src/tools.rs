//! Stray free functions that don't belong to any one module's core type:
//! loudness-to-replaygain conversion. The rest of that free-function list
//! lives alongside the type it operates on
//! (`audio_formats_equal`/`channel_layout_count`/`channel_layout_default`/
//! `sample_format_bytes_per_sample` in `format.rs`, `create_rand_name` in
//! `file.rs`).

/// ReplayGain 2.0's target loudness, in LUFS.
const REPLAYGAIN_REFERENCE_LUFS: f64 = -18.0;

/// Convert an EBU R128 integrated loudness measurement (LUFS) into a
/// ReplayGain adjustment in decibels, the way the loudness analyzer sink's
/// output feeds `Playlist::set_item_gain_peak`. Matches
/// `groove_loudness_to_replaygain`, which returns the dB delta rather than a
/// linear multiplier; callers that need a multiplier convert with
/// [`crate::dsp::db_to_linear`].
pub fn loudness_to_replaygain(loudness_lufs: f64) -> f64 {
    REPLAYGAIN_REFERENCE_LUFS - loudness_lufs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_loudness_yields_zero_gain() {
        let gain_db = loudness_to_replaygain(REPLAYGAIN_REFERENCE_LUFS);
        assert!((gain_db - 0.0).abs() < 1e-9);
    }

    #[test]
    fn quieter_track_yields_positive_gain() {
        let gain_db = loudness_to_replaygain(-23.0);
        assert!(gain_db > 0.0);
    }

    #[test]
    fn louder_track_yields_negative_gain() {
        let gain_db = loudness_to_replaygain(-10.0);
        assert!(gain_db < 0.0);
    }
}
