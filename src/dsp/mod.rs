//! The filter graph's signal-processing stages: volume, compander, resample.
//!
//! `volume`, `compand`, `aformat`, and `asplit` are named here as the
//! abstract collaborators the core assembles and runs. No external filter
//! library crate is pulled in: the filter graph (`src/filter_graph.rs`) owns
//! these stages directly, the way `proteus-lib`'s `dsp::effects` module owns
//! its own gain/limiter/reverb stages rather than delegating to an external
//! DSP crate.

pub mod compander;
pub mod resample;
pub mod volume;

pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

pub fn linear_to_db(linear: f32) -> f32 {
    20.0 * linear.max(1e-9).log10()
}
