//! Rainbow wave
//!
//! Each light samples the palette (cyclically) at
//! `(phase * CYCLES_PER_SECOND + index / count) mod 1`, so the whole palette is
//! spread once across the sequence and scrolls along it over time.

use super::{fold, EffectConfig, Sample, Shade};

/// Palette cycles per second at the reference speed
const CYCLES_PER_SECOND: f64 = 0.2;

fn position(sample: &Sample, config: &EffectConfig) -> f64 {
    let index = if config.mirror {
        fold(sample.index, sample.count)
    } else {
        sample.index
    };

    let offset = index as f64 / sample.count as f64;
    (CYCLES_PER_SECOND * config.phase(sample.elapsed) + offset).rem_euclid(1.0)
}

pub(super) fn evaluate(sample: &Sample, config: &EffectConfig) -> Shade {
    let color = config.palette.lookup_cyclic(position(sample, config));
    Shade::new(color, config.level())
}
