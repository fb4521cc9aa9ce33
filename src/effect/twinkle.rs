//! Twinkle
//!
//! Time is cut into slots, `LIT_SECONDS` long at the reference speed, and every
//! light draws independently per slot whether it is lit. Draws come from a
//! generator seeded with the activation seed, the light and the slot, so the
//! same activation always replays the same flicker. Slot boundaries are
//! offset per light so lights don't switch in lockstep.
//!
//! A light's hue only depends on its index, so colours stay put between
//! activations while the timing changes.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{fold, scramble, EffectConfig, Sample, Shade, MAX_INTENSITY};

/// Mean slot length at the reference speed
const LIT_SECONDS: f64 = 0.5;
/// Share of slots lit at full intensity
const MAX_DENSITY: f64 = 0.6;
const GOLDEN_RATIO_CONJUGATE: f64 = 0.618_033_988_749_895;

/// Where within its lit slot the light is (0..1), or `None` when dark.
fn flicker(sample: &Sample, config: &EffectConfig) -> Option<f64> {
    let index = if config.mirror {
        fold(sample.index, sample.count)
    } else {
        sample.index
    };

    let light_seed = scramble(sample.seed ^ scramble(index as u64));
    let offset: f64 = StdRng::seed_from_u64(light_seed).gen();

    let position = config.phase(sample.elapsed) / LIT_SECONDS + offset;
    let slot = position.floor();

    let density = MAX_DENSITY * config.intensity / MAX_INTENSITY;
    let mut slot_rng = StdRng::seed_from_u64(scramble(light_seed ^ slot as i64 as u64));
    if slot_rng.gen::<f64>() < density {
        Some(position - slot)
    } else {
        None
    }
}

fn hue_position(index: usize) -> f64 {
    (index as f64 * GOLDEN_RATIO_CONJUGATE).fract()
}

pub(super) fn evaluate(sample: &Sample, config: &EffectConfig) -> Shade {
    match flicker(sample, config) {
        Some(progress) => {
            let index = if config.mirror {
                fold(sample.index, sample.count)
            } else {
                sample.index
            };
            let envelope = (PI * progress).sin();
            let brightness = (255.0 * envelope).round().clamp(1.0, 255.0) as u8;

            Shade::new(config.palette.lookup(hue_position(index)), brightness)
        }
        None => Shade::OFF,
    }
}
