//! Colour wipe
//!
//! A front travels over the lights at `LIGHTS_PER_SECOND`; every light it has
//! passed shows its palette colour, the rest stay dark. The cycle is one light
//! longer than the sequence so a fully lit frame is held briefly before the
//! wipe starts over.
//!
//! With `mirror` the front starts in the middle and travels outwards to both
//! ends at once.

use super::{fold, EffectConfig, Sample, Shade};

/// Front speed at the reference speed
const LIGHTS_PER_SECOND: f64 = 2.0;
const PAD: f64 = 1.0;

pub(super) fn evaluate(sample: &Sample, config: &EffectConfig) -> Shade {
    let (slot, span) = if config.mirror {
        let half = (sample.count + 1) / 2;
        (half - 1 - fold(sample.index, sample.count), half)
    } else {
        (sample.index, sample.count)
    };

    let cycle = span as f64 + PAD;
    let front = (LIGHTS_PER_SECOND * config.phase(sample.elapsed)).rem_euclid(cycle);

    if (slot as f64) < front.floor() {
        let color = config.palette.lookup(slot as f64 / span as f64);
        Shade::new(color, config.level())
    } else {
        Shade::OFF
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::tests::{at, config};
    use super::*;
    use crate::color::Palette;

    fn lit(t: f64, count: usize, config: &EffectConfig) -> Vec<bool> {
        (0..count)
            .map(|i| !evaluate(&at(t, i, count), config).is_off())
            .collect()
    }

    #[test]
    fn front_sweeps_forward() {
        let config = config();

        assert_eq!(lit(0.0, 4, &config), [false, false, false, false]);
        assert_eq!(lit(0.5, 4, &config), [true, false, false, false]);
        assert_eq!(lit(1.0, 4, &config), [true, true, false, false]);
        assert_eq!(lit(2.25, 4, &config), [true, true, true, true]);
        // Cycle is five lights long: back to dark
        assert_eq!(lit(2.5, 4, &config), [false, false, false, false]);
    }

    #[test]
    fn reverse_sweeps_from_the_far_end() {
        let config = config().with_reverse(true);

        assert_eq!(lit(0.25, 4, &config), [true, true, true, true]);
        assert_eq!(lit(1.25, 4, &config), [true, true, false, false]);
        assert_eq!(lit(2.25, 4, &config), [false, false, false, false]);
    }

    #[test]
    fn mirror_grows_from_the_centre() {
        let config = config().with_mirror(true);

        assert_eq!(lit(0.5, 4, &config), [false, true, true, false]);
        assert_eq!(lit(1.0, 4, &config), [true, true, true, true]);
        assert_eq!(lit(0.5, 5, &config), [false, false, true, false, false]);
        assert_eq!(lit(1.0, 5, &config), [false, true, true, true, false]);
        assert_eq!(lit(1.5, 5, &config), [true, true, true, true, true]);
    }

    #[test]
    fn lit_lights_take_palette_colour_by_position() {
        let config = config().with_intensity(60.0);
        let fire = Arc::new(Palette::fire());
        let config = EffectConfig {
            palette: fire.clone(),
            ..config
        };

        let shade = evaluate(&at(2.0, 2, 4), &config);
        assert_eq!(shade.color, fire.lookup(0.5));
        assert_eq!(shade.brightness, 153);
    }
}
