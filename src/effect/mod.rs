//! Effect system with a closed set of variants
//!
//! Every effect is a pure function of the elapsed time since activation, the
//! light's position in its sequence and the active [`EffectConfig`]. Nothing
//! is carried between ticks, so a frame can be recomputed for any time.

mod rainbow;
mod twinkle;
mod wipe;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::Duration;

use crate::color::{palette::RAINBOW, Color, Palette, PaletteBook, OFF};
use crate::error::{EngineError, Result};

const EFFECT_NAME_RAINBOW: &str = "rainbow";
const EFFECT_NAME_COLOR_WIPE: &str = "color_wipe";
const EFFECT_NAME_TWINKLE: &str = "twinkle";

/// Rates below are quoted at this speed
pub const DEFAULT_SPEED: f64 = 50.0;
pub const DEFAULT_INTENSITY: f64 = 100.0;
pub const MAX_INTENSITY: f64 = 100.0;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    Rainbow,
    ColorWipe,
    Twinkle,
}

impl Effect {
    pub const ALL: [Effect; 3] = [Effect::Rainbow, Effect::ColorWipe, Effect::Twinkle];

    pub const fn as_str(self) -> &'static str {
        match self {
            Effect::Rainbow => EFFECT_NAME_RAINBOW,
            Effect::ColorWipe => EFFECT_NAME_COLOR_WIPE,
            Effect::Twinkle => EFFECT_NAME_TWINKLE,
        }
    }

    /// What light `sample.index` of `sample.count` shows at `sample.elapsed`.
    pub fn evaluate(self, sample: &Sample, config: &EffectConfig) -> Shade {
        if sample.count == 0 || sample.index >= sample.count {
            return Shade::OFF;
        }

        match self {
            Effect::Rainbow => rainbow::evaluate(sample, config),
            Effect::ColorWipe => wipe::evaluate(sample, config),
            Effect::Twinkle => twinkle::evaluate(sample, config),
        }
    }
}

impl FromStr for Effect {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Effect> {
        match s {
            EFFECT_NAME_RAINBOW => Ok(Effect::Rainbow),
            EFFECT_NAME_COLOR_WIPE => Ok(Effect::ColorWipe),
            EFFECT_NAME_TWINKLE => Ok(Effect::Twinkle),
            other => Err(EngineError::UnknownEffect(other.to_string())),
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Shade {
    pub color: Color,
    pub brightness: u8,
}

impl Shade {
    pub const OFF: Shade = Shade {
        color: OFF,
        brightness: 0,
    };

    pub const fn new(color: Color, brightness: u8) -> Shade {
        Shade { color, brightness }
    }

    pub fn is_off(&self) -> bool {
        self.brightness == 0
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Sample {
    /// Time since the activation started. May be negative.
    pub elapsed: Duration,
    pub index: usize,
    pub count: usize,
    /// Per-activation seed, only twinkle draws from it
    pub seed: u64,
}

impl Sample {
    pub fn new(elapsed: Duration, index: usize, count: usize, seed: u64) -> Sample {
        Sample {
            elapsed,
            index,
            count,
            seed,
        }
    }
}

/// Validated parameters of an activation. Replaced whole, never patched.
#[derive(Debug, Clone)]
pub struct EffectConfig {
    /// Animation rate multiplier, 50 is the reference rate
    pub speed: f64,
    /// 0-100, amplitude or density depending on the effect
    pub intensity: f64,
    pub palette: Arc<Palette>,
    pub reverse: bool,
    pub mirror: bool,
}

impl EffectConfig {
    pub fn new(palette: Arc<Palette>) -> EffectConfig {
        EffectConfig {
            speed: DEFAULT_SPEED,
            intensity: DEFAULT_INTENSITY,
            palette,
            reverse: false,
            mirror: false,
        }
    }

    #[must_use]
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }

    #[must_use]
    pub fn with_intensity(mut self, intensity: f64) -> Self {
        self.intensity = intensity;
        self
    }

    #[must_use]
    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    #[must_use]
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "speed must be a positive number, got {}",
                self.speed
            )));
        }

        if !(0.0..=MAX_INTENSITY).contains(&self.intensity) {
            return Err(EngineError::InvalidConfig(format!(
                "intensity must be within 0-100, got {}",
                self.intensity
            )));
        }

        Ok(())
    }

    fn speed_factor(&self) -> f64 {
        self.speed / DEFAULT_SPEED
    }

    fn direction(&self) -> f64 {
        if self.reverse {
            -1.0
        } else {
            1.0
        }
    }

    /// Effect time in seconds: scaled by speed, negated when reversed.
    fn phase(&self, elapsed: Duration) -> f64 {
        self.direction() * self.speed_factor() * elapsed.as_seconds_f64()
    }

    fn level(&self) -> u8 {
        (self.intensity / MAX_INTENSITY * 255.0).round().clamp(0.0, 255.0) as u8
    }
}

/// Start/config request as it arrives from a caller: the palette is still a name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectRequest {
    pub speed: f64,
    pub intensity: f64,
    #[serde(alias = "palette")]
    pub palette_name: String,
    pub reverse: bool,
    pub mirror: bool,
}

impl Default for EffectRequest {
    fn default() -> Self {
        EffectRequest {
            speed: DEFAULT_SPEED,
            intensity: DEFAULT_INTENSITY,
            palette_name: RAINBOW.to_string(),
            reverse: false,
            mirror: false,
        }
    }
}

impl EffectRequest {
    pub fn resolve(&self, palettes: &PaletteBook) -> Result<EffectConfig> {
        let config = EffectConfig {
            speed: self.speed,
            intensity: self.intensity,
            palette: palettes.resolve(&self.palette_name)?,
            reverse: self.reverse,
            mirror: self.mirror,
        };
        config.validate()?;

        Ok(config)
    }
}

/// Folds the index space about the middle so `i` and `count - 1 - i` coincide.
fn fold(index: usize, count: usize) -> usize {
    index.min(count - 1 - index)
}

/// SplitMix64 finaliser
pub(crate) const fn scramble(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
