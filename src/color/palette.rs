//! Named colour gradients.
//!
//! A palette is an ordered list of stops on [0, 1]. Effects sample it either
//! "open" (positions outside the stops clamp to the nearest end) or "cyclic"
//! (positions wrap, and the gap between the last and first stop is blended).

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::error::{EngineError, Result};

pub const RAINBOW: &str = "rainbow";
pub const FIRE: &str = "fire";

/// How colours between two stops are produced
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Blend {
    /// No blending, the nearest stop wins
    Step,
    /// Straight per-channel interpolation
    #[default]
    Rgb,
    /// Interpolate hue/saturation/value, short way round the hue circle
    Hsv,
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stop {
    pub position: f64,
    pub color: Color,
}

impl Stop {
    pub const fn new(position: f64, color: Color) -> Stop {
        Stop { position, color }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    name: String,
    stops: Vec<Stop>,
    blend: Blend,
}

impl Palette {
    /// Build a palette, checking that it has at least one stop and that the
    /// stop positions are strictly increasing within [0, 1].
    pub fn new(name: impl Into<String>, stops: Vec<Stop>, blend: Blend) -> Result<Palette> {
        let name = name.into();
        let invalid = |reason: String| EngineError::InvalidPalette {
            name: name.clone(),
            reason,
        };

        if stops.is_empty() {
            return Err(invalid("palette has no colour stops".to_string()));
        }

        for stop in &stops {
            if !(0.0..=1.0).contains(&stop.position) {
                return Err(invalid(format!(
                    "stop position {} is outside [0, 1]",
                    stop.position
                )));
            }
        }

        for pair in stops.windows(2) {
            if pair[1].position <= pair[0].position {
                return Err(invalid(format!(
                    "stop positions must be strictly increasing ({} then {})",
                    pair[0].position, pair[1].position
                )));
            }
        }

        Ok(Palette { name, stops, blend })
    }

    /// Full hue sweep, red through violet.
    pub fn rainbow() -> Palette {
        let colors = [
            0xff0000, // red
            0xffa500, // orange
            0xffff00, // yellow
            0x008000, // green
            0x0000ff, // blue
            0x4b0082, // indigo
            0xee82ee, // violet
        ];
        let last = (colors.len() - 1) as f64;
        let stops = colors
            .iter()
            .enumerate()
            .map(|(i, hex)| Stop::new(i as f64 / last, Color::from_u32(*hex)))
            .collect();

        Palette {
            name: RAINBOW.to_string(),
            stops,
            blend: Blend::Hsv,
        }
    }

    /// Red to yellow through orange.
    pub fn fire() -> Palette {
        Palette {
            name: FIRE.to_string(),
            stops: vec![
                Stop::new(0.0, Color::from_u32(0xff0000)),
                Stop::new(0.5, Color::from_u32(0xff8800)),
                Stop::new(1.0, Color::from_u32(0xffff00)),
            ],
            blend: Blend::Rgb,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stops(&self) -> &[Stop] {
        &self.stops
    }

    pub fn blend(&self) -> Blend {
        self.blend
    }

    /// Colour at `position`, clamped to the first and last stop.
    pub fn lookup(&self, position: f64) -> Color {
        let first = self.stops[0];
        let last = self.stops[self.stops.len() - 1];

        if position.is_nan() || position <= first.position {
            return first.color;
        }
        if position >= last.position {
            return last.color;
        }

        // `position` is strictly inside (first, last), so there is a bracketing pair
        let upper = self
            .stops
            .iter()
            .position(|stop| stop.position >= position)
            .unwrap_or(self.stops.len() - 1);
        let (a, b) = (self.stops[upper - 1], self.stops[upper]);

        self.mix(a, b, (position - a.position) / (b.position - a.position))
    }

    /// Colour at `position` with the palette treated as a loop: 1.0 lands back
    /// on 0.0, and anything past the last stop blends back into the first.
    pub fn lookup_cyclic(&self, position: f64) -> Color {
        if position.is_nan() {
            return self.stops[0].color;
        }

        let position = position.rem_euclid(1.0);
        let first = self.stops[0];
        let last = self.stops[self.stops.len() - 1];

        if position >= first.position && position <= last.position {
            return self.lookup(position);
        }

        // In the wrap-around gap between the last stop and the first one
        let gap = 1.0 - last.position + first.position;
        if gap <= 0.0 {
            return first.color;
        }
        let offset = if position > last.position {
            position - last.position
        } else {
            position + 1.0 - last.position
        };

        self.mix(last, first, offset / gap)
    }

    fn mix(&self, a: Stop, b: Stop, t: f64) -> Color {
        match self.blend {
            Blend::Step => {
                if t < 0.5 {
                    a.color
                } else {
                    b.color
                }
            }
            Blend::Rgb => a.color.lerp(b.color, t),
            Blend::Hsv => a.color.lerp_hsv(b.color, t),
        }
    }
}

/// Palettes resolvable by name: the built-ins plus whatever was configured.
#[derive(Debug, Clone)]
pub struct PaletteBook {
    palettes: HashMap<String, Arc<Palette>>,
}

impl PaletteBook {
    pub fn new() -> PaletteBook {
        let mut palettes = HashMap::new();
        for palette in [Palette::rainbow(), Palette::fire()] {
            palettes.insert(palette.name().to_string(), Arc::new(palette));
        }

        PaletteBook { palettes }
    }

    /// Add a palette. Names are unique, built-ins can't be replaced.
    pub fn insert(&mut self, palette: Palette) -> Result<()> {
        if self.palettes.contains_key(palette.name()) {
            return Err(EngineError::InvalidPalette {
                name: palette.name().to_string(),
                reason: "a palette with this name already exists".to_string(),
            });
        }

        self.palettes
            .insert(palette.name().to_string(), Arc::new(palette));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Palette>> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidConfig(
                "palette name must not be empty".to_string(),
            ));
        }

        self.palettes
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownPalette(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.palettes.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for PaletteBook {
    fn default() -> Self {
        PaletteBook::new()
    }
}
