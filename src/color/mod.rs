pub mod palette;

use std::fmt;
use std::str::FromStr;

use ::palette::{FromColor, Hsv, Srgb};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub use self::palette::{Blend, Palette, PaletteBook, Stop};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

pub const OFF: Color = Color { r: 0, g: 0, b: 0 };

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Invalid colour {0:?}, expected #rrggbb")]
pub struct ParseColorError(String);

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Color {
        Color { r, g, b }
    }

    pub const fn from_u32(hex: u32) -> Color {
        Color {
            r: (hex >> 16) as u8,
            g: (hex >> 8) as u8,
            b: hex as u8,
        }
    }

    /// HSV value of the colour, i.e. its brightest channel.
    pub fn brightness(self) -> u8 {
        self.r.max(self.g).max(self.b)
    }

    /// Per-channel linear interpolation, `t` clamped to [0, 1].
    pub fn lerp(self, other: Color, t: f64) -> Color {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * t).round() as u8;

        Color {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
        }
    }

    /// Interpolation in HSV space, taking the short way around the hue circle.
    pub fn lerp_hsv(self, other: Color, t: f64) -> Color {
        let t = t.clamp(0.0, 1.0) as f32;
        let from = to_hsv(self);
        let to = to_hsv(other);

        let mut h1 = from.hue.into_positive_degrees();
        let mut h2 = to.hue.into_positive_degrees();

        // Greys have no meaningful hue, borrow the other end's
        if from.saturation == 0.0 || from.value == 0.0 {
            h1 = h2;
        }
        if to.saturation == 0.0 || to.value == 0.0 {
            h2 = h1;
        }

        let mut delta = h2 - h1;
        if delta > 180.0 {
            delta -= 360.0;
        } else if delta < -180.0 {
            delta += 360.0;
        }

        let hue = (h1 + delta * t).rem_euclid(360.0);
        let saturation = from.saturation + (to.saturation - from.saturation) * t;
        let value = from.value + (to.value - from.value) * t;

        let hsv: Hsv = Hsv::new(hue, saturation, value);
        let rgb: Srgb = Srgb::from_color(hsv);
        let rgb: Srgb<u8> = rgb.into_format();

        Color {
            r: rgb.red,
            g: rgb.green,
            b: rgb.blue,
        }
    }
}

fn to_hsv(color: Color) -> Hsv {
    let rgb: Srgb = Srgb::new(color.r, color.g, color.b).into_format();
    Hsv::from_color(rgb)
}

impl FromStr for Color {
    type Err = ParseColorError;

    fn from_str(s: &str) -> Result<Color, ParseColorError> {
        let digits = s.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseColorError(s.to_string()));
        }

        u32::from_str_radix(digits, 16)
            .map(Color::from_u32)
            .map_err(|_| ParseColorError(s.to_string()))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

struct HexColor;

impl<'de> Visitor<'de> for HexColor {
    type Value = Color;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "a hex colour string such as #ff8800")
    }

    fn visit_str<E>(self, v: &str) -> Result<Color, E>
    where
        E: de::Error,
    {
        v.parse().map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Color, D::Error> {
        deserializer.deserialize_str(HexColor)
    }
}
