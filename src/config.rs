use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::color::palette::RAINBOW;
use crate::color::{Blend, Palette, PaletteBook, Stop};
use crate::effect::{EffectRequest, DEFAULT_INTENSITY, DEFAULT_SPEED};
use crate::error::EngineError;
use crate::scheduler::{EngineConfig, EngineSettings, SequenceDefinition, DEFAULT_UPDATE_FREQUENCY};

pub const DEFAULT_CONFIG_PATH: &str = "/data/options.json";
pub const DEFAULT_LISTEN: &str = "127.0.0.1:8765";
pub const DEFAULT_MAX_IN_FLIGHT: u32 = 64;

/// The options file. Keys we don't know about are ignored since the host
/// keeps its own settings in the same file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Ticks per second
    pub update_frequency: f64,
    /// Seconds each command fades over
    pub default_transition: f64,
    /// Seconds a light gets to answer, one tick if unset
    pub dispatch_timeout: Option<f64>,
    pub max_in_flight: u32,
    pub listen: String,
    pub palettes: Vec<PaletteSettings>,
    pub sequences: Vec<SequenceSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            update_frequency: DEFAULT_UPDATE_FREQUENCY,
            default_transition: 0.1,
            dispatch_timeout: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            listen: DEFAULT_LISTEN.to_string(),
            palettes: Vec::new(),
            sequences: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaletteSettings {
    pub name: String,
    #[serde(default)]
    pub blend: Blend,
    pub stops: Vec<Stop>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SequenceSettings {
    pub name: String,
    pub lights: Vec<String>,
    #[serde(default)]
    pub default_effect: Option<String>,
    #[serde(default = "default_speed")]
    pub default_speed: f64,
    #[serde(default = "default_palette")]
    pub default_palette: String,
    #[serde(default = "default_intensity")]
    pub default_intensity: f64,
}

fn default_speed() -> f64 {
    DEFAULT_SPEED
}

fn default_palette() -> String {
    RAINBOW.to_string()
}

fn default_intensity() -> f64 {
    DEFAULT_INTENSITY
}

fn seconds(what: &str, value: f64) -> crate::error::Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|e| EngineError::InvalidConfig(format!("{} of {} seconds: {}", what, value, e)))
}

impl Settings {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Settings> {
        let path = path.as_ref();

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Error reading config file {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&text)
            .with_context(|| format!("Error parsing config file {}", path.display()))?;

        settings
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;

        Ok(settings)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if !self.update_frequency.is_finite() || self.update_frequency <= 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "update_frequency must be positive, got {}",
                self.update_frequency
            )));
        }
        self.tick()?;

        if !self.default_transition.is_finite() || self.default_transition < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "default_transition must not be negative, got {}",
                self.default_transition
            )));
        }
        self.dispatch_timeout()?;

        if self.max_in_flight == 0 {
            return Err(EngineError::InvalidConfig(
                "max_in_flight must be at least 1".to_string(),
            ));
        }

        let mut names = HashSet::new();
        for sequence in &self.sequences {
            if sequence.name.trim().is_empty() {
                return Err(EngineError::InvalidConfig(
                    "sequence name must not be empty".to_string(),
                ));
            }
            if !names.insert(sequence.name.as_str()) {
                return Err(EngineError::InvalidConfig(format!(
                    "sequence {} is defined twice",
                    sequence.name
                )));
            }
        }

        self.palette_book()?;

        Ok(())
    }

    pub fn tick(&self) -> crate::error::Result<Duration> {
        seconds("tick period", 1.0 / self.update_frequency)
    }

    pub fn transition(&self) -> crate::error::Result<Duration> {
        seconds("default_transition", self.default_transition)
    }

    pub fn dispatch_timeout(&self) -> crate::error::Result<Duration> {
        match self.dispatch_timeout {
            Some(timeout) if timeout > 0.0 => seconds("dispatch_timeout", timeout),
            Some(timeout) => Err(EngineError::InvalidConfig(format!(
                "dispatch_timeout must be positive, got {}",
                timeout
            ))),
            None => self.tick(),
        }
    }

    /// Built-ins plus the configured palettes.
    pub fn palette_book(&self) -> crate::error::Result<PaletteBook> {
        let mut book = PaletteBook::new();
        for palette in &self.palettes {
            book.insert(Palette::new(
                palette.name.clone(),
                palette.stops.clone(),
                palette.blend,
            )?)?;
        }

        Ok(book)
    }

    pub fn engine_config(&self) -> crate::error::Result<EngineConfig> {
        let settings = EngineSettings {
            tick: self.tick()?,
            transition: self.transition()?,
        };

        let sequences = self
            .sequences
            .iter()
            .map(|sequence| SequenceDefinition {
                name: sequence.name.clone(),
                lights: sequence.lights.iter().map(|l| l.as_str().into()).collect(),
                default_effect: sequence.default_effect.clone(),
                defaults: EffectRequest {
                    speed: sequence.default_speed,
                    intensity: sequence.default_intensity,
                    palette_name: sequence.default_palette.clone(),
                    ..EffectRequest::default()
                },
            })
            .collect();

        Ok(EngineConfig {
            settings,
            palettes: self.palette_book()?,
            sequences,
        })
    }
}
