//! Animated lighting effects over groups of lights.
//!
//! An [`Engine`] runs one driver per active [`Sequence`], evaluates the
//! sequence's [`Effect`] for every light on each tick and hands the results to
//! a [`LightGateway`] through a bounded, fire-and-forget [`Dispatcher`].

pub mod color;
pub mod config;
pub mod dispatch;
pub mod effect;
pub mod error;
pub mod gateway;
pub mod lights;
pub mod protocol;
pub mod scheduler;
pub mod sequence;
pub mod server;

pub use color::{Color, Palette, PaletteBook};
pub use dispatch::Dispatcher;
pub use effect::{Effect, EffectConfig, EffectRequest, Shade};
pub use error::EngineError;
pub use gateway::{ChannelGateway, LightCommand, LightGateway};
pub use scheduler::{Engine, EngineConfig, EngineSettings, SequenceDefinition};
pub use sequence::{LightHandle, Sequence, SequenceStatus};
