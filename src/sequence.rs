use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize, Serializer};
use tokio::time::Instant;

use crate::effect::{scramble, Effect, EffectConfig, Sample, Shade};
use crate::error::Result;

/// Identifier of a light in the host's registry. The engine only ever refers
/// to lights through these; it never owns them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LightHandle(Arc<str>);

impl LightHandle {
    pub fn new(id: &str) -> LightHandle {
        LightHandle(Arc::from(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for LightHandle {
    fn from(id: &str) -> LightHandle {
        LightHandle::new(id)
    }
}

impl fmt::Display for LightHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for LightHandle {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// One activation of an effect on a sequence.
///
/// Its start instant is phase zero. Replacing or stopping the effect drops the
/// activation; nothing is ever resumed.
#[derive(Debug)]
pub struct Activation {
    pub effect: Effect,
    pub config: EffectConfig,
    pub started: Instant,
    pub seed: u64,
    ticks: AtomicU64,
}

impl Activation {
    pub fn new(effect: Effect, config: EffectConfig, started: Instant, seed: u64) -> Activation {
        Activation {
            effect,
            config,
            started,
            seed,
            ticks: AtomicU64::new(0),
        }
    }

    pub fn elapsed_at(&self, now: Instant) -> time::Duration {
        time::Duration::try_from(now.saturating_duration_since(self.started))
            .unwrap_or(time::Duration::MAX)
    }

    pub fn elapsed(&self) -> time::Duration {
        self.elapsed_at(Instant::now())
    }

    pub fn evaluate(&self, elapsed: time::Duration, index: usize, count: usize) -> Shade {
        self.effect
            .evaluate(&Sample::new(elapsed, index, count, self.seed), &self.config)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    pub(crate) fn record_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[derive(Debug, Clone)]
pub enum SequenceState {
    Idle,
    Running(Arc<Activation>),
}

impl SequenceState {
    pub fn is_running(&self) -> bool {
        matches!(self, SequenceState::Running(_))
    }
}

/// A named, ordered group of lights. The order is the spatial order effects see.
#[derive(Debug)]
pub struct Sequence {
    name: String,
    lights: Arc<[LightHandle]>,
    state: SequenceState,
}

impl Sequence {
    pub fn new(name: impl Into<String>, lights: Vec<LightHandle>) -> Sequence {
        Sequence {
            name: name.into(),
            lights: lights.into(),
            state: SequenceState::Idle,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lights(&self) -> &Arc<[LightHandle]> {
        &self.lights
    }

    pub fn state(&self) -> &SequenceState {
        &self.state
    }

    /// Replace whatever is running with a fresh activation of `effect`.
    ///
    /// The config is checked first; on error the current state is untouched.
    pub fn start(&mut self, effect: Effect, config: EffectConfig) -> Result<Arc<Activation>> {
        let seed = activation_seed(&self.name);
        self.start_at(effect, config, Instant::now(), seed)
    }

    /// Like [`Sequence::start`] with an explicit phase zero and seed.
    pub fn start_at(
        &mut self,
        effect: Effect,
        config: EffectConfig,
        started: Instant,
        seed: u64,
    ) -> Result<Arc<Activation>> {
        config.validate()?;

        let activation = Arc::new(Activation::new(effect, config, started, seed));
        self.state = SequenceState::Running(activation.clone());

        Ok(activation)
    }

    pub fn stop(&mut self) -> bool {
        mem::replace(&mut self.state, SequenceState::Idle).is_running()
    }

    pub fn status(&self) -> SequenceStatus {
        let state = match &self.state {
            SequenceState::Idle => StateSnapshot::Idle,
            SequenceState::Running(activation) => StateSnapshot::Running {
                effect: activation.effect,
                speed: activation.config.speed,
                intensity: activation.config.intensity,
                palette: activation.config.palette.name().to_string(),
                reverse: activation.config.reverse,
                mirror: activation.config.mirror,
                elapsed: activation.elapsed().as_seconds_f64(),
                ticks: activation.ticks(),
                seed: activation.seed,
            },
        };

        SequenceStatus {
            name: self.name.clone(),
            lights: self.lights.iter().map(|l| l.to_string()).collect(),
            state,
        }
    }
}

/// Seed derived from the wall-clock start time, so two activations never
/// share a twinkle pattern unless they started at the same instant.
fn activation_seed(name: &str) -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();

    let name_hash = name
        .bytes()
        .fold(0u64, |acc, byte| scramble(acc ^ u64::from(byte)));

    scramble(now ^ name_hash)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceStatus {
    pub name: String,
    pub lights: Vec<String>,
    #[serde(flatten)]
    pub state: StateSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum StateSnapshot {
    Idle,
    Running {
        effect: Effect,
        speed: f64,
        intensity: f64,
        palette: String,
        reverse: bool,
        mirror: bool,
        /// Seconds since the activation started
        elapsed: f64,
        ticks: u64,
        seed: u64,
    },
}
