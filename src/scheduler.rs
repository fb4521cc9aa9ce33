//! The effect engine
//!
//! [`Engine`] owns every [`Sequence`] and one driver task per running
//! sequence. Control calls take the registry lock, validate everything up
//! front and only then swap state, so a refused request never leaves a trace.
//! Drivers never touch the registry: each one holds its own activation and
//! light list, and is halted (and awaited) before its sequence changes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::color::PaletteBook;
use crate::dispatch::{DispatchStats, Dispatcher};
use crate::effect::{Effect, EffectRequest};
use crate::error::{EngineError, Result};
use crate::gateway::LightCommand;
use crate::sequence::{Activation, LightHandle, Sequence, SequenceStatus};

pub const DEFAULT_UPDATE_FREQUENCY: f64 = 20.0;
pub const DEFAULT_TRANSITION: Duration = Duration::from_millis(100);

/// How often each driver logs its tick statistics
const REPORT_PERIOD: Duration = Duration::from_secs(5);
/// How long shutdown and reload wait for in-flight commands
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub tick: Duration,
    pub transition: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            tick: Duration::from_secs_f64(1.0 / DEFAULT_UPDATE_FREQUENCY),
            transition: DEFAULT_TRANSITION,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SequenceDefinition {
    pub name: String,
    pub lights: Vec<LightHandle>,
    /// Started by [`Engine::start_defaults`], if set
    pub default_effect: Option<String>,
    pub defaults: EffectRequest,
}

/// Everything the engine is built from; replaced whole on reload.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub settings: EngineSettings,
    pub palettes: PaletteBook,
    pub sequences: Vec<SequenceDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listing {
    pub effects: Vec<String>,
    pub palettes: Vec<String>,
    pub sequences: Vec<String>,
}

struct Driver {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl Driver {
    /// Stop the loop and wait for it, so no further tick can start.
    async fn halt(self, name: &str) {
        // The loop may already be gone if it panicked
        let _ = self.stop.send(());

        if let Err(e) = self.handle.await {
            log::error!("Driver for sequence {} failed: {}", name, e);
        }
    }
}

struct Slot {
    sequence: Sequence,
    default_effect: Option<String>,
    defaults: EffectRequest,
    driver: Option<Driver>,
}

struct Registry {
    settings: EngineSettings,
    palettes: PaletteBook,
    slots: BTreeMap<String, Slot>,
}

impl Registry {
    fn build(config: EngineConfig) -> Result<Registry> {
        if config.settings.tick.is_zero() {
            return Err(EngineError::InvalidConfig(
                "update frequency must be positive".to_string(),
            ));
        }

        let mut slots = BTreeMap::new();
        for definition in config.sequences {
            if definition.name.trim().is_empty() {
                return Err(EngineError::InvalidConfig(
                    "sequence name must not be empty".to_string(),
                ));
            }
            if slots.contains_key(&definition.name) {
                return Err(EngineError::InvalidConfig(format!(
                    "sequence {} is defined twice",
                    definition.name
                )));
            }

            let slot = Slot {
                sequence: Sequence::new(definition.name.clone(), definition.lights),
                default_effect: definition.default_effect,
                defaults: definition.defaults,
                driver: None,
            };
            slots.insert(definition.name, slot);
        }

        Ok(Registry {
            settings: config.settings,
            palettes: config.palettes,
            slots,
        })
    }

    fn slot_mut(&mut self, name: &str) -> Result<&mut Slot> {
        self.slots
            .get_mut(name)
            .ok_or_else(|| EngineError::UnknownSequence(name.to_string()))
    }
}

pub struct Engine {
    registry: Mutex<Registry>,
    dispatcher: Arc<Dispatcher>,
}

impl Engine {
    pub fn new(config: EngineConfig, dispatcher: Arc<Dispatcher>) -> Result<Engine> {
        Ok(Engine {
            registry: Mutex::new(Registry::build(config)?),
            dispatcher,
        })
    }

    pub async fn start_effect(&self, sequence: &str, effect: &str, request: &EffectRequest) -> Result<()> {
        let mut registry = self.registry.lock().await;
        self.start_locked(&mut registry, sequence, effect, request).await
    }

    async fn start_locked(
        &self,
        registry: &mut Registry,
        name: &str,
        effect: &str,
        request: &EffectRequest,
    ) -> Result<()> {
        let settings = registry.settings;
        if !registry.slots.contains_key(name) {
            return Err(EngineError::UnknownSequence(name.to_string()));
        }
        let effect: Effect = effect.parse()?;
        let config = request.resolve(&registry.palettes)?;

        let slot = registry.slot_mut(name)?;
        let superseded = slot.sequence.state().is_running();
        let activation = slot.sequence.start(effect, config)?;

        if let Some(driver) = slot.driver.take() {
            driver.halt(name).await;
        }

        if superseded {
            log::info!("Sequence {} switched to {}", name, effect);
        } else {
            log::info!("Sequence {} started {}", name, effect);
        }

        slot.driver = Some(self.spawn_driver(
            name.to_string(),
            slot.sequence.lights().clone(),
            activation,
            settings,
        ));

        Ok(())
    }

    fn spawn_driver(
        &self,
        name: String,
        lights: Arc<[LightHandle]>,
        activation: Arc<Activation>,
        settings: EngineSettings,
    ) -> Driver {
        let (stop, stopped) = oneshot::channel();
        let dispatcher = self.dispatcher.clone();

        let handle = tokio::spawn(drive(name, lights, activation, dispatcher, settings, stopped));

        Driver { stop, handle }
    }

    /// Return `sequence` to idle and switch its lights off. Stopping an idle
    /// sequence does nothing.
    pub async fn stop_effect(&self, sequence: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        self.stop_locked(&mut registry, sequence).await
    }

    async fn stop_locked(&self, registry: &mut Registry, name: &str) -> Result<()> {
        let transition = registry.settings.transition;
        let slot = registry.slot_mut(name)?;

        if let Some(driver) = slot.driver.take() {
            driver.halt(name).await;
        }

        if slot.sequence.stop() {
            log::info!("Sequence {} stopped", name);

            for light in slot.sequence.lights().iter() {
                self.dispatcher
                    .deliver(LightCommand::off(light.clone(), transition))
                    .await;
            }
        }

        Ok(())
    }

    pub async fn status(&self, sequence: Option<&str>) -> Result<Vec<SequenceStatus>> {
        let registry = self.registry.lock().await;

        match sequence {
            Some(name) => registry
                .slots
                .get(name)
                .map(|slot| vec![slot.sequence.status()])
                .ok_or_else(|| EngineError::UnknownSequence(name.to_string())),
            None => Ok(registry
                .slots
                .values()
                .map(|slot| slot.sequence.status())
                .collect()),
        }
    }

    pub async fn list(&self) -> Listing {
        let registry = self.registry.lock().await;

        Listing {
            effects: Effect::ALL.iter().map(|e| e.as_str().to_string()).collect(),
            palettes: registry.palettes.names(),
            sequences: registry.slots.keys().cloned().collect(),
        }
    }

    /// Start every configured default effect. Returns how many started; the
    /// rest are logged and left idle.
    pub async fn start_defaults(&self) -> usize {
        let mut registry = self.registry.lock().await;
        self.start_defaults_locked(&mut registry).await
    }

    async fn start_defaults_locked(&self, registry: &mut Registry) -> usize {
        let defaults: Vec<(String, String, EffectRequest)> = registry
            .slots
            .iter()
            .filter_map(|(name, slot)| {
                slot.default_effect
                    .as_ref()
                    .map(|effect| (name.clone(), effect.clone(), slot.defaults.clone()))
            })
            .collect();

        let mut started = 0;
        for (name, effect, request) in defaults {
            match self.start_locked(registry, &name, &effect, &request).await {
                Ok(()) => started += 1,
                Err(e) => log::warn!("Default effect for sequence {} not started: {}", name, e),
            }
        }

        started
    }

    async fn stop_all_locked(&self, registry: &mut Registry) {
        let names: Vec<String> = registry.slots.keys().cloned().collect();
        for name in names {
            if let Err(e) = self.stop_locked(registry, &name).await {
                log::error!("Failed to stop sequence {}: {}", name, e);
            }
        }
    }

    /// Stop everything, switch all lights off and wait for the commands to go out.
    pub async fn shutdown(&self) {
        log::info!("Shutting down effect engine");

        {
            let mut registry = self.registry.lock().await;
            self.stop_all_locked(&mut registry).await;
        }

        if !self.dispatcher.flush(DRAIN_TIMEOUT).await {
            log::warn!("Gave up waiting for in-flight light commands");
        }

        let stats = self.dispatcher.stats();
        log::info!(
            "Dispatch stats [sent: {}, failed: {}, dropped: {}]",
            stats.sent,
            stats.failed,
            stats.dropped
        );
    }

    /// Replace palettes and sequences. Everything is stopped before the old
    /// sequences go away; an invalid config is refused with nothing stopped.
    pub async fn reload(&self, config: EngineConfig) -> Result<usize> {
        let rebuilt = Registry::build(config)?;

        let mut registry = self.registry.lock().await;
        log::info!("Reloading effect engine");

        self.stop_all_locked(&mut registry).await;
        if !self.dispatcher.flush(DRAIN_TIMEOUT).await {
            log::warn!("Gave up waiting for in-flight light commands");
        }

        *registry = rebuilt;
        Ok(self.start_defaults_locked(&mut registry).await)
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub async fn flush(&self, timeout: Duration) -> bool {
        self.dispatcher.flush(timeout).await
    }
}

/// Per-sequence tick loop. Runs until `stopped` fires or its sender is dropped.
async fn drive(
    name: String,
    lights: Arc<[LightHandle]>,
    activation: Arc<Activation>,
    dispatcher: Arc<Dispatcher>,
    settings: EngineSettings,
    mut stopped: oneshot::Receiver<()>,
) {
    let count = lights.len();

    let mut interval = tokio::time::interval(settings.tick);
    // A late tick is simply skipped, frames are recomputed from the clock anyway
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut report_start = Instant::now();
    let mut report_sum = Duration::ZERO;
    let mut report_n = 0u32;

    log::debug!("Driver for sequence {} running {}", name, activation.effect);

    loop {
        tokio::select! {
            biased;

            _ = &mut stopped => break,
            _ = interval.tick() => {
                let tick_start = Instant::now();
                let deadline = tick_start + settings.tick;
                let elapsed = activation.elapsed_at(tick_start);

                // Rotate the start so a saturated dispatcher doesn't starve the same lights
                let first = (activation.ticks() as usize) % count.max(1);
                for index in (first..count).chain(0..first) {
                    let shade = activation.evaluate(elapsed, index, count);
                    let command = LightCommand::new(lights[index].clone(), shade, settings.transition);
                    dispatcher.dispatch_by(command, deadline).await;
                }

                let ticks = activation.record_tick();

                report_sum += tick_start.elapsed();
                report_n += 1;

                if report_start.elapsed() > REPORT_PERIOD {
                    log::debug!(
                        "Sequence {} stats [ticks: {}, ticks in report: {}, avg tick time in ms: {:.3}]",
                        name,
                        ticks,
                        report_n,
                        report_sum.as_secs_f64() * 1000.0 / f64::from(report_n)
                    );
                    report_start = Instant::now();
                    report_sum = Duration::ZERO;
                    report_n = 0;
                }
            }
        }
    }

    log::debug!("Driver for sequence {} stopped after {} ticks", name, activation.ticks());
}
