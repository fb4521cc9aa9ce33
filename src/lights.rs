use std::collections::HashMap;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::color::Color;
use crate::gateway::LightCommand;
use crate::sequence::LightHandle;

/// Simulated light output: applies every command to an in-memory view of the
/// lights and logs the traffic.
pub fn start(mut rx: mpsc::Receiver<LightCommand>) -> JoinHandle<Result<()>> {
    tokio::task::spawn_blocking(move || {
        log::info!("Starting Lights");

        let mut lights: HashMap<LightHandle, (Color, u8)> = HashMap::new();
        let mut received = 0u64;

        log::trace!("Entering main loop");

        while let Some(command) = rx.blocking_recv() {
            log::trace!(
                "Setting {} to {} at {} over {:?}",
                command.light,
                command.color,
                command.brightness,
                command.transition
            );
            received += 1;

            let previous = lights.insert(command.light.clone(), (command.color, command.brightness));
            let was_on = previous.map_or(false, |(_, brightness)| brightness > 0);

            if was_on && command.is_off() {
                log::debug!("Light {} switched off", command.light);
            } else if !was_on && !command.is_off() {
                log::debug!("Light {} switched on", command.light);
            }
        }

        log::info!(
            "Lights stopping [commands received: {}, lights seen: {}, still lit: {}]",
            received,
            lights.len(),
            lights.values().filter(|(_, brightness)| *brightness > 0).count()
        );

        Ok(())
    })
}
