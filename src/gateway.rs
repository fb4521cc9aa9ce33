use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::mpsc;

use crate::color::{Color, OFF};
use crate::effect::Shade;
use crate::error::EngineError;
use crate::sequence::LightHandle;

/// One `set_light` call: drive `light` to `color` at `brightness`, fading over
/// `transition`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LightCommand {
    pub light: LightHandle,
    pub color: Color,
    pub brightness: u8,
    pub transition: Duration,
}

impl LightCommand {
    pub fn new(light: LightHandle, shade: Shade, transition: Duration) -> LightCommand {
        LightCommand {
            light,
            color: shade.color,
            brightness: shade.brightness,
            transition,
        }
    }

    /// Black at zero brightness
    pub fn off(light: LightHandle, transition: Duration) -> LightCommand {
        LightCommand {
            light,
            color: OFF,
            brightness: 0,
            transition,
        }
    }

    pub fn is_off(&self) -> bool {
        self.brightness == 0
    }
}

/// Whatever actually commands lights. Calls may be slow; the engine bounds
/// them with its own timeout and never retries beyond the next tick.
pub trait LightGateway: Send + Sync {
    fn set_light(&self, command: LightCommand) -> BoxFuture<'static, Result<(), EngineError>>;
}

/// Forwards commands into a channel, e.g. to the output task in [`crate::lights`].
#[derive(Debug, Clone)]
pub struct ChannelGateway {
    tx: mpsc::Sender<LightCommand>,
}

impl ChannelGateway {
    pub fn new(tx: mpsc::Sender<LightCommand>) -> ChannelGateway {
        ChannelGateway { tx }
    }

    pub fn channel(buffer: usize) -> (ChannelGateway, mpsc::Receiver<LightCommand>) {
        let (tx, rx) = mpsc::channel(buffer);
        (ChannelGateway::new(tx), rx)
    }
}

impl LightGateway for ChannelGateway {
    fn set_light(&self, command: LightCommand) -> BoxFuture<'static, Result<(), EngineError>> {
        let tx = self.tx.clone();

        async move {
            let light = command.light.to_string();
            tx.send(command)
                .await
                .map_err(|_| EngineError::DispatchFailure {
                    light,
                    reason: "light output has shut down".to_string(),
                })
        }
        .boxed()
    }
}
