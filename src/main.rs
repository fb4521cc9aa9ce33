use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::LevelFilter;
use simple_logger::SimpleLogger;
use tokio::net::TcpListener;
use tokio::runtime::Runtime;

use light_fx::config::{Settings, DEFAULT_CONFIG_PATH};
use light_fx::{lights, server, ChannelGateway, Dispatcher, Engine};

/// Commands buffered between the dispatcher and the light output
const LIGHTS_BUFFER: usize = 256;

/// Animated lighting effects
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Options file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// One of off, error, warn, info, debug, trace
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level: LevelFilter = cli
        .log_level
        .parse()
        .map_err(|_| anyhow!("Unknown log level {}", cli.log_level))?;
    SimpleLogger::new()
        .with_level(level)
        .init()
        .map_err(|e| anyhow!("Failed to start logger: {}", e))?;

    let settings = Settings::load(&cli.config)?;

    let rt = Runtime::new().context("Failed to start runtime")?;
    let result = rt.block_on(run(settings, &cli.config));

    // Connection tasks may still hold the engine
    rt.shutdown_timeout(Duration::from_secs(1));

    result
}

async fn run(settings: Settings, path: &Path) -> Result<()> {
    let (gateway, lights_rx) = ChannelGateway::channel(LIGHTS_BUFFER);
    let lights = lights::start(lights_rx);

    let dispatcher = Dispatcher::new(
        Arc::new(gateway),
        settings.max_in_flight,
        settings.dispatch_timeout()?,
    );
    let engine = Arc::new(Engine::new(settings.engine_config()?, Arc::new(dispatcher))?);

    let started = engine.start_defaults().await;
    log::info!("Started {} default effects", started);

    let listener = TcpListener::bind(&settings.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", settings.listen))?;

    let mut reload = ReloadSignal::new()?;
    let server = server::serve(listener, engine.clone());
    tokio::pin!(server);

    let result = loop {
        tokio::select! {
            result = &mut server => break result,
            result = tokio::signal::ctrl_c() => {
                break result.context("Failed to listen for Ctrl-C").map(|()| {
                    log::info!("Received Ctrl-C");
                });
            }
            Some(()) = reload.recv() => reload_config(&engine, path).await,
        }
    };

    engine.shutdown().await;
    drop(engine);

    match tokio::time::timeout(Duration::from_millis(500), lights).await {
        Ok(Ok(Err(e))) => log::error!("Lights failed: {:#}", e),
        Ok(Err(e)) => log::error!("Lights task failed: {}", e),
        Ok(Ok(Ok(()))) | Err(_) => {}
    }

    result
}

async fn reload_config(engine: &Engine, path: &Path) {
    log::info!("Reloading config from {}", path.display());

    let config = Settings::load(path).and_then(|settings| Ok(settings.engine_config()?));

    match config {
        Ok(config) => match engine.reload(config).await {
            Ok(started) => log::info!("Reloaded, {} default effects started", started),
            Err(e) => log::error!("Reload refused: {}", e),
        },
        Err(e) => log::error!("Keeping the current config: {:#}", e),
    }
}

#[cfg(unix)]
struct ReloadSignal(tokio::signal::unix::Signal);

#[cfg(unix)]
impl ReloadSignal {
    fn new() -> Result<ReloadSignal> {
        use tokio::signal::unix::{signal, SignalKind};

        let hangup = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;
        Ok(ReloadSignal(hangup))
    }

    async fn recv(&mut self) -> Option<()> {
        self.0.recv().await
    }
}

/// No SIGHUP here, so reloads never fire
#[cfg(not(unix))]
struct ReloadSignal;

#[cfg(not(unix))]
impl ReloadSignal {
    fn new() -> Result<ReloadSignal> {
        Ok(ReloadSignal)
    }

    async fn recv(&mut self) -> Option<()> {
        futures::future::pending().await
    }
}
