use std::sync::Arc;

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use crate::protocol::{ControlCodec, Request, Response};
use crate::scheduler::Engine;

/// Accept control connections until the listener fails.
pub async fn serve(listener: TcpListener, engine: Arc<Engine>) -> Result<()> {
    log::info!(
        "Control endpoint listening on {}",
        listener.local_addr().context("Control listener has no address")?
    );

    loop {
        let (socket, peer) = listener
            .accept()
            .await
            .context("Error accepting control connection")?;
        log::debug!("Control connection from {}", peer);

        let engine = engine.clone();
        tokio::spawn(async move {
            match handle(socket, engine).await {
                Ok(()) => log::debug!("Control connection from {} closed", peer),
                Err(e) => log::warn!("Dropping control connection from {}: {:#}", peer, e),
            }
        });
    }
}

async fn handle(socket: TcpStream, engine: Arc<Engine>) -> Result<()> {
    let mut framed = Framed::new(socket, ControlCodec::new());

    while let Some(item) = framed.next().await {
        let response = match item.context("Error reading control request")? {
            Ok(request) => respond(&engine, request).await,
            Err(e) => {
                log::debug!("Rejecting malformed control request: {}", e);
                Response::invalid_request(e.to_string())
            }
        };

        framed
            .send(response)
            .await
            .context("Error writing control response")?;
    }

    Ok(())
}

/// Run one request against the engine.
pub async fn respond(engine: &Engine, request: Request) -> Response {
    let result = match request {
        Request::StartEffect {
            sequence,
            effect,
            config,
        } => engine
            .start_effect(&sequence, &effect, &config)
            .await
            .map(|()| Response::Ok),
        Request::StopEffect { sequence } => engine.stop_effect(&sequence).await.map(|()| Response::Ok),
        Request::Status { sequence } => engine
            .status(sequence.as_deref())
            .await
            .map(|sequences| Response::Status { sequences }),
        Request::List => Ok(Response::List(engine.list().await)),
    };

    result.unwrap_or_else(Response::from)
}
