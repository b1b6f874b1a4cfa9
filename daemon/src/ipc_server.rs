use anyhow::Result;
use common::{Command, PlayerError, PlayerStatus, Response, ZoneId};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;

use crate::DaemonState;
use crate::zone::ZoneController;

pub async fn start(state: Arc<Mutex<DaemonState>>) -> Result<()> {
    let socket_path = common::get_socket_path();

    // Remove old socket if it exists
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)?;
    }

    let listener = UnixListener::bind(&socket_path)?;
    log::info!("IPC server listening on: {}", socket_path.display());

    loop {
        if state.lock().await.should_exit {
            break;
        }

        // Accept with a timeout so the exit flag is polled
        let accept_result =
            tokio::time::timeout(std::time::Duration::from_millis(100), listener.accept()).await;

        match accept_result {
            Ok(Ok((stream, _addr))) => {
                let state = state.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, state).await {
                        log::error!("Error handling client: {}", e);
                    }
                });
            }
            Ok(Err(e)) => {
                log::error!("Error accepting connection: {}", e);
            }
            Err(_) => continue,
        }
    }

    let _ = std::fs::remove_file(&socket_path);
    log::info!("IPC server stopped");
    Ok(())
}

async fn handle_client(stream: UnixStream, state: Arc<Mutex<DaemonState>>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let response = match serde_json::from_str::<Command>(&line) {
            Ok(command) => handle_command(command, &state).await,
            Err(e) => {
                log::warn!("Invalid command: {}", e);
                Response::Error(PlayerError::Ipc(format!("Invalid command: {}", e)))
            }
        };

        let response_json = serde_json::to_string(&response)?;
        writer.write_all(response_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        line.clear();
    }

    Ok(())
}

async fn handle_command(command: Command, state: &Arc<Mutex<DaemonState>>) -> Response {
    log::debug!("Handling command: {:?}", command);

    match command {
        Command::Ping => Response::Pong,

        Command::Status => {
            let state = state.lock().await;
            Response::Status(PlayerStatus {
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: state.uptime_secs(),
                zones: state.zones.iter().map(ZoneController::status).collect(),
                optimizer: state.optimizer.status(),
            })
        }

        Command::Play { zone } => {
            log::info!("Play requested for {}", describe(zone));
            for_zones(state, zone, ZoneController::play).await
        }

        Command::Stop { zone } => {
            log::info!("Stop requested for {}", describe(zone));
            for_zones(state, zone, ZoneController::stop).await
        }

        Command::Next { zone } => for_zones(state, zone, ZoneController::next).await,

        Command::Previous { zone } => for_zones(state, zone, ZoneController::previous).await,

        Command::Rescan => {
            let changed = DaemonState::rescan(state).await;
            log::info!("Rescan reloaded {} zone(s)", changed.len());
            Response::Ok
        }

        Command::Optimize => {
            let mut state = state.lock().await;
            if state.optimizer.start() {
                Response::Ok
            } else {
                Response::Error(PlayerError::Optimizer(
                    "Optimization already running".to_string(),
                ))
            }
        }

        Command::CancelOptimize => {
            let mut state = state.lock().await;
            state.optimizer.cancel().await;
            Response::Ok
        }

        Command::Kill => {
            log::info!("Received kill command");
            state.lock().await.should_exit = true;
            Response::Ok
        }
    }
}

/// Apply `action` to one zone, or to every zone when `zone` is `None`
async fn for_zones(
    state: &Arc<Mutex<DaemonState>>,
    zone: Option<ZoneId>,
    action: fn(&ZoneController) -> Result<()>,
) -> Response {
    let state = state.lock().await;
    let targets: Vec<&ZoneController> = state
        .zones
        .iter()
        .filter(|c| zone.is_none_or(|z| c.zone() == z))
        .collect();

    if targets.is_empty() {
        return Response::Error(PlayerError::NotFound(format!(
            "Zone not running: {}",
            describe(zone)
        )));
    }

    for controller in targets {
        if let Err(e) = action(controller) {
            return Response::Error(PlayerError::Playback(e.to_string()));
        }
    }

    Response::Ok
}

fn describe(zone: Option<ZoneId>) -> String {
    zone.map_or_else(|| "all zones".to_string(), |z| z.to_string())
}
