mod backend;
mod config;
mod ipc_server;
mod macros;
mod optimized;
mod optimizer;
mod pid_lock;
mod playlist;
mod surface;
mod zone;

use anyhow::Result;
use clap::Parser;
use common::ZoneId;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};

use crate::backend::DecodeHints;
use crate::config::Config;
use crate::optimized::OptimizedNaming;
use crate::optimizer::{OptimizerEvent, OptimizerSettings, VideoOptimizer};
use crate::pid_lock::{PidLock, PidLockError};
use crate::playlist::PlaylistService;
use crate::surface::{HeadlessSurfaceProvider, SurfaceProvider};
use crate::zone::{PlayerEvent, PlayerSettings, ZoneController, ZoneMessage};

#[derive(Parser, Debug)]
#[command(name = "nctv-player")]
#[command(about = "Four-zone digital signage player", long_about = None)]
#[command(version)]
struct Args {
    /// Start playback immediately, regardless of config
    #[arg(long)]
    kiosk: bool,

    /// Skip the video optimization pass at startup
    #[arg(long)]
    no_optimize: bool,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Playlist root directory (overrides paths.playlist_root)
    #[arg(long, value_name = "DIR")]
    playlist: Option<PathBuf>,

    /// Configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before the logger so its log level can apply
    let config_path = Config::locate(args.config.as_deref());
    let loaded = config_path
        .as_ref()
        .map_err(|e| anyhow::anyhow!("{:#}", e))
        .and_then(|path| Config::load_from_path(path));

    let level = if args.debug {
        "debug".to_string()
    } else {
        loaded
            .as_ref()
            .map(|c| c.general.log_level.clone())
            .unwrap_or_else(|_| "info".to_string())
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    log::info!("Starting NCTV Player v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match (loaded, &config_path) {
        (Ok(cfg), Ok(path)) => {
            log::info!("✓ Configuration: {}", path.display());
            cfg
        }
        (Ok(cfg), Err(_)) => cfg,
        (Err(e), _) => {
            log::warn!("Failed to load config: {:#}. Using defaults.", e);
            Config::default()
        }
    };

    if let Some(dir) = args.playlist {
        config.paths.playlist_root = dir.to_string_lossy().into_owned();
    }
    let kiosk = args.kiosk || config.general.kiosk;

    log::info!(
        "  Target resolution: {}x{} (overlay at >= {}px)",
        config.display.target_width,
        config.display.target_height,
        config.display.high_res_threshold
    );
    log::info!("  Kiosk mode: {}", if kiosk { "yes" } else { "no" });

    let mut pid_lock = match PidLock::acquire(config.pid_file()) {
        Ok(lock) => lock,
        Err(PidLockError::AlreadyRunning(pid)) => {
            log::error!("NCTV Player is already running (pid {})", pid);
            std::process::exit(1);
        }
    };
    log::info!("  PID file: {}", pid_lock.path().display());

    let naming = OptimizedNaming::new(config.optimization.suffix.clone());
    log::info!("  Optimized suffix: {}", naming.suffix());
    let mut playlists = PlaylistService::new(config.playlist_root(), naming);
    playlists.scan_all();
    log::info!("  Playlist root: {}", playlists.root().display());
    for zone in ZoneId::ALL {
        log::info!("    - {}: {} item(s)", zone, playlists.files_for(zone).len());
    }

    let surfaces: Arc<dyn SurfaceProvider> = Arc::new(HeadlessSurfaceProvider);
    let (player_tx, player_rx) = mpsc::unbounded_channel();
    tokio::spawn(log_player_events(player_rx));

    let mut zones = Vec::with_capacity(ZoneId::ALL.len());
    for zone in ZoneId::ALL {
        match spawn_zone(zone, &config, &playlists, surfaces.clone(), player_tx.clone(), kiosk)
        {
            Ok(controller) => zones.push(controller),
            Err(e) => log::error!("[{}] Failed to start zone: {:#}", zone, e),
        }
    }

    let (optimizer_tx, optimizer_rx) = mpsc::unbounded_channel();
    let optimizer = VideoOptimizer::new(
        OptimizerSettings::from_config(&config, playlists.zone_dirs()),
        optimizer_tx,
    );

    let skip_optimize = args.no_optimize || !config.optimization.enabled;

    let state = Arc::new(Mutex::new(DaemonState {
        should_exit: false,
        start_time: std::time::Instant::now(),
        kiosk,
        playlists,
        zones,
        optimizer,
    }));

    tokio::spawn(handle_optimizer_events(state.clone(), optimizer_rx));

    if skip_optimize {
        log::info!("Video optimization skipped at startup");
    } else {
        state.lock().await.optimizer.start();
    }

    let ipc_state = state.clone();
    let ipc_handle = tokio::spawn(async move {
        if let Err(e) = ipc_server::start(ipc_state).await {
            log::error!("IPC server error: {}", e);
        }
    });

    // Set up signal handlers
    let signal_state = state.clone();
    tokio::spawn(async move {
        use tokio::signal::unix::{SignalKind, signal};

        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    log::error!("Failed to set up signal handlers: {}", e);
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                log::info!("Received SIGTERM, shutting down...");
            }
            _ = sigint.recv() => {
                log::info!("Received SIGINT, shutting down...");
            }
        }

        signal_state.lock().await.should_exit = true;
    });

    if let Err(e) = ipc_handle.await {
        log::error!("IPC server task failed: {}", e);
    }

    log::info!("Player shutting down");
    let mut state = state.lock().await;
    for controller in &mut state.zones {
        controller.shutdown();
    }
    state.optimizer.cancel().await;
    let _ = std::fs::remove_file(common::get_socket_path());
    pid_lock.release();

    log::info!("Goodbye");
    Ok(())
}

fn spawn_zone(
    zone: ZoneId,
    config: &Config,
    playlists: &PlaylistService,
    surfaces: Arc<dyn SurfaceProvider>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    autoplay: bool,
) -> Result<ZoneController> {
    let layout = config.zone_layout(zone);
    let audio = config.general.audio_enabled;
    let settings = PlayerSettings {
        image_duration: layout.image_duration,
        high_res_threshold: config.display.high_res_threshold,
        hints: DecodeHints {
            hardware_decode: true,
            audio,
        },
    };

    let controller = ZoneController::spawn(zone, settings, surfaces.clone(), events, |callback| {
        backend::create_backend(&format!("zone-{}", zone), callback, audio)
    })?;

    controller.send(ZoneMessage::SetGeometry(layout.rect))?;
    controller.send(ZoneMessage::SetZOrder(layout.z_order))?;
    controller.send(ZoneMessage::SetWindowId(surfaces.parent_window()))?;
    controller.send(ZoneMessage::SetImageDuration(layout.image_duration))?;
    controller.set_playlist(playlists.items_for(zone))?;
    if autoplay {
        controller.play()?;
    }

    Ok(controller)
}

async fn log_player_events(mut events: UnboundedReceiver<PlayerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            PlayerEvent::PlaybackStarted { zone, path, kind } => {
                log::info!("[{}] Playing {:?}: {}", zone, kind, path.display())
            }
            PlayerEvent::MediaFinished { zone, path } => {
                log::debug!("[{}] Finished {}", zone, path.display())
            }
            PlayerEvent::RenderModeChanged { zone, mode } => {
                log::info!("[{}] Render mode: {}", zone, mode)
            }
            PlayerEvent::PlaybackStopped { zone } => log::info!("[{}] Stopped", zone),
            PlayerEvent::Error { zone, message } => log::warn!("[{}] {}", zone, message),
        }
    }
}

/// Reload playlists once an optimization pass is over
async fn handle_optimizer_events(
    state: Arc<Mutex<DaemonState>>,
    mut events: UnboundedReceiver<OptimizerEvent>,
) {
    while let Some(event) = events.recv().await {
        match event {
            OptimizerEvent::StatusChanged(_) => {}
            OptimizerEvent::Progress { completed, total } => {
                log::debug!("Optimization progress: {}/{}", completed, total)
            }
            OptimizerEvent::FileOptimized { input, output } => {
                log::debug!("{} -> {}", input.display(), output.display())
            }
            OptimizerEvent::Error { input, message } => {
                log::warn!("Optimization failed for {}: {}", input.display(), message)
            }
            OptimizerEvent::Finished(outcome) => {
                log::info!("Optimization finished: {:?}", outcome);
                let changed = DaemonState::rescan(&state).await;
                if !changed.is_empty() {
                    log::info!("Reloaded {} zone(s) after optimization", changed.len());
                }
            }
        }
    }
}

/// Shared daemon state
pub struct DaemonState {
    pub should_exit: bool,
    pub start_time: std::time::Instant,
    /// Zones restart on their own after a playlist reload
    pub kiosk: bool,
    pub playlists: PlaylistService,
    pub zones: Vec<ZoneController>,
    pub optimizer: VideoOptimizer,
}

impl DaemonState {
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Rescan every zone directory and restart only the zones whose list changed.
    ///
    /// The directory walk runs on a blocking thread against a copy of the
    /// playlists, so the state lock is only held to take the copy and to apply
    /// the result.
    pub async fn rescan(state: &Arc<Mutex<DaemonState>>) -> Vec<ZoneId> {
        let mut scanned = state.lock().await.playlists.clone();
        let scanned = match tokio::task::spawn_blocking(move || {
            scanned.scan_all();
            scanned
        })
        .await
        {
            Ok(scanned) => scanned,
            Err(e) => {
                log::error!("Playlist scan failed: {}", e);
                return Vec::new();
            }
        };

        state.lock().await.apply_scan(scanned)
    }

    /// Swap in freshly scanned playlists and reload the zones that changed
    fn apply_scan(&mut self, scanned: PlaylistService) -> Vec<ZoneId> {
        let changed = self.playlists.adopt(scanned);
        for zone in &changed {
            let Some(controller) = self.zones.iter().find(|c| c.zone() == *zone) else {
                continue;
            };
            let items = self.playlists.items_for(*zone);
            let resume = self.kiosk || controller.status().playing;
            log::info!("[{}] Playlist changed ({} item(s))", zone, items.len());

            let result = controller.set_playlist(items).and_then(|_| {
                if resume {
                    controller.play()
                } else {
                    Ok(())
                }
            });
            log_and_continue!(result, format!("reload playlist for zone {}", zone));
        }
        changed
    }
}
