//! Control thread for one zone
//!
//! Every zone runs its [`ZonePlayer`] on a dedicated thread (`zone-<name>`).
//! External commands, backend callbacks and queued skips all arrive as
//! [`ZoneMessage`]s on one channel, so the player is only ever touched from
//! that thread. The image timer is the deadline passed to `recv_timeout`.

use anyhow::{Context, Result};
use common::{ZoneId, ZoneStatus};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

use super::player::{PlayerEvent, PlayerSettings, ZonePlayer};
use crate::backend::{MediaBackend, MediaCallback, MediaError, MediaEvent};
use crate::playlist::MediaItem;
use crate::surface::{Rect, SurfaceProvider, WindowHandle};

#[derive(Debug)]
pub enum ZoneMessage {
    SetPlaylist(Vec<MediaItem>),
    Play,
    Stop,
    Next,
    Previous,
    SetGeometry(Rect),
    SetWindowId(Option<WindowHandle>),
    SetZOrder(i32),
    SetImageDuration(Duration),
    /// Forwarded from the backend callback, tagged with the generation of
    /// the video that was loaded when it fired
    Media(u64, MediaEvent),
    /// Queued skip for the item dispatched at this generation
    SkipItem(u64),
    Shutdown,
}

pub struct ZoneController {
    zone: ZoneId,
    sender: Sender<ZoneMessage>,
    status: Arc<Mutex<ZoneStatus>>,
    thread: Option<JoinHandle<()>>,
}

impl ZoneController {
    /// Start the zone thread.
    ///
    /// `make_backend` receives the callback that marshals backend events onto
    /// the zone thread. If it fails the zone runs without video.
    pub fn spawn<F>(
        zone: ZoneId,
        settings: PlayerSettings,
        surfaces: Arc<dyn SurfaceProvider>,
        events: UnboundedSender<PlayerEvent>,
        make_backend: F,
    ) -> Result<Self>
    where
        F: FnOnce(MediaCallback) -> Result<Box<dyn MediaBackend>, MediaError>,
    {
        let (sender, receiver) = mpsc::channel();

        let media_sender = sender.clone();
        let media_session = Arc::new(AtomicU64::new(0));
        let callback_session = media_session.clone();
        let callback: MediaCallback = Arc::new(move |event| {
            let session = callback_session.load(Ordering::Acquire);
            let _ = media_sender.send(ZoneMessage::Media(session, event));
        });

        let backend = match make_backend(callback) {
            Ok(backend) => Some(backend),
            Err(e) => {
                log::error!("[{}] {}; video playback disabled", zone, e);
                let _ = events.send(PlayerEvent::Error {
                    zone,
                    message: e.to_string(),
                });
                None
            }
        };

        let player = ZonePlayer::new(zone, settings, backend, surfaces, events, media_session);
        let status = Arc::new(Mutex::new(player.status()));

        let loopback = sender.clone();
        let thread_status = status.clone();
        let thread = thread::Builder::new()
            .name(format!("zone-{}", zone))
            .spawn(move || run(player, receiver, loopback, thread_status))
            .with_context(|| format!("Failed to spawn thread for zone {}", zone))?;

        log::debug!("[{}] Zone thread started", zone);

        Ok(Self {
            zone,
            sender,
            status,
            thread: Some(thread),
        })
    }

    pub fn zone(&self) -> ZoneId {
        self.zone
    }

    pub fn send(&self, message: ZoneMessage) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| anyhow::anyhow!("zone {} thread has exited", self.zone))
    }

    pub fn set_playlist(&self, items: Vec<MediaItem>) -> Result<()> {
        self.send(ZoneMessage::SetPlaylist(items))
    }

    pub fn play(&self) -> Result<()> {
        self.send(ZoneMessage::Play)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(ZoneMessage::Stop)
    }

    pub fn next(&self) -> Result<()> {
        self.send(ZoneMessage::Next)
    }

    pub fn previous(&self) -> Result<()> {
        self.send(ZoneMessage::Previous)
    }

    /// Latest snapshot published by the zone thread
    pub fn status(&self) -> ZoneStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| ZoneStatus::idle(self.zone))
    }

    /// Stop playback and join the thread
    pub fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.sender.send(ZoneMessage::Shutdown);
        if thread.join().is_err() {
            log::error!("[{}] Zone thread panicked", self.zone);
        }
        log::debug!("[{}] Zone thread stopped", self.zone);
    }
}

impl Drop for ZoneController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(
    mut player: ZonePlayer,
    receiver: Receiver<ZoneMessage>,
    loopback: Sender<ZoneMessage>,
    status: Arc<Mutex<ZoneStatus>>,
) {
    loop {
        let message = match player.next_deadline() {
            Some(deadline) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match receiver.recv_timeout(timeout) {
                    Ok(message) => Some(message),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            None => match receiver.recv() {
                Ok(message) => Some(message),
                Err(_) => break,
            },
        };

        match message {
            Some(ZoneMessage::Shutdown) => {
                player.stop();
                break;
            }
            Some(message) => handle(&mut player, message),
            None => player.on_tick(Instant::now()),
        }

        if let Some(generation) = player.take_pending_skip() {
            let _ = loopback.send(ZoneMessage::SkipItem(generation));
        }

        if let Ok(mut snapshot) = status.lock() {
            *snapshot = player.status();
        }
    }

    if let Ok(mut snapshot) = status.lock() {
        *snapshot = player.status();
    }
}

fn handle(player: &mut ZonePlayer, message: ZoneMessage) {
    match message {
        ZoneMessage::SetPlaylist(items) => player.set_playlist(items),
        ZoneMessage::Play => player.play(),
        ZoneMessage::Stop => player.stop(),
        ZoneMessage::Next => player.next(),
        ZoneMessage::Previous => player.previous(),
        ZoneMessage::SetGeometry(rect) => player.set_geometry(rect),
        ZoneMessage::SetWindowId(window) => player.set_window_id(window),
        ZoneMessage::SetZOrder(z_order) => player.set_z_order(z_order),
        ZoneMessage::SetImageDuration(duration) => player.set_image_duration(duration),
        ZoneMessage::Media(session, event) => player.on_media_event(session, event),
        ZoneMessage::SkipItem(generation) => player.skip_item(generation),
        ZoneMessage::Shutdown => {}
    }
}
