//! Per-zone playback state machine
//!
//! A [`ZonePlayer`] owns one zone's playlist cursor, its media backend
//! session and its embedded child surface. It is driven from a single
//! control thread (see [`super::ZoneController`]); backend callbacks reach it
//! only as messages on that thread.
//!
//! # Render modes
//!
//! Every video is probed before playback. Content at least
//! `high_res_threshold` pixels wide is shown in overlay mode: the embedded
//! surface is hidden and the backend renders fullscreen on its own output.
//! Everything else is embedded: the backend is (re-)bound to the zone's child
//! surface on every item, because a previous overlay item detached it.

use common::{MediaKind, RenderMode, ZoneId, ZoneStatus};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;

use crate::backend::{DecodeHints, MediaBackend, MediaError, MediaEvent, ProbeStatus};
use crate::playlist::MediaItem;
use crate::surface::{ChildSurface, Rect, SurfaceProvider, WindowHandle};

/// Resolution probe bound: 10 polls, 50ms apart
const PROBE_ATTEMPTS: u32 = 10;
const PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// Notifications published by a zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    PlaybackStarted {
        zone: ZoneId,
        path: PathBuf,
        kind: MediaKind,
    },
    MediaFinished {
        zone: ZoneId,
        path: PathBuf,
    },
    RenderModeChanged {
        zone: ZoneId,
        mode: RenderMode,
    },
    PlaybackStopped {
        zone: ZoneId,
    },
    Error {
        zone: ZoneId,
        message: String,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct PlayerSettings {
    pub image_duration: Duration,
    pub high_res_threshold: u32,
    pub hints: DecodeHints,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            image_duration: Duration::from_secs(10),
            high_res_threshold: 3800,
            hints: DecodeHints::default(),
        }
    }
}

pub struct ZonePlayer {
    zone: ZoneId,
    playlist: Vec<MediaItem>,
    current_index: usize,
    playing: bool,
    showing_image: bool,
    /// A video is loaded in the backend for the current item
    video_active: bool,
    render_mode: RenderMode,
    settings: PlayerSettings,
    image_deadline: Option<Instant>,

    geometry: Rect,
    window: Option<WindowHandle>,
    z_order: i32,

    /// `None` when the backend failed to initialize; images still play
    backend: Option<Box<dyn MediaBackend>>,
    surfaces: Arc<dyn SurfaceProvider>,
    surface: Option<Box<dyn ChildSurface>>,
    events: UnboundedSender<PlayerEvent>,

    /// Bumped on every dispatch so stale skips are ignored
    generation: u64,
    pending_skip: Option<u64>,
    /// Generation of the video loaded in the backend; read by the backend
    /// callback to tag every event it forwards
    media_session: Arc<AtomicU64>,
    consecutive_skips: usize,
}

impl ZonePlayer {
    pub fn new(
        zone: ZoneId,
        settings: PlayerSettings,
        backend: Option<Box<dyn MediaBackend>>,
        surfaces: Arc<dyn SurfaceProvider>,
        events: UnboundedSender<PlayerEvent>,
        media_session: Arc<AtomicU64>,
    ) -> Self {
        Self {
            zone,
            playlist: Vec::new(),
            current_index: 0,
            playing: false,
            showing_image: false,
            video_active: false,
            render_mode: RenderMode::Embedded,
            settings,
            image_deadline: None,
            geometry: Rect::default(),
            window: None,
            z_order: 0,
            backend,
            surfaces,
            surface: None,
            events,
            generation: 0,
            pending_skip: None,
            consecutive_skips: 0,
            media_session,
        }
    }

    /// Replace the playlist. Stops playback and rewinds; does not auto-play.
    pub fn set_playlist(&mut self, items: Vec<MediaItem>) {
        self.stop();
        log::info!("[{}] Playlist set with {} item(s)", self.zone, items.len());
        self.playlist = items;
        self.current_index = 0;
    }

    pub fn play(&mut self) {
        if self.playlist.is_empty() {
            log::warn!("[{}] Cannot play: playlist is empty", self.zone);
            return;
        }
        self.playing = true;
        self.consecutive_skips = 0;
        self.dispatch_current();
    }

    /// Halt playback, hide the video surface and clear the image. Idempotent.
    pub fn stop(&mut self) {
        self.leave_current();
        if let Some(surface) = self.surface.as_mut() {
            surface.hide();
        }

        if self.playing {
            self.playing = false;
            log::info!("[{}] Playback stopped", self.zone);
            self.emit(PlayerEvent::PlaybackStopped { zone: self.zone });
        }
    }

    pub fn next(&mut self) {
        if self.playlist.is_empty() {
            return;
        }
        self.current_index = (self.current_index + 1) % self.playlist.len();
        if self.playing {
            self.dispatch_current();
        }
    }

    pub fn previous(&mut self) {
        if self.playlist.is_empty() {
            return;
        }
        let len = self.playlist.len();
        self.current_index = (self.current_index + len - 1) % len;
        if self.playing {
            self.dispatch_current();
        }
    }

    pub fn set_geometry(&mut self, rect: Rect) {
        self.geometry = rect;
        self.refresh_surface();
    }

    pub fn set_window_id(&mut self, window: Option<WindowHandle>) {
        self.window = window;
        self.refresh_surface();
    }

    pub fn set_z_order(&mut self, z_order: i32) {
        self.z_order = z_order;
        if let Some(surface) = self.surface.as_mut() {
            apply_z_order(surface.as_mut(), z_order);
        }
    }

    pub fn set_image_duration(&mut self, duration: Duration) {
        self.settings.image_duration = duration;
    }

    pub fn current_item(&self) -> Option<&MediaItem> {
        self.playlist.get(self.current_index)
    }

    /// When the current image is due to end
    pub fn next_deadline(&self) -> Option<Instant> {
        self.image_deadline
    }

    /// Advance past the current image once its deadline has passed
    pub fn on_tick(&mut self, now: Instant) {
        if let Some(deadline) = self.image_deadline
            && now >= deadline
        {
            self.image_deadline = None;
            self.finish_current();
        }
    }

    /// Handle an event forwarded from the backend callback.
    ///
    /// `session` is the generation the event was tagged with; events from a
    /// video that has since been replaced are dropped.
    pub fn on_media_event(&mut self, session: u64, event: MediaEvent) {
        if !(self.playing && self.video_active) {
            log::debug!("[{}] Ignoring {:?} with no active video", self.zone, event);
            return;
        }
        if session != self.generation {
            log::debug!("[{}] Dropping stale {:?}", self.zone, event);
            return;
        }

        match event {
            MediaEvent::Playing => self.on_video_playing(),
            MediaEvent::EndReached => {
                log::debug!("[{}] End of media", self.zone);
                self.finish_current();
            }
            MediaEvent::EncounteredError(message) => {
                log::warn!("[{}] Playback error: {}", self.zone, message);
                self.emit(PlayerEvent::Error {
                    zone: self.zone,
                    message,
                });
                self.finish_current();
            }
        }
    }

    /// Skip requested for an item that could not be presented
    pub fn take_pending_skip(&mut self) -> Option<u64> {
        self.pending_skip.take()
    }

    /// Perform a queued skip, unless the item it was queued for is gone
    pub fn skip_item(&mut self, generation: u64) {
        if !self.playing || generation != self.generation {
            log::debug!("[{}] Dropping stale skip", self.zone);
            return;
        }

        if self.consecutive_skips >= self.playlist.len() {
            let message = "no playable items in playlist".to_string();
            log::error!("[{}] Stopping: {}", self.zone, message);
            self.emit(PlayerEvent::Error {
                zone: self.zone,
                message,
            });
            self.stop();
            return;
        }

        self.finish_current();
    }

    pub fn status(&self) -> ZoneStatus {
        ZoneStatus {
            zone: self.zone,
            playing: self.playing,
            showing_image: self.showing_image,
            current_index: self.current_index,
            playlist_len: self.playlist.len(),
            current_path: self.current_item().map(|i| i.path.display().to_string()),
            render_mode: self.render_mode,
            video_available: self.backend.is_some(),
        }
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.events.send(event);
    }

    fn finish_current(&mut self) {
        if let Some(item) = self.current_item() {
            let path = item.path.clone();
            self.emit(PlayerEvent::MediaFinished {
                zone: self.zone,
                path,
            });
        }
        self.next();
    }

    /// Tear down whatever the current item put on screen
    fn leave_current(&mut self) {
        self.image_deadline = None;
        self.showing_image = false;
        self.pending_skip = None;

        if self.video_active {
            self.video_active = false;
            if let Some(backend) = self.backend.as_mut() {
                backend.stop();
            }
        }
    }

    fn dispatch_current(&mut self) {
        self.leave_current();
        self.generation += 1;

        let Some(item) = self.current_item().cloned() else {
            return;
        };

        match item.kind {
            MediaKind::Image => self.show_image(&item),
            MediaKind::Video => self.play_video(&item),
            MediaKind::Unknown => {
                log::warn!(
                    "[{}] Unsupported file type, skipping: {}",
                    self.zone,
                    item.path.display()
                );
                self.queue_skip();
            }
        }
    }

    fn queue_skip(&mut self) {
        self.pending_skip = Some(self.generation);
        self.consecutive_skips += 1;
    }

    fn show_image(&mut self, item: &MediaItem) {
        if let Some(surface) = self.surface.as_mut() {
            surface.hide();
        }

        log::info!("[{}] Showing image: {}", self.zone, item.display_name());
        self.showing_image = true;
        self.image_deadline = Some(Instant::now() + self.settings.image_duration);
        self.consecutive_skips = 0;
        self.emit(PlayerEvent::PlaybackStarted {
            zone: self.zone,
            path: item.path.clone(),
            kind: MediaKind::Image,
        });
    }

    fn play_video(&mut self, item: &MediaItem) {
        if self.backend.is_none() {
            log::warn!(
                "[{}] Video unavailable, skipping: {}",
                self.zone,
                item.display_name()
            );
            self.queue_skip();
            return;
        }

        if !item.optimized {
            log::debug!(
                "[{}] No optimized version of {} yet",
                self.zone,
                item.display_name()
            );
        }

        let width = self.probe_width(&item.path);
        let mode = self.mode_for_width(width);
        self.apply_render_mode(mode);

        let hints = self.settings.hints;
        self.media_session.store(self.generation, Ordering::Release);
        let Some(backend) = self.backend.as_mut() else {
            return;
        };

        match start_video(backend.as_mut(), &item.path, hints) {
            Ok(()) => {
                log::info!(
                    "[{}] Playing video: {} ({})",
                    self.zone,
                    item.display_name(),
                    mode
                );
                self.video_active = true;
                self.consecutive_skips = 0;
                self.emit(PlayerEvent::PlaybackStarted {
                    zone: self.zone,
                    path: item.path.clone(),
                    kind: MediaKind::Video,
                });
            }
            Err(e) => {
                log::warn!("[{}] {}", self.zone, e);
                backend.stop();
                self.emit(PlayerEvent::Error {
                    zone: self.zone,
                    message: e.to_string(),
                });
                self.queue_skip();
            }
        }
    }

    /// Source width, or `None` if it could not be read within the bound
    fn probe_width(&mut self, path: &Path) -> Option<u32> {
        let backend = self.backend.as_mut()?;
        let mut probe = backend.start_probe(path);

        for attempt in 0..PROBE_ATTEMPTS {
            match probe.poll() {
                ProbeStatus::Ready { width, height } => {
                    log::debug!("[{}] Probed {}x{}", self.zone, width, height);
                    return Some(width);
                }
                ProbeStatus::Failed => return None,
                ProbeStatus::Pending if attempt + 1 < PROBE_ATTEMPTS => {
                    thread::sleep(PROBE_INTERVAL)
                }
                ProbeStatus::Pending => {}
            }
        }

        log::debug!(
            "[{}] Resolution probe timed out for {}, assuming standard",
            self.zone,
            path.display()
        );
        None
    }

    fn mode_for_width(&self, width: Option<u32>) -> RenderMode {
        match width {
            Some(w) if w >= self.settings.high_res_threshold => RenderMode::Overlay,
            _ => RenderMode::Embedded,
        }
    }

    /// Re-check the mode against the size the backend reports once playing
    fn on_video_playing(&mut self) {
        let Some((width, height)) = self.backend.as_ref().and_then(|b| b.video_size()) else {
            return;
        };

        let mode = self.mode_for_width(Some(width));
        if mode != self.render_mode {
            log::info!(
                "[{}] Video is {}x{}, switching to {} mode",
                self.zone,
                width,
                height,
                mode
            );
            self.apply_render_mode(mode);
        }
    }

    fn apply_render_mode(&mut self, mode: RenderMode) {
        match mode {
            RenderMode::Overlay => {
                if let Some(surface) = self.surface.as_mut() {
                    surface.hide();
                }
                if let Some(backend) = self.backend.as_mut()
                    && let Err(e) = backend.detach_fullscreen()
                {
                    log::warn!("[{}] {}", self.zone, e);
                }
            }
            RenderMode::Embedded => self.attach_embedded(),
        }

        if mode != self.render_mode {
            self.render_mode = mode;
            self.emit(PlayerEvent::RenderModeChanged {
                zone: self.zone,
                mode,
            });
        }
    }

    fn attach_embedded(&mut self) {
        let Some(handle) = self.ensure_surface() else {
            log::debug!(
                "[{}] No embedded surface, video uses the backend window",
                self.zone
            );
            return;
        };

        // Always re-bind: an overlay item may have detached the output
        if let Some(backend) = self.backend.as_mut()
            && let Err(e) = backend.bind_surface(handle)
        {
            log::warn!("[{}] {}", self.zone, e);
        }
        if let Some(surface) = self.surface.as_mut() {
            surface.show();
        }
    }

    /// Create the child surface, or reuse it while the parent is unchanged
    fn ensure_surface(&mut self) -> Option<WindowHandle> {
        let parent = self.window?;
        if !self.geometry.is_valid() {
            return None;
        }

        let reusable = self.surface.as_ref().is_some_and(|s| s.parent() == parent);
        if !reusable {
            self.surface = None;
            match self.surfaces.create_child(parent, self.geometry) {
                Ok(surface) => {
                    log::debug!(
                        "[{}] Created child surface {:?} under {:?}",
                        self.zone,
                        surface.handle(),
                        parent
                    );
                    self.surface = Some(surface);
                }
                Err(e) => {
                    log::warn!("[{}] {}", self.zone, e);
                    return None;
                }
            }
        }

        let geometry = self.geometry;
        let z_order = self.z_order;
        let surface = self.surface.as_mut()?;
        surface.set_geometry(geometry);
        apply_z_order(surface.as_mut(), z_order);
        Some(surface.handle())
    }

    /// Geometry or parent changed: update the surface and follow it with the video
    fn refresh_surface(&mut self) {
        if self.ensure_surface().is_none() {
            return;
        }

        if self.video_active && self.render_mode == RenderMode::Embedded {
            self.attach_embedded();
        } else if let Some(surface) = self.surface.as_mut() {
            surface.hide();
        }
    }
}

fn apply_z_order(surface: &mut dyn ChildSurface, z_order: i32) {
    if z_order <= 0 {
        surface.lower();
    } else {
        surface.raise();
    }
}

fn start_video(
    backend: &mut dyn MediaBackend,
    path: &Path,
    hints: DecodeHints,
) -> Result<(), MediaError> {
    backend.load(path, hints)?;
    backend.set_best_fit();
    backend.play()
}
