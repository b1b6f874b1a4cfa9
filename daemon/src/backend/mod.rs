//! Media backend boundary
//!
//! A zone hands video files to a [`MediaBackend`] and receives
//! [`MediaEvent`]s back through a callback. Callbacks fire on backend-owned
//! threads, so the callback must only forward the event to the zone's
//! control thread.
//!
//! - `gst_backend`: playbin-based backend (feature `video`)
//! - `testing`: scripted backend and surfaces for unit tests

#[cfg(feature = "video")]
mod gst_backend;

#[cfg(test)]
pub mod testing;

use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::surface::WindowHandle;

/// Asynchronous notifications from the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    EndReached,
    EncounteredError(String),
    Playing,
}

pub type MediaCallback = Arc<dyn Fn(MediaEvent) + Send + Sync>;

/// Decoder hints passed with every load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeHints {
    /// Prefer any available hardware decoder
    pub hardware_decode: bool,
    pub audio: bool,
}

impl Default for DecodeHints {
    fn default() -> Self {
        Self {
            hardware_decode: true,
            audio: false,
        }
    }
}

/// State of a resolution probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeStatus {
    Pending,
    Ready { width: u32, height: u32 },
    Failed,
}

/// A resolution probe in flight. Polling never blocks.
pub trait PendingProbe: Send {
    fn poll(&mut self) -> ProbeStatus;
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media backend initialization failed: {0}")]
    Init(String),

    #[error("failed to load {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("playback state change failed: {0}")]
    State(String),

    #[error("failed to bind video output: {0}")]
    Bind(String),
}

/// One media session, owned by one zone
pub trait MediaBackend: Send {
    fn load(&mut self, path: &Path, hints: DecodeHints) -> Result<(), MediaError>;

    fn play(&mut self) -> Result<(), MediaError>;

    /// Stop the current media. Safe to call when idle.
    fn stop(&mut self);

    /// Render into the given native surface
    fn bind_surface(&mut self, handle: WindowHandle) -> Result<(), MediaError>;

    /// Drop any surface binding and render fullscreen on the backend's own output
    fn detach_fullscreen(&mut self) -> Result<(), MediaError>;

    /// Letterbox to the output, keeping the source aspect ratio
    fn set_best_fit(&mut self);

    fn start_probe(&mut self, path: &Path) -> Box<dyn PendingProbe>;

    /// Size of the video currently playing, once known
    fn video_size(&self) -> Option<(u32, u32)>;
}

/// Create the backend for one zone
#[cfg(feature = "video")]
pub fn create_backend(
    name: &str,
    callback: MediaCallback,
    audio_enabled: bool,
) -> Result<Box<dyn MediaBackend>, MediaError> {
    Ok(Box::new(gst_backend::GstBackend::new(
        name,
        callback,
        audio_enabled,
    )?))
}

#[cfg(not(feature = "video"))]
pub fn create_backend(
    _name: &str,
    _callback: MediaCallback,
    _audio_enabled: bool,
) -> Result<Box<dyn MediaBackend>, MediaError> {
    Err(MediaError::Init("Video support not compiled in".to_string()))
}
