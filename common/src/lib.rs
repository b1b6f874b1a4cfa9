//! Common types and utilities for the NCTV signage player.
//!
//! This crate defines the data shared between the player daemon
//! (`nctv-player`) and the control client (`nctvctl`): the four fixed screen
//! zones, media classification, status snapshots and the IPC protocol.
//!
//! # IPC Protocol
//!
//! Communication happens over a Unix domain socket using newline-delimited
//! JSON. The client sends [`Command`] variants and receives one [`Response`]
//! per command.
//!
//! # Examples
//!
//! ```no_run
//! use common::{Command, ZoneId};
//!
//! // Skip to the next item in the main zone only
//! let cmd = Command::Next { zone: Some(ZoneId::Main) };
//!
//! // Serialize for sending over IPC
//! let json = serde_json::to_string(&cmd).unwrap();
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Extensions played through the media backend.
pub const VIDEO_EXTENSIONS: &[&str] = &[
    "mp4", "mkv", "avi", "mov", "wmv", "flv", "webm", "ts", "m4v", "mpg", "mpeg",
];

/// Extensions presented as still images.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "gif", "webp", "svg"];

/// Error types shared between client and daemon.
///
/// All errors are serializable for transmission over IPC.
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum PlayerError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Playback error: {0}")]
    Playback(String),

    #[error("Optimizer error: {0}")]
    Optimizer(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<std::io::Error> for PlayerError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for PlayerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}

/// One of the four fixed screen regions.
///
/// Each zone maps to exactly one playlist directory (`playlist-<name>`) and
/// one playback engine for the life of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneId {
    Background,
    Main,
    Horizontal,
    Vertical,
}

impl ZoneId {
    /// All zones in layout order (background first).
    pub const ALL: [ZoneId; 4] = [
        ZoneId::Background,
        ZoneId::Main,
        ZoneId::Horizontal,
        ZoneId::Vertical,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Background => "background",
            Self::Main => "main",
            Self::Horizontal => "horizontal",
            Self::Vertical => "vertical",
        }
    }

    /// Directory name of this zone under the playlist root
    pub fn folder_name(&self) -> String {
        format!("playlist-{}", self.name())
    }

    /// Parse zone name (case-insensitive)
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "background" | "bg" => Some(Self::Background),
            "main" => Some(Self::Main),
            "horizontal" | "horiz" => Some(Self::Horizontal),
            "vertical" | "vert" => Some(Self::Vertical),
            _ => None,
        }
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Media kind derived from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Image,
    Unknown,
}

impl MediaKind {
    /// Classify a path by its extension (case-insensitive)
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let Some(ext) = path.as_ref().extension().and_then(|e| e.to_str()) else {
            return Self::Unknown;
        };
        let ext = ext.to_ascii_lowercase();

        if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
            Self::Video
        } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            Self::Image
        } else {
            Self::Unknown
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// How a zone presents its current video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RenderMode {
    /// Rendered into a child surface inside the application window
    #[default]
    Embedded,
    /// Rendered fullscreen on the backend's own surface (high-resolution content)
    Overlay,
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedded => f.write_str("embedded"),
            Self::Overlay => f.write_str("overlay"),
        }
    }
}

/// Commands sent from client to daemon via IPC.
///
/// Commands that take an optional zone apply to every zone when `zone` is
/// `None`.
#[derive(Debug, Serialize, Deserialize)]
pub enum Command {
    /// Start (or restart) playback of the current item
    Play { zone: Option<ZoneId> },
    /// Stop playback
    Stop { zone: Option<ZoneId> },
    /// Advance to the next playlist item
    Next { zone: Option<ZoneId> },
    /// Go back to the previous playlist item
    Previous { zone: Option<ZoneId> },
    /// Re-scan playlist directories and reload changed zones
    Rescan,
    /// Start a background optimization pass
    Optimize,
    /// Cancel the running optimization pass
    CancelOptimize,
    /// Query daemon status
    Status,
    /// Ping the daemon
    Ping,
    /// Kill the daemon
    Kill,
}

/// Response from daemon to client
#[derive(Debug, Serialize, Deserialize)]
pub enum Response {
    Ok,
    Error(PlayerError),
    Status(PlayerStatus),
    Pong,
}

/// Daemon status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerStatus {
    pub version: String,
    pub uptime_secs: u64,
    pub zones: Vec<ZoneStatus>,
    pub optimizer: OptimizerStatus,
}

/// Snapshot of one zone's playback engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneStatus {
    pub zone: ZoneId,
    pub playing: bool,
    pub showing_image: bool,
    pub current_index: usize,
    pub playlist_len: usize,
    pub current_path: Option<String>,
    pub render_mode: RenderMode,
    pub video_available: bool,
}

impl ZoneStatus {
    pub fn idle(zone: ZoneId) -> Self {
        Self {
            zone,
            playing: false,
            showing_image: false,
            current_index: 0,
            playlist_len: 0,
            current_path: None,
            render_mode: RenderMode::Embedded,
            video_available: false,
        }
    }
}

/// Snapshot of the background optimizer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerStatus {
    pub optimizing: bool,
    pub status_message: String,
    pub total_files: usize,
    pub completed_files: usize,
}

impl OptimizerStatus {
    /// Fraction of the batch finished; an empty batch counts as done
    pub fn progress(&self) -> f64 {
        if self.total_files == 0 {
            return 1.0;
        }
        self.completed_files as f64 / self.total_files as f64
    }
}

impl Default for OptimizerStatus {
    fn default() -> Self {
        Self {
            optimizing: false,
            status_message: "Idle".to_string(),
            total_files: 0,
            completed_files: 0,
        }
    }
}

/// IPC socket path helper
pub fn get_socket_path() -> std::path::PathBuf {
    match std::env::var("XDG_RUNTIME_DIR") {
        Ok(runtime_dir) => std::path::PathBuf::from(runtime_dir).join("nctv-player.sock"),
        Err(_) => std::path::PathBuf::from(format!(
            "/tmp/nctv-player-{}.sock",
            unsafe { libc::getuid() }
        )),
    }
}
