//! GStreamer playbin backend
//!
//! Each zone owns one `playbin`. Surface binding goes through the
//! `VideoOverlay` interface playbin forwards to its video sink. Bus messages
//! are handled in a sync handler (streaming threads) and forwarded as
//! [`MediaEvent`]s.

use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_video as gst_video;
use gstreamer_video::prelude::*;
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::{
    DecodeHints, MediaBackend, MediaCallback, MediaError, MediaEvent, PendingProbe, ProbeStatus,
};
use crate::surface::WindowHandle;

/// Hardware decoders promoted above the software ones when present
const HARDWARE_DECODERS: &[&str] = &[
    "vah264dec",
    "vah265dec",
    "vaapih264dec",
    "vaapih265dec",
    "nvh264dec",
    "nvh265dec",
    "v4l2h264dec",
    "v4l2h265dec",
];

const SOFTWARE_DECODERS: &[&str] = &["avdec_h264", "avdec_h265"];

/// Initialize GStreamer (idempotent)
fn initialize_gstreamer() -> Result<(), MediaError> {
    static INIT: std::sync::OnceLock<Result<(), String>> = std::sync::OnceLock::new();

    INIT.get_or_init(|| {
        gst::init().map_err(|e| e.to_string())?;
        log::info!("GStreamer initialized");
        Ok(())
    })
    .clone()
    .map_err(MediaError::Init)
}

/// Demote software H.264/H.265 decoders when a hardware one is installed
fn prefer_hardware_decoders() {
    static DONE: std::sync::Once = std::sync::Once::new();

    DONE.call_once(|| {
        let registry = gst::Registry::get();
        let hardware: Vec<&str> = HARDWARE_DECODERS
            .iter()
            .copied()
            .filter(|name| {
                registry
                    .find_feature(name, gst::ElementFactory::static_type())
                    .is_some()
            })
            .collect();

        if hardware.is_empty() {
            log::info!("No hardware video decoder found, using software decoding");
            return;
        }

        log::info!("Hardware video decoders available: {}", hardware.join(", "));
        for name in hardware {
            if let Some(feature) = registry.find_feature(name, gst::ElementFactory::static_type())
            {
                feature.set_rank(gst::Rank::PRIMARY);
            }
        }
        for name in SOFTWARE_DECODERS {
            if let Some(feature) = registry.find_feature(name, gst::ElementFactory::static_type())
            {
                feature.set_rank(gst::Rank::SECONDARY);
            }
        }
    });
}

fn file_uri(path: &Path) -> Result<String, MediaError> {
    gst::glib::filename_to_uri(path, None)
        .map(|uri| uri.to_string())
        .map_err(|e| MediaError::Load {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Negotiated width/height on playbin's first video pad
fn negotiated_size(playbin: &gst::Element) -> Option<(u32, u32)> {
    let pad = playbin.emit_by_name::<Option<gst::Pad>>("get-video-pad", &[&0i32])?;
    let caps = pad.current_caps()?;
    let info = gst_video::VideoInfo::from_caps(&caps).ok()?;
    Some((info.width(), info.height()))
}

pub struct GstBackend {
    playbin: gst::Element,
    /// Window the video sink should render into; `None` means its own window
    window: Arc<Mutex<Option<WindowHandle>>>,
}

impl GstBackend {
    pub fn new(
        name: &str,
        callback: MediaCallback,
        audio_enabled: bool,
    ) -> Result<Self, MediaError> {
        initialize_gstreamer()?;

        let playbin = gst::ElementFactory::make("playbin")
            .name(name)
            .build()
            .map_err(|e| MediaError::Init(format!("Failed to create playbin: {}", e)))?;

        playbin.set_property("mute", !audio_enabled);

        let bus = playbin
            .bus()
            .ok_or_else(|| MediaError::Init("playbin has no bus".to_string()))?;

        let window: Arc<Mutex<Option<WindowHandle>>> = Arc::new(Mutex::new(None));
        let sync_window = window.clone();
        let playbin_name = name.to_string();

        bus.set_sync_handler(move |_bus, msg| {
            match msg.view() {
                gst::MessageView::Eos(_) => callback(MediaEvent::EndReached),

                gst::MessageView::Error(err) => {
                    let message = match err.debug() {
                        Some(debug) => format!("{} ({})", err.error(), debug),
                        None => err.error().to_string(),
                    };
                    callback(MediaEvent::EncounteredError(message));
                }

                gst::MessageView::StateChanged(change)
                    if change.current() == gst::State::Playing
                        && msg.src().is_some_and(|src| src.name().as_str() == playbin_name) =>
                {
                    callback(MediaEvent::Playing);
                }

                gst::MessageView::Element(_)
                    if gst_video::is_video_overlay_prepare_window_handle_message(msg) =>
                {
                    let handle = sync_window.lock().ok().and_then(|w| *w);
                    if let Some(handle) = handle
                        && let Some(overlay) = msg
                            .src()
                            .and_then(|src| src.dynamic_cast_ref::<gst_video::VideoOverlay>())
                    {
                        unsafe { overlay.set_window_handle(handle.0 as usize) };
                    }
                }

                _ => {}
            }
            gst::BusSyncReply::Drop
        });

        log::debug!("Created playbin {}", name);
        Ok(Self { playbin, window })
    }

    fn overlay(&self) -> Option<&gst_video::VideoOverlay> {
        self.playbin.dynamic_cast_ref::<gst_video::VideoOverlay>()
    }

    fn set_sink_fullscreen(&self, fullscreen: bool) {
        let Some(sink) = self.playbin.property::<Option<gst::Element>>("video-sink") else {
            return;
        };
        if sink.find_property("fullscreen").is_some() {
            sink.set_property("fullscreen", fullscreen);
        }
    }
}

impl MediaBackend for GstBackend {
    fn load(&mut self, path: &Path, hints: DecodeHints) -> Result<(), MediaError> {
        if hints.hardware_decode {
            prefer_hardware_decoders();
        }

        self.playbin
            .set_state(gst::State::Null)
            .map_err(|e| MediaError::State(e.to_string()))?;

        let uri = file_uri(path)?;
        self.playbin.set_property("uri", &uri);
        self.playbin.set_property("mute", !hints.audio);
        log::debug!("Loaded {}", uri);
        Ok(())
    }

    fn play(&mut self) -> Result<(), MediaError> {
        self.playbin
            .set_state(gst::State::Playing)
            .map_err(|e| MediaError::State(format!("Failed to start playback: {}", e)))?;
        Ok(())
    }

    fn stop(&mut self) {
        if let Err(e) = self.playbin.set_state(gst::State::Null) {
            log::warn!("Failed to stop playbin: {}", e);
        }
    }

    fn bind_surface(&mut self, handle: WindowHandle) -> Result<(), MediaError> {
        if let Ok(mut window) = self.window.lock() {
            *window = Some(handle);
        }
        self.set_sink_fullscreen(false);

        let overlay = self
            .overlay()
            .ok_or_else(|| MediaError::Bind("playbin has no video overlay".to_string()))?;
        unsafe { overlay.set_window_handle(handle.0 as usize) };
        Ok(())
    }

    fn detach_fullscreen(&mut self) -> Result<(), MediaError> {
        if let Ok(mut window) = self.window.lock() {
            *window = None;
        }

        let overlay = self
            .overlay()
            .ok_or_else(|| MediaError::Bind("playbin has no video overlay".to_string()))?;
        // A zero handle makes the sink create its own window
        unsafe { overlay.set_window_handle(0) };
        self.set_sink_fullscreen(true);
        Ok(())
    }

    fn set_best_fit(&mut self) {
        self.playbin.set_property("force-aspect-ratio", true);
    }

    fn start_probe(&mut self, path: &Path) -> Box<dyn PendingProbe> {
        match GstProbe::start(path) {
            Ok(probe) => Box::new(probe),
            Err(e) => {
                log::debug!("Resolution probe unavailable for {}: {}", path.display(), e);
                Box::new(FailedProbe)
            }
        }
    }

    fn video_size(&self) -> Option<(u32, u32)> {
        negotiated_size(&self.playbin)
    }
}

impl Drop for GstBackend {
    fn drop(&mut self) {
        let _ = self.playbin.set_state(gst::State::Null);
    }
}

/// Paused playbin with fake sinks, used only to read the video caps
struct GstProbe {
    playbin: gst::Element,
}

impl GstProbe {
    fn start(path: &Path) -> Result<Self, MediaError> {
        let playbin = gst::ElementFactory::make("playbin")
            .build()
            .map_err(|e| MediaError::Init(e.to_string()))?;

        let fake_sink = |kind: &str| {
            gst::ElementFactory::make("fakesink")
                .build()
                .map_err(|e| MediaError::Init(format!("Failed to create {} fakesink: {}", kind, e)))
        };
        playbin.set_property("video-sink", &fake_sink("video")?);
        playbin.set_property("audio-sink", &fake_sink("audio")?);
        playbin.set_property("uri", &file_uri(path)?);

        playbin
            .set_state(gst::State::Paused)
            .map_err(|e| MediaError::State(e.to_string()))?;

        Ok(Self { playbin })
    }
}

impl PendingProbe for GstProbe {
    fn poll(&mut self) -> ProbeStatus {
        if let Some(bus) = self.playbin.bus() {
            while let Some(msg) = bus.pop() {
                if let gst::MessageView::Error(err) = msg.view() {
                    log::debug!("Probe error: {}", err.error());
                    return ProbeStatus::Failed;
                }
            }
        }

        let (result, current, _pending) = self.playbin.state(gst::ClockTime::ZERO);
        if result.is_err() {
            return ProbeStatus::Failed;
        }
        if current != gst::State::Paused {
            return ProbeStatus::Pending;
        }

        match negotiated_size(&self.playbin) {
            Some((width, height)) => ProbeStatus::Ready { width, height },
            // Prerolled without a video stream
            None => ProbeStatus::Failed,
        }
    }
}

impl Drop for GstProbe {
    fn drop(&mut self) {
        let _ = self.playbin.set_state(gst::State::Null);
    }
}

struct FailedProbe;

impl PendingProbe for FailedProbe {
    fn poll(&mut self) -> ProbeStatus {
        ProbeStatus::Failed
    }
}
