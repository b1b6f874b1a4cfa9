//! Scripted media backend and surface provider for tests

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::{DecodeHints, MediaBackend, MediaError, PendingProbe, ProbeStatus};
use crate::surface::{ChildSurface, Rect, SurfaceError, SurfaceProvider, WindowHandle};

/// How the probe for a given file behaves
#[derive(Debug, Clone, Copy)]
pub enum ProbeScript {
    Size(u32, u32),
    Fail,
    /// Stays pending forever
    Hang,
}

/// Everything the fake backend was asked to do
#[derive(Debug, Default)]
pub struct BackendLog {
    pub loads: Vec<PathBuf>,
    pub plays: usize,
    pub stops: usize,
    pub binds: Vec<WindowHandle>,
    pub detaches: usize,
    pub probes: usize,
    pub probe_polls: usize,
}

#[derive(Clone, Default)]
pub struct FakeBackend {
    pub log: Arc<Mutex<BackendLog>>,
    probes: Arc<Mutex<HashMap<PathBuf, ProbeScript>>>,
    /// Size reported once playing; defaults to the probed size
    reported: Arc<Mutex<HashMap<PathBuf, (u32, u32)>>>,
    fail_load: bool,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_loads() -> Self {
        Self {
            fail_load: true,
            ..Self::default()
        }
    }

    pub fn script_probe(&self, path: impl Into<PathBuf>, script: ProbeScript) {
        self.probes.lock().unwrap().insert(path.into(), script);
    }

    pub fn report_size(&self, path: impl Into<PathBuf>, width: u32, height: u32) {
        self.reported
            .lock()
            .unwrap()
            .insert(path.into(), (width, height));
    }

    pub fn boxed(&self) -> Box<dyn MediaBackend> {
        Box::new(self.clone())
    }
}

impl MediaBackend for FakeBackend {
    fn load(&mut self, path: &Path, _hints: DecodeHints) -> Result<(), MediaError> {
        if self.fail_load {
            return Err(MediaError::Load {
                path: path.display().to_string(),
                reason: "scripted failure".to_string(),
            });
        }
        self.log.lock().unwrap().loads.push(path.to_path_buf());
        Ok(())
    }

    fn play(&mut self) -> Result<(), MediaError> {
        self.log.lock().unwrap().plays += 1;
        Ok(())
    }

    fn stop(&mut self) {
        self.log.lock().unwrap().stops += 1;
    }

    fn bind_surface(&mut self, handle: WindowHandle) -> Result<(), MediaError> {
        self.log.lock().unwrap().binds.push(handle);
        Ok(())
    }

    fn detach_fullscreen(&mut self) -> Result<(), MediaError> {
        self.log.lock().unwrap().detaches += 1;
        Ok(())
    }

    fn set_best_fit(&mut self) {}

    fn start_probe(&mut self, path: &Path) -> Box<dyn PendingProbe> {
        self.log.lock().unwrap().probes += 1;
        let script = self
            .probes
            .lock()
            .unwrap()
            .get(path)
            .copied()
            .unwrap_or(ProbeScript::Fail);
        Box::new(FakeProbe {
            script,
            log: self.log.clone(),
        })
    }

    fn video_size(&self) -> Option<(u32, u32)> {
        let current = self.log.lock().unwrap().loads.last().cloned()?;
        if let Some(size) = self.reported.lock().unwrap().get(&current) {
            return Some(*size);
        }
        match self.probes.lock().unwrap().get(&current) {
            Some(ProbeScript::Size(w, h)) => Some((*w, *h)),
            _ => None,
        }
    }
}

struct FakeProbe {
    script: ProbeScript,
    log: Arc<Mutex<BackendLog>>,
}

impl PendingProbe for FakeProbe {
    fn poll(&mut self) -> ProbeStatus {
        self.log.lock().unwrap().probe_polls += 1;
        match self.script {
            ProbeScript::Size(width, height) => ProbeStatus::Ready { width, height },
            ProbeScript::Fail => ProbeStatus::Failed,
            ProbeScript::Hang => ProbeStatus::Pending,
        }
    }
}

/// Everything done to fake surfaces
#[derive(Debug, Default)]
pub struct SurfaceLog {
    pub created: Vec<(WindowHandle, Rect)>,
    pub geometry: Vec<Rect>,
    pub shows: usize,
    pub hides: usize,
    pub raises: usize,
    pub lowers: usize,
}

#[derive(Default)]
pub struct FakeSurfaceProvider {
    pub log: Arc<Mutex<SurfaceLog>>,
    parent: Option<WindowHandle>,
}

impl FakeSurfaceProvider {
    pub fn with_parent(parent: WindowHandle) -> Self {
        Self {
            log: Arc::default(),
            parent: Some(parent),
        }
    }
}

impl SurfaceProvider for FakeSurfaceProvider {
    fn parent_window(&self) -> Option<WindowHandle> {
        self.parent
    }

    fn create_child(
        &self,
        parent: WindowHandle,
        rect: Rect,
    ) -> Result<Box<dyn ChildSurface>, SurfaceError> {
        let mut log = self.log.lock().unwrap();
        log.created.push((parent, rect));
        let handle = WindowHandle(1000 + log.created.len() as u64);
        Ok(Box::new(FakeSurface {
            handle,
            parent,
            log: self.log.clone(),
        }))
    }
}

struct FakeSurface {
    handle: WindowHandle,
    parent: WindowHandle,
    log: Arc<Mutex<SurfaceLog>>,
}

impl ChildSurface for FakeSurface {
    fn handle(&self) -> WindowHandle {
        self.handle
    }

    fn parent(&self) -> WindowHandle {
        self.parent
    }

    fn set_geometry(&mut self, rect: Rect) {
        self.log.lock().unwrap().geometry.push(rect);
    }

    fn show(&mut self) {
        self.log.lock().unwrap().shows += 1;
    }

    fn hide(&mut self) {
        self.log.lock().unwrap().hides += 1;
    }

    fn raise(&mut self) {
        self.log.lock().unwrap().raises += 1;
    }

    fn lower(&mut self) {
        self.log.lock().unwrap().lowers += 1;
    }
}
