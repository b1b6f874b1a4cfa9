//! Background video optimizer
//!
//! Finds zone videos without an optimized twin and transcodes them one at a
//! time with HandBrakeCLI. A failed job never stops the batch, and every pass
//! ends with exactly one [`OptimizerEvent::Finished`], which is the cue to
//! rescan the playlists.
//!
//! Batch state machine:
//! `Idle -> Scanning -> Running job 1..N (sequentially) -> Idle`

mod handbrake;

use common::{MediaKind, OptimizerStatus};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use walkdir::WalkDir;

use crate::config::Config;
use crate::optimized::OptimizedNaming;

/// One transcode: `input` -> `output`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizeJob {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl OptimizeJob {
    fn file_name(&self) -> String {
        self.input
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizeOutcome {
    /// Every queued job ran (some may have failed)
    Completed,
    /// Nothing needed transcoding
    AlreadyOptimized,
    /// Transcoder not installed
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OptimizerEvent {
    StatusChanged(String),
    Progress { completed: usize, total: usize },
    FileOptimized { input: PathBuf, output: PathBuf },
    Error { input: PathBuf, message: String },
    Finished(OptimizeOutcome),
}

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transcoder exited with {0}")]
    Exit(ExitStatus),

    #[error("failed to wait for transcoder: {0}")]
    Wait(#[source] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct OptimizerSettings {
    /// Zone directories to search
    pub roots: Vec<PathBuf>,
    pub naming: OptimizedNaming,
    pub preset: String,
    pub encoder: String,
    pub quality: u32,
    pub encoder_preset: String,
    pub transcoder_path: Option<PathBuf>,
    /// How long to wait for a killed transcoder to exit
    pub cancel_timeout: Duration,
}

impl OptimizerSettings {
    pub fn from_config(config: &Config, roots: Vec<PathBuf>) -> Self {
        let opt = &config.optimization;
        Self {
            roots,
            naming: OptimizedNaming::new(opt.suffix.clone()),
            preset: opt.preset.clone(),
            encoder: opt.encoder.clone(),
            quality: opt.quality,
            encoder_preset: opt.encoder_preset.clone(),
            transcoder_path: config.transcoder_path(),
            cancel_timeout: Duration::from_millis(opt.cancel_timeout_ms),
        }
    }
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default(), Vec::new())
    }
}

/// Videos under `roots` that still need transcoding, in discovery order
pub fn discover_jobs(roots: &[PathBuf], naming: &OptimizedNaming) -> Vec<OptimizeJob> {
    roots
        .iter()
        .filter(|root| root.is_dir())
        .flat_map(|root| {
            WalkDir::new(root)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(Result::ok)
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| MediaKind::from_path(path) == MediaKind::Video)
        .filter(|path| naming.needs_optimization(path))
        .map(|input| OptimizeJob {
            output: naming.optimized_path_for(&input),
            input,
        })
        .collect()
}

/// Status mirror plus event channel shared with the running batch
#[derive(Clone)]
struct Reporter {
    status: Arc<Mutex<OptimizerStatus>>,
    events: UnboundedSender<OptimizerEvent>,
}

impl Reporter {
    fn emit(&self, event: OptimizerEvent) {
        let _ = self.events.send(event);
    }

    fn update(&self, f: impl FnOnce(&mut OptimizerStatus)) {
        if let Ok(mut status) = self.status.lock() {
            f(&mut status);
        }
    }

    fn set_message(&self, message: impl Into<String>) {
        let message = message.into();
        log::info!("{}", message);
        self.update(|s| s.status_message = message.clone());
        self.emit(OptimizerEvent::StatusChanged(message));
    }

    fn set_progress(&self, completed: usize, total: usize) {
        self.update(|s| {
            s.completed_files = completed;
            s.total_files = total;
        });
        self.emit(OptimizerEvent::Progress { completed, total });
    }
}

enum JobOutcome {
    Finished,
    Cancelled,
}

/// Handle to the optimizer; at most one batch runs at a time
pub struct VideoOptimizer {
    settings: Arc<OptimizerSettings>,
    reporter: Reporter,
    cancel: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl VideoOptimizer {
    pub fn new(settings: OptimizerSettings, events: UnboundedSender<OptimizerEvent>) -> Self {
        Self {
            settings: Arc::new(settings),
            reporter: Reporter {
                status: Arc::new(Mutex::new(OptimizerStatus::default())),
                events,
            },
            cancel: None,
            task: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status().optimizing
    }

    pub fn status(&self) -> OptimizerStatus {
        self.reporter
            .status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Fraction of the current batch done; 1.0 when there is nothing to do
    pub fn progress(&self) -> f64 {
        self.status().progress()
    }

    /// Start a batch in the background. Returns false if one is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            log::debug!("Optimization already running");
            return false;
        }

        self.reporter.update(|s| {
            s.optimizing = true;
            s.total_files = 0;
            s.completed_files = 0;
        });

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let batch = Batch {
            settings: self.settings.clone(),
            reporter: self.reporter.clone(),
            cancel: cancel_rx,
        };

        self.cancel = Some(cancel_tx);
        self.task = Some(tokio::spawn(batch.run()));
        true
    }

    /// Cancel the running batch and wait until it is idle. No-op when idle.
    pub async fn cancel(&mut self) {
        let Some(cancel) = self.cancel.take() else {
            return;
        };
        if !self.is_running() {
            return;
        }

        log::info!("Cancelling optimization");
        let _ = cancel.send(true);

        if let Some(task) = self.task.take()
            && let Err(e) = task.await
        {
            log::error!("Optimizer task failed: {}", e);
        }
    }
}

struct Batch {
    settings: Arc<OptimizerSettings>,
    reporter: Reporter,
    cancel: watch::Receiver<bool>,
}

impl Batch {
    async fn run(mut self) {
        let outcome = self.process().await;
        self.reporter.update(|s| s.optimizing = false);
        self.reporter.emit(OptimizerEvent::Finished(outcome));
    }

    async fn process(&mut self) -> OptimizeOutcome {
        let Some(program) = handbrake::locate(self.settings.transcoder_path.as_deref()) else {
            log::warn!("{} not found", handbrake::EXECUTABLE);
            self.reporter
                .set_message("Transcoder not found - skipping optimization");
            return OptimizeOutcome::Skipped;
        };

        self.reporter.set_message("Scanning for unoptimized videos");
        let roots = self.settings.roots.clone();
        let naming = self.settings.naming.clone();
        let jobs = match tokio::task::spawn_blocking(move || discover_jobs(&roots, &naming)).await
        {
            Ok(jobs) => jobs,
            Err(e) => {
                log::error!("Failed to scan for unoptimized videos: {}", e);
                Vec::new()
            }
        };

        if jobs.is_empty() {
            self.reporter.set_message("All videos already optimized");
            return OptimizeOutcome::AlreadyOptimized;
        }

        let total = jobs.len();
        log::info!(
            "Optimizing {} video(s) with {}",
            total,
            program.display()
        );
        self.reporter.set_progress(0, total);

        for (index, job) in jobs.iter().enumerate() {
            if *self.cancel.borrow() {
                return self.cancelled();
            }

            self.reporter.set_message(format!(
                "Optimizing ({}/{}): {}",
                index + 1,
                total,
                job.file_name()
            ));

            match self.run_job(&program, job).await {
                Ok(JobOutcome::Finished) => {
                    log::info!("Optimized {}", job.output.display());
                    self.reporter.emit(OptimizerEvent::FileOptimized {
                        input: job.input.clone(),
                        output: job.output.clone(),
                    });
                }
                Ok(JobOutcome::Cancelled) => return self.cancelled(),
                Err(e) => {
                    log::warn!("Failed to optimize {}: {}", job.input.display(), e);
                    self.reporter.emit(OptimizerEvent::Error {
                        input: job.input.clone(),
                        message: e.to_string(),
                    });
                }
            }

            self.reporter.set_progress(index + 1, total);
        }

        self.reporter.set_message("Optimization complete");
        OptimizeOutcome::Completed
    }

    fn cancelled(&self) -> OptimizeOutcome {
        self.reporter.set_message("Optimization cancelled");
        OptimizeOutcome::Cancelled
    }

    async fn run_job(
        &mut self,
        program: &Path,
        job: &OptimizeJob,
    ) -> Result<JobOutcome, OptimizerError> {
        let mut child = Command::new(program)
            .args(handbrake::arguments(job, &self.settings))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| OptimizerError::Launch {
                program: program.display().to_string(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        let exit = tokio::select! {
            status = child.wait() => Some(status),
            _ = cancel_requested(&mut self.cancel) => None,
        };

        match exit {
            Some(Ok(status)) if status.success() => Ok(JobOutcome::Finished),
            Some(Ok(status)) => Err(OptimizerError::Exit(status)),
            Some(Err(e)) => Err(OptimizerError::Wait(e)),
            None => {
                self.terminate(&mut child).await;
                Ok(JobOutcome::Cancelled)
            }
        }
    }

    /// Kill the transcoder and wait a bounded time for it to exit
    async fn terminate(&self, child: &mut Child) {
        if let Err(e) = child.start_kill() {
            log::warn!("Failed to kill transcoder: {}", e);
        }

        match tokio::time::timeout(self.settings.cancel_timeout, child.wait()).await {
            Ok(Ok(status)) => log::debug!("Transcoder exited after cancel: {}", status),
            Ok(Err(e)) => log::warn!("Failed to wait for transcoder: {}", e),
            Err(_) => log::warn!(
                "Transcoder did not exit within {:?} of cancel",
                self.settings.cancel_timeout
            ),
        }
    }
}

/// Resolves once cancellation is requested; never resolves if the handle is gone
async fn cancel_requested(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// Transcoder output is only logged, never parsed
async fn forward_output<R>(reader: R, stream: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        log::debug!("[{} {}] {}", handbrake::EXECUTABLE, stream, line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Instant;
    use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, b"video").unwrap();
    }

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-handbrake.sh");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn settings(root: &Path, transcoder: PathBuf) -> OptimizerSettings {
        OptimizerSettings {
            roots: vec![root.join("playlist-main"), root.join("playlist-vertical")],
            transcoder_path: Some(transcoder),
            cancel_timeout: Duration::from_secs(2),
            ..OptimizerSettings::default()
        }
    }

    async fn until_finished(rx: &mut UnboundedReceiver<OptimizerEvent>) -> Vec<OptimizerEvent> {
        tokio::time::timeout(Duration::from_secs(20), async {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                let done = matches!(event, OptimizerEvent::Finished(_));
                events.push(event);
                if done {
                    break;
                }
            }
            events
        })
        .await
        .expect("optimizer did not finish")
    }

    #[test]
    fn test_discover_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("playlist-main");
        touch(&main.join("b.mp4"));
        touch(&main.join("a.mkv"));
        touch(&main.join("done.mp4"));
        touch(&main.join("done_optimized.mp4"));
        touch(&main.join("poster.jpg"));
        touch(&main.join("nested/c.mov"));

        let naming = OptimizedNaming::default();
        let jobs = discover_jobs(&[main.clone(), dir.path().join("missing")], &naming);

        let inputs: Vec<PathBuf> = jobs.iter().map(|j| j.input.clone()).collect();
        assert_eq!(
            inputs,
            vec![main.join("a.mkv"), main.join("b.mp4"), main.join("nested/c.mov")]
        );
        assert_eq!(jobs[0].output, main.join("a_optimized.mkv"));
    }

    #[tokio::test]
    async fn test_missing_transcoder_skips() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("playlist-main/a.mp4"));

        let (tx, mut rx) = unbounded_channel();
        let mut optimizer =
            VideoOptimizer::new(settings(dir.path(), dir.path().join("missing")), tx);
        assert!(optimizer.start());

        let events = until_finished(&mut rx).await;
        assert_eq!(
            events.last(),
            Some(&OptimizerEvent::Finished(OptimizeOutcome::Skipped))
        );
        let status = optimizer.status();
        assert!(!status.optimizing);
        assert!(status.status_message.contains("not found"));
    }

    #[tokio::test]
    async fn test_nothing_to_do() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("playlist-main/a.mp4"));
        touch(&dir.path().join("playlist-main/a_optimized.mp4"));
        let script = write_script(dir.path(), "exit 0");

        let (tx, mut rx) = unbounded_channel();
        let mut optimizer = VideoOptimizer::new(settings(dir.path(), script), tx);
        optimizer.start();

        let events = until_finished(&mut rx).await;
        assert_eq!(
            events.last(),
            Some(&OptimizerEvent::Finished(OptimizeOutcome::AlreadyOptimized))
        );
        assert_eq!(optimizer.progress(), 1.0);
        assert_eq!(
            optimizer.status().status_message,
            "All videos already optimized"
        );
    }

    #[tokio::test]
    async fn test_failed_job_does_not_stop_batch() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("playlist-main");
        touch(&main.join("a.mp4"));
        touch(&main.join("b.mp4"));
        touch(&main.join("c.mp4"));
        let script = write_script(
            dir.path(),
            "case \"$2\" in *b.mp4) echo 'encode failed' >&2; exit 1;; esac\ncp \"$2\" \"$4\"",
        );

        let (tx, mut rx) = unbounded_channel();
        let mut optimizer = VideoOptimizer::new(settings(dir.path(), script), tx);
        assert!(optimizer.start());

        let events = until_finished(&mut rx).await;
        assert_eq!(
            events.last(),
            Some(&OptimizerEvent::Finished(OptimizeOutcome::Completed))
        );

        let optimized = events
            .iter()
            .filter(|e| matches!(e, OptimizerEvent::FileOptimized { .. }))
            .count();
        let errors: Vec<&PathBuf> = events
            .iter()
            .filter_map(|e| match e {
                OptimizerEvent::Error { input, .. } => Some(input),
                _ => None,
            })
            .collect();
        assert_eq!(optimized, 2);
        assert_eq!(errors, vec![&main.join("b.mp4")]);

        let status = optimizer.status();
        assert_eq!(status.completed_files, 3);
        assert_eq!(status.total_files, 3);
        assert!(!status.optimizing);
        assert_eq!(status.status_message, "Optimization complete");
        assert!(main.join("a_optimized.mp4").exists());
        assert!(main.join("c_optimized.mp4").exists());
        assert!(!main.join("b_optimized.mp4").exists());
    }

    #[tokio::test]
    async fn test_cancel_mid_job() {
        let dir = tempfile::tempdir().unwrap();
        let main = dir.path().join("playlist-main");
        touch(&main.join("a.mp4"));
        touch(&main.join("b.mp4"));
        let script = write_script(dir.path(), "exec sleep 30");

        let (tx, mut rx) = unbounded_channel();
        let mut optimizer = VideoOptimizer::new(settings(dir.path(), script), tx);
        assert!(optimizer.start());
        assert!(!optimizer.start());

        // Wait for the first job to be running
        tokio::time::timeout(Duration::from_secs(10), async {
            while let Some(event) = rx.recv().await {
                if matches!(&event, OptimizerEvent::StatusChanged(m) if m.starts_with("Optimizing (1/2)"))
                {
                    break;
                }
            }
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        optimizer.cancel().await;
        assert!(started.elapsed() < Duration::from_secs(5));

        let status = optimizer.status();
        assert!(!status.optimizing);
        assert_eq!(status.completed_files, 0);
        assert_eq!(status.status_message, "Optimization cancelled");

        let rest = until_finished(&mut rx).await;
        assert_eq!(
            rest.last(),
            Some(&OptimizerEvent::Finished(OptimizeOutcome::Cancelled))
        );
        assert!(!rest.iter().any(
            |e| matches!(e, OptimizerEvent::StatusChanged(m) if m.starts_with("Optimizing (2/2)"))
        ));
    }

    #[tokio::test]
    async fn test_cancel_when_idle_is_noop() {
        let (tx, _rx) = unbounded_channel();
        let mut optimizer = VideoOptimizer::new(OptimizerSettings::default(), tx);
        optimizer.cancel().await;
        assert!(!optimizer.is_running());
        assert_eq!(optimizer.progress(), 1.0);
    }
}
