//! HandBrakeCLI location and invocation

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use super::{OptimizeJob, OptimizerSettings};

pub const EXECUTABLE: &str = "HandBrakeCLI";

/// Checked before falling back to `PATH`
const SEARCH_PATHS: &[&str] = &["/usr/bin/HandBrakeCLI", "/usr/local/bin/HandBrakeCLI"];

/// Find the transcoder executable.
///
/// A configured path is used as-is and never falls back to searching.
pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        if is_executable(path) {
            return Some(path.to_path_buf());
        }
        log::warn!("Configured transcoder {} is not executable", path.display());
        return None;
    }

    SEARCH_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| is_executable(p))
        .or_else(|| find_in_path(EXECUTABLE))
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(name))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Command line for one job
pub fn arguments(job: &OptimizeJob, settings: &OptimizerSettings) -> Vec<OsString> {
    let mut args: Vec<OsString> = Vec::with_capacity(16);
    args.push("-i".into());
    args.push(job.input.clone().into_os_string());
    args.push("-o".into());
    args.push(job.output.clone().into_os_string());
    args.push("--preset".into());
    args.push(settings.preset.clone().into());
    args.push("--encoder".into());
    args.push(settings.encoder.clone().into());
    args.push("--quality".into());
    args.push(settings.quality.to_string().into());
    args.push("--encoder-preset".into());
    args.push(settings.encoder_preset.clone().into());
    args.push("--no-markers".into());
    args.push("--optimize".into());
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments() {
        let settings = OptimizerSettings::default();
        let job = OptimizeJob {
            input: PathBuf::from("/p/clip.mp4"),
            output: PathBuf::from("/p/clip_optimized.mp4"),
        };

        let args: Vec<String> = arguments(&job, &settings)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "-i",
                "/p/clip.mp4",
                "-o",
                "/p/clip_optimized.mp4",
                "--preset",
                "H.265 MKV 1080p30",
                "--encoder",
                "x265",
                "--quality",
                "22",
                "--encoder-preset",
                "medium",
                "--no-markers",
                "--optimize",
            ]
        );
    }

    #[test]
    fn test_explicit_path_must_be_executable() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("HandBrakeCLI");
        fs::write(&plain, "#!/bin/sh\n").unwrap();

        assert!(locate(Some(&dir.path().join("missing"))).is_none());
        assert!(locate(Some(&plain)).is_none());

        fs::set_permissions(&plain, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(locate(Some(&plain)), Some(plain));
    }
}
