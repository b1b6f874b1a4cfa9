//! Naming rule for transcoded ("optimized") assets.
//!
//! For a raw asset `dir/name.ext` the optimized variant is
//! `dir/name<suffix>.ext`. The playlist scanner (read side) and the
//! optimizer (write side) both go through [`OptimizedNaming`] so they always
//! agree on what "already optimized" means.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizedNaming {
    suffix: String,
}

impl OptimizedNaming {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Whether the file name (without extension) already carries the suffix
    pub fn is_optimized(&self, path: &Path) -> bool {
        if self.suffix.is_empty() {
            return false;
        }
        path.file_stem()
            .and_then(|s| s.to_str())
            .is_some_and(|stem| stem.ends_with(&self.suffix))
    }

    /// `dir/name.ext` -> `dir/name<suffix>.ext`
    pub fn optimized_path_for(&self, path: &Path) -> PathBuf {
        let stem = path.file_stem().unwrap_or_default();
        let mut name = OsString::from(stem);
        name.push(&self.suffix);
        if let Some(ext) = path.extension() {
            name.push(".");
            name.push(ext);
        }
        path.with_file_name(name)
    }

    /// Key shared by a raw asset and its optimized twin: `dir/name.ext`
    fn logical_key(&self, path: &Path) -> PathBuf {
        if self.suffix.is_empty() {
            return path.to_path_buf();
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            return path.to_path_buf();
        };
        let Some(base) = stem.strip_suffix(self.suffix.as_str()) else {
            return path.to_path_buf();
        };

        let mut name = OsString::from(base);
        if let Some(ext) = path.extension() {
            name.push(".");
            name.push(ext);
        }
        path.with_file_name(name)
    }

    /// Whether a raw video still needs transcoding
    pub fn needs_optimization(&self, path: &Path) -> bool {
        !self.is_optimized(path) && !self.optimized_path_for(path).exists()
    }

    /// Collapse raw/optimized pairs to one entry per logical asset.
    ///
    /// An optimized file always wins over its raw twin, whichever order they
    /// arrive in. A raw file without an optimized twin in the input is
    /// replaced by the twin when that exists on disk. The result is sorted.
    pub fn resolve<I>(&self, files: I) -> Vec<PathBuf>
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut winners: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();

        for file in files {
            if self.is_optimized(&file) {
                winners.insert(self.logical_key(&file), file);
                continue;
            }

            if winners.contains_key(&file) {
                continue;
            }

            let twin = self.optimized_path_for(&file);
            let winner = if twin.exists() { twin } else { file.clone() };
            winners.insert(file, winner);
        }

        let mut resolved: Vec<PathBuf> = winners.into_values().collect();
        resolved.sort();
        resolved
    }
}

impl Default for OptimizedNaming {
    fn default() -> Self {
        Self::new("_optimized")
    }
}
