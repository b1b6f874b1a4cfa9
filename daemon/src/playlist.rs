use common::{MediaKind, ZoneId};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::optimized::OptimizedNaming;

/// One playlist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub path: PathBuf,
    pub kind: MediaKind,
    pub optimized: bool,
}

impl MediaItem {
    pub fn new(path: PathBuf, naming: &OptimizedNaming) -> Self {
        let kind = MediaKind::from_path(&path);
        let optimized = naming.is_optimized(&path);
        Self {
            path,
            kind,
            optimized,
        }
    }

    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Scan a zone directory recursively for playable media.
///
/// A missing directory yields an empty list. The result is sorted and
/// raw/optimized pairs are collapsed to one canonical entry.
pub fn scan_directory(root: &Path, naming: &OptimizedNaming) -> Vec<PathBuf> {
    if !root.is_dir() {
        log::debug!("Playlist directory {} does not exist", root.display());
        return Vec::new();
    }

    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| MediaKind::from_path(path).is_supported())
        .collect();

    files.sort();
    naming.resolve(files)
}

/// Canonical file lists for all four zones
#[derive(Debug, Clone)]
pub struct PlaylistService {
    root: PathBuf,
    naming: OptimizedNaming,
    lists: BTreeMap<ZoneId, Vec<PathBuf>>,
}

impl PlaylistService {
    pub fn new(root: impl Into<PathBuf>, naming: OptimizedNaming) -> Self {
        Self {
            root: root.into(),
            naming,
            lists: BTreeMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn zone_dir(&self, zone: ZoneId) -> PathBuf {
        self.root.join(zone.folder_name())
    }

    /// Directories of all zones, in layout order
    pub fn zone_dirs(&self) -> Vec<PathBuf> {
        ZoneId::ALL.iter().map(|z| self.zone_dir(*z)).collect()
    }

    /// Rescan every zone, returning the zones whose list changed
    pub fn scan_all(&mut self) -> Vec<ZoneId> {
        let changed: Vec<ZoneId> = ZoneId::ALL
            .into_iter()
            .filter(|zone| self.scan_zone(*zone))
            .collect();

        log::info!(
            "Scanned {} ({} files, {} zone(s) changed)",
            self.root.display(),
            self.total_file_count(),
            changed.len()
        );
        changed
    }

    /// Rescan one zone; the other zones' lists are left untouched.
    ///
    /// Returns true when the list differs from the previous scan.
    pub fn scan_zone(&mut self, zone: ZoneId) -> bool {
        let files = scan_directory(&self.zone_dir(zone), &self.naming);
        log::debug!("[{}] {} playlist file(s)", zone, files.len());

        let changed = self.files_for(zone) != files.as_slice();
        self.lists.insert(zone, files);
        changed
    }

    /// Take over the lists of a copy that was scanned elsewhere, returning
    /// the zones whose list differs from the current one
    pub fn adopt(&mut self, scanned: PlaylistService) -> Vec<ZoneId> {
        let changed = ZoneId::ALL
            .into_iter()
            .filter(|zone| self.files_for(*zone) != scanned.files_for(*zone))
            .collect();
        self.lists = scanned.lists;
        changed
    }

    pub fn files_for(&self, zone: ZoneId) -> &[PathBuf] {
        self.lists.get(&zone).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Playlist entries for a zone, ready to hand to its player
    pub fn items_for(&self, zone: ZoneId) -> Vec<MediaItem> {
        self.files_for(zone)
            .iter()
            .map(|p| MediaItem::new(p.clone(), &self.naming))
            .collect()
    }

    pub fn total_file_count(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }
}
