//! Small filesystem layer: reading files, walking directory trees, and
//! the access-event hook an out-of-core prewarm collaborator can attach
//! to learn which files and directories a run touches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

/// Observer of filesystem accesses. All methods default to no-ops; a
/// prewarm collaborator outside the core can record a profile here.
pub trait FsEvents: Send + Sync {
    fn file_accessed(&self, _path: &Path) {}
    fn dir_listed(&self, _path: &Path) {}
}

/// Shared handle to an (optional) event observer.
pub type FsEventsHandle = Option<Arc<dyn FsEvents>>;

pub fn notify_file_access(events: &FsEventsHandle, path: &Path) {
    if let Some(events) = events {
        events.file_accessed(path);
    }
}

/// Read a file, `None` if that is not possible for any reason.
pub fn read_file_to_string(events: &FsEventsHandle, path: &Path) -> Option<String> {
    notify_file_access(events, path);
    std::fs::read_to_string(path).ok()
}

pub fn is_readable_file(events: &FsEventsHandle, path: &Path) -> bool {
    notify_file_access(events, path);
    path.is_file()
}

/// Recursively collect files below `root`. Directories are only entered
/// when `dir_predicate` accepts them; files are kept when
/// `file_predicate` accepts them. Symlinks are followed once; walk
/// errors (loops, permissions) are skipped. Result is sorted.
pub fn collect_files_recursive(
    events: &FsEventsHandle,
    root: &Path,
    mut dir_predicate: impl FnMut(&Path) -> bool,
    mut file_predicate: impl FnMut(&Path) -> bool,
) -> Vec<PathBuf> {
    let mut result = Vec::new();
    let walker = WalkDir::new(root)
        .follow_links(true)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            if entry.file_type().is_dir() {
                dir_predicate(entry.path())
            } else {
                true
            }
        });
    for entry in walker.flatten() {
        if entry.file_type().is_dir() {
            if let Some(events) = events {
                events.dir_listed(entry.path());
            }
            continue;
        }
        if file_predicate(entry.path()) {
            notify_file_access(events, entry.path());
            result.push(entry.into_path());
        }
    }
    result.sort();
    result
}
