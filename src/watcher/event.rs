//! Domain events delivered to subscribers, and translation from raw
//! `notify` events.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use notify::event::{EventKind, ModifyKind, RenameMode};

/// Whether a watched path is a single file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathKind {
    File,
    Directory,
}

/// What happened to a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Created,
    Deleted,
    Modified,
}

/// A change to one directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub change: ChangeKind,
}

impl FileEvent {
    pub fn new(path: impl Into<PathBuf>, change: ChangeKind) -> Self {
        Self {
            path: path.into(),
            change,
        }
    }
}

/// All entry changes reported for a watched directory in one batch.
///
/// `entries` may be empty: the event still signals directory activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEvent {
    pub path: PathBuf,
    pub entries: Vec<FileEvent>,
}

/// Event delivered to a [`Subscriber`](super::Subscriber).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    File(FileEvent),
    Directory(DirectoryEvent),
}

impl WatchEvent {
    /// The watched path this event is about.
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::File(event) => &event.path,
            WatchEvent::Directory(event) => &event.path,
        }
    }

    pub fn kind(&self) -> PathKind {
        match self {
            WatchEvent::File(_) => PathKind::File,
            WatchEvent::Directory(_) => PathKind::Directory,
        }
    }

    /// Change type, set for file events only.
    pub fn change(&self) -> Option<ChangeKind> {
        match self {
            WatchEvent::File(event) => Some(event.change),
            WatchEvent::Directory(_) => None,
        }
    }

    /// Per-entry events, set for directory events only.
    pub fn entries(&self) -> Option<&[FileEvent]> {
        match self {
            WatchEvent::File(_) => None,
            WatchEvent::Directory(event) => Some(&event.entries),
        }
    }
}

/// Translate one raw `notify` event into per-path changes.
///
/// Overflow (rescan) events and access events yield nothing.
pub(crate) fn translate(event: &notify::Event) -> Vec<(PathBuf, ChangeKind)> {
    if event.need_rescan() {
        return Vec::new();
    }

    let all = |change: ChangeKind| -> Vec<(PathBuf, ChangeKind)> {
        event.paths.iter().map(|p| (p.clone(), change)).collect()
    };

    match event.kind {
        EventKind::Create(_) => all(ChangeKind::Created),
        EventKind::Remove(_) => all(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => all(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => all(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let mut changes = Vec::with_capacity(2);
            if let Some(from) = event.paths.first() {
                changes.push((from.clone(), ChangeKind::Deleted));
            }
            if let Some(to) = event.paths.get(1) {
                changes.push((to.clone(), ChangeKind::Created));
            }
            changes
        }
        // Rename without a known direction: decide by what is on disk now.
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|p| {
                let change = if p.exists() {
                    ChangeKind::Created
                } else {
                    ChangeKind::Deleted
                };
                (p.clone(), change)
            })
            .collect(),
        EventKind::Modify(_) | EventKind::Any => all(ChangeKind::Modified),
        EventKind::Access(_) | EventKind::Other => Vec::new(),
    }
}

/// How many rename trackers each side of [`RenameFilter`] remembers.
const RENAME_MEMORY: usize = 128;

/// Suppresses the second report of one rename.
///
/// Some backends report a rename as separate `From` and `To` halves and
/// again as a paired `Both` event, all carrying the same tracker. Whichever
/// form arrives first is kept and the other is dropped, even when the two
/// land in different drains. Events without a tracker always pass.
#[derive(Debug, Default)]
pub(crate) struct RenameFilter {
    halves: VecDeque<usize>,
    pairs: VecDeque<usize>,
}

impl RenameFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false when `event` repeats a rename already reported.
    pub fn admit(&mut self, event: &notify::Event) -> bool {
        let Some(tracker) = event.tracker() else {
            return true;
        };
        let (seen, other) = match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::To)) => {
                (&mut self.halves, &self.pairs)
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                (&mut self.pairs, &self.halves)
            }
            _ => return true,
        };
        if other.contains(&tracker) {
            return false;
        }
        if !seen.contains(&tracker) {
            if seen.len() == RENAME_MEMORY {
                seen.pop_front();
            }
            seen.push_back(tracker);
        }
        true
    }
}
