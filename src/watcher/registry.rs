//! Watch registry: who is subscribed to which path, and which native keys
//! back those subscriptions.
//!
//! The registry is owned by the confinement worker and is never shared
//! between threads, so it carries no locks. It lives in a `RefCell` so that
//! subscriber callbacks, which run on the worker while a batch is being
//! processed, can re-enter the watcher and mutate it: every borrow taken by
//! [`process_batch`] is released before a callback runs.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::ops::Bound;
use std::path::{Path, PathBuf};

use super::backend::NativeBackend;
use super::error::WatchError;
use super::event::{ChangeKind, DirectoryEvent, FileEvent, PathKind, WatchEvent};
use super::subscriber::Subscriber;
use super::subscribers::{FireSnapshot, SubscriberList};

/// One raw change reported under a native key: the affected entry name and
/// what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChange {
    pub name: OsString,
    pub change: ChangeKind,
}

/// Outcome of processing one batch for a native key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVerdict {
    /// Something under the key is still of interest; keep it.
    Reset,
    /// Nothing is left to watch; the key has been released.
    Cancel,
}

/// A path with at least one subscriber.
#[derive(Debug)]
pub struct WatchedPath {
    path: PathBuf,
    kind: PathKind,
    /// Directory whose native key delivers events for this path.
    key: PathBuf,
    subscribers: SubscriberList,
}

impl WatchedPath {
    fn new(path: PathBuf, kind: PathKind, key: PathBuf, subscriber: Subscriber) -> Self {
        Self {
            path,
            kind,
            key,
            subscribers: SubscriberList::Empty.add(subscriber),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> PathKind {
        self.kind
    }

    pub fn key(&self) -> &Path {
        &self.key
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn add(&mut self, subscriber: Subscriber) {
        self.subscribers = std::mem::take(&mut self.subscribers).add(subscriber);
    }

    fn remove(&mut self, subscriber: &Subscriber) {
        self.subscribers = std::mem::take(&mut self.subscribers).remove(subscriber);
    }
}

/// Path-ordered file and directory subscriptions plus live native keys.
pub struct WatchRegistry {
    files: BTreeMap<PathBuf, WatchedPath>,
    directories: BTreeMap<PathBuf, WatchedPath>,
    keys: BTreeSet<PathBuf>,
    backend: Box<dyn NativeBackend>,
}

impl WatchRegistry {
    pub fn new(backend: Box<dyn NativeBackend>) -> Self {
        Self {
            files: BTreeMap::new(),
            directories: BTreeMap::new(),
            keys: BTreeSet::new(),
            backend,
        }
    }

    /// Subscribe to changes of a single file.
    ///
    /// `path` must already be normalized and absolute. Returns `Ok(false)`
    /// without side effects when `path` is a directory or its parent does not
    /// exist.
    pub fn subscribe_file(
        &mut self,
        path: &Path,
        subscriber: &Subscriber,
    ) -> Result<bool, WatchError> {
        if let Some(key) = self.files.get(path).map(|entry| entry.key.clone()) {
            self.revive_key(&key)?;
            if let Some(entry) = self.files.get_mut(path) {
                entry.add(subscriber.clone());
            }
            return Ok(true);
        }

        if path.is_dir() {
            return Ok(false);
        }
        let Some(parent) = path.parent().filter(|p| p.is_dir()) else {
            return Ok(false);
        };

        self.ensure_key(parent)?;
        self.files.insert(
            path.to_path_buf(),
            WatchedPath::new(
                path.to_path_buf(),
                PathKind::File,
                parent.to_path_buf(),
                subscriber.clone(),
            ),
        );
        crate::debug_event!("watcher", "watching file", "{}", path.display());
        Ok(true)
    }

    /// Subscribe to changes of the entries of a directory.
    pub fn subscribe_directory(
        &mut self,
        path: &Path,
        subscriber: &Subscriber,
    ) -> Result<bool, WatchError> {
        if self.directories.contains_key(path) {
            self.revive_key(path)?;
            if let Some(entry) = self.directories.get_mut(path) {
                entry.add(subscriber.clone());
            }
            return Ok(true);
        }

        if !path.is_dir() {
            return Ok(false);
        }

        self.ensure_key(path)?;
        self.directories.insert(
            path.to_path_buf(),
            WatchedPath::new(
                path.to_path_buf(),
                PathKind::Directory,
                path.to_path_buf(),
                subscriber.clone(),
            ),
        );
        crate::debug_event!("watcher", "watching directory", "{}", path.display());
        Ok(true)
    }

    /// Remove a file subscription. Returns whether the entry was removed.
    ///
    /// The native key is left alone; the dispatcher releases it on the next
    /// batch for that key if nothing else needs it.
    pub fn unsubscribe_file(&mut self, path: &Path, subscriber: &Subscriber) -> bool {
        Self::unsubscribe(&mut self.files, path, subscriber)
    }

    pub fn unsubscribe_directory(&mut self, path: &Path, subscriber: &Subscriber) -> bool {
        Self::unsubscribe(&mut self.directories, path, subscriber)
    }

    fn unsubscribe(
        table: &mut BTreeMap<PathBuf, WatchedPath>,
        path: &Path,
        subscriber: &Subscriber,
    ) -> bool {
        let Some(entry) = table.get_mut(path) else {
            return false;
        };
        entry.remove(subscriber);
        if entry.subscribers.is_empty() {
            table.remove(path);
            crate::debug_event!("watcher", "unwatched", "{}", path.display());
            return true;
        }
        false
    }

    fn ensure_key(&mut self, dir: &Path) -> Result<(), WatchError> {
        if self.keys.contains(dir) {
            return Ok(());
        }
        self.backend.register(dir)?;
        self.keys.insert(dir.to_path_buf());
        Ok(())
    }

    /// Register `dir` again if its key was forgotten while subscriptions
    /// under it survived.
    fn revive_key(&mut self, dir: &Path) -> Result<(), WatchError> {
        if self.keys.contains(dir) || !dir.is_dir() {
            return Ok(());
        }
        crate::debug_event!("watcher", "reviving key", "{}", dir.display());
        self.ensure_key(dir)
    }

    fn release_key(&mut self, dir: &Path) {
        self.forget_key(dir);
        self.directories.remove(dir);
    }

    /// Drop the native key for `dir` without touching subscriptions.
    fn forget_key(&mut self, dir: &Path) -> bool {
        if !self.keys.remove(dir) {
            return false;
        }
        self.backend.cancel(dir);
        true
    }

    pub fn has_key(&self, dir: &Path) -> bool {
        self.keys.contains(dir)
    }

    pub fn is_watching_file(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    pub fn is_watching_directory(&self, path: &Path) -> bool {
        self.directories.contains_key(path)
    }

    pub fn file(&self, path: &Path) -> Option<&WatchedPath> {
        self.files.get(path)
    }

    pub fn directory(&self, path: &Path) -> Option<&WatchedPath> {
        self.directories.get(path)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn directory_count(&self) -> usize {
        self.directories.len()
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Whether any watched file lives directly in `dir`.
    ///
    /// Descendants of `dir` are contiguous right after it in path order, so
    /// the scan stops at the first path outside `dir`.
    fn has_file_in(&self, dir: &Path) -> bool {
        self.files
            .range::<Path, _>((Bound::Excluded(dir), Bound::Unbounded))
            .map(|(path, _)| path)
            .take_while(|path| path.starts_with(dir))
            .any(|path| path.parent() == Some(dir))
    }

    fn table_mut(&mut self, kind: PathKind) -> &mut BTreeMap<PathBuf, WatchedPath> {
        match kind {
            PathKind::File => &mut self.files,
            PathKind::Directory => &mut self.directories,
        }
    }
}

/// Clears the in-progress flag of a subscriber list when a fire ends, even
/// if a callback panicked.
struct FireGuard<'a> {
    cell: &'a RefCell<WatchRegistry>,
    kind: PathKind,
    path: &'a Path,
}

impl Drop for FireGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.cell.try_borrow_mut() {
            if let Some(entry) = registry.table_mut(self.kind).get_mut(self.path) {
                entry.subscribers.end_fire();
            }
        }
    }
}

/// Fire `event` to the subscribers of `path`. Returns `false` if the path
/// has no entry.
///
/// No registry borrow is held while callbacks run.
fn fire(cell: &RefCell<WatchRegistry>, kind: PathKind, path: &Path, event: &WatchEvent) -> bool {
    let snapshot: FireSnapshot = {
        let mut registry = cell.borrow_mut();
        match registry.table_mut(kind).get_mut(path) {
            Some(entry) => entry.subscribers.begin_fire(),
            None => return false,
        }
    };

    let stale = {
        let _guard = FireGuard { cell, kind, path };
        snapshot.fire(event)
    };

    if !stale.is_empty() {
        let mut registry = cell.borrow_mut();
        for subscriber in &stale {
            crate::debug_event!("watcher", "dropping stale subscriber", "{}", path.display());
            WatchRegistry::unsubscribe(registry.table_mut(kind), path, subscriber);
        }
    }
    true
}

/// Process one batch of raw changes reported under the native key `dir`.
///
/// Fires file events to the subscribers of each affected watched file, one
/// aggregated directory event to the subscribers of `dir`, and decides
/// whether the key is still needed. A key that is no longer needed is
/// released before returning.
///
/// A deleted entry that is itself a live key is forgotten first: the OS
/// reports a watched directory's own removal under its parent, which is
/// usually not a key.
pub fn process_batch(cell: &RefCell<WatchRegistry>, dir: &Path, changes: &[RawChange]) -> KeyVerdict {
    forget_deleted_keys(cell, dir, changes);

    let watching_dir = {
        let registry = cell.borrow();
        if !registry.has_key(dir) {
            // Key released by an earlier batch; these are leftovers.
            return KeyVerdict::Cancel;
        }
        registry.is_watching_directory(dir)
    };

    let mut entries = Vec::new();
    let mut interested = false;

    for raw in changes {
        let file_event = FileEvent::new(dir.join(&raw.name), raw.change);
        let watched_file = cell.borrow().is_watching_file(&file_event.path);

        if watched_file {
            let event = WatchEvent::File(file_event.clone());
            interested |= fire(cell, PathKind::File, &file_event.path, &event);
        }
        if watching_dir {
            entries.push(file_event);
        }
    }

    if watching_dir {
        let event = WatchEvent::Directory(DirectoryEvent {
            path: dir.to_path_buf(),
            entries,
        });
        interested |= fire(cell, PathKind::Directory, dir, &event);
    }

    if !interested {
        let registry = cell.borrow();
        interested = registry.is_watching_directory(dir) || registry.has_file_in(dir);
    }

    if interested {
        KeyVerdict::Reset
    } else {
        cell.borrow_mut().release_key(dir);
        crate::debug_event!("watcher", "key released", "{}", dir.display());
        KeyVerdict::Cancel
    }
}

fn forget_deleted_keys(cell: &RefCell<WatchRegistry>, dir: &Path, changes: &[RawChange]) {
    let mut registry = cell.borrow_mut();
    for raw in changes.iter().filter(|raw| raw.change == ChangeKind::Deleted) {
        let gone = dir.join(&raw.name);
        if registry.forget_key(&gone) {
            crate::debug_event!("watcher", "key vanished", "{}", gone.display());
        }
    }
}
