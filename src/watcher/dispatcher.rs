//! Dispatcher thread: turns raw native events into confined batch
//! processing.
//!
//! The loop blocks on the raw event channel, drains whatever else is already
//! queued, groups the changes by native key (the directory they happened
//! in) and hands each key's batch to the confinement worker, waiting for it
//! to finish before moving on.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, select};

use super::backend::RawBatch;
use super::confinement::Confinement;
use super::error::WatchError;
use super::event::{RenameFilter, translate};
use super::registry::{self, KeyVerdict, RawChange};

/// Changes for one native key, in reported order.
pub(crate) type KeyBatch = (PathBuf, Vec<RawChange>);

pub(crate) struct Dispatcher {
    pub raw: Receiver<RawBatch>,
    pub stop: Receiver<()>,
    pub confinement: Arc<Confinement>,
    pub running: Arc<AtomicBool>,
    /// Upper bound on raw events merged into one drain.
    pub drain_limit: usize,
}

impl Dispatcher {
    pub fn spawn(self, name: String) -> Result<JoinHandle<()>, WatchError> {
        thread::Builder::new()
            .name(name)
            .spawn(move || self.run())
            .map_err(|e| WatchError::InitFailed {
                reason: format!("cannot spawn dispatcher: {e}"),
            })
    }

    fn run(self) {
        crate::debug_event!("watcher", "dispatcher started");
        let mut renames = RenameFilter::new();

        while self.running.load(Ordering::Acquire) {
            let mut pending = select! {
                recv(self.raw) -> batch => match batch {
                    Ok(batch) => batch,
                    Err(_) => break,
                },
                recv(self.stop) -> _ => break,
            };

            while pending.len() < self.drain_limit {
                match self.raw.try_recv() {
                    Ok(batch) => pending.extend(batch),
                    Err(_) => break,
                }
            }

            for (dir, changes) in group_by_key(pending, &mut renames) {
                if !self.running.load(Ordering::Acquire) {
                    break;
                }
                self.dispatch(dir, changes);
            }
        }

        self.running.store(false, Ordering::Release);
        crate::debug_event!("watcher", "dispatcher stopped");
    }

    /// Process one key's batch on the confinement worker and wait for it.
    fn dispatch(&self, dir: PathBuf, changes: Vec<RawChange>) {
        let key = dir.clone();
        let result = self
            .confinement
            .call(move |cell| registry::process_batch(cell, &key, &changes));

        match result {
            Ok(KeyVerdict::Reset) => {
                tracing::trace!("[watcher] key reset: {}", dir.display());
            }
            Ok(KeyVerdict::Cancel) => {
                crate::debug_event!("watcher", "key cancelled", "{}", dir.display());
            }
            Err(WatchError::ShutDown) => {
                crate::debug_event!("watcher", "batch dropped at shutdown", "{}", dir.display());
            }
            Err(e) => {
                // The key stays registered; one bad batch must not stop the loop.
                tracing::error!("[watcher] batch for {} failed: {e}", dir.display());
            }
        }
    }
}

/// Split raw events into per-key batches.
///
/// Keys keep the order in which they were first seen; changes keep their
/// reported order within a key. Errors and overflow notifications are
/// dropped here, as are repeated reports of one rename and a change
/// identical to the one just before it under the same key.
pub(crate) fn group_by_key(pending: RawBatch, renames: &mut RenameFilter) -> Vec<KeyBatch> {
    let mut batches: Vec<KeyBatch> = Vec::new();

    for raw in pending {
        let event = match raw {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("[watcher] native event error: {e}");
                continue;
            }
        };

        if event.need_rescan() {
            crate::debug_event!("watcher", "overflow dropped");
            continue;
        }

        if !renames.admit(&event) {
            tracing::trace!("[watcher] repeated rename dropped: {:?}", event.paths);
            continue;
        }

        for (path, change) in translate(&event) {
            let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
                continue;
            };
            let raw_change = RawChange {
                name: name.to_os_string(),
                change,
            };
            match batches.iter_mut().find(|(key, _)| key == dir) {
                Some((_, changes)) => {
                    if changes.last() != Some(&raw_change) {
                        changes.push(raw_change);
                    }
                }
                None => batches.push((dir.to_path_buf(), vec![raw_change])),
            }
        }
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::watcher::event::ChangeKind;
    use notify::event::{CreateKind, Flag, ModifyKind, RemoveKind, RenameMode};
    use notify::{Event, EventKind};

    fn event(kind: EventKind, path: &str) -> notify::Result<Event> {
        Ok(Event::new(kind).add_path(path.into()))
    }

    fn group(pending: RawBatch) -> Vec<KeyBatch> {
        group_by_key(pending, &mut RenameFilter::new())
    }

    fn change(name: &str, change: ChangeKind) -> RawChange {
        RawChange {
            name: name.into(),
            change,
        }
    }

    #[test]
    fn test_group_preserves_key_and_change_order() {
        let pending = vec![
            event(EventKind::Create(CreateKind::File), "/b/one"),
            event(EventKind::Modify(ModifyKind::Any), "/a/two"),
            event(EventKind::Remove(RemoveKind::File), "/b/three"),
        ];

        let batches = group(pending);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].0, PathBuf::from("/b"));
        assert_eq!(
            batches[0].1,
            vec![
                RawChange {
                    name: "one".into(),
                    change: ChangeKind::Created
                },
                RawChange {
                    name: "three".into(),
                    change: ChangeKind::Deleted
                },
            ]
        );
        assert_eq!(batches[1].0, PathBuf::from("/a"));
    }

    #[test]
    fn test_group_drops_errors_and_overflow() {
        let pending = vec![
            Err(notify::Error::generic("queue read failed")),
            Ok(Event::new(EventKind::Other).set_flag(Flag::Rescan)),
            event(EventKind::Create(CreateKind::File), "/a/x"),
        ];

        let batches = group(pending);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].1.len(), 1);
    }

    #[test]
    fn test_root_path_has_no_key() {
        let batches = group(vec![event(EventKind::Modify(ModifyKind::Any), "/")]);
        assert!(batches.is_empty());
    }

    #[test]
    fn test_rename_reported_three_ways_yields_one_pair() {
        let name = |mode| EventKind::Modify(ModifyKind::Name(mode));
        let pending = vec![
            Ok(Event::new(name(RenameMode::From))
                .add_path("/d/tmp".into())
                .set_tracker(7)),
            Ok(Event::new(name(RenameMode::To))
                .add_path("/d/a".into())
                .set_tracker(7)),
            Ok(Event::new(name(RenameMode::Both))
                .add_path("/d/tmp".into())
                .add_path("/d/a".into())
                .set_tracker(7)),
        ];

        let batches = group(pending);
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0].1,
            vec![
                change("tmp", ChangeKind::Deleted),
                change("a", ChangeKind::Created)
            ]
        );
    }

    #[test]
    fn test_rename_pair_in_later_drain_is_dropped() {
        let mut renames = RenameFilter::new();
        let first = group_by_key(
            vec![Ok(Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)))
                .add_path("/d/tmp".into())
                .set_tracker(9))],
            &mut renames,
        );
        assert_eq!(first[0].1, vec![change("tmp", ChangeKind::Deleted)]);

        let second = group_by_key(
            vec![Ok(Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                .add_path("/d/tmp".into())
                .add_path("/d/a".into())
                .set_tracker(9))],
            &mut renames,
        );
        assert!(second.is_empty());
    }

    #[test]
    fn test_consecutive_identical_changes_coalesce() {
        let pending = vec![
            event(EventKind::Modify(ModifyKind::Any), "/d/a"),
            event(EventKind::Modify(ModifyKind::Any), "/d/a"),
            event(EventKind::Modify(ModifyKind::Any), "/d/b"),
            event(EventKind::Modify(ModifyKind::Any), "/d/a"),
        ];

        let batches = group(pending);
        assert_eq!(
            batches[0].1,
            vec![
                change("a", ChangeKind::Modified),
                change("b", ChangeKind::Modified),
                change("a", ChangeKind::Modified),
            ]
        );
    }
}
