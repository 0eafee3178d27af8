//! Confinement worker: the single thread that owns the watch registry.
//!
//! Every registry operation is a task executed on this thread. Callers on
//! other threads queue the task and block until it finishes; code already
//! running on the worker (subscriber callbacks, nested calls) runs the task
//! inline against the same registry.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use parking_lot::Mutex;

use super::error::WatchError;
use super::registry::WatchRegistry;

type Task = Box<dyn FnOnce(&RefCell<WatchRegistry>) + Send>;

enum Message {
    Run(Task),
    Shutdown,
}

thread_local! {
    /// Registry owned by the worker running on this thread, if any.
    static CONFINED: RefCell<Option<Rc<RefCell<WatchRegistry>>>> = const { RefCell::new(None) };
}

/// Handle to a running confinement worker.
pub(crate) struct Confinement {
    sender: Sender<Message>,
    worker: ThreadId,
    accepting: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Confinement {
    /// Spawn the worker thread and move `registry` onto it.
    pub fn spawn(name: String, registry: WatchRegistry) -> Result<Self, WatchError> {
        let (sender, receiver) = unbounded();

        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || run(registry, receiver))
            .map_err(|e| WatchError::InitFailed {
                reason: format!("cannot spawn confinement worker: {e}"),
            })?;

        Ok(Self {
            sender,
            worker: handle.thread().id(),
            accepting: AtomicBool::new(true),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Whether the calling thread is this worker.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.worker
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Run `f` against the registry and wait for its result.
    ///
    /// On the worker itself `f` runs inline and panics propagate. From any
    /// other thread a panic inside `f` is caught on the worker and reported
    /// as [`WatchError::TaskPanicked`]; the worker keeps running.
    pub fn call<R, F>(&self, f: F) -> Result<R, WatchError>
    where
        R: Send + 'static,
        F: FnOnce(&RefCell<WatchRegistry>) -> R + Send + 'static,
    {
        if self.is_current() {
            let registry = CONFINED
                .with(|slot| slot.borrow().clone())
                .ok_or(WatchError::ShutDown)?;
            return Ok(f(&*registry));
        }

        if !self.is_accepting() {
            return Err(WatchError::ShutDown);
        }

        let (done_tx, done_rx) = bounded(1);
        let task: Task = Box::new(move |registry| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(registry)));
            let _ = done_tx.send(result.map_err(WatchError::from_panic));
        });

        self.sender
            .send(Message::Run(task))
            .map_err(|_| WatchError::ShutDown)?;

        // Tasks queued behind the shutdown marker are dropped unrun, which
        // closes the completion channel.
        done_rx.recv().map_err(|_| WatchError::ShutDown)?
    }

    /// Stop accepting tasks. Tasks already queued still run.
    pub fn shutdown(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            let _ = self.sender.send(Message::Shutdown);
        }
    }

    /// Wait for the worker to drain and exit. No-op on the worker itself.
    pub fn join(&self) {
        if self.is_current() {
            return;
        }
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                tracing::error!("[watcher] confinement worker panicked");
            }
        }
    }
}

fn run(registry: WatchRegistry, receiver: Receiver<Message>) {
    let registry = Rc::new(RefCell::new(registry));
    CONFINED.with(|slot| *slot.borrow_mut() = Some(Rc::clone(&registry)));
    crate::debug_event!("watcher", "confinement worker started");

    for message in receiver.iter() {
        match message {
            Message::Run(task) => task(&*registry),
            Message::Shutdown => break,
        }
    }

    // Dropping the registry drops the native backend with it.
    CONFINED.with(|slot| slot.borrow_mut().take());
    crate::debug_event!("watcher", "confinement worker stopped");
}
