#![forbid(unsafe_code)]

//! Cooperative deferral of work to a later turn of the host's run loop.
//!
//! The engine never spawns threads or timers. Components that must not act
//! synchronously (pausable sources resuming their pulls, completion policies
//! detaching observers "on a later tick") hand a closure to a [`Scheduler`].
//! The host decides when that turn happens:
//!
//! - [`TaskQueue`]: FIFO queue drained explicitly with
//!   [`TaskQueue::run_until_idle`] (or one task at a time with
//!   [`TaskQueue::run_once`]).
//! - [`Immediate`]: runs the task on the caller's stack.
//!
//! # Invariants
//!
//! 1. Tasks run in the order they were deferred.
//! 2. A task deferred while the queue is draining runs in the same drain,
//!    after every task queued before it.
//! 3. The queue is never borrowed while a task runs.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce()>;

/// Something that runs deferred tasks on a later turn.
pub trait Scheduler {
    /// Queue `task` for a later turn.
    fn defer(&self, task: Task);
}

impl<S: Scheduler + ?Sized> Scheduler for Rc<S> {
    fn defer(&self, task: Task) {
        (**self).defer(task);
    }
}

/// Runs every task synchronously, on the caller's stack.
#[derive(Debug, Clone, Copy, Default)]
pub struct Immediate;

impl Scheduler for Immediate {
    fn defer(&self, task: Task) {
        task();
    }
}

/// FIFO task queue drained by the host.
///
/// Cloning shares the same queue.
#[derive(Clone, Default)]
pub struct TaskQueue {
    tasks: Rc<RefCell<VecDeque<Task>>>,
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

impl TaskQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    /// Whether no task is queued.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.tasks.borrow().is_empty()
    }

    /// Run the oldest queued task. Returns `false` if the queue was empty.
    pub fn run_once(&self) -> bool {
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// Run tasks until the queue is empty, including tasks queued meanwhile.
    ///
    /// Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0usize;
        while self.run_once() {
            ran += 1;
        }
        if ran > 0 {
            trace!(ran, "task queue drained");
        }
        ran
    }

    /// Like [`TaskQueue::run_until_idle`], but stops after `limit` tasks.
    ///
    /// Useful to bound self-rescheduling producers.
    pub fn run_at_most(&self, limit: usize) -> usize {
        let mut ran = 0usize;
        while ran < limit && self.run_once() {
            ran += 1;
        }
        ran
    }
}

impl Scheduler for TaskQueue {
    fn defer(&self, task: Task) {
        self.tasks.borrow_mut().push_back(task);
    }
}
