#![forbid(unsafe_code)]

//! Built-in source generators for [`FiniteStateObservable`].
//!
//! | Source | Mode | Driven by |
//! |--------|------|-----------|
//! | [`from_iter`] / [`from_try_iter`] | `Pausable` | a [`Scheduler`] turn per resume |
//! | [`from_stream`] | `Pausable` | a reader task on a [`LocalSpawn`] executor |
//! | [`from_future`] | `OneShot` | a task on a [`LocalSpawn`] executor |
//!
//! Pausable sources never pull while unobserved. Iterator sources stop
//! between two items; stream sources may already be waiting on the stream
//! when the last observer leaves, so the item read then is buffered and
//! delivered first on the next resume.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Poll, Waker};

use futures::future::{self, AbortHandle, Abortable};
use futures::stream::{Stream, StreamExt};
use futures::task::{LocalSpawn, LocalSpawnExt};
use rivulet_core::Scheduler;
use tracing::{trace, warn};

use super::{FiniteStateContext, FiniteStateObservable, FiniteStateOptions, SourceHook};
use crate::cancel::{CancelReason, CancelToken, TokenObserver};

// ---------------------------------------------------------------------------
// Iterators
// ---------------------------------------------------------------------------

/// A pausable source over an iterator.
///
/// Items are pulled one at a time, only while observed, on a turn of
/// `scheduler` after each resume. The observable completes when the iterator
/// is exhausted.
pub fn from_iter<I, S>(iter: I, scheduler: S) -> FiniteStateObservable<I::Item, Infallible>
where
    I: IntoIterator,
    I::IntoIter: 'static,
    I::Item: 'static,
    S: Scheduler + 'static,
{
    from_try_iter(iter.into_iter().map(Ok), scheduler)
}

/// Like [`from_iter`], but an `Err` item terminates the observable in the
/// `Error` state.
pub fn from_try_iter<I, T, E, S>(iter: I, scheduler: S) -> FiniteStateObservable<T, E>
where
    I: IntoIterator<Item = Result<T, E>>,
    I::IntoIter: 'static,
    T: 'static,
    E: 'static,
    S: Scheduler + 'static,
{
    let iter = iter.into_iter();
    FiniteStateObservable::new(FiniteStateOptions::pausable(), move |context| IterSource {
        pump: Rc::new(IterPump {
            context,
            iter: RefCell::new(Some(iter)),
            scheduler,
            active: Cell::new(false),
            scheduled: Cell::new(false),
            draining: Cell::new(false),
        }),
    })
}

struct IterPump<I, T: 'static, E: 'static, S> {
    context: FiniteStateContext<T, E>,
    iter: RefCell<Option<I>>,
    scheduler: S,
    active: Cell<bool>,
    scheduled: Cell<bool>,
    draining: Cell<bool>,
}

impl<I, T, E, S> IterPump<I, T, E, S>
where
    I: Iterator<Item = Result<T, E>> + 'static,
    T: 'static,
    E: 'static,
    S: Scheduler + 'static,
{
    fn schedule(self: &Rc<Self>) {
        // A running drain picks the resumed pulls up itself.
        if self.draining.get() || self.scheduled.replace(true) {
            return;
        }
        let pump = Rc::downgrade(self);
        self.scheduler.defer(Box::new(move || {
            if let Some(pump) = Weak::upgrade(&pump) {
                pump.scheduled.set(false);
                pump.drain();
            }
        }));
    }

    fn drain(&self) {
        if self.draining.replace(true) {
            return;
        }
        let mut pulled = 0usize;
        while self.active.get() && self.context.is_next() {
            let item = self.iter.borrow_mut().as_mut().and_then(Iterator::next);
            let delivered = match item {
                Some(Ok(value)) => self.context.next(value),
                Some(Err(error)) => self.context.error(error),
                None => self.context.complete(),
            };
            pulled += 1;
            if delivered.is_err() {
                break;
            }
        }
        self.draining.set(false);
        trace!(pulled, "iterator source drained");
    }
}

struct IterSource<I, T: 'static, E: 'static, S> {
    pump: Rc<IterPump<I, T, E, S>>,
}

impl<I, T, E, S> SourceHook for IterSource<I, T, E, S>
where
    I: Iterator<Item = Result<T, E>> + 'static,
    T: 'static,
    E: 'static,
    S: Scheduler + 'static,
{
    fn resume(&self) {
        self.pump.active.set(true);
        self.pump.schedule();
    }

    fn pause(&self) {
        self.pump.active.set(false);
    }

    fn release(&self) {
        self.pump.active.set(false);
        let iter = self.pump.iter.borrow_mut().take();
        drop(iter);
    }
}

// ---------------------------------------------------------------------------
// Streams
// ---------------------------------------------------------------------------

type BoxStream<T, E> = Pin<Box<dyn Stream<Item = Result<T, E>>>>;

/// A pausable source over a fallible stream.
///
/// A reader task is spawned on `spawner` at the first resume. It waits
/// while the observable is unobserved; an item that arrives after the last
/// observer left is held and delivered first on the next resume. Release
/// aborts the reader.
pub fn from_stream<St, T, E, Sp>(stream: St, spawner: Sp) -> FiniteStateObservable<T, E>
where
    St: Stream<Item = Result<T, E>> + 'static,
    T: 'static,
    E: 'static,
    Sp: LocalSpawn + 'static,
{
    FiniteStateObservable::new(FiniteStateOptions::pausable(), move |context| StreamSource {
        pump: Rc::new(StreamPump {
            context,
            active: Cell::new(false),
            held: RefCell::new(None),
            waker: RefCell::new(None),
        }),
        stream: RefCell::new(Some(Box::pin(stream) as BoxStream<T, E>)),
        spawner,
        abort: RefCell::new(None),
    })
}

struct StreamPump<T: 'static, E: 'static> {
    context: FiniteStateContext<T, E>,
    active: Cell<bool>,
    held: RefCell<Option<T>>,
    waker: RefCell<Option<Waker>>,
}

impl<T: 'static, E: 'static> StreamPump<T, E> {
    fn deliver(&self, value: T) {
        if self.active.get() {
            let _ = self.context.next(value);
        } else {
            trace!("stream item held until resume");
            *self.held.borrow_mut() = Some(value);
        }
    }

    async fn gate(&self) {
        future::poll_fn(|cx| {
            if self.active.get() {
                Poll::Ready(())
            } else {
                *self.waker.borrow_mut() = Some(cx.waker().clone());
                Poll::Pending
            }
        })
        .await;
    }

    async fn read(self: Rc<Self>, mut stream: BoxStream<T, E>) {
        loop {
            self.gate().await;
            match stream.next().await {
                Some(Ok(value)) => self.deliver(value),
                Some(Err(error)) => {
                    let _ = self.context.error(error);
                    break;
                }
                None => {
                    let _ = self.context.complete();
                    break;
                }
            }
        }
    }
}

struct StreamSource<T: 'static, E: 'static, Sp> {
    pump: Rc<StreamPump<T, E>>,
    stream: RefCell<Option<BoxStream<T, E>>>,
    spawner: Sp,
    abort: RefCell<Option<AbortHandle>>,
}

impl<T: 'static, E: 'static, Sp: LocalSpawn> SourceHook for StreamSource<T, E, Sp> {
    fn resume(&self) {
        self.pump.active.set(true);
        let held = self.pump.held.borrow_mut().take();
        if let Some(value) = held {
            let _ = self.pump.context.next(value);
        }
        let waker = self.pump.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }

        let Some(stream) = self.stream.borrow_mut().take() else {
            return;
        };
        let (handle, registration) = AbortHandle::new_pair();
        let reader = Abortable::new(Rc::clone(&self.pump).read(stream), registration);
        match self.spawner.spawn_local(async move {
            let _ = reader.await;
        }) {
            Ok(()) => {
                trace!("stream reader spawned");
                *self.abort.borrow_mut() = Some(handle);
            }
            Err(err) => {
                warn!(%err, "failed to spawn stream reader");
                let _ = self
                    .pump
                    .context
                    .cancel(CancelReason::new(format!("spawn failed: {err}")));
            }
        }
    }

    fn pause(&self) {
        self.pump.active.set(false);
    }

    fn release(&self) {
        self.pump.active.set(false);
        let handle = self.abort.borrow_mut().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        let stream = self.stream.borrow_mut().take();
        let held = self.pump.held.borrow_mut().take();
        let waker = self.pump.waker.borrow_mut().take();
        drop((stream, held, waker));
    }
}

// ---------------------------------------------------------------------------
// Futures
// ---------------------------------------------------------------------------

type BoxFuture<T, E> = Pin<Box<dyn Future<Output = Result<T, E>>>>;

/// A one-shot source over a fallible future.
///
/// The future is spawned on `spawner` at the first observation. `Ok(value)`
/// emits `value` then completes; `Err(error)` terminates in `Error`. If
/// `token` is cancelled first, the observable terminates in `Cancel` with
/// the token's reason and the in-flight task is aborted.
pub fn from_future<F, T, E, Sp>(
    task: F,
    spawner: Sp,
    token: Option<&CancelToken>,
) -> FiniteStateObservable<T, E>
where
    F: Future<Output = Result<T, E>> + 'static,
    T: 'static,
    E: 'static,
    Sp: LocalSpawn + 'static,
{
    FiniteStateObservable::new(FiniteStateOptions::one_shot(), move |context| {
        let watcher = token.and_then(|token| watch_token(token, &context));
        FutureSource {
            context,
            task: RefCell::new(Some(Box::pin(task) as BoxFuture<T, E>)),
            spawner,
            abort: RefCell::new(None),
            watcher: RefCell::new(watcher),
        }
    })
}

fn watch_token<T: 'static, E: 'static>(
    token: &CancelToken,
    context: &FiniteStateContext<T, E>,
) -> Option<TokenObserver> {
    if let Some(reason) = token.reason() {
        let _ = context.cancel(reason.clone());
        return None;
    }
    let context = context.clone();
    token
        .on_cancel(move |reason| {
            let _ = context.cancel(reason.clone());
        })
        .ok()
}

struct FutureSource<T: 'static, E: 'static, Sp> {
    context: FiniteStateContext<T, E>,
    task: RefCell<Option<BoxFuture<T, E>>>,
    spawner: Sp,
    abort: RefCell<Option<AbortHandle>>,
    watcher: RefCell<Option<TokenObserver>>,
}

impl<T: 'static, E: 'static, Sp: LocalSpawn> SourceHook for FutureSource<T, E, Sp> {
    fn resume(&self) {
        let Some(task) = self.task.borrow_mut().take() else {
            return;
        };
        let context = self.context.clone();
        let (handle, registration) = AbortHandle::new_pair();
        let settle = Abortable::new(
            async move {
                match task.await {
                    Ok(value) => {
                        if context.next(value).is_ok() {
                            let _ = context.complete();
                        }
                    }
                    Err(error) => {
                        let _ = context.error(error);
                    }
                }
            },
            registration,
        );
        match self.spawner.spawn_local(async move {
            let _ = settle.await;
        }) {
            Ok(()) => *self.abort.borrow_mut() = Some(handle),
            Err(err) => {
                warn!(%err, "failed to spawn future source");
                let _ = self
                    .context
                    .cancel(CancelReason::new(format!("spawn failed: {err}")));
            }
        }
    }

    fn release(&self) {
        let handle = self.abort.borrow_mut().take();
        if let Some(handle) = handle {
            trace!("aborting future source");
            handle.abort();
        }
        let task = self.task.borrow_mut().take();
        drop(task);
        let watcher = self.watcher.borrow_mut().take();
        if let Some(watcher) = watcher {
            watcher.deactivate();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
