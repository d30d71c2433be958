#![forbid(unsafe_code)]

//! Emission points and their construction-time capability.
//!
//! # Design
//!
//! An [`Observable<T>`] owns an ordered collection of attached
//! [`Observer<T>`]s and a hook supplied once at construction. The hook is
//! built by a factory that receives the observable's one and only
//! [`ObservableContext<T>`]: the capability to emit. `ObservableContext` has
//! no public constructor, so only the code that built the observable can
//! push values into it.
//!
//! Storage is `Rc`-shared and single-threaded. Cloning an `Observable` hands
//! out another handle to the **same** collection and hook.
//!
//! # Invariants
//!
//! 1. An observer is in the collection iff it is activated against this
//!    observable; duplicates are never stored.
//! 2. `on_observed` fires after the observer is registered; `on_unobserved`
//!    fires after it is removed. Each fires exactly once per transition.
//! 3. Emission walks a snapshot taken when the emission starts, in
//!    attachment order. Observers attached during the walk are not visited;
//!    observers removed during the walk still receive the in-flight value.
//! 4. No `RefCell` borrow is held while a hook or callback runs, so hooks and
//!    callbacks may re-enter `activate`, `deactivate` and `emit` freely.
//!
//! # Failure Modes
//!
//! | Mode | Condition | Behavior |
//! |------|-----------|----------|
//! | Hook rejects | `on_observed` returns `Err` | Registration rolled back, error returned to the activating caller |
//! | Hook panics | Producer bug | Panic unwinds through `activate`/`emit`; nothing is swallowed |
//! | Emit without observers | Nobody attached | No-op |
//! | Emit after drop | Every handle dropped | No-op (context holds a weak reference) |

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::trace;

use crate::error::Result;
use crate::observer::Observer;

/// Lifecycle hook invoked by an [`Observable`] for every activation and
/// deactivation event.
///
/// Producers inspect [`ObservableContext::observer_count`] themselves to
/// detect the first/last transitions.
pub trait ObservableHook<T: 'static> {
    /// Called after `observer` was added to the collection.
    ///
    /// # Errors
    ///
    /// Returning an error refuses the observer: it is removed again and the
    /// error propagates to the caller of `activate`/`observe`/`pipe_to`.
    fn on_observed(&self, observer: &Observer<T>) -> Result<()> {
        let _ = observer;
        Ok(())
    }

    /// Called after `observer` was removed from the collection.
    fn on_unobserved(&self, observer: &Observer<T>) {
        let _ = observer;
    }
}

/// The inert hook.
impl<T: 'static> ObservableHook<T> for () {}

impl<T: 'static, H: ObservableHook<T> + ?Sized> ObservableHook<T> for Rc<H> {
    fn on_observed(&self, observer: &Observer<T>) -> Result<()> {
        (**self).on_observed(observer)
    }

    fn on_unobserved(&self, observer: &Observer<T>) {
        (**self).on_unobserved(observer);
    }
}

impl<T: 'static, H: ObservableHook<T> + ?Sized> ObservableHook<T> for Box<H> {
    fn on_observed(&self, observer: &Observer<T>) -> Result<()> {
        (**self).on_observed(observer)
    }

    fn on_unobserved(&self, observer: &Observer<T>) {
        (**self).on_unobserved(observer);
    }
}

/// Adapts a pair of closures into an [`ObservableHook`].
pub struct FnHook<O, U> {
    on_observed: O,
    on_unobserved: U,
}

impl<O, U> FnHook<O, U> {
    /// Create a hook from an `on_observed` and an `on_unobserved` closure.
    #[must_use]
    pub fn new<T>(on_observed: O, on_unobserved: U) -> Self
    where
        T: 'static,
        O: Fn(&Observer<T>) -> Result<()>,
        U: Fn(&Observer<T>),
    {
        Self {
            on_observed,
            on_unobserved,
        }
    }
}

impl<O, U> fmt::Debug for FnHook<O, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHook").finish_non_exhaustive()
    }
}

impl<T, O, U> ObservableHook<T> for FnHook<O, U>
where
    T: 'static,
    O: Fn(&Observer<T>) -> Result<()>,
    U: Fn(&Observer<T>),
{
    fn on_observed(&self, observer: &Observer<T>) -> Result<()> {
        (self.on_observed)(observer)
    }

    fn on_unobserved(&self, observer: &Observer<T>) {
        (self.on_unobserved)(observer);
    }
}

/// Shared interior for [`Observable<T>`].
struct ObservableInner<T: 'static> {
    observers: RefCell<Vec<Observer<T>>>,
    /// Set once, right after the factory returns.
    hook: OnceCell<Box<dyn ObservableHook<T>>>,
}

/// A shared emission point.
pub struct Observable<T: 'static> {
    inner: Rc<ObservableInner<T>>,
}

// Manual Clone: shares the same Rc.
impl<T: 'static> Clone for Observable<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> PartialEq for Observable<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: 'static> Eq for Observable<T> {}

impl<T: 'static> fmt::Debug for Observable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

impl<T: 'static> Observable<T> {
    /// Create an observable whose hook is built by `factory`.
    ///
    /// `factory` runs exactly once, synchronously, and is the only place the
    /// emission context is ever handed out.
    pub fn new<H, F>(factory: F) -> Self
    where
        F: FnOnce(ObservableContext<T>) -> H,
        H: ObservableHook<T> + 'static,
    {
        Self::new_with(|context| (factory(context), ())).0
    }

    /// Like [`Observable::new`], but the factory also returns a value that is
    /// handed back to the constructing scope.
    ///
    /// Specializations use this to keep the context for themselves while
    /// installing an internal hook.
    pub fn new_with<H, R, F>(factory: F) -> (Self, R)
    where
        F: FnOnce(ObservableContext<T>) -> (H, R),
        H: ObservableHook<T> + 'static,
    {
        let inner = Rc::new(ObservableInner {
            observers: RefCell::new(Vec::new()),
            hook: OnceCell::new(),
        });
        let context = ObservableContext {
            inner: Rc::downgrade(&inner),
        };
        let (hook, extra) = factory(context);
        // The cell is private and this is its only writer.
        let _ = inner.hook.set(Box::new(hook));
        (Self { inner }, extra)
    }

    /// Create an observer bound to this observable and activate it.
    ///
    /// # Errors
    ///
    /// Returns the hook's error if it refuses the new observer.
    pub fn pipe_to(&self, callback: impl Fn(&T, &Observable<T>) + 'static) -> Result<Observer<T>> {
        let observer = Observer::new(callback);
        observer.observe(self)?.activate()?;
        Ok(observer)
    }

    /// Number of currently attached observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.observers.borrow().len()
    }

    /// Whether at least one observer is attached.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        !self.inner.observers.borrow().is_empty()
    }

    /// Whether `observer` is currently attached.
    #[must_use]
    pub fn contains(&self, observer: &Observer<T>) -> bool {
        self.inner
            .observers
            .borrow()
            .iter()
            .any(|attached| attached.ptr_eq(observer))
    }

    /// Snapshot of the attached observers, in attachment order.
    #[must_use]
    pub fn observers(&self) -> Vec<Observer<T>> {
        self.inner.observers.borrow().clone()
    }

    /// Whether both handles point at the same observable.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register `observer` and fire `on_observed`.
    ///
    /// Attaching an already attached observer is a no-op.
    pub(crate) fn attach(&self, observer: &Observer<T>) -> Result<()> {
        {
            let mut observers = self.inner.observers.borrow_mut();
            if observers.iter().any(|attached| attached.ptr_eq(observer)) {
                return Ok(());
            }
            observers.push(observer.clone());
            trace!(observers = observers.len(), "observer attached");
        }
        if let Some(hook) = self.inner.hook.get() {
            if let Err(err) = hook.on_observed(observer) {
                trace!(%err, "observer rejected by hook");
                drop(self.remove(observer));
                return Err(err);
            }
        }
        Ok(())
    }

    /// Remove `observer` and fire `on_unobserved`.
    ///
    /// Detaching an observer that is not attached is a no-op.
    pub(crate) fn detach(&self, observer: &Observer<T>) {
        let Some(removed) = self.remove(observer) else {
            return;
        };
        trace!(observers = self.observer_count(), "observer detached");
        if let Some(hook) = self.inner.hook.get() {
            hook.on_unobserved(observer);
        }
        drop(removed);
    }

    /// Take `observer` out of the collection. The returned handle is dropped
    /// by the caller once the borrow is released.
    fn remove(&self, observer: &Observer<T>) -> Option<Observer<T>> {
        let mut observers = self.inner.observers.borrow_mut();
        let position = observers
            .iter()
            .position(|attached| attached.ptr_eq(observer))?;
        Some(observers.remove(position))
    }
}

/// The emission capability of one [`Observable`].
///
/// Only the hook factory passed to [`Observable::new`] ever receives one.
/// It holds a weak reference: once every handle to the observable is gone,
/// emitting is a no-op.
pub struct ObservableContext<T: 'static> {
    inner: Weak<ObservableInner<T>>,
}

impl<T: 'static> fmt::Debug for ObservableContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableContext")
            .field("observer_count", &self.observer_count())
            .finish()
    }
}

impl<T: 'static> ObservableContext<T> {
    /// The observable this context emits into, if it is still alive.
    #[must_use]
    pub fn observable(&self) -> Option<Observable<T>> {
        self.inner.upgrade().map(|inner| Observable { inner })
    }

    /// Emit `value` to every attached observer.
    pub fn emit(&self, value: T) {
        self.emit_ref(&value);
    }

    /// Emit a borrowed value to every attached observer.
    ///
    /// The observer list is snapshotted before the first callback runs.
    pub fn emit_ref(&self, value: &T) {
        let Some(observable) = self.observable() else {
            return;
        };
        let snapshot = observable.observers();
        trace!(observers = snapshot.len(), "emit");
        for observer in &snapshot {
            observer.deliver(value, &observable);
        }
    }

    /// Deliver `value` to a single observer, if it is currently attached.
    ///
    /// Returns whether the value was delivered. Caching specializations use
    /// this to replay state to a freshly attached observer.
    pub fn emit_to(&self, observer: &Observer<T>, value: &T) -> bool {
        let Some(observable) = self.observable() else {
            return false;
        };
        if !observable.contains(observer) {
            return false;
        }
        observer.deliver(value, &observable);
        true
    }

    /// Number of observers currently attached to the observable.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observable()
            .map_or(0, |observable| observable.observer_count())
    }

    /// Whether at least one observer is attached.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.observer_count() > 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
