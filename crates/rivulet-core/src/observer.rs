#![forbid(unsafe_code)]

//! Observers: callbacks that watch one or more observables.
//!
//! An [`Observer<T>`] holds a callback, the list of observables it watches
//! and an `activated` flag. While activated, it is attached to every watched
//! observable; while deactivated, to none. Both transitions are idempotent
//! and may be triggered re-entrantly from hooks and callbacks: each step is
//! resolved against the observable's *current* membership.
//!
//! [`WeakObserver`] and [`ObserverMap`] let specializations keep
//! per-observer state keyed by identity without keeping observers alive.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::error::Result;
use crate::observable::Observable;

type Callback<T> = Box<dyn Fn(&T, &Observable<T>)>;

struct ObserverInner<T: 'static> {
    callback: Callback<T>,
    observables: RefCell<Vec<Observable<T>>>,
    activated: Cell<bool>,
}

/// A callback bound to any number of observables.
///
/// Cloning produces another handle to the same observer.
pub struct Observer<T: 'static> {
    inner: Rc<ObserverInner<T>>,
}

impl<T: 'static> Clone for Observer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> PartialEq for Observer<T> {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl<T: 'static> Eq for Observer<T> {}

impl<T: 'static> fmt::Debug for Observer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observer")
            .field("activated", &self.is_activated())
            .field("observables", &self.inner.observables.borrow().len())
            .finish()
    }
}

impl<T: 'static> Observer<T> {
    /// Create an inactive observer that watches nothing yet.
    pub fn new(callback: impl Fn(&T, &Observable<T>) + 'static) -> Self {
        Self {
            inner: Rc::new(ObserverInner {
                callback: Box::new(callback),
                observables: RefCell::new(Vec::new()),
                activated: Cell::new(false),
            }),
        }
    }

    /// Start watching `observable`.
    ///
    /// Watching an observable twice is a no-op. If the observer is already
    /// activated, it attaches immediately.
    ///
    /// # Errors
    ///
    /// Returns the observable hook's error if it refuses this observer; the
    /// observable is then not watched.
    pub fn observe(&self, observable: &Observable<T>) -> Result<&Self> {
        let added = {
            let mut observables = self.inner.observables.borrow_mut();
            if observables.iter().any(|watched| watched.ptr_eq(observable)) {
                false
            } else {
                observables.push(observable.clone());
                true
            }
        };
        if added && self.is_activated() {
            if let Err(err) = observable.attach(self) {
                drop(self.forget(observable));
                return Err(err);
            }
        }
        Ok(self)
    }

    /// Watch every observable in `observables`, stopping at the first refusal.
    ///
    /// # Errors
    ///
    /// Returns the first hook error; observables before it remain watched.
    pub fn observe_all<'a>(
        &self,
        observables: impl IntoIterator<Item = &'a Observable<T>>,
    ) -> Result<&Self> {
        for observable in observables {
            self.observe(observable)?;
        }
        Ok(self)
    }

    /// Stop watching `observable`, detaching from it if activated.
    pub fn unobserve(&self, observable: &Observable<T>) -> &Self {
        if let Some(removed) = self.forget(observable) {
            if self.is_activated() {
                removed.detach(self);
            }
        }
        self
    }

    /// Attach to every watched observable.
    ///
    /// Activating an active observer is a no-op.
    ///
    /// # Errors
    ///
    /// If any hook refuses the observer, the observer is fully deactivated
    /// again and the error is returned.
    pub fn activate(&self) -> Result<&Self> {
        if self.inner.activated.replace(true) {
            return Ok(self);
        }
        for observable in self.observables() {
            // A hook may have deactivated us re-entrantly.
            if !self.is_activated() {
                break;
            }
            if let Err(err) = observable.attach(self) {
                self.deactivate();
                return Err(err);
            }
        }
        Ok(self)
    }

    /// Detach from every watched observable.
    ///
    /// Deactivating an inactive observer is a no-op.
    pub fn deactivate(&self) -> &Self {
        if !self.inner.activated.replace(false) {
            return self;
        }
        for observable in self.observables() {
            // A hook may have re-activated us re-entrantly.
            if self.is_activated() {
                break;
            }
            observable.detach(self);
        }
        self
    }

    /// Whether the observer is activated.
    #[must_use]
    pub fn is_activated(&self) -> bool {
        self.inner.activated.get()
    }

    /// Snapshot of the watched observables.
    #[must_use]
    pub fn observables(&self) -> Vec<Observable<T>> {
        self.inner.observables.borrow().clone()
    }

    /// Whether `observable` is among the watched observables.
    #[must_use]
    pub fn is_observing(&self, observable: &Observable<T>) -> bool {
        self.inner
            .observables
            .borrow()
            .iter()
            .any(|watched| watched.ptr_eq(observable))
    }

    /// Whether both handles point at the same observer.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// A handle that does not keep the observer alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakObserver<T> {
        WeakObserver {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub(crate) fn deliver(&self, value: &T, observable: &Observable<T>) {
        (self.inner.callback)(value, observable);
    }

    fn forget(&self, observable: &Observable<T>) -> Option<Observable<T>> {
        let mut observables = self.inner.observables.borrow_mut();
        let position = observables
            .iter()
            .position(|watched| watched.ptr_eq(observable))?;
        Some(observables.remove(position))
    }
}

/// Non-owning observer handle, compared by identity.
pub struct WeakObserver<T: 'static> {
    inner: Weak<ObserverInner<T>>,
}

impl<T: 'static> Clone for WeakObserver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: 'static> fmt::Debug for WeakObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakObserver")
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl<T: 'static> WeakObserver<T> {
    /// Upgrade to a strong handle if the observer is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<Observer<T>> {
        self.inner.upgrade().map(|inner| Observer { inner })
    }

    /// Whether this handle refers to `observer`.
    #[must_use]
    pub fn is(&self, observer: &Observer<T>) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Rc::as_ptr(&observer.inner))
    }

    /// Whether the observer has not been dropped yet.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

/// Side table of per-observer values keyed by observer identity.
///
/// Entries hold weak handles; entries of dropped observers are pruned lazily
/// on insertion.
pub struct ObserverMap<T: 'static, V> {
    entries: RefCell<Vec<(WeakObserver<T>, V)>>,
}

impl<T: 'static, V> Default for ObserverMap<T, V> {
    fn default() -> Self {
        Self {
            entries: RefCell::new(Vec::new()),
        }
    }
}

impl<T: 'static, V: fmt::Debug> fmt::Debug for ObserverMap<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.borrow();
        f.debug_list()
            .entries(entries.iter().map(|(_, value)| value))
            .finish()
    }
}

impl<T: 'static, V> ObserverMap<T, V> {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value stored for `observer`.
    #[must_use]
    pub fn get(&self, observer: &Observer<T>) -> Option<V>
    where
        V: Clone,
    {
        self.entries
            .borrow()
            .iter()
            .find(|(key, _)| key.is(observer))
            .map(|(_, value)| value.clone())
    }

    /// Whether a value is stored for `observer`.
    #[must_use]
    pub fn contains(&self, observer: &Observer<T>) -> bool {
        self.entries.borrow().iter().any(|(key, _)| key.is(observer))
    }

    /// Store `value` for `observer`, returning the previous value.
    pub fn insert(&self, observer: &Observer<T>, value: V) -> Option<V> {
        let mut entries = self.entries.borrow_mut();
        entries.retain(|(key, _)| key.is_alive());
        if let Some((_, slot)) = entries.iter_mut().find(|(key, _)| key.is(observer)) {
            return Some(std::mem::replace(slot, value));
        }
        entries.push((observer.downgrade(), value));
        None
    }

    /// Remove the value stored for `observer`.
    pub fn remove(&self, observer: &Observer<T>) -> Option<V> {
        let mut entries = self.entries.borrow_mut();
        let position = entries.iter().position(|(key, _)| key.is(observer))?;
        Some(entries.remove(position).1)
    }

    /// Number of entries whose observer is still alive.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|(key, _)| key.is_alive())
            .count()
    }

    /// Whether no live entry is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
