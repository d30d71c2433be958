#![forbid(unsafe_code)]

//! Latest-value cache with distinct-until-changed emission.
//!
//! A [`ValueObservable<T>`] remembers the last accepted value and how many
//! values were accepted so far. Observers that attach late receive the
//! current value:
//!
//! | Observer | Receives on activation |
//! |----------|------------------------|
//! | Never attached before | Current value, if anything was ever emitted |
//! | Reattaching | Current value, iff the emission count changed since its last deactivation |
//!
//! Emitting a value equal (`PartialEq`) to the stored one is ignored: the
//! count does not move and nobody is notified.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use rivulet_core::{Observable, ObservableContext, ObservableHook, Observer, ObserverMap, Result};
use tracing::trace;

struct ValueCore<T: 'static> {
    context: ObservableContext<T>,
    value: RefCell<Option<Rc<T>>>,
    count: Cell<u64>,
    last_seen: ObserverMap<T, u64>,
}

impl<T: 'static> ValueCore<T> {
    fn current(&self) -> Option<Rc<T>> {
        self.value.borrow().clone()
    }

    fn replay_to(&self, observer: &Observer<T>) {
        let count = self.count.get();
        let deliver = match self.last_seen.remove(observer) {
            None => count > 0,
            Some(seen) => seen != count,
        };
        if !deliver {
            return;
        }
        if let Some(value) = self.current() {
            trace!(count, "replaying current value");
            self.context.emit_to(observer, &value);
        }
    }
}

struct ValueHook<T: 'static, H> {
    core: Rc<ValueCore<T>>,
    user: H,
}

impl<T: 'static, H: ObservableHook<T>> ObservableHook<T> for ValueHook<T, H> {
    fn on_observed(&self, observer: &Observer<T>) -> Result<()> {
        self.core.replay_to(observer);
        self.user.on_observed(observer)
    }

    fn on_unobserved(&self, observer: &Observer<T>) {
        self.core.last_seen.insert(observer, self.core.count.get());
        self.user.on_unobserved(observer);
    }
}

/// Producer side of a [`ValueObservable`].
pub struct ValueContext<T: 'static> {
    core: Rc<ValueCore<T>>,
}

impl<T: 'static> fmt::Debug for ValueContext<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueContext")
            .field("emission_count", &self.core.count.get())
            .finish()
    }
}

impl<T: PartialEq + 'static> ValueContext<T> {
    /// Store `value` and notify observers, unless it equals the stored
    /// value. Returns whether the value was accepted.
    pub fn emit(&self, value: T) -> bool {
        if self
            .core
            .value
            .borrow()
            .as_deref()
            .is_some_and(|current| *current == value)
        {
            return false;
        }
        let value = Rc::new(value);
        *self.core.value.borrow_mut() = Some(Rc::clone(&value));
        self.core.count.set(self.core.count.get() + 1);
        self.core.context.emit_ref(&value);
        true
    }
}

impl<T: 'static> ValueContext<T> {
    /// Number of accepted emissions.
    #[must_use]
    pub fn emission_count(&self) -> u64 {
        self.core.count.get()
    }

    /// Whether at least one observer is attached.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.core.context.is_observed()
    }

    /// Number of attached observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.core.context.observer_count()
    }
}

/// An observable caching its latest value.
pub struct ValueObservable<T: 'static> {
    observable: Observable<T>,
    core: Rc<ValueCore<T>>,
}

impl<T: 'static> Clone for ValueObservable<T> {
    fn clone(&self) -> Self {
        Self {
            observable: self.observable.clone(),
            core: Rc::clone(&self.core),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for ValueObservable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueObservable")
            .field("value", &self.core.value.borrow())
            .field("emission_count", &self.core.count.get())
            .field("observers", &self.observable.observer_count())
            .finish()
    }
}

impl<T: 'static> ValueObservable<T> {
    /// Create a value observable whose lifecycle hook is built by `factory`.
    ///
    /// The hook runs after the cached value was replayed to the attaching
    /// observer.
    pub fn new<H, F>(factory: F) -> Self
    where
        F: FnOnce(ValueContext<T>) -> H,
        H: ObservableHook<T> + 'static,
    {
        let (observable, core) = Observable::new_with(|context| {
            let core = Rc::new(ValueCore {
                context,
                value: RefCell::new(None),
                count: Cell::new(0),
                last_seen: ObserverMap::new(),
            });
            let user = factory(ValueContext {
                core: Rc::clone(&core),
            });
            let hook = ValueHook {
                core: Rc::clone(&core),
                user,
            };
            (hook, core)
        });
        Self { observable, core }
    }

    /// A value observable with an inert hook, plus its producer side.
    #[must_use]
    pub fn channel() -> (Self, ValueContext<T>) {
        let mut producer = None;
        let observable = Self::new(|context| {
            producer = Some(context);
        });
        let context = match producer {
            Some(context) => context,
            None => ValueContext {
                core: Rc::clone(&observable.core),
            },
        };
        (observable, context)
    }

    /// The current value.
    #[must_use]
    pub fn value(&self) -> Option<Rc<T>> {
        self.core.current()
    }

    /// A copy of the current value.
    #[must_use]
    pub fn get(&self) -> Option<T>
    where
        T: Clone,
    {
        self.core.value.borrow().as_deref().cloned()
    }

    /// Run `f` with the current value.
    pub fn with<R>(&self, f: impl FnOnce(Option<&T>) -> R) -> R {
        let value = self.core.current();
        f(value.as_deref())
    }

    /// Number of accepted emissions.
    #[must_use]
    pub fn emission_count(&self) -> u64 {
        self.core.count.get()
    }

    /// Subscribe with an active observer.
    ///
    /// # Errors
    ///
    /// Returns the user hook's error if it refuses the observer.
    pub fn pipe_to(&self, callback: impl Fn(&T, &Observable<T>) + 'static) -> Result<Observer<T>> {
        self.observable.pipe_to(callback)
    }

    /// The underlying observable.
    #[must_use]
    pub fn as_observable(&self) -> &Observable<T> {
        &self.observable
    }

    /// Number of attached observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.observable.observer_count()
    }

    /// Whether at least one observer is attached.
    #[must_use]
    pub fn is_observed(&self) -> bool {
        self.observable.is_observed()
    }
}
